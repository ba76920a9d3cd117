//! Bounded HTTP GET shared by the forecast and image clients.
//!
//! A transport writes the response body into a caller-owned buffer and stops
//! at a hard byte ceiling, so a misbehaving server can never grow the heap
//! past what the caller reserved.

use log::debug;
use reqwest::header;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// DNS, TCP or TLS failure before a response arrived
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("request timed out")]
    Timeout,

    /// Non-200 response
    #[error("HTTP status {0}")]
    Status(u16),

    /// Body exceeded the caller's ceiling; the rest was not read
    #[error("response larger than {limit} bytes")]
    TooLarge { limit: usize },

    /// Connection dropped while reading the body
    #[error("body read failed: {0}")]
    Body(String),
}

impl TransportError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Client errors other than 408 and 429 mean the request itself is wrong
    /// (bad identity header, bad coordinates) and repeating it only burns quota.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Status(code) => {
                !(400..500).contains(code) || *code == 408 || *code == 429
            }
            _ => true,
        }
    }
}

/// One outbound GET.
#[derive(Debug, Clone)]
pub struct HttpRequest<'a> {
    pub url: &'a str,
    pub query: &'a [(&'a str, String)],
    /// Sent as `User-Agent`
    pub identity: &'a str,
}

/// Performs a GET and streams the body into `body`.
pub trait HttpTransport {
    /// On success `body` holds the complete response (previous contents are
    /// cleared first) and is at most `limit` bytes long.
    fn get_into(
        &self,
        request: &HttpRequest<'_>,
        body: &mut Vec<u8>,
        limit: usize,
    ) -> impl Future<Output = Result<(), TransportError>>;
}

/// reqwest-backed transport.
///
/// A fresh client is built for every request and dropped afterwards, with
/// `Connection: close`, so no socket stays open through the hour-long sleeps.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn client(&self, identity: &str) -> Result<reqwest::Client, TransportError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::CONNECTION, header::HeaderValue::from_static("close"));

        reqwest::Client::builder()
            .user_agent(identity.to_string())
            .default_headers(headers)
            .connect_timeout(self.timeout)
            .timeout(self.timeout)
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| TransportError::Connect(e.to_string()))
    }
}

fn classify(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else if error.is_body() || error.is_decode() {
        TransportError::Body(error.to_string())
    } else {
        TransportError::Connect(error.to_string())
    }
}

impl HttpTransport for ReqwestTransport {
    async fn get_into(
        &self,
        request: &HttpRequest<'_>,
        body: &mut Vec<u8>,
        limit: usize,
    ) -> Result<(), TransportError> {
        body.clear();
        let client = self.client(request.identity)?;

        let mut response = client
            .get(request.url)
            .query(request.query)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        debug!("GET {} -> {}", request.url, status);
        if status != reqwest::StatusCode::OK {
            return Err(TransportError::Status(status.as_u16()));
        }

        if let Some(length) = response.content_length() {
            if length as usize > limit {
                return Err(TransportError::TooLarge { limit });
            }
        }

        while let Some(chunk) = response.chunk().await.map_err(classify)? {
            if body.len() + chunk.len() > limit {
                body.clear();
                return Err(TransportError::TooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }

        Ok(())
    }
}
