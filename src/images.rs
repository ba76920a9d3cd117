//! Large illustrative image for the "Now" slot.
//!
//! The full-size icon set does not fit on the device, so an image service
//! serves each symbol as a raw packed bitmap:
//!
//! ```text
//! GET {image_url}?requested-icon={symbol_code}
//! -> 1152 bytes: 96x96 pixels, 1 bit per pixel, MSB first, 1 = ink
//! ```
//!
//! Every failure here is an [`AssetError`] and the composer answers it with
//! the small icon. There are no retries; the image is decorative.

use crate::http::{HttpRequest, HttpTransport};
use crate::icons::{AssetError, MonoBitmap};
use log::debug;
use std::future::Future;

/// Edge length of the large image
pub const LARGE_ICON_SIZE: u32 = 96;

/// Exact body length of a large image
pub const LARGE_ICON_BYTES: usize = (LARGE_ICON_SIZE / 8 * LARGE_ICON_SIZE) as usize;

/// Provides the large image for a symbol code.
pub trait ImageSource {
    fn large_icon(
        &mut self,
        symbol_code: &str,
    ) -> impl Future<Output = Result<MonoBitmap, AssetError>>;
}

/// No image service configured; the "Now" slot always uses the small icon.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoImageSource;

impl ImageSource for NoImageSource {
    async fn large_icon(&mut self, _symbol_code: &str) -> Result<MonoBitmap, AssetError> {
        Err(AssetError::Unavailable("no image service configured".to_string()))
    }
}

/// Fetches large images over HTTP into a buffer sized for exactly one image.
pub struct HttpImageSource<T> {
    transport: T,
    url: String,
    identity: String,
    buffer: Vec<u8>,
}

impl<T: HttpTransport> HttpImageSource<T> {
    pub fn new(transport: T, url: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            transport,
            url: url.into(),
            identity: identity.into(),
            buffer: Vec::with_capacity(LARGE_ICON_BYTES),
        }
    }
}

impl<T: HttpTransport> ImageSource for HttpImageSource<T> {
    async fn large_icon(&mut self, symbol_code: &str) -> Result<MonoBitmap, AssetError> {
        let query = [("requested-icon", symbol_code.to_string())];
        let request = HttpRequest {
            url: &self.url,
            query: &query,
            identity: &self.identity,
        };

        let result = self
            .transport
            .get_into(&request, &mut self.buffer, LARGE_ICON_BYTES)
            .await
            .map_err(|e| AssetError::Unavailable(e.to_string()))
            .and_then(|()| {
                MonoBitmap::from_bytes(LARGE_ICON_SIZE, LARGE_ICON_SIZE, &self.buffer)
            });
        self.buffer.clear();

        if result.is_ok() {
            debug!("Loaded large image for '{}'", symbol_code);
        }
        result
    }
}
