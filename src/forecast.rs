//! # Forecast Fetching
//!
//! This module fetches the location forecast from MET Norway and reduces the
//! hourly timeseries to the four points the panel shows.
//!
//! ## Data Source
//!
//! ### MET Norway Locationforecast 2.0 (compact)
//! - **URL**: https://api.met.no/weatherapi/locationforecast/2.0/compact
//! - **Query**: `lat`, `lon` (4 decimals) and `altitude` (whole metres)
//! - **Identity**: the terms of service require a `User-Agent` naming the
//!   application and a contact address; it comes from configuration
//! - **Format**: JSON, `properties.timeseries[]` with hourly steps for about
//!   two days, then 6-hourly steps
//!
//! ### Data Processing Pipeline
//! 1. **Fetch**: one GET into the fetcher's bounded response buffer
//! 2. **Parse**: lenient serde structs; unknown fields are ignored and every
//!    field is optional, entries without a temperature are skipped
//! 3. **Select**: for each horizon, the first point at or after its target
//! 4. **Extrapolate**: a horizon past the end of the series reuses the last
//!    point, so a short series still yields four records
//!
//! ## Error Handling
//! Transport and parse failures are retried with a linearly growing delay up
//! to the configured attempt count. Client errors (4xx other than 408/429)
//! stop immediately since repeating the same request cannot succeed. Either
//! way the caller only ever sees a [`FetchOutcome`].

use crate::clock::ClockSource;
use crate::config::Config;
use crate::http::{HttpRequest, HttpTransport, TransportError};
use crate::{FailureKind, FetchOutcome, ForecastHorizon, ForecastRecord, Location};
use chrono::{DateTime, Duration, DurationRound, FixedOffset, NaiveTime, Offset, Utc};
use log::{debug, error, info, warn};
use serde::Deserialize;
use thiserror::Error;

/// Symbol used when the service gives none; resolves to the fallback icon.
pub const UNKNOWN_SYMBOL: &str = "unknown";

/// Errors from a single fetch attempt.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ForecastError {
    #[error("network: {0}")]
    Network(#[from] TransportError),

    /// Body was not the expected JSON shape or held no usable points
    #[error("parse failed: {0}")]
    Parse(String),
}

impl ForecastError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ForecastError::Network(_) => FailureKind::Network,
            ForecastError::Parse(_) => FailureKind::Parse,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ForecastError::Network(e) => e.is_retryable(),
            ForecastError::Parse(_) => true,
        }
    }
}

// -- MET JSON structures --

#[derive(Deserialize)]
struct MetResponse {
    properties: Option<MetProperties>,
}

#[derive(Deserialize)]
struct MetProperties {
    timeseries: Option<Vec<MetTimestep>>,
}

#[derive(Deserialize)]
struct MetTimestep {
    time: Option<DateTime<Utc>>,
    data: Option<MetData>,
}

#[derive(Deserialize)]
struct MetData {
    instant: Option<MetInstant>,
    next_1_hours: Option<MetPeriod>,
    next_6_hours: Option<MetPeriod>,
    next_12_hours: Option<MetPeriod>,
}

#[derive(Deserialize)]
struct MetInstant {
    details: Option<MetInstantDetails>,
}

#[derive(Deserialize)]
struct MetInstantDetails {
    air_temperature: Option<f32>,
    wind_speed: Option<f32>,
}

#[derive(Deserialize)]
struct MetPeriod {
    summary: Option<MetSummary>,
    details: Option<MetPeriodDetails>,
}

#[derive(Deserialize)]
struct MetSummary {
    symbol_code: Option<String>,
}

#[derive(Deserialize)]
struct MetPeriodDetails {
    precipitation_amount: Option<f32>,
}

/// One usable timeseries entry.
#[derive(Clone, Debug, PartialEq)]
pub struct ForecastPoint {
    pub time: DateTime<Utc>,
    pub temperature: f32,
    pub precipitation_amount: f32,
    pub symbol_code: String,
    pub wind_speed: f32,
}

impl MetTimestep {
    fn into_point(self) -> Option<ForecastPoint> {
        let time = self.time?;
        let data = self.data?;
        let details = data.instant.and_then(|i| i.details)?;
        let temperature = details.air_temperature?;

        // Shortest period first; later steps in the series only carry the longer ones
        let periods = [data.next_1_hours, data.next_6_hours, data.next_12_hours];
        let symbol_code = periods
            .iter()
            .flatten()
            .find_map(|p| p.summary.as_ref().and_then(|s| s.symbol_code.clone()))
            .unwrap_or_else(|| UNKNOWN_SYMBOL.to_string());
        let precipitation_amount = periods
            .iter()
            .flatten()
            .find_map(|p| p.details.as_ref().and_then(|d| d.precipitation_amount))
            .unwrap_or(0.0);

        Some(ForecastPoint {
            time,
            temperature,
            precipitation_amount,
            symbol_code,
            wind_speed: details.wind_speed.unwrap_or(0.0),
        })
    }
}

/// Parse a compact forecast body into usable points sorted by time.
pub fn parse_timeseries(body: &[u8]) -> Result<Vec<ForecastPoint>, ForecastError> {
    let response: MetResponse =
        serde_json::from_slice(body).map_err(|e| ForecastError::Parse(e.to_string()))?;

    let timeseries = response
        .properties
        .and_then(|p| p.timeseries)
        .ok_or_else(|| ForecastError::Parse("missing properties.timeseries".to_string()))?;

    let total = timeseries.len();
    let mut points: Vec<ForecastPoint> = timeseries
        .into_iter()
        .filter_map(MetTimestep::into_point)
        .collect();
    points.sort_by_key(|p| p.time);

    if points.len() < total {
        debug!("Skipped {} unusable timeseries entries", total - points.len());
    }
    if points.is_empty() {
        return Err(ForecastError::Parse("no usable timeseries entries".to_string()));
    }
    Ok(points)
}

/// Target instant of every horizon, in display order.
///
/// The first three are anchored to the start of the current UTC hour, which is
/// where the service places its hourly steps. Tomorrow-noon is 12:00 local time
/// on the next local calendar day.
pub fn horizon_targets(now: DateTime<Utc>, utc_offset_minutes: i32) -> [DateTime<Utc>; 4] {
    let hour_start = now.duration_trunc(Duration::hours(1)).unwrap_or(now);

    let offset = FixedOffset::east_opt(utc_offset_minutes * 60).unwrap_or(Utc.fix());
    let local_today = now.with_timezone(&offset).date_naive();
    let tomorrow_noon = local_today
        .succ_opt()
        .unwrap_or(local_today)
        .and_time(NaiveTime::from_hms_opt(12, 0, 0).unwrap_or(NaiveTime::MIN))
        .and_local_timezone(offset)
        .single()
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(hour_start + Duration::hours(24));

    ForecastHorizon::ALL.map(|horizon| match horizon {
        ForecastHorizon::Now => hour_start,
        ForecastHorizon::PlusFourHours => hour_start + Duration::hours(4),
        ForecastHorizon::PlusEightHours => hour_start + Duration::hours(8),
        ForecastHorizon::TomorrowNoon => tomorrow_noon,
    })
}

/// Pick one record per horizon from time-sorted points.
///
/// Each horizon takes the first point at or after its target. When the series
/// ends before a target, the last point is carried forward to the target time
/// and the record is marked as extrapolated.
pub fn select_records(
    points: &[ForecastPoint],
    targets: &[DateTime<Utc>; 4],
) -> Result<[ForecastRecord; 4], ForecastError> {
    let last = points
        .last()
        .ok_or_else(|| ForecastError::Parse("no usable timeseries entries".to_string()))?;

    Ok(ForecastHorizon::ALL.map(|horizon| {
        let target = targets[horizon.slot()];
        match points.iter().find(|p| p.time >= target) {
            Some(point) => ForecastRecord {
                horizon,
                timestamp: point.time,
                temperature: point.temperature,
                precipitation_amount: point.precipitation_amount,
                symbol_code: point.symbol_code.clone(),
                wind_speed: point.wind_speed,
                extrapolated: false,
            },
            None => ForecastRecord {
                horizon,
                timestamp: target,
                temperature: last.temperature,
                precipitation_amount: last.precipitation_amount,
                symbol_code: last.symbol_code.clone(),
                wind_speed: last.wind_speed,
                extrapolated: true,
            },
        }
    }))
}

/// Fetcher settings, usually taken from [`Config`].
#[derive(Clone, Debug)]
pub struct FetcherSettings {
    pub url: String,
    pub identity: String,
    pub utc_offset_minutes: i32,
    pub max_attempts: u32,
    pub retry_delay: std::time::Duration,
    pub max_response_bytes: usize,
}

impl FetcherSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            url: config.service.forecast_url.clone(),
            identity: config.station.client_identity.clone(),
            utc_offset_minutes: config.station.utc_offset_minutes,
            max_attempts: config.service.max_attempts,
            retry_delay: std::time::Duration::from_secs(config.service.retry_delay_secs),
            max_response_bytes: config.service.max_response_bytes,
        }
    }
}

/// Fetches and reduces forecasts, retrying within one cycle.
///
/// Owns the response buffer for its whole life: it is reserved once at the
/// configured ceiling and cleared, never reallocated, between attempts.
pub struct ForecastFetcher<T, C> {
    transport: T,
    clock: C,
    settings: FetcherSettings,
    buffer: Vec<u8>,
}

impl<T: HttpTransport, C: ClockSource> ForecastFetcher<T, C> {
    pub fn new(transport: T, clock: C, settings: FetcherSettings) -> Self {
        let buffer = Vec::with_capacity(settings.max_response_bytes);
        Self {
            transport,
            clock,
            settings,
            buffer,
        }
    }

    /// Capacity of the response buffer; stays at the ceiling across cycles.
    pub fn buffer_capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Fetch the four horizon records for `location`.
    pub async fn fetch(&mut self, location: &Location) -> FetchOutcome {
        let query = [
            ("lat", format!("{:.4}", location.latitude)),
            ("lon", format!("{:.4}", location.longitude)),
            ("altitude", format!("{:.0}", location.altitude)),
        ];
        let max_attempts = self.settings.max_attempts.max(1);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self.attempt(&query).await;
            self.buffer.clear();

            let failure = match result {
                Ok(records) => {
                    info!(
                        "Fetched forecast for {} on attempt {}/{}",
                        location.name, attempt, max_attempts
                    );
                    return FetchOutcome::Success(records);
                }
                Err(failure) => failure,
            };

            if !failure.is_retryable() {
                error!("Forecast request rejected, not retrying: {}", failure);
                return FetchOutcome::Failure {
                    kind: failure.kind(),
                    retries_exhausted: false,
                };
            }
            if attempt >= max_attempts {
                error!("Forecast fetch failed after {} attempts: {}", attempt, failure);
                return FetchOutcome::Failure {
                    kind: failure.kind(),
                    retries_exhausted: true,
                };
            }

            let delay = self.settings.retry_delay * attempt;
            warn!(
                "Forecast attempt {}/{} failed: {}; retrying in {}s",
                attempt,
                max_attempts,
                failure,
                delay.as_secs()
            );
            self.clock.sleep(delay).await;
        }
    }

    async fn attempt(
        &mut self,
        query: &[(&str, String)],
    ) -> Result<[ForecastRecord; 4], ForecastError> {
        let request = HttpRequest {
            url: &self.settings.url,
            query,
            identity: &self.settings.identity,
        };
        self.transport
            .get_into(&request, &mut self.buffer, self.settings.max_response_bytes)
            .await?;

        let points = parse_timeseries(&self.buffer)?;
        let targets = horizon_targets(self.clock.now(), self.settings.utc_offset_minutes);
        select_records(&points, &targets)
    }
}
