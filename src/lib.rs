//! # Weather Station Core Library
//!
//! This library holds the data model and the components of an unattended
//! e-paper weather station. The station wakes once an hour, decides what the
//! panel needs, fetches a fresh forecast when it draws, composes a fixed
//! four-slot layout and hands the finished frame to the panel driver.
//!
//! ## Design Philosophy
//!
//! ### Bounded memory
//! - **One frame buffer**: the [`pixel_buffer::PixelBuffer`] is allocated once at
//!   start-up and moved between the composer and the controller every cycle.
//! - **One response buffer**: the forecast fetcher owns a `Vec<u8>` with a hard
//!   ceiling; a larger response fails the attempt instead of growing the heap.
//! - **Fixed record count**: a successful fetch is a `[ForecastRecord; 4]`, so the
//!   "exactly four" rule is checked by the type system.
//!
//! ### Three failure domains
//! 1. **Network**: retried a bounded number of times inside [`forecast`], then the
//!    controller degrades and leaves the panel alone until the next wake.
//! 2. **Panel**: a hardware fault is reported and never retried in the same cycle.
//! 3. **Clock**: the scheduling decision in [`refresh_policy`] is a pure function
//!    of the current time and [`RefreshState`], so a reboot re-derives everything.
//!
//! ## Core Types
//! - [`Location`]: coordinates of the forecast point
//! - [`ForecastHorizon`]: the four fixed display slots
//! - [`ForecastRecord`]: one forecast point per horizon
//! - [`RefreshState`]: bookkeeping of the last panel refreshes
//! - [`FetchOutcome`]: the result of one fetch cycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod clock;
pub mod composer;
pub mod config;
pub mod controller;
pub mod display_driver;
pub mod epaper;
pub mod forecast;
pub mod http;
pub mod icons;
pub mod images;
pub mod pixel_buffer;
pub mod refresh_policy;

/// A forecast point, selected once at start-up from the configured locations.
///
/// # Example
/// ```
/// use weather_station_lib::Location;
///
/// let drammen = Location {
///     name: "drammen".to_string(),
///     latitude: 59.7396,
///     longitude: 10.2046,
///     altitude: 3.0,
/// };
/// assert_eq!(drammen.display_name(), "Drammen");
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Configuration key, e.g. "drammen"
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Metres above sea level
    pub altitude: f64,
}

impl Location {
    /// Human-readable name for the header: the key with its first letter capitalised.
    pub fn display_name(&self) -> String {
        let mut chars = self.name.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

/// The four forecast offsets shown left to right on the panel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ForecastHorizon {
    Now,
    PlusFourHours,
    PlusEightHours,
    TomorrowNoon,
}

impl ForecastHorizon {
    /// Display order; index `i` is slot `i` counted from the left.
    pub const ALL: [ForecastHorizon; 4] = [
        ForecastHorizon::Now,
        ForecastHorizon::PlusFourHours,
        ForecastHorizon::PlusEightHours,
        ForecastHorizon::TomorrowNoon,
    ];

    /// Zero-based slot position on the panel.
    pub fn slot(self) -> usize {
        match self {
            ForecastHorizon::Now => 0,
            ForecastHorizon::PlusFourHours => 1,
            ForecastHorizon::PlusEightHours => 2,
            ForecastHorizon::TomorrowNoon => 3,
        }
    }
}

/// One forecast point for one horizon.
///
/// Records are rebuilt from scratch on every successful fetch and dropped
/// after composition; nothing is merged across cycles.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    pub horizon: ForecastHorizon,
    /// Valid time of the forecast point (UTC)
    pub timestamp: DateTime<Utc>,
    /// Air temperature in °C
    pub temperature: f32,
    /// Precipitation in mm over the period following `timestamp`
    pub precipitation_amount: f32,
    /// Service symbol, e.g. "partlycloudy_day"
    pub symbol_code: String,
    /// Wind speed in m/s
    pub wind_speed: f32,
    /// True when the service had no point at or after the target and the last
    /// known point was carried forward
    pub extrapolated: bool,
}

/// Panel refresh bookkeeping carried between loop iterations.
///
/// `None` is the "never" sentinel used at boot. Nothing here survives a power
/// loss; after a restart the policy re-derives its decision from the clock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RefreshState {
    pub last_partial_refresh: Option<DateTime<Utc>>,
    pub last_full_refresh: Option<DateTime<Utc>>,
}

impl RefreshState {
    /// State at boot: nothing has ever been drawn.
    pub fn never() -> Self {
        Self::default()
    }
}

/// Coarse failure class carried by [`FetchOutcome::Failure`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// Connect, DNS, timeout or HTTP status problems
    Network,
    /// Malformed or unexpected response shape
    Parse,
}

/// Result of one fetch cycle.
#[derive(Clone, Debug, PartialEq)]
pub enum FetchOutcome {
    Success([ForecastRecord; 4]),
    Failure {
        kind: FailureKind,
        retries_exhausted: bool,
    },
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success(_))
    }
}
