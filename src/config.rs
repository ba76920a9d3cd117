//! # Configuration Management
//!
//! This module handles loading and parsing configuration from the
//! weather-config.toml file. It provides a centralized way to configure the
//! forecast location, the upstream services, the refresh schedule and the
//! panel wiring.

use crate::pixel_buffer::Color;
use crate::Location;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Default configuration file, relative to the working directory
pub const CONFIG_FILE: &str = "weather-config.toml";

/// Largest accepted wake jitter; a full hour would skip that hour's refresh
pub const MAX_WAKE_JITTER_SECS: u64 = 3599;

/// Identity sent until the operator configures their own contact address
const PLACEHOLDER_IDENTITY: &str = "epaper-weather-station/0.1 PLACEHOLDER@example.com";

#[derive(Error, Debug)]
pub enum ConfigError {
    /// The selected location key has no entry in `[locations]`
    #[error("unknown location '{0}', add it under [locations] in the config file")]
    UnknownLocation(String),

    #[error("config IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config file: {0}")]
    Toml(#[from] toml::de::Error),

    /// A value that would make the station misbehave at runtime
    #[error("invalid [{section}] {key}: {reason}")]
    Invalid {
        section: &'static str,
        key: &'static str,
        reason: String,
    },
}

/// Application configuration loaded from weather-config.toml.
/// Whole sections left out of the file take their defaults.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub station: StationConfig,
    pub service: ServiceConfig,
    pub schedule: ScheduleConfig,
    pub display: DisplayConfig,
    /// Known forecast points keyed by name
    pub locations: BTreeMap<String, Coordinates>,
}

/// What this station shows and how it identifies itself
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct StationConfig {
    /// Key into `locations`
    pub location: String,
    /// User-Agent value; the forecast service requires a contact address here
    pub client_identity: String,
    /// Local time offset used for labels and "tomorrow noon".
    /// Daylight saving time is not detected; adjust this by hand.
    pub utc_offset_minutes: i32,
    pub labels: Labels,
}

/// Fixed texts drawn on the panel
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Labels {
    pub now: String,
    pub tomorrow: String,
    pub updated: String,
}

/// Upstream services and the network budget per fetch
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ServiceConfig {
    pub forecast_url: String,
    /// Large-icon service; the "Now" slot uses the small icon when unset
    pub image_url: Option<String>,
    /// Per-attempt timeout in seconds
    pub timeout_secs: u64,
    /// Ceiling for a response body; larger responses fail the attempt
    pub max_response_bytes: usize,
    /// Total attempts per fetch cycle
    pub max_attempts: u32,
    /// Backoff base; attempt `n` waits `n * retry_delay_secs` before retrying
    pub retry_delay_secs: u64,
}

/// Refresh schedule
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ScheduleConfig {
    /// UTC hour of the daily full clear
    pub full_refresh_hour_utc: u32,
    /// Upper bound of the random delay added after each hour boundary
    pub wake_jitter_secs: u64,
}

/// Panel geometry and wiring
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    /// Border colour applied on every refresh, if any
    pub border: Option<Color>,
    pub hardware: HardwareConfig,
}

/// SPI device and GPIO line offsets of the panel
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct HardwareConfig {
    pub spi_device: String,
    pub gpiochip: String,
    pub dc_pin: u32,
    pub rst_pin: u32,
    pub busy_pin: u32,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

impl Default for Config {
    fn default() -> Self {
        let mut locations = BTreeMap::new();
        locations.insert(
            "drammen".to_string(),
            Coordinates {
                latitude: 59.7396,
                longitude: 10.2046,
                altitude: 3.0,
            },
        );
        locations.insert(
            "oslo".to_string(),
            Coordinates {
                latitude: 59.9108,
                longitude: 10.7577,
                altitude: 4.0,
            },
        );

        Config {
            station: StationConfig {
                location: "drammen".to_string(),
                client_identity: PLACEHOLDER_IDENTITY.to_string(),
                utc_offset_minutes: 60,
                labels: Labels {
                    now: "Now".to_string(),
                    tomorrow: "Tomorrow".to_string(),
                    updated: "Updated".to_string(),
                },
            },
            service: ServiceConfig {
                forecast_url: "https://api.met.no/weatherapi/locationforecast/2.0/compact"
                    .to_string(),
                image_url: None,
                timeout_secs: 20,
                max_response_bytes: 192 * 1024,
                max_attempts: 3,
                retry_delay_secs: 10,
            },
            schedule: ScheduleConfig {
                full_refresh_hour_utc: 2,
                wake_jitter_secs: 60,
            },
            display: DisplayConfig {
                width: 400,  // Waveshare 4.2" display
                height: 300, // Waveshare 4.2" display
                border: None,
                hardware: HardwareConfig {
                    spi_device: "/dev/spidev0.0".to_string(),
                    gpiochip: "/dev/gpiochip0".to_string(),
                    dc_pin: 25,
                    rst_pin: 17,
                    busy_pin: 24,
                },
            },
            locations,
        }
    }
}

impl Config {
    /// Load configuration from the specified path.
    /// A missing file yields the default configuration; a malformed one is an error.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        match fs::read_to_string(&path) {
            Ok(contents) => {
                let config = toml::from_str::<Config>(&contents)?;
                log::info!(
                    "Loaded configuration from {} for location '{}'",
                    path.as_ref().display(),
                    config.station.location
                );
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!(
                    "No config file at {}, using default configuration (Drammen)",
                    path.as_ref().display()
                );
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve the selected location key.
    pub fn location(&self) -> Result<Location, ConfigError> {
        let key = self.station.location.to_lowercase();
        let coords = self
            .locations
            .get(&key)
            .ok_or_else(|| ConfigError::UnknownLocation(self.station.location.clone()))?;
        Ok(Location {
            name: key,
            latitude: coords.latitude,
            longitude: coords.longitude,
            altitude: coords.altitude,
        })
    }

    /// Reject values that would only fail later, inside the unattended loop.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let display = &self.display;
        if display.width == 0 || display.height == 0 {
            return Err(invalid(
                "display",
                "width/height",
                format!("{}x{} has no pixels", display.width, display.height),
            ));
        }
        if display.width % 8 != 0 {
            return Err(invalid(
                "display",
                "width",
                format!("{} is not a multiple of 8", display.width),
            ));
        }
        if self.schedule.full_refresh_hour_utc > 23 {
            return Err(invalid(
                "schedule",
                "full_refresh_hour_utc",
                format!("{} is not an hour of the day", self.schedule.full_refresh_hour_utc),
            ));
        }
        if self.schedule.wake_jitter_secs > MAX_WAKE_JITTER_SECS {
            return Err(invalid(
                "schedule",
                "wake_jitter_secs",
                format!(
                    "{} exceeds {}; the wake would skip an hour",
                    self.schedule.wake_jitter_secs, MAX_WAKE_JITTER_SECS
                ),
            ));
        }
        self.location()?;
        Ok(())
    }

    /// True while the shipped placeholder identity is still in use.
    pub fn has_placeholder_identity(&self) -> bool {
        self.station.client_identity.contains("PLACEHOLDER")
    }
}

fn invalid(section: &'static str, key: &'static str, reason: String) -> ConfigError {
    ConfigError::Invalid {
        section,
        key,
        reason,
    }
}
