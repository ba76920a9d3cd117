//! # Station Controller
//!
//! The orchestration loop. Each wake runs one cycle:
//!
//! ```text
//! Idle -> Deciding -> Fetching -> Composing -> Refreshing -> Idle
//!                        |
//!                        +-> Degraded -> Idle   (fetch failed, panel untouched)
//! ```
//!
//! and then sleeps until the next top of the UTC hour plus a random jitter.
//! A cycle always finishes before the next decision is made.
//!
//! The frame buffer lives in the controller between cycles and is moved into
//! the composer and back, then lent to the driver. [`RefreshState`] only
//! changes after the driver reports a completed refresh.

use crate::clock::ClockSource;
use crate::composer::DisplayComposer;
use crate::config::{Config, MAX_WAKE_JITTER_SECS};
use crate::display_driver::{DisplayDriver, DisplayError, RefreshMode};
use crate::forecast::ForecastFetcher;
use crate::http::HttpTransport;
use crate::images::ImageSource;
use crate::pixel_buffer::{Color, PixelBuffer};
use crate::refresh_policy::{RefreshAction, RefreshPolicy};
use crate::{FailureKind, FetchOutcome, Location, RefreshState};
use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info};
use rand::Rng;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Deciding,
    Fetching,
    Composing,
    Refreshing,
    /// Fetch failed; the panel keeps showing the previous forecast
    Degraded,
}

/// How a cycle ended.
#[derive(Clone, Debug, PartialEq)]
pub enum CycleOutcome {
    /// The policy said no refresh was due
    UpToDate,
    Refreshed(RefreshMode),
    Degraded {
        kind: FailureKind,
        retries_exhausted: bool,
    },
    /// The panel reported an error; it will be tried again next wake
    HardwareFault(DisplayError),
}

#[derive(Clone, Debug, PartialEq)]
pub struct CycleReport {
    /// Wall-clock time the decision was made
    pub at: DateTime<Utc>,
    pub action: RefreshAction,
    pub outcome: CycleOutcome,
}

/// Controller knobs, usually taken from [`Config`].
#[derive(Clone, Debug)]
pub struct ControllerSettings {
    pub panel_width: u32,
    pub panel_height: u32,
    pub border: Option<Color>,
    pub full_refresh_hour_utc: u32,
    pub wake_jitter_secs: u64,
}

impl ControllerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            panel_width: config.display.width,
            panel_height: config.display.height,
            border: config.display.border,
            full_refresh_hour_utc: config.schedule.full_refresh_hour_utc,
            wake_jitter_secs: config.schedule.wake_jitter_secs,
        }
    }
}

pub struct StationController<T, C, I, D> {
    fetcher: ForecastFetcher<T, C>,
    composer: DisplayComposer<I>,
    driver: D,
    clock: C,
    policy: RefreshPolicy,
    location: Location,
    refresh_state: RefreshState,
    /// `None` only while a cycle has the buffer checked out
    buffer: Option<PixelBuffer>,
    panel_size: (u32, u32),
    border: Option<Color>,
    wake_jitter_secs: u64,
    state: ControllerState,
}

impl<T, C, I, D> StationController<T, C, I, D>
where
    T: HttpTransport,
    C: ClockSource,
    I: ImageSource,
    D: DisplayDriver,
{
    /// Allocates the frame buffer; it is reused for the life of the controller.
    pub fn new(
        fetcher: ForecastFetcher<T, C>,
        composer: DisplayComposer<I>,
        driver: D,
        clock: C,
        location: Location,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            fetcher,
            composer,
            driver,
            clock,
            policy: RefreshPolicy::new(settings.full_refresh_hour_utc),
            location,
            refresh_state: RefreshState::never(),
            buffer: Some(PixelBuffer::new(settings.panel_width, settings.panel_height)),
            panel_size: (settings.panel_width, settings.panel_height),
            border: settings.border,
            wake_jitter_secs: settings.wake_jitter_secs,
            state: ControllerState::Idle,
        }
    }

    /// Start from known bookkeeping instead of the boot sentinel.
    pub fn with_refresh_state(mut self, refresh_state: RefreshState) -> Self {
        self.refresh_state = refresh_state;
        self
    }

    pub fn refresh_state(&self) -> RefreshState {
        self.refresh_state
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    fn transition(&mut self, next: ControllerState) {
        debug!("Controller {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Run one decide/fetch/compose/refresh cycle.
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.transition(ControllerState::Deciding);
        let now = self.clock.now();
        let action = self.policy.decide(now, self.refresh_state);
        debug!("Decision at {}: {:?}", now.format("%Y-%m-%d %H:%M:%S"), action);

        let mode = match action {
            RefreshAction::NoOp => {
                self.transition(ControllerState::Idle);
                return CycleReport {
                    at: now,
                    action,
                    outcome: CycleOutcome::UpToDate,
                };
            }
            RefreshAction::Partial => RefreshMode::Partial,
            RefreshAction::Full => RefreshMode::Full,
        };

        self.transition(ControllerState::Fetching);
        let records = match self.fetcher.fetch(&self.location).await {
            FetchOutcome::Success(records) => records,
            FetchOutcome::Failure {
                kind,
                retries_exhausted,
            } => {
                self.transition(ControllerState::Degraded);
                error!(
                    "Forecast unavailable ({:?}, retries exhausted: {}); keeping the current display until the next wake",
                    kind, retries_exhausted
                );
                self.transition(ControllerState::Idle);
                return CycleReport {
                    at: now,
                    action,
                    outcome: CycleOutcome::Degraded {
                        kind,
                        retries_exhausted,
                    },
                };
            }
        };

        self.transition(ControllerState::Composing);
        let (width, height) = self.panel_size;
        let buffer = self
            .buffer
            .take()
            .unwrap_or_else(|| PixelBuffer::new(width, height));
        let buffer = self
            .composer
            .compose(&self.location, &records, now, buffer)
            .await;
        drop(records);

        self.transition(ControllerState::Refreshing);
        let result = self.driver.refresh(&buffer, mode, self.border);
        self.buffer = Some(buffer);

        let outcome = match result {
            Ok(()) => {
                // Stamped with the decision time, so it covers the hour it was decided in
                self.refresh_state = RefreshPolicy::record(self.refresh_state, action, now);
                info!("{:?} refresh complete for {}", mode, self.location.name);
                CycleOutcome::Refreshed(mode)
            }
            Err(e) => {
                error!("{:?} refresh failed, not retrying this cycle: {}", mode, e);
                CycleOutcome::HardwareFault(e)
            }
        };

        self.transition(ControllerState::Idle);
        CycleReport {
            at: now,
            action,
            outcome,
        }
    }

    /// Next top of the UTC hour plus a uniform jitter in `[0, wake_jitter_secs]`.
    /// The jitter never reaches a full hour, so no hour goes without a wake.
    pub fn next_wake(&self) -> DateTime<Utc> {
        let bound = self.wake_jitter_secs.min(MAX_WAKE_JITTER_SECS);
        let jitter = if bound == 0 {
            0
        } else {
            rand::rng().random_range(0..=bound)
        };
        self.policy.next_wake(self.clock.now()) + Duration::seconds(jitter as i64)
    }

    /// One cycle followed by the sleep until the next wake.
    pub async fn step(&mut self) -> CycleReport {
        let report = self.run_cycle().await;
        let wake = self.next_wake();
        info!("Sleeping until {}", wake.format("%Y-%m-%d %H:%M:%S UTC"));
        self.clock.sleep_until(wake).await;
        report
    }

    /// The station's main loop. Never returns; a device reset is the only exit.
    pub async fn run(&mut self) {
        info!(
            "Weather station running for {} ({:.4}, {:.4})",
            self.location.display_name(),
            self.location.latitude,
            self.location.longitude
        );
        loop {
            self.step().await;
        }
    }
}
