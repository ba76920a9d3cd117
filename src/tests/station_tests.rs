//! End-to-end cycles of the station controller.

use chrono::{DateTime, Duration, DurationRound, TimeZone, Utc};
use serde_json::json;
use std::cell::RefCell;
use std::rc::Rc;
use weather_station_lib::{
    clock::{ClockSource, ManualClock},
    composer::DisplayComposer,
    config::Labels,
    controller::{ControllerSettings, ControllerState, CycleOutcome, StationController},
    display_driver::{DisplayDriver, DisplayError, RefreshMode},
    forecast::{FetcherSettings, ForecastFetcher},
    http::{HttpRequest, HttpTransport, TransportError},
    icons::{AssetError, IconSet, MonoBitmap},
    images::{ImageSource, LARGE_ICON_SIZE},
    pixel_buffer::{Color, PixelBuffer},
    refresh_policy::RefreshAction,
    FailureKind, Location, RefreshState,
};

fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, day, hour, minute, 0).unwrap()
}

/// Forecast service that answers with a 40-hour hourly series starting at
/// the top of the clock's current hour, or fails while `down` is set.
#[derive(Clone)]
struct FakeForecastService {
    clock: ManualClock,
    down: Rc<RefCell<bool>>,
    requests: Rc<RefCell<u32>>,
}

impl FakeForecastService {
    fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            down: Rc::new(RefCell::new(false)),
            requests: Rc::new(RefCell::new(0)),
        }
    }

    fn set_down(&self, down: bool) {
        *self.down.borrow_mut() = down;
    }

    fn requests(&self) -> u32 {
        *self.requests.borrow()
    }

    fn body(&self) -> Vec<u8> {
        let start = self
            .clock
            .now()
            .duration_trunc(Duration::hours(1))
            .unwrap();
        let timeseries: Vec<_> = (0..40)
            .map(|h| {
                json!({
                    "time": (start + Duration::hours(h)).to_rfc3339(),
                    "data": {
                        "instant": { "details": { "air_temperature": 4.0, "wind_speed": 3.0 } },
                        "next_1_hours": {
                            "summary": { "symbol_code": "partlycloudy_day" },
                            "details": { "precipitation_amount": 0.4 }
                        }
                    }
                })
            })
            .collect();
        serde_json::to_vec(&json!({ "properties": { "timeseries": timeseries } })).unwrap()
    }
}

impl HttpTransport for FakeForecastService {
    async fn get_into(
        &self,
        _request: &HttpRequest<'_>,
        body: &mut Vec<u8>,
        limit: usize,
    ) -> Result<(), TransportError> {
        body.clear();
        *self.requests.borrow_mut() += 1;
        if *self.down.borrow() {
            return Err(TransportError::Status(503));
        }
        let response = self.body();
        if response.len() > limit {
            return Err(TransportError::TooLarge { limit });
        }
        body.extend_from_slice(&response);
        Ok(())
    }
}

/// Large-image service that records which symbols were asked for.
#[derive(Clone, Default)]
struct FakeImages {
    requested: Rc<RefCell<Vec<String>>>,
}

impl ImageSource for FakeImages {
    async fn large_icon(&mut self, symbol_code: &str) -> Result<MonoBitmap, AssetError> {
        self.requested.borrow_mut().push(symbol_code.to_string());
        Ok(MonoBitmap::new(LARGE_ICON_SIZE, LARGE_ICON_SIZE))
    }
}

/// Panel that records every refresh and can be made to fail.
#[derive(Clone, Default)]
struct RecordingPanel {
    refreshes: Rc<RefCell<Vec<(RefreshMode, u32)>>>,
    broken: Rc<RefCell<bool>>,
}

impl RecordingPanel {
    fn modes(&self) -> Vec<RefreshMode> {
        self.refreshes.borrow().iter().map(|(mode, _)| *mode).collect()
    }
}

impl DisplayDriver for RecordingPanel {
    fn refresh(
        &mut self,
        buffer: &PixelBuffer,
        mode: RefreshMode,
        _border: Option<Color>,
    ) -> Result<(), DisplayError> {
        if *self.broken.borrow() {
            return Err(DisplayError::HardwareFault("BUSY stuck high".to_string()));
        }
        self.refreshes.borrow_mut().push((mode, buffer.ink_count()));
        Ok(())
    }
}

type TestStation = StationController<FakeForecastService, ManualClock, FakeImages, RecordingPanel>;

struct Rig {
    clock: ManualClock,
    service: FakeForecastService,
    images: FakeImages,
    panel: RecordingPanel,
    station: TestStation,
}

fn rig(start: DateTime<Utc>, wake_jitter_secs: u64) -> Rig {
    let clock = ManualClock::new(start);
    let service = FakeForecastService::new(clock.clone());
    let images = FakeImages::default();
    let panel = RecordingPanel::default();

    let fetcher = ForecastFetcher::new(
        service.clone(),
        clock.clone(),
        FetcherSettings {
            url: "https://forecast.test/compact".to_string(),
            identity: "test-station/1.0 test@example.org".to_string(),
            utc_offset_minutes: 60,
            max_attempts: 3,
            retry_delay: std::time::Duration::from_secs(10),
            max_response_bytes: 64 * 1024,
        },
    );
    let composer = DisplayComposer::new(
        IconSet::render(),
        images.clone(),
        60,
        Labels {
            now: "Now".to_string(),
            tomorrow: "Tomorrow".to_string(),
            updated: "Updated".to_string(),
        },
    );
    let station = StationController::new(
        fetcher,
        composer,
        panel.clone(),
        clock.clone(),
        Location {
            name: "drammen".to_string(),
            latitude: 59.7396,
            longitude: 10.2046,
            altitude: 3.0,
        },
        ControllerSettings {
            panel_width: 400,
            panel_height: 300,
            border: None,
            full_refresh_hour_utc: 2,
            wake_jitter_secs,
        },
    );

    Rig {
        clock,
        service,
        images,
        panel,
        station,
    }
}

fn state(full: DateTime<Utc>, partial: DateTime<Utc>) -> RefreshState {
    RefreshState {
        last_full_refresh: Some(full),
        last_partial_refresh: Some(partial),
    }
}

#[tokio::test]
async fn boot_draws_a_partial_immediately() {
    let mut rig = rig(at(14, 15, 20), 0);

    let report = rig.station.run_cycle().await;

    assert_eq!(report.action, RefreshAction::Partial);
    assert_eq!(report.outcome, CycleOutcome::Refreshed(RefreshMode::Partial));
    assert_eq!(rig.panel.modes(), vec![RefreshMode::Partial]);
    assert_eq!(rig.station.refresh_state().last_partial_refresh, Some(at(14, 15, 20)));
    assert_eq!(rig.station.refresh_state().last_full_refresh, None);
    assert_eq!(rig.station.state(), ControllerState::Idle);
}

#[tokio::test]
async fn hourly_wake_fetches_composes_and_refreshes() {
    let mut rig = rig(at(14, 8, 5), 0);
    rig.station = rig
        .station
        .with_refresh_state(state(at(13, 2, 0), at(14, 7, 0)));

    let report = rig.station.run_cycle().await;

    assert_eq!(report.outcome, CycleOutcome::Refreshed(RefreshMode::Partial));
    assert_eq!(rig.service.requests(), 1);
    // The large image is only asked for the "Now" slot
    assert_eq!(*rig.images.requested.borrow(), vec!["partlycloudy_day".to_string()]);
    let (_, ink) = rig.panel.refreshes.borrow()[0];
    assert!(ink > 0, "composed frame should not be blank");
    assert_eq!(
        rig.station.refresh_state(),
        state(at(13, 2, 0), at(14, 8, 5))
    );
}

#[tokio::test]
async fn boundary_hour_wake_does_a_full_refresh() {
    let mut rig = rig(at(14, 2, 3), 0);
    rig.station = rig
        .station
        .with_refresh_state(state(at(13, 2, 0), at(14, 1, 0)));

    let report = rig.station.run_cycle().await;

    assert_eq!(report.action, RefreshAction::Full);
    assert_eq!(rig.panel.modes(), vec![RefreshMode::Full]);
    assert_eq!(rig.station.refresh_state(), state(at(14, 2, 3), at(14, 2, 3)));
}

#[tokio::test]
async fn second_wake_in_the_same_hour_does_nothing() {
    let mut rig = rig(at(14, 8, 5), 0);
    rig.station.run_cycle().await;

    rig.clock.set(at(14, 8, 40));
    let report = rig.station.run_cycle().await;

    assert_eq!(report.outcome, CycleOutcome::UpToDate);
    assert_eq!(rig.service.requests(), 1);
    assert_eq!(rig.panel.modes().len(), 1);
}

#[tokio::test]
async fn service_outage_degrades_and_leaves_the_panel_alone() {
    let mut rig = rig(at(14, 8, 5), 0);
    let before = state(at(13, 2, 0), at(14, 7, 0));
    rig.station = rig.station.with_refresh_state(before);
    rig.service.set_down(true);

    let report = rig.station.run_cycle().await;

    assert_eq!(
        report.outcome,
        CycleOutcome::Degraded {
            kind: FailureKind::Network,
            retries_exhausted: true,
        }
    );
    assert_eq!(report.at, at(14, 8, 5));
    assert_eq!(rig.service.requests(), 3);
    assert!(rig.panel.modes().is_empty());
    assert_eq!(rig.station.refresh_state(), before);
    assert_eq!(rig.station.state(), ControllerState::Idle);
    // Backoff of 10s then 20s between the three attempts
    assert_eq!(rig.clock.now(), at(14, 8, 5) + Duration::seconds(30));
}

#[tokio::test]
async fn outage_is_retried_at_the_next_wake() {
    let mut rig = rig(at(14, 8, 5), 0);
    rig.service.set_down(true);
    rig.station.run_cycle().await;

    rig.service.set_down(false);
    rig.clock.set(at(14, 9, 0));
    let report = rig.station.run_cycle().await;

    assert_eq!(report.outcome, CycleOutcome::Refreshed(RefreshMode::Partial));
    assert_eq!(rig.panel.modes(), vec![RefreshMode::Partial]);
}

#[tokio::test]
async fn hardware_fault_keeps_the_bookkeeping() {
    let mut rig = rig(at(14, 8, 5), 0);
    *rig.panel.broken.borrow_mut() = true;

    let report = rig.station.run_cycle().await;

    assert!(matches!(report.outcome, CycleOutcome::HardwareFault(_)));
    assert_eq!(rig.station.refresh_state(), RefreshState::never());

    // Not retried within the cycle, but the next wake tries again
    *rig.panel.broken.borrow_mut() = false;
    rig.clock.set(at(14, 8, 30));
    let report = rig.station.run_cycle().await;
    assert_eq!(report.outcome, CycleOutcome::Refreshed(RefreshMode::Partial));
}

#[tokio::test]
async fn a_day_of_wakes_has_one_full_refresh_and_hourly_partials() {
    let mut rig = rig(at(14, 0, 10), 0);

    for _ in 0..24 {
        rig.station.step().await;
    }

    let modes = rig.panel.modes();
    assert_eq!(modes.len(), 24);
    assert_eq!(modes.iter().filter(|m| **m == RefreshMode::Full).count(), 1);
    assert_eq!(modes[2], RefreshMode::Full);

    // Every sleep ends on the top of an hour
    let sleeps = rig.clock.sleeps();
    assert_eq!(sleeps.first(), Some(&at(14, 1, 0)));
    assert_eq!(sleeps.last(), Some(&at(15, 0, 0)));
    assert!(sleeps
        .iter()
        .all(|t| t.duration_trunc(Duration::hours(1)).unwrap() == *t));
}

#[tokio::test]
async fn next_wake_adds_bounded_jitter() {
    let rig = rig(at(14, 8, 5), 60);

    for _ in 0..20 {
        let wake = rig.station.next_wake();
        assert!(wake >= at(14, 9, 0));
        assert!(wake <= at(14, 9, 1));
    }
}

#[tokio::test]
async fn oversized_jitter_never_skips_the_next_hour() {
    let rig = rig(at(14, 8, 5), 7200);

    for _ in 0..200 {
        let wake = rig.station.next_wake();
        assert!(wake >= at(14, 9, 0));
        assert!(wake < at(14, 10, 0), "woke at {}", wake);
    }
}

#[tokio::test]
async fn outage_in_the_boundary_hour_defers_the_clear_to_the_next_day() {
    let mut rig = rig(at(14, 2, 5), 0);
    rig.station = rig
        .station
        .with_refresh_state(state(at(13, 2, 0), at(14, 1, 0)));

    rig.service.set_down(true);
    let report = rig.station.run_cycle().await;
    assert_eq!(report.action, RefreshAction::Full);
    assert!(matches!(report.outcome, CycleOutcome::Degraded { .. }));

    // The missed clear is not caught up after the boundary hour
    rig.service.set_down(false);
    rig.clock.set(at(14, 3, 0));
    let report = rig.station.run_cycle().await;
    assert_eq!(report.outcome, CycleOutcome::Refreshed(RefreshMode::Partial));

    rig.clock.set(at(15, 2, 0));
    let report = rig.station.run_cycle().await;
    assert_eq!(report.outcome, CycleOutcome::Refreshed(RefreshMode::Full));
    assert_eq!(rig.panel.modes(), vec![RefreshMode::Partial, RefreshMode::Full]);
    assert_eq!(rig.station.refresh_state().last_full_refresh, Some(at(15, 2, 0)));
}
