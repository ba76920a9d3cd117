//! Wall-clock access for the station.
//!
//! The device has no battery-backed RTC: the time comes from whatever the OS
//! synchronised at boot and may drift over long uptimes. Callers get a
//! best-effort UTC instant and must not rely on sub-minute precision.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Source of the current time and of the only blocking wait in the loop.
pub trait ClockSource {
    /// Current UTC time. Never fails; an unsynchronised clock still answers.
    fn now(&self) -> DateTime<Utc>;

    /// Suspend until `deadline`. Returns immediately if it is already past.
    fn sleep_until(&self, deadline: DateTime<Utc>) -> impl Future<Output = ()>;

    /// Suspend for `duration` from now.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> {
        let deadline = self.now()
            + chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());
        self.sleep_until(deadline)
    }
}

/// The OS clock, waiting on the tokio timer.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        // Re-evaluated against wall time so an NTP step during the wait
        // shortens or lengthens the remaining sleep.
        while let Ok(remaining) = (deadline - Utc::now()).to_std() {
            if remaining.is_zero() {
                break;
            }
            // Sleep in bounded slices; the monotonic timer does not follow wall-clock steps
            tokio::time::sleep(remaining.min(Duration::from_secs(300))).await;
        }
    }
}

/// A manually driven clock for simulations and tests.
///
/// Clones share the same time. `sleep_until` jumps straight to the deadline
/// and records it, so a whole day of scheduling runs instantly.
#[derive(Clone, Debug)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualClockState>>,
}

#[derive(Debug)]
struct ManualClockState {
    now: DateTime<Utc>,
    sleeps: Vec<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManualClockState {
                now: start,
                sleeps: Vec::new(),
            })),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut state) = self.inner.lock() {
            state.now = now;
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut state) = self.inner.lock() {
            state.now += by;
        }
    }

    /// Every deadline passed to `sleep_until`, oldest first.
    pub fn sleeps(&self) -> Vec<DateTime<Utc>> {
        self.inner
            .lock()
            .map(|state| state.sleeps.clone())
            .unwrap_or_default()
    }
}

impl ClockSource for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.inner.lock() {
            Ok(state) => state.now,
            Err(poisoned) => poisoned.into_inner().now,
        }
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        if let Ok(mut state) = self.inner.lock() {
            state.sleeps.push(deadline);
            if deadline > state.now {
                state.now = deadline;
            }
        }
    }
}
