//! Refresh scheduling for the e-paper panel.
//!
//! E-paper keeps a faint residue of earlier images ("ghosting") that only a
//! full clear-and-redraw removes, so the panel is fully cleared once a day in
//! a fixed UTC hour and otherwise redrawn once per clock hour.
//!
//! [`RefreshPolicy::decide`] is a pure function of the current time and the
//! [`RefreshState`] passed in: no clock reads, no hidden state. That keeps it
//! testable with synthetic times and lets a rebooted controller re-derive the
//! right action from the wall clock alone.

use crate::RefreshState;
use chrono::{DateTime, Duration, DurationRound, NaiveTime, Utc};

/// What the panel needs right now.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RefreshAction {
    /// Already refreshed within the current window
    NoOp,
    /// Redraw content
    Partial,
    /// Clear the whole panel, then redraw
    Full,
}

/// Recorded refreshes further than this in the future mean the clock moved back.
const CLOCK_SKEW_TOLERANCE_HOURS: i64 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefreshPolicy {
    full_refresh_hour_utc: u32,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            full_refresh_hour_utc: 2,
        }
    }
}

impl RefreshPolicy {
    /// Policy with the daily clear in the given UTC hour (clamped to 0..=23).
    pub fn new(full_refresh_hour_utc: u32) -> Self {
        Self {
            full_refresh_hour_utc: full_refresh_hour_utc.min(23),
        }
    }

    /// Decide the action for `current` given the refresh bookkeeping.
    ///
    /// `Full` wins whenever the daily clear is due, and it also counts as this
    /// hour's redraw.
    pub fn decide(&self, current: DateTime<Utc>, state: RefreshState) -> RefreshAction {
        let last_full = trusted(state.last_full_refresh, current);
        let last_partial = trusted(state.last_partial_refresh, current);

        let boundary = self.full_boundary(current);
        let in_boundary_hour = current < boundary + Duration::hours(1);
        if in_boundary_hour && last_full.map_or(true, |t| t < boundary) {
            return RefreshAction::Full;
        }

        let last_draw = last_full.max(last_partial);
        match last_draw {
            Some(t) if t >= hour_start(current) => RefreshAction::NoOp,
            _ => RefreshAction::Partial,
        }
    }

    /// Most recent daily clear boundary at or before `current`.
    pub fn full_boundary(&self, current: DateTime<Utc>) -> DateTime<Utc> {
        let time =
            NaiveTime::from_hms_opt(self.full_refresh_hour_utc, 0, 0).unwrap_or(NaiveTime::MIN);
        let today = current.date_naive().and_time(time).and_utc();
        if today <= current {
            today
        } else {
            today - Duration::days(1)
        }
    }

    /// Next point at which a decision can change: the next top of the hour.
    pub fn next_wake(&self, current: DateTime<Utc>) -> DateTime<Utc> {
        hour_start(current) + Duration::hours(1)
    }

    /// Bookkeeping after `action` finished on the panel at `at`.
    ///
    /// A full refresh resets both timestamps.
    pub fn record(
        state: RefreshState,
        action: RefreshAction,
        at: DateTime<Utc>,
    ) -> RefreshState {
        match action {
            RefreshAction::NoOp => state,
            RefreshAction::Partial => RefreshState {
                last_partial_refresh: Some(at),
                ..state
            },
            RefreshAction::Full => RefreshState {
                last_partial_refresh: Some(at),
                last_full_refresh: Some(at),
            },
        }
    }
}

/// [`RefreshPolicy::decide`] with the daily clear at 02:00 UTC.
pub fn decide(current: DateTime<Utc>, state: RefreshState) -> RefreshAction {
    RefreshPolicy::default().decide(current, state)
}

fn hour_start(t: DateTime<Utc>) -> DateTime<Utc> {
    t.duration_trunc(Duration::hours(1)).unwrap_or(t)
}

fn trusted(recorded: Option<DateTime<Utc>>, current: DateTime<Utc>) -> Option<DateTime<Utc>> {
    recorded.filter(|t| *t <= current + Duration::hours(CLOCK_SKEW_TOLERANCE_HOURS))
}
