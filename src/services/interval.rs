//! On/off interval reconstruction for binary switches
//!
//! Pairs "on" and "off" events into intervals and sums the time spent on.
//! Key behaviors:
//! - A repeated "on" while already on keeps the first start time
//! - An "off" while already off is ignored
//! - Any label other than "on"/"off" is skipped
//! - A trailing "on" is closed against the caller's evaluation time

use crate::domain::types::{StateEvent, LABEL_OFF, LABEL_ON};
use crate::services::timeline::{elapsed, OrderGuard, TimelineError};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// The interval still running at evaluation time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenInterval {
    pub since: DateTime<Utc>,
    pub elapsed: Duration,
}

/// Accumulated on-time for one switch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OnTime {
    /// Sum of all on/off pairs
    pub closed: Duration,
    /// Unmatched trailing "on", if the switch is still on
    pub open: Option<OpenInterval>,
}

impl OnTime {
    /// Closed intervals plus the open one
    pub fn total(&self) -> Duration {
        self.closed + self.open.map_or(Duration::ZERO, |open| open.elapsed)
    }

    pub fn is_on(&self) -> bool {
        self.open.is_some()
    }
}

/// Running state while scanning a switch's events
#[derive(Debug, Default)]
struct SwitchState {
    active_since: Option<DateTime<Utc>>,
    closed: Duration,
}

impl SwitchState {
    fn record_on(&mut self, ts: DateTime<Utc>) {
        if self.active_since.is_none() {
            self.active_since = Some(ts);
        }
    }

    fn record_off(&mut self, ts: DateTime<Utc>) {
        if let Some(since) = self.active_since.take() {
            self.closed += elapsed(since, ts);
        }
    }

    fn finish(self, now: DateTime<Utc>) -> OnTime {
        OnTime {
            closed: self.closed,
            open: self.active_since.map(|since| OpenInterval { since, elapsed: elapsed(since, now) }),
        }
    }
}

/// Total time on across `events`, closing a trailing "on" at `now`
///
/// Fails only if the events are not in non-decreasing time order.
pub fn on_time(events: &[StateEvent], now: DateTime<Utc>) -> Result<OnTime, TimelineError> {
    let mut order = OrderGuard::default();
    let mut state = SwitchState::default();

    for (index, event) in events.iter().enumerate() {
        order.check(index, event.timestamp)?;
        match event.label.as_str() {
            LABEL_ON => state.record_on(event.timestamp),
            LABEL_OFF => state.record_off(event.timestamp),
            _ => {}
        }
    }

    Ok(state.finish(now))
}

/// Current on/off state derived from the most recent event only
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwitchSnapshot {
    pub on: bool,
    /// Time since the latest "on"; zero when off
    pub duration: Duration,
}

/// Snapshot of a switch from its latest event
///
/// Runs the full reconstructor over a single event so the two can never
/// disagree.
pub fn current_state(latest: Option<&StateEvent>, now: DateTime<Utc>) -> SwitchSnapshot {
    let open = latest
        .and_then(|event| on_time(std::slice::from_ref(event), now).ok())
        .and_then(|time| time.open);

    match open {
        Some(open) => SwitchSnapshot { on: true, duration: open.elapsed },
        None => SwitchSnapshot::default(),
    }
}

/// Number of "on" and "off" events in a sequence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransitionCounts {
    pub on: u64,
    pub off: u64,
}

pub fn count_transitions(events: &[StateEvent]) -> TransitionCounts {
    events.iter().fold(TransitionCounts::default(), |mut counts, event| {
        match event.label.as_str() {
            LABEL_ON => counts.on += 1,
            LABEL_OFF => counts.off += 1,
            _ => {}
        }
        counts
    })
}
