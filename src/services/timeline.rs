//! Shared pieces of the timeline reconstructors

use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimelineError {
    /// Input must be non-decreasing in time; the source broke that contract
    #[error("event {index} at {found} precedes previous event at {previous}")]
    OutOfOrder { index: usize, previous: DateTime<Utc>, found: DateTime<Utc> },
}

/// Tracks the last timestamp seen and rejects regressions
#[derive(Debug, Default)]
pub(crate) struct OrderGuard {
    last: Option<DateTime<Utc>>,
}

impl OrderGuard {
    #[inline]
    pub(crate) fn check(&mut self, index: usize, ts: DateTime<Utc>) -> Result<(), TimelineError> {
        if let Some(previous) = self.last {
            if ts < previous {
                return Err(TimelineError::OutOfOrder { index, previous, found: ts });
            }
        }
        self.last = Some(ts);
        Ok(())
    }
}

/// Elapsed time from `start` to `end`, zero if `end` is earlier
///
/// Only the open interval can hit the clamp: an evaluation time before the
/// last event (clock skew between ingestor and scheduler).
#[inline]
pub(crate) fn elapsed(start: DateTime<Utc>, end: DateTime<Utc>) -> Duration {
    (end - start).to_std().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_order_guard_allows_ties() {
        let mut guard = OrderGuard::default();
        assert!(guard.check(0, at(5)).is_ok());
        assert!(guard.check(1, at(5)).is_ok());
        assert_eq!(
            guard.check(2, at(4)),
            Err(TimelineError::OutOfOrder { index: 2, previous: at(5), found: at(4) })
        );
    }

    #[test]
    fn test_elapsed_clamps_negative() {
        assert_eq!(elapsed(at(10), at(25)), Duration::from_secs(15));
        assert_eq!(elapsed(at(10), at(10)), Duration::ZERO);
        assert_eq!(elapsed(at(10), at(3)), Duration::ZERO);
    }
}
