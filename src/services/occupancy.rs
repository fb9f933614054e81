//! Exclusive-state occupancy reconstruction
//!
//! Rebuilds "which state was active, and for how long" from a stream of
//! push-style reports, e.g. the active app on a streaming device. At most
//! one label is active at a time. Labels in the exclusion set (home
//! screens, screensavers, "unknown") end the active label without
//! becoming active themselves.

use crate::domain::types::StateEvent;
use crate::services::timeline::{elapsed, OrderGuard, TimelineError};
use chrono::{DateTime, Utc};
use rustc_hash::FxHashSet;
use std::collections::BTreeMap;
use std::time::Duration;

/// Per-label accumulated occupancy for one entity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Occupancy {
    /// Total time per label, ordered by label
    pub totals: BTreeMap<String, Duration>,
    /// Label still active at evaluation time, with its start
    pub active: Option<(String, DateTime<Utc>)>,
}

impl Occupancy {
    pub fn total_for(&self, label: &str) -> Duration {
        self.totals.get(label).copied().unwrap_or_default()
    }
}

/// Reconstructs exclusive-state occupancy with a fixed exclusion set
#[derive(Debug, Clone, Default)]
pub struct OccupancyTracker {
    excluded: FxHashSet<String>,
}

impl OccupancyTracker {
    pub fn new<I, S>(excluded: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { excluded: excluded.into_iter().map(Into::into).collect() }
    }

    #[inline]
    pub fn is_excluded(&self, label: &str) -> bool {
        self.excluded.contains(label)
    }

    /// Accumulate occupancy per label, closing the active one at `now`
    pub fn occupancy(
        &self,
        events: &[StateEvent],
        now: DateTime<Utc>,
    ) -> Result<Occupancy, TimelineError> {
        let mut order = OrderGuard::default();
        let mut totals: BTreeMap<String, Duration> = BTreeMap::new();
        let mut active: Option<(&str, DateTime<Utc>)> = None;

        for (index, event) in events.iter().enumerate() {
            order.check(index, event.timestamp)?;
            let label = event.label.as_str();

            if self.is_excluded(label) {
                if let Some((prev, since)) = active.take() {
                    close(&mut totals, prev, since, event.timestamp);
                }
                continue;
            }

            match active {
                // Re-published current state keeps its start time
                Some((current, _)) if current == label => {}
                Some((prev, since)) => {
                    close(&mut totals, prev, since, event.timestamp);
                    active = Some((label, event.timestamp));
                }
                None => active = Some((label, event.timestamp)),
            }
        }

        let active = active.map(|(label, since)| {
            close(&mut totals, label, since, now);
            (label.to_string(), since)
        });

        Ok(Occupancy { totals, active })
    }
}

fn close(
    totals: &mut BTreeMap<String, Duration>,
    label: &str,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) {
    let span = elapsed(since, until);
    match totals.get_mut(label) {
        Some(total) => *total += span,
        None => {
            totals.insert(label.to_string(), span);
        }
    }
}
