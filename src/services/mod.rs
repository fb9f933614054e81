//! Services - reconstruction and aggregation
//!
//! This module contains the core logic:
//! - `timeline` - Ordering checks and elapsed-time helpers shared by reconstructors
//! - `interval` - On/off interval reconstruction for binary switches
//! - `occupancy` - Exclusive-state occupancy with an exclusion set
//! - `stats` - Summary statistics over numeric readings
//! - `aggregator` - Per-entity fetch, reconstruct, publish driver

pub mod aggregator;
pub mod interval;
pub mod occupancy;
pub mod stats;
pub mod timeline;

// Re-export commonly used types
pub use aggregator::{AggregationPlan, Aggregator, EntityKind, RunReport, SkipReason};
pub use interval::{count_transitions, current_state, on_time, OnTime, SwitchSnapshot};
pub use occupancy::{Occupancy, OccupancyTracker};
pub use stats::{ReadingStats, Statistic};
pub use timeline::TimelineError;
