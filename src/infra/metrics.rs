//! Lock-free service counters and periodic reporting
//!
//! Counts what the service itself is doing (runs, skips, ingest volume).
//! Computed aggregates do not live here; they go through the metrics sink.
//!
//! NOTE: All atomics use Relaxed ordering: these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Lock-free service counters
pub struct Metrics {
    /// Aggregation runs completed (monotonic)
    runs_total: AtomicU64,
    /// Entities processed across all runs (monotonic)
    entities_total: AtomicU64,
    /// Entities skipped across all runs (monotonic)
    entities_skipped_total: AtomicU64,
    /// MQTT messages appended to the store (monotonic)
    events_ingested_total: AtomicU64,
    /// MQTT messages the store failed to append (monotonic)
    ingest_errors_total: AtomicU64,
    /// Stored events dropped at decode time (monotonic)
    events_dropped_total: AtomicU64,
    /// Sink rejections (monotonic)
    publish_errors_total: AtomicU64,
    /// Wall time of the latest run
    last_run_duration_us: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSummary {
    pub runs_total: u64,
    pub entities_total: u64,
    pub entities_skipped_total: u64,
    pub events_ingested_total: u64,
    pub ingest_errors_total: u64,
    pub events_dropped_total: u64,
    pub publish_errors_total: u64,
    pub last_run_duration_us: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            runs = %self.runs_total,
            entities = %self.entities_total,
            skipped = %self.entities_skipped_total,
            ingested = %self.events_ingested_total,
            ingest_errors = %self.ingest_errors_total,
            dropped = %self.events_dropped_total,
            publish_errors = %self.publish_errors_total,
            last_run_us = %self.last_run_duration_us,
            "metrics"
        );
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            runs_total: AtomicU64::new(0),
            entities_total: AtomicU64::new(0),
            entities_skipped_total: AtomicU64::new(0),
            events_ingested_total: AtomicU64::new(0),
            ingest_errors_total: AtomicU64::new(0),
            events_dropped_total: AtomicU64::new(0),
            publish_errors_total: AtomicU64::new(0),
            last_run_duration_us: AtomicU64::new(0),
        }
    }

    /// Record a finished aggregation run
    #[inline]
    pub fn record_run(&self, entities: u64, skipped: u64, duration_us: u64) {
        self.runs_total.fetch_add(1, Ordering::Relaxed);
        self.entities_total.fetch_add(entities, Ordering::Relaxed);
        self.entities_skipped_total.fetch_add(skipped, Ordering::Relaxed);
        self.last_run_duration_us.store(duration_us, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_event_ingested(&self) {
        self.events_ingested_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_ingest_error(&self) {
        self.ingest_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_events_dropped(&self, count: u64) {
        self.events_dropped_total.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_publish_error(&self) {
        self.publish_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot all counters without resetting
    pub fn report(&self) -> MetricsSummary {
        MetricsSummary {
            runs_total: self.runs_total.load(Ordering::Relaxed),
            entities_total: self.entities_total.load(Ordering::Relaxed),
            entities_skipped_total: self.entities_skipped_total.load(Ordering::Relaxed),
            events_ingested_total: self.events_ingested_total.load(Ordering::Relaxed),
            ingest_errors_total: self.ingest_errors_total.load(Ordering::Relaxed),
            events_dropped_total: self.events_dropped_total.load(Ordering::Relaxed),
            publish_errors_total: self.publish_errors_total.load(Ordering::Relaxed),
            last_run_duration_us: self.last_run_duration_us.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
