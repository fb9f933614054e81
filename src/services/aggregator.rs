//! Aggregation driver - fetch, reconstruct, publish
//!
//! Each run processes every configured entity in its own task:
//! 1. Fetch the entity's records for the evaluation window (bounded by a timeout)
//! 2. Decode them into typed events, dropping any that do not decode
//! 3. Run the matching reconstructor
//! 4. Overwrite the entity's series in the metrics sink
//!
//! A failure on one entity (fetch error, timeout, out-of-order data) skips
//! that entity only. The rest of the batch still publishes.

use crate::domain::record::EventRecord;
use crate::domain::types::{decode_readings, decode_states, Window};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::event_store::{EventSource, FetchError};
use crate::io::prometheus::{
    Labels, MetricsSink, Series, APP_USAGE, SWITCH_EVENTS, SWITCH_ON_DURATION, SWITCH_TOTAL_ON_DURATION,
    TEMPERATURE_AVERAGE, TEMPERATURE_CURRENT, TEMPERATURE_MAX, TEMPERATURE_MIN,
};
use crate::services::interval::{count_transitions, current_state, on_time};
use crate::services::occupancy::OccupancyTracker;
use crate::services::stats::ReadingStats;
use crate::services::timeline::TimelineError;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// How an entity's events are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    /// "on"/"off" switch
    Binary,
    /// One active label out of many
    Exclusive,
    /// Numeric temperature readings
    Temperature,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Binary => "binary",
            EntityKind::Exclusive => "exclusive",
            EntityKind::Temperature => "temperature",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to aggregate and how far back
#[derive(Debug, Clone)]
pub struct AggregationPlan {
    pub binary: Vec<String>,
    pub exclusive: Vec<String>,
    pub temperature: Vec<String>,
    pub temperature_unit: String,
    /// Evaluation window length; `None` means all history
    pub window: Option<chrono::Duration>,
    pub fetch_timeout: Duration,
}

impl AggregationPlan {
    pub fn from_config(config: &Config) -> Self {
        Self {
            binary: config.binary_topics().to_vec(),
            exclusive: config.exclusive_topics().to_vec(),
            temperature: config.temperature_topics().to_vec(),
            temperature_unit: config.temperature_unit().to_string(),
            window: config.window(),
            fetch_timeout: config.fetch_timeout(),
        }
    }

    fn entities(&self) -> impl Iterator<Item = (EntityKind, &String)> {
        let binary = self.binary.iter().map(|t| (EntityKind::Binary, t));
        let exclusive = self.exclusive.iter().map(|t| (EntityKind::Exclusive, t));
        let temperature = self.temperature.iter().map(|t| (EntityKind::Temperature, t));
        binary.chain(exclusive).chain(temperature)
    }
}

/// Why an entity was left out of a run
#[derive(Debug, Error)]
pub enum SkipReason {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("ordering violation: {0}")]
    Ordering(#[from] TimelineError),
    #[error("task failed: {0}")]
    Task(String),
}

/// What one entity contributed to a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntityPublished {
    /// Events that decoded and were fed to a reconstructor
    pub events: usize,
    /// Records dropped at decode time
    pub dropped: usize,
    /// Series written to the sink
    pub series: usize,
    /// Series the sink rejected
    pub publish_errors: usize,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub published: Vec<(EntityKind, String, EntityPublished)>,
    pub skipped: Vec<(EntityKind, String, SkipReason)>,
}

impl RunReport {
    pub fn is_skipped(&self, topic: &str) -> bool {
        self.skipped.iter().any(|(_, t, _)| t == topic)
    }

    pub fn events_dropped(&self) -> usize {
        self.published.iter().map(|(_, _, p)| p.dropped).sum()
    }

    pub fn publish_errors(&self) -> usize {
        self.published.iter().map(|(_, _, p)| p.publish_errors).sum()
    }
}

/// Runs reconstruction over all configured entities and publishes results
#[derive(Clone)]
pub struct Aggregator {
    source: Arc<dyn EventSource>,
    sink: Arc<dyn MetricsSink>,
    occupancy: Arc<OccupancyTracker>,
    plan: Arc<AggregationPlan>,
    metrics: Arc<Metrics>,
}

impl Aggregator {
    pub fn new(
        source: Arc<dyn EventSource>,
        sink: Arc<dyn MetricsSink>,
        plan: AggregationPlan,
        occupancy: OccupancyTracker,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { source, sink, occupancy: Arc::new(occupancy), plan: Arc::new(plan), metrics }
    }

    /// Build from config: plan, exclusion set
    pub fn from_config(
        config: &Config,
        source: Arc<dyn EventSource>,
        sink: Arc<dyn MetricsSink>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let occupancy = OccupancyTracker::new(config.excluded_labels().iter().cloned());
        Self::new(source, sink, AggregationPlan::from_config(config), occupancy, metrics)
    }

    /// One full recomputation, evaluated at `now`
    pub async fn run_once(&self, now: DateTime<Utc>) -> RunReport {
        let started = Instant::now();
        let window = Window::ending_at(now, self.plan.window);

        let mut tasks = JoinSet::new();
        let mut spawned = HashMap::new();
        for (kind, topic) in self.plan.entities() {
            let this = self.clone();
            let task_topic = topic.clone();
            let handle = tasks.spawn(async move {
                let result = this.process(kind, &task_topic, window, now).await;
                (kind, task_topic, result)
            });
            spawned.insert(handle.id(), (kind, topic.clone()));
        }

        let mut report = RunReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((kind, topic, Ok(published))) => {
                    debug!(
                        topic = %topic,
                        kind = %kind,
                        events = %published.events,
                        dropped = %published.dropped,
                        series = %published.series,
                        "entity_published"
                    );
                    report.published.push((kind, topic, published));
                }
                Ok((kind, topic, Err(reason))) => {
                    warn!(topic = %topic, kind = %kind, reason = %reason, "entity_skipped");
                    report.skipped.push((kind, topic, reason));
                }
                Err(e) => {
                    let Some((kind, topic)) = spawned.remove(&e.id()) else {
                        error!(error = %e, "entity_task_unknown");
                        continue;
                    };
                    error!(topic = %topic, kind = %kind, error = %e, "entity_task_failed");
                    report.skipped.push((kind, topic, SkipReason::Task(e.to_string())));
                }
            }
        }

        report.published.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));
        report.skipped.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));

        let entities = (report.published.len() + report.skipped.len()) as u64;
        let elapsed_us = started.elapsed().as_micros() as u64;
        self.metrics.record_run(entities, report.skipped.len() as u64, elapsed_us);
        self.metrics.record_events_dropped(report.events_dropped() as u64);

        info!(
            evaluated_at = %now,
            published = %report.published.len(),
            skipped = %report.skipped.len(),
            dropped_events = %report.events_dropped(),
            publish_errors = %report.publish_errors(),
            elapsed_us = %elapsed_us,
            "aggregation_run_complete"
        );

        report
    }

    async fn process(
        &self,
        kind: EntityKind,
        topic: &str,
        window: Window,
        now: DateTime<Utc>,
    ) -> Result<EntityPublished, SkipReason> {
        let timeout = self.plan.fetch_timeout;
        let records = tokio::time::timeout(timeout, self.source.fetch(topic, window))
            .await
            .map_err(|_| FetchError::Timeout(timeout))??;

        match kind {
            EntityKind::Binary => self.publish_switch(topic, &records, now),
            EntityKind::Exclusive => self.publish_occupancy(topic, &records, now),
            EntityKind::Temperature => Ok(self.publish_temperature(topic, &records)),
        }
    }

    fn publish_switch(
        &self,
        topic: &str,
        records: &[EventRecord],
        now: DateTime<Utc>,
    ) -> Result<EntityPublished, SkipReason> {
        let (events, dropped) = decode_states(topic, records);
        let total = on_time(&events, now)?;
        let snapshot = current_state(events.last(), now);
        let counts = count_transitions(&events);

        let mut out = EntityPublished { events: events.len(), dropped, ..Default::default() };
        let by_topic = [("topic", topic)];
        self.publish(&mut out, SWITCH_ON_DURATION, &by_topic, snapshot.duration.as_secs_f64());
        self.publish(&mut out, SWITCH_TOTAL_ON_DURATION, &by_topic, total.total().as_secs_f64());
        self.publish(&mut out, SWITCH_EVENTS, &[("topic", topic), ("state", "on")], counts.on as f64);
        self.publish(&mut out, SWITCH_EVENTS, &[("topic", topic), ("state", "off")], counts.off as f64);
        Ok(out)
    }

    fn publish_occupancy(
        &self,
        topic: &str,
        records: &[EventRecord],
        now: DateTime<Utc>,
    ) -> Result<EntityPublished, SkipReason> {
        let (events, dropped) = decode_states(topic, records);
        let occupancy = self.occupancy.occupancy(&events, now)?;

        let mut out = EntityPublished { events: events.len(), dropped, ..Default::default() };
        let series: Vec<Series<'_>> = occupancy
            .totals
            .iter()
            .map(|(app, duration)| (vec![("topic", topic), ("app", app.as_str())], duration.as_secs_f64()))
            .collect();
        // Apps that left the window drop out with the rest of the topic's series
        self.replace(&mut out, APP_USAGE, &[("topic", topic)], &series);
        Ok(out)
    }

    fn publish_temperature(
        &self,
        topic: &str,
        records: &[EventRecord],
    ) -> EntityPublished {
        let (readings, dropped) = decode_readings(topic, records);
        let mut out = EntityPublished { events: readings.len(), dropped, ..Default::default() };
        let stats = ReadingStats::from_readings(&readings);

        // No readings in the window clears the topic's gauges
        let labels = vec![("topic", topic), ("unit", self.plan.temperature_unit.as_str())];
        let scope = [("topic", topic)];
        let families: [(&str, fn(&ReadingStats) -> f64); 4] = [
            (TEMPERATURE_CURRENT, |s| s.latest),
            (TEMPERATURE_AVERAGE, |s| s.average),
            (TEMPERATURE_MIN, |s| s.min),
            (TEMPERATURE_MAX, |s| s.max),
        ];
        for (name, value) in families {
            let series: Vec<Series<'_>> =
                stats.iter().map(|stats| (labels.clone(), value(stats))).collect();
            self.replace(&mut out, name, &scope, &series);
        }
        out
    }

    /// Write one series; a rejection is logged and counted, never fatal
    fn publish(&self, out: &mut EntityPublished, name: &str, labels: &Labels<'_>, value: f64) {
        match self.sink.set(name, labels, value) {
            Ok(()) => out.series += 1,
            Err(e) => {
                out.publish_errors += 1;
                self.metrics.record_publish_error();
                warn!(metric = %name, labels = ?labels, error = %e, "metric_publish_failed");
            }
        }
    }

    /// Replace all series of `name` under `scope`; a rejection is logged and counted
    fn replace(&self, out: &mut EntityPublished, name: &str, scope: &Labels<'_>, series: &[Series<'_>]) {
        match self.sink.replace(name, scope, series) {
            Ok(()) => out.series += series.len(),
            Err(e) => {
                out.publish_errors += 1;
                self.metrics.record_publish_error();
                warn!(metric = %name, scope = ?scope, error = %e, "metric_replace_failed");
            }
        }
    }

    /// Recompute on every tick until shutdown
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = %interval.as_secs(),
            binary = %self.plan.binary.len(),
            exclusive = %self.plan.exclusive.len(),
            temperature = %self.plan.temperature.len(),
            "aggregator_started"
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once(Utc::now()).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("aggregator_shutdown");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::event_store::MemoryEventStore;
    use crate::io::prometheus::{GaugeRegistry, SinkError};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::{json, Value};

    const SWITCH: &str = "home/bulb_b/state";
    const ROKU: &str = "home/office_roku_active_app";
    const KITCHEN: &str = "home/kitchen_temperature/state";

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn rec(topic: &str, value: Value, secs: i64) -> EventRecord {
        EventRecord::new(topic, value, at(secs))
    }

    fn plan(binary: &[&str], exclusive: &[&str], temperature: &[&str]) -> AggregationPlan {
        let owned = |topics: &[&str]| -> Vec<String> { topics.iter().map(|t| t.to_string()).collect() };
        AggregationPlan {
            binary: owned(binary),
            exclusive: owned(exclusive),
            temperature: owned(temperature),
            temperature_unit: "celsius".to_string(),
            window: None,
            fetch_timeout: Duration::from_millis(200),
        }
    }

    fn aggregator(
        source: Arc<dyn EventSource>,
        sink: Arc<dyn MetricsSink>,
        plan: AggregationPlan,
    ) -> Aggregator {
        Aggregator::new(
            source,
            sink,
            plan,
            OccupancyTracker::new(["Home", "Roku"]),
            Arc::new(Metrics::new()),
        )
    }

    fn sample_store() -> MemoryEventStore {
        MemoryEventStore::with_records(vec![
            rec(SWITCH, json!("on"), 0),
            rec(SWITCH, json!("off"), 10),
            rec(SWITCH, json!(42), 12),
            rec(SWITCH, json!("on"), 20),
            rec(ROKU, json!("Netflix"), 0),
            rec(ROKU, json!("Hulu"), 10),
            rec(ROKU, json!("Home"), 15),
            rec(ROKU, json!("Netflix"), 20),
            rec(KITCHEN, json!(20.0), 0),
            rec(KITCHEN, json!("22.0"), 5),
            rec(KITCHEN, json!("warm"), 6),
        ])
    }

    /// Source that fails or stalls for selected topics
    struct FlakySource {
        inner: MemoryEventStore,
        failing: &'static str,
        stalling: Option<&'static str>,
    }

    #[async_trait]
    impl EventSource for FlakySource {
        async fn fetch(&self, topic: &str, window: Window) -> Result<Vec<EventRecord>, FetchError> {
            if topic == self.failing {
                return Err(FetchError::Unavailable("connection refused".to_string()));
            }
            if Some(topic) == self.stalling {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            self.inner.fetch(topic, window).await
        }
    }

    /// Sink that rejects everything
    struct RejectingSink;

    impl MetricsSink for RejectingSink {
        fn set(&self, name: &str, _labels: &Labels<'_>, _value: f64) -> Result<(), SinkError> {
            Err(SinkError::UnknownFamily(name.to_string()))
        }

        fn replace(&self, name: &str, _scope: &Labels<'_>, _series: &[Series<'_>]) -> Result<(), SinkError> {
            Err(SinkError::UnknownFamily(name.to_string()))
        }
    }

    #[tokio::test]
    async fn test_run_publishes_all_kinds() {
        let registry = Arc::new(GaugeRegistry::new());
        let agg = aggregator(Arc::new(sample_store()), registry.clone(), plan(&[SWITCH], &[ROKU], &[KITCHEN]));

        let report = agg.run_once(at(25)).await;
        assert!(report.skipped.is_empty());
        assert_eq!(report.published.len(), 3);
        assert_eq!(report.events_dropped(), 2);

        assert_eq!(registry.get(SWITCH_TOTAL_ON_DURATION, &[SWITCH]), Some(15.0));
        assert_eq!(registry.get(SWITCH_ON_DURATION, &[SWITCH]), Some(5.0));
        assert_eq!(registry.get(SWITCH_EVENTS, &[SWITCH, "on"]), Some(2.0));
        assert_eq!(registry.get(SWITCH_EVENTS, &[SWITCH, "off"]), Some(1.0));

        assert_eq!(registry.get(APP_USAGE, &[ROKU, "Netflix"]), Some(15.0));
        assert_eq!(registry.get(APP_USAGE, &[ROKU, "Hulu"]), Some(5.0));
        assert_eq!(registry.get(APP_USAGE, &[ROKU, "Home"]), None);

        assert_eq!(registry.get(TEMPERATURE_CURRENT, &[KITCHEN, "celsius"]), Some(22.0));
        assert_eq!(registry.get(TEMPERATURE_AVERAGE, &[KITCHEN, "celsius"]), Some(21.0));
        assert_eq!(registry.get(TEMPERATURE_MIN, &[KITCHEN, "celsius"]), Some(20.0));
        assert_eq!(registry.get(TEMPERATURE_MAX, &[KITCHEN, "celsius"]), Some(22.0));
    }

    #[tokio::test]
    async fn test_run_is_idempotent_for_fixed_clock() {
        let registry = Arc::new(GaugeRegistry::new());
        let agg = aggregator(Arc::new(sample_store()), registry.clone(), plan(&[SWITCH], &[ROKU], &[KITCHEN]));

        agg.run_once(at(40)).await;
        let first = registry.snapshot();
        agg.run_once(at(40)).await;
        assert_eq!(registry.snapshot(), first);
    }

    #[tokio::test]
    async fn test_open_interval_grows_across_runs() {
        let registry = Arc::new(GaugeRegistry::new());
        let agg = aggregator(Arc::new(sample_store()), registry.clone(), plan(&[SWITCH], &[], &[]));

        agg.run_once(at(30)).await;
        let earlier = registry.get(SWITCH_TOTAL_ON_DURATION, &[SWITCH]).unwrap();
        agg.run_once(at(90)).await;
        let later = registry.get(SWITCH_TOTAL_ON_DURATION, &[SWITCH]).unwrap();
        assert_eq!(earlier, 20.0);
        assert_eq!(later, 80.0);
    }

    #[tokio::test]
    async fn test_fetch_failure_isolated() {
        let registry = Arc::new(GaugeRegistry::new());
        let source = FlakySource { inner: sample_store(), failing: ROKU, stalling: None };
        let agg = aggregator(Arc::new(source), registry.clone(), plan(&[SWITCH], &[ROKU], &[]));

        let report = agg.run_once(at(25)).await;
        assert!(report.is_skipped(ROKU));
        assert!(matches!(report.skipped[0].2, SkipReason::Fetch(FetchError::Unavailable(_))));
        assert_eq!(registry.get(SWITCH_TOTAL_ON_DURATION, &[SWITCH]), Some(15.0));
        assert_eq!(registry.get(APP_USAGE, &[ROKU, "Netflix"]), None);
    }

    #[tokio::test]
    async fn test_slow_fetch_times_out_without_stalling_batch() {
        let registry = Arc::new(GaugeRegistry::new());
        let source = FlakySource { inner: sample_store(), failing: "none", stalling: Some(SWITCH) };
        let agg = aggregator(Arc::new(source), registry.clone(), plan(&[SWITCH], &[ROKU], &[]));

        let started = Instant::now();
        let report = agg.run_once(at(25)).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(report.is_skipped(SWITCH));
        assert!(matches!(report.skipped[0].2, SkipReason::Fetch(FetchError::Timeout(_))));
        assert_eq!(registry.get(APP_USAGE, &[ROKU, "Netflix"]), Some(15.0));
    }

    #[tokio::test]
    async fn test_out_of_order_skips_entity() {
        /// Source that returns records exactly as stored
        struct Unsorted(Vec<EventRecord>);

        #[async_trait]
        impl EventSource for Unsorted {
            async fn fetch(&self, topic: &str, _window: Window) -> Result<Vec<EventRecord>, FetchError> {
                Ok(self.0.iter().filter(|r| r.topic == topic).cloned().collect())
            }
        }

        let source = Unsorted(vec![
            rec(SWITCH, json!("on"), 10),
            rec(SWITCH, json!("off"), 5),
            rec(ROKU, json!("Netflix"), 0),
        ]);
        let registry = Arc::new(GaugeRegistry::new());
        let agg = aggregator(Arc::new(source), registry.clone(), plan(&[SWITCH], &[ROKU], &[]));

        let report = agg.run_once(at(25)).await;
        assert!(report.is_skipped(SWITCH));
        assert!(matches!(report.skipped[0].2, SkipReason::Ordering(_)));
        assert_eq!(registry.get(SWITCH_TOTAL_ON_DURATION, &[SWITCH]), None);
        assert_eq!(registry.get(APP_USAGE, &[ROKU, "Netflix"]), Some(25.0));
    }

    #[tokio::test]
    async fn test_empty_entity_publishes_zero() {
        let registry = Arc::new(GaugeRegistry::new());
        let agg = aggregator(Arc::new(MemoryEventStore::new()), registry.clone(), plan(&[SWITCH], &[ROKU], &[KITCHEN]));

        let report = agg.run_once(at(25)).await;
        assert!(report.skipped.is_empty());
        assert_eq!(registry.get(SWITCH_TOTAL_ON_DURATION, &[SWITCH]), Some(0.0));
        assert_eq!(registry.get(SWITCH_ON_DURATION, &[SWITCH]), Some(0.0));
        // No labels seen, no temperature readings: nothing to publish
        assert!(registry.snapshot().iter().all(|(name, _, _)| name.starts_with("switch_")));
    }

    #[tokio::test]
    async fn test_publish_errors_do_not_skip() {
        let metrics = Arc::new(Metrics::new());
        let agg = Aggregator::new(
            Arc::new(sample_store()),
            Arc::new(RejectingSink),
            plan(&[SWITCH], &[], &[]),
            OccupancyTracker::default(),
            metrics.clone(),
        );

        let report = agg.run_once(at(25)).await;
        assert!(report.skipped.is_empty());
        assert_eq!(report.publish_errors(), 4);
        assert_eq!(metrics.report().publish_errors_total, 4);
        assert_eq!(metrics.report().runs_total, 1);
    }

    #[tokio::test]
    async fn test_window_limits_events() {
        let registry = Arc::new(GaugeRegistry::new());
        let mut windowed = plan(&[SWITCH], &[], &[]);
        windowed.window = Some(chrono::Duration::seconds(10));
        let agg = aggregator(Arc::new(sample_store()), registry.clone(), windowed);

        // Window [15, 25): only the trailing "on" at 20 remains
        agg.run_once(at(25)).await;
        assert_eq!(registry.get(SWITCH_TOTAL_ON_DURATION, &[SWITCH]), Some(5.0));
        assert_eq!(registry.get(SWITCH_EVENTS, &[SWITCH, "off"]), Some(0.0));
    }

    #[tokio::test]
    async fn test_windowed_rerun_drops_labels_that_left_the_window() {
        let store = MemoryEventStore::with_records(vec![
            rec(ROKU, json!("Netflix"), 0),
            rec(KITCHEN, json!(19.5), 10),
            rec(ROKU, json!("Hulu"), 200),
        ]);
        let registry = Arc::new(GaugeRegistry::new());
        let mut windowed = plan(&[], &[ROKU], &[KITCHEN]);
        windowed.window = Some(chrono::Duration::seconds(100));
        let agg = aggregator(Arc::new(store), registry.clone(), windowed);

        agg.run_once(at(60)).await;
        assert_eq!(registry.get(APP_USAGE, &[ROKU, "Netflix"]), Some(60.0));
        assert_eq!(registry.get(TEMPERATURE_CURRENT, &[KITCHEN, "celsius"]), Some(19.5));

        // Window [150, 250): only Hulu@200 remains, no readings
        let report = agg.run_once(at(250)).await;
        assert!(report.skipped.is_empty());
        assert_eq!(registry.get(APP_USAGE, &[ROKU, "Netflix"]), None);
        assert_eq!(registry.get(APP_USAGE, &[ROKU, "Hulu"]), Some(50.0));
        for family in [TEMPERATURE_CURRENT, TEMPERATURE_AVERAGE, TEMPERATURE_MIN, TEMPERATURE_MAX] {
            assert_eq!(registry.get(family, &[KITCHEN, "celsius"]), None);
        }
    }

    #[tokio::test]
    async fn test_window_beyond_calendar_range_runs_unbounded() {
        let registry = Arc::new(GaugeRegistry::new());
        let mut huge = plan(&[SWITCH], &[ROKU], &[]);
        huge.window = chrono::Duration::try_seconds(10_000_000_000_000);
        assert!(huge.window.is_some());
        let agg = aggregator(Arc::new(sample_store()), registry.clone(), huge);

        let report = agg.run_once(at(25)).await;
        assert!(report.skipped.is_empty());
        assert_eq!(registry.get(SWITCH_TOTAL_ON_DURATION, &[SWITCH]), Some(15.0));
        assert_eq!(registry.get(APP_USAGE, &[ROKU, "Netflix"]), Some(15.0));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let registry = Arc::new(GaugeRegistry::new());
        let metrics = Arc::new(Metrics::new());
        let agg = Aggregator::new(
            Arc::new(sample_store()),
            registry.clone(),
            plan(&[SWITCH], &[], &[]),
            OccupancyTracker::default(),
            metrics.clone(),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(agg.run(Duration::from_secs(3600), shutdown_rx));
        // First tick fires immediately
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();

        assert_eq!(metrics.report().runs_total, 1);
        assert!(registry.get(SWITCH_TOTAL_ON_DURATION, &[SWITCH]).is_some());
    }
}
