//! Metrics sink and Prometheus text exposition
//!
//! The aggregation driver publishes through the `MetricsSink` trait.
//! `GaugeRegistry` is the in-process implementation: a set of known gauge
//! families, each holding series keyed by label values. Every `set`
//! overwrites, so a run fully replaces what the previous run published.

use crate::infra::metrics::{Metrics, MetricsSummary};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt::Write;
use thiserror::Error;

/// Label set as passed to the sink: (name, value) pairs in family order
pub type Labels<'a> = [(&'a str, &'a str)];

#[derive(Debug, Error, PartialEq)]
pub enum SinkError {
    #[error("unknown metric family {0}")]
    UnknownFamily(String),
    #[error("metric {name} expects labels {expected:?}, got {got:?}")]
    LabelMismatch { name: &'static str, expected: &'static [&'static str], got: Vec<String> },
    #[error("metric {name} value {value} is not finite")]
    NotFinite { name: &'static str, value: f64 },
    #[error("metric {name} series {got:?} is outside scope {scope:?}")]
    OutOfScope { name: &'static str, scope: Vec<String>, got: Vec<String> },
}

/// One series of a scoped replace: full label set and value
pub type Series<'a> = (Vec<(&'a str, &'a str)>, f64);

/// Destination for computed aggregates
pub trait MetricsSink: Send + Sync {
    /// Overwrite the value of one series
    fn set(&self, name: &str, labels: &Labels<'_>, value: f64) -> Result<(), SinkError>;

    /// Make `series` the complete set of `name` series whose leading labels
    /// equal `scope`. Series in scope but not listed are removed. Nothing is
    /// written if any series is rejected.
    fn replace(&self, name: &str, scope: &Labels<'_>, series: &[Series<'_>]) -> Result<(), SinkError>;
}

/// Static description of a gauge family
#[derive(Debug)]
pub struct Family {
    pub name: &'static str,
    pub help: &'static str,
    pub labels: &'static [&'static str],
}

pub const SWITCH_ON_DURATION: &str = "switch_on_duration_seconds";
pub const SWITCH_TOTAL_ON_DURATION: &str = "switch_total_on_duration_seconds";
pub const SWITCH_EVENTS: &str = "switch_events";
pub const APP_USAGE: &str = "app_usage_seconds_total";
pub const TEMPERATURE_CURRENT: &str = "temperature_current";
pub const TEMPERATURE_AVERAGE: &str = "temperature_average";
pub const TEMPERATURE_MIN: &str = "temperature_min";
pub const TEMPERATURE_MAX: &str = "temperature_max";

/// Families the registry accepts
pub const FAMILIES: &[Family] = &[
    Family {
        name: SWITCH_ON_DURATION,
        help: "Current ON duration for switches, in seconds",
        labels: &["topic"],
    },
    Family {
        name: SWITCH_TOTAL_ON_DURATION,
        help: "Total ON duration for switches over the evaluation window, in seconds",
        labels: &["topic"],
    },
    Family {
        name: SWITCH_EVENTS,
        help: "Number of on/off events for switches over the evaluation window",
        labels: &["topic", "state"],
    },
    Family {
        name: APP_USAGE,
        help: "Total time spent on each app, in seconds",
        labels: &["topic", "app"],
    },
    Family {
        name: TEMPERATURE_CURRENT,
        help: "Most recent temperature reading",
        labels: &["topic", "unit"],
    },
    Family {
        name: TEMPERATURE_AVERAGE,
        help: "Average temperature over the evaluation window",
        labels: &["topic", "unit"],
    },
    Family {
        name: TEMPERATURE_MIN,
        help: "Minimum temperature over the evaluation window",
        labels: &["topic", "unit"],
    },
    Family {
        name: TEMPERATURE_MAX,
        help: "Maximum temperature over the evaluation window",
        labels: &["topic", "unit"],
    },
];

fn family(name: &str) -> Option<&'static Family> {
    FAMILIES.iter().find(|f| f.name == name)
}

/// In-memory gauge registry
#[derive(Default)]
pub struct GaugeRegistry {
    /// series[family][label values] = value
    series: RwLock<BTreeMap<&'static str, BTreeMap<Vec<String>, f64>>>,
}

impl GaugeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of one series, if published
    pub fn get(&self, name: &str, label_values: &[&str]) -> Option<f64> {
        let series = self.series.read();
        let key: Vec<String> = label_values.iter().map(|v| v.to_string()).collect();
        series.get(name)?.get(&key).copied()
    }

    /// All published series as (family, label values, value), in render order
    pub fn snapshot(&self) -> Vec<(&'static str, Vec<String>, f64)> {
        let series = self.series.read();
        series
            .iter()
            .flat_map(|(name, values)| {
                values.iter().map(move |(labels, value)| (*name, labels.clone(), *value))
            })
            .collect()
    }

    /// Render all published families in Prometheus text format
    pub fn render(&self, output: &mut String) {
        let series = self.series.read();
        for family in FAMILIES {
            let Some(values) = series.get(family.name) else { continue };
            let _ = writeln!(output, "# HELP {} {}", family.name, family.help);
            let _ = writeln!(output, "# TYPE {} gauge", family.name);
            for (label_values, value) in values {
                let _ = write!(output, "{}{{", family.name);
                for (i, (label, label_value)) in family.labels.iter().zip(label_values).enumerate() {
                    if i > 0 {
                        output.push(',');
                    }
                    let _ = write!(output, "{label}=\"{}\"", escape_label(label_value));
                }
                let _ = writeln!(output, "}} {value}");
            }
        }
    }
}

fn lookup(name: &str) -> Result<&'static Family, SinkError> {
    family(name).ok_or_else(|| SinkError::UnknownFamily(name.to_string()))
}

/// Label names must be the family's (or, for a scope, a prefix of them) in order
fn check_names(family: &'static Family, labels: &Labels<'_>, prefix: bool) -> Result<(), SinkError> {
    let arity_ok = if prefix {
        labels.len() <= family.labels.len()
    } else {
        labels.len() == family.labels.len()
    };
    let names_match = arity_ok && labels.iter().zip(family.labels).all(|((got, _), want)| got == want);
    if names_match {
        return Ok(());
    }
    Err(SinkError::LabelMismatch {
        name: family.name,
        expected: family.labels,
        got: labels.iter().map(|(n, _)| n.to_string()).collect(),
    })
}

fn check_value(family: &'static Family, value: f64) -> Result<(), SinkError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(SinkError::NotFinite { name: family.name, value })
    }
}

fn label_values(labels: &Labels<'_>) -> Vec<String> {
    labels.iter().map(|(_, v)| v.to_string()).collect()
}

fn in_scope(key: &[String], scope: &Labels<'_>) -> bool {
    key.iter().zip(scope).all(|(have, (_, want))| have == want)
}

impl MetricsSink for GaugeRegistry {
    fn set(&self, name: &str, labels: &Labels<'_>, value: f64) -> Result<(), SinkError> {
        let family = lookup(name)?;
        check_names(family, labels, false)?;
        check_value(family, value)?;

        self.series.write().entry(family.name).or_default().insert(label_values(labels), value);
        Ok(())
    }

    fn replace(&self, name: &str, scope: &Labels<'_>, series: &[Series<'_>]) -> Result<(), SinkError> {
        let family = lookup(name)?;
        check_names(family, scope, true)?;

        let mut fresh = Vec::with_capacity(series.len());
        for (labels, value) in series {
            check_names(family, labels, false)?;
            check_value(family, *value)?;
            let key = label_values(labels);
            if !in_scope(&key, scope) {
                return Err(SinkError::OutOfScope {
                    name: family.name,
                    scope: label_values(scope),
                    got: key,
                });
            }
            fresh.push((key, *value));
        }

        let mut all = self.series.write();
        let values = all.entry(family.name).or_default();
        values.retain(|key, _| !in_scope(key, scope));
        values.extend(fresh);
        if values.is_empty() {
            all.remove(family.name);
        }
        Ok(())
    }
}

fn escape_label(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple unlabelled metric
fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name} {val}");
}

fn write_service_metrics(output: &mut String, summary: &MetricsSummary) {
    write_metric(
        output,
        "home_metrics_runs_total",
        "Aggregation runs completed",
        MetricType::Counter,
        summary.runs_total,
    );
    write_metric(
        output,
        "home_metrics_entities_skipped_total",
        "Entities skipped due to fetch, ordering, or timeout failures",
        MetricType::Counter,
        summary.entities_skipped_total,
    );
    write_metric(
        output,
        "home_metrics_events_ingested_total",
        "MQTT messages appended to the event store",
        MetricType::Counter,
        summary.events_ingested_total,
    );
    write_metric(
        output,
        "home_metrics_events_dropped_total",
        "Stored events dropped because they could not be decoded",
        MetricType::Counter,
        summary.events_dropped_total,
    );
    write_metric(
        output,
        "home_metrics_publish_errors_total",
        "Aggregates the metrics sink rejected",
        MetricType::Counter,
        summary.publish_errors_total,
    );
    write_metric(
        output,
        "home_metrics_last_run_duration_us",
        "Wall time of the most recent aggregation run",
        MetricType::Gauge,
        summary.last_run_duration_us,
    );
}

/// Format gauges and service counters in Prometheus text exposition format
pub fn format_prometheus_metrics(registry: &GaugeRegistry, metrics: &Metrics) -> String {
    let mut output = String::with_capacity(4096);
    registry.render(&mut output);
    write_service_metrics(&mut output, &metrics.report());
    output
}
