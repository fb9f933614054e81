//! Typed events consumed by the reconstructors
//!
//! Stored records carry a loosely typed JSON value. Everything past the
//! event source boundary works on these validated types instead, so the
//! reconstructors never see a type mismatch.

use crate::domain::record::EventRecord;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Label reported by a switch that is powered
pub const LABEL_ON: &str = "on";
/// Label reported by a switch that is not powered
pub const LABEL_OFF: &str = "off";

/// A discrete state observation for one entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateEvent {
    pub label: String,
    pub timestamp: DateTime<Utc>,
}

impl StateEvent {
    pub fn new(label: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self { label: label.into(), timestamp }
    }
}

/// A numeric sensor reading (temperature and the like)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Why a stored record could not be turned into a typed event
#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("expected a string state label, found {found}")]
    NotALabel { found: &'static str },
    #[error("expected a numeric reading, found {found}")]
    NotANumber { found: &'static str },
    #[error("reading {0:?} is not a finite number")]
    NotFinite(String),
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl TryFrom<&EventRecord> for StateEvent {
    type Error = DecodeError;

    fn try_from(record: &EventRecord) -> Result<Self, Self::Error> {
        match &record.value {
            Value::String(label) => Ok(Self::new(label.as_str(), record.timestamp)),
            other => Err(DecodeError::NotALabel { found: value_kind(other) }),
        }
    }
}

impl TryFrom<&EventRecord> for Reading {
    type Error = DecodeError;

    fn try_from(record: &EventRecord) -> Result<Self, Self::Error> {
        let value = match &record.value {
            Value::Number(n) => n.as_f64().ok_or_else(|| DecodeError::NotFinite(n.to_string()))?,
            // Ingestors that store raw payloads keep numbers as text
            Value::String(s) => {
                s.trim().parse::<f64>().map_err(|_| DecodeError::NotFinite(s.clone()))?
            }
            other => return Err(DecodeError::NotANumber { found: value_kind(other) }),
        };
        if !value.is_finite() {
            return Err(DecodeError::NotFinite(value.to_string()));
        }
        Ok(Self { value, timestamp: record.timestamp })
    }
}

/// Decode state events, dropping records that do not carry a label
///
/// Returns the decoded events (in input order) and the number dropped.
pub fn decode_states(topic: &str, records: &[EventRecord]) -> (Vec<StateEvent>, usize) {
    decode_all(topic, records)
}

/// Decode numeric readings, dropping records that are not numbers
pub fn decode_readings(topic: &str, records: &[EventRecord]) -> (Vec<Reading>, usize) {
    decode_all(topic, records)
}

fn decode_all<'a, T>(topic: &str, records: &'a [EventRecord]) -> (Vec<T>, usize)
where
    T: TryFrom<&'a EventRecord, Error = DecodeError>,
{
    let mut decoded = Vec::with_capacity(records.len());
    let mut dropped = 0;
    for record in records {
        match T::try_from(record) {
            Ok(event) => decoded.push(event),
            Err(e) => {
                dropped += 1;
                debug!(topic = %topic, timestamp = %record.timestamp, error = %e, "event_decode_dropped");
            }
        }
    }
    (decoded, dropped)
}

/// Half-open query window `[start, end)`; no start means unbounded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: Option<DateTime<Utc>>,
    pub end: DateTime<Utc>,
}

impl Window {
    /// Window ending at `end` and reaching back `length` (None = all history)
    ///
    /// A length reaching past the earliest representable instant is unbounded.
    pub fn ending_at(end: DateTime<Utc>, length: Option<chrono::Duration>) -> Self {
        Self { start: length.and_then(|len| end.checked_sub_signed(len)), end }
    }

    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start: Some(start), end }
    }

    #[inline]
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| ts >= start) && ts < self.end
    }
}
