//! Stored event records as written by the MQTT ingestor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One observed MQTT publish, as persisted in the event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub topic: String,
    #[serde(default)]
    pub device: String,
    /// Parsed payload: object, number, or plain string
    pub value: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl EventRecord {
    /// Build a record, deriving device and tags from the topic path
    pub fn new(topic: &str, value: Value, timestamp: DateTime<Utc>) -> Self {
        let mut tags = BTreeMap::new();
        tags.insert("room".to_string(), room_from_topic(topic));
        tags.insert("sensor_type".to_string(), sensor_type_from_topic(topic));
        Self { topic: topic.to_string(), device: device_from_topic(topic), value, timestamp, tags }
    }
}

/// Parse a raw payload: JSON object first, then a float, else the text itself
pub fn parse_payload(payload: &[u8]) -> Value {
    if let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(payload) {
        return Value::Object(map);
    }

    let text = String::from_utf8_lossy(payload);
    if let Ok(number) = text.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(number) {
            return Value::Number(n);
        }
    }

    Value::String(text.into_owned())
}

/// "home/living_room/roku_on_or_off" -> "living_room"
pub fn device_from_topic(topic: &str) -> String {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() > 1 {
        parts[1..parts.len() - 1].join("_")
    } else {
        "unknown_device".to_string()
    }
}

/// "home/living_room/roku_on_or_off" -> "living_room"
pub fn room_from_topic(topic: &str) -> String {
    topic.split('/').nth(1).map_or_else(|| "unknown_room".to_string(), str::to_string)
}

/// "home/kitchen/temperature" -> "temperature"
pub fn sensor_type_from_topic(topic: &str) -> String {
    topic.split('/').nth(2).map_or_else(|| "unknown_sensor_type".to_string(), str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_payload_variants() {
        assert_eq!(parse_payload(br#"{"temp": 21}"#), json!({"temp": 21}));
        assert_eq!(parse_payload(b"21.5"), json!(21.5));
        assert_eq!(parse_payload(b"on"), json!("on"));
        // JSON that is not an object stays text unless numeric
        assert_eq!(parse_payload(br#""Netflix""#), json!("\"Netflix\""));
        assert_eq!(parse_payload(b"Roku Dynamic Menu"), json!("Roku Dynamic Menu"));
    }

    #[test]
    fn test_topic_helpers() {
        assert_eq!(device_from_topic("home/living_room/roku_on_or_off"), "living_room");
        assert_eq!(device_from_topic("home/a/b/state"), "a_b");
        assert_eq!(device_from_topic("standalone"), "unknown_device");

        assert_eq!(room_from_topic("home/living_room/roku_on_or_off"), "living_room");
        assert_eq!(room_from_topic("standalone"), "unknown_room");

        assert_eq!(sensor_type_from_topic("home/kitchen/temperature"), "temperature");
        assert_eq!(sensor_type_from_topic("home/bulb_b"), "unknown_sensor_type");
    }

    #[test]
    fn test_new_record_tags() {
        let record = EventRecord::new("home/kitchen/temperature", json!(20.0), Utc::now());
        assert_eq!(record.device, "kitchen");
        assert_eq!(record.tags.get("room").map(String::as_str), Some("kitchen"));
        assert_eq!(record.tags.get("sensor_type").map(String::as_str), Some("temperature"));
    }
}
