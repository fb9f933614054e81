//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `mqtt` - MQTT ingestor appending raw home events to the store
//! - `event_store` - Event log (JSONL file or in-memory) and windowed fetch
//! - `prometheus` - Metrics sink, gauge registry, and text exposition
//! - `http` - HTTP endpoint for scrapes, health, and temperature queries

pub mod event_store;
pub mod http;
pub mod mqtt;
pub mod prometheus;

// Re-export commonly used types
pub use event_store::{EventLog, EventSource, FetchError, JsonlEventStore, MemoryEventStore};
pub use http::{start_http_server, HttpState};
pub use mqtt::start_mqtt_ingestor;
pub use prometheus::{GaugeRegistry, MetricsSink, SinkError};
