//! Configuration loading from TOML files
//!
//! Config file is selected via `--config <path>` (default: config/dev.toml).
//! A missing or unparsable file falls back to the built-in defaults, which
//! track the devices of the home deployment.

use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_mqtt_topic")]
    pub topic: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Run the ingestor in this process
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_mqtt_topic() -> String {
    "home/#".to_string()
}

fn default_client_id() -> String {
    "home-metrics-ingestor".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            topic: default_mqtt_topic(),
            client_id: default_client_id(),
            username: None,
            password: None,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// JSONL event log path
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_path() -> String {
    "data/mqtt_events.jsonl".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { path: default_store_path() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// HTTP port for /metrics and the API (0 to disable)
    #[serde(default = "default_http_port")]
    pub port: u16,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

fn default_http_port() -> u16 {
    8080
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { port: default_http_port(), bind_address: default_bind_address() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregationConfig {
    /// Seconds between recomputations
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// How far back each run looks (0 = all history)
    #[serde(default)]
    pub window_secs: u64,
    /// Per-entity bound on an event store fetch
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    /// Seconds between service counter log lines
    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: u64,
}

fn default_interval_secs() -> u64 {
    30
}

fn default_fetch_timeout_ms() -> u64 {
    10_000
}

fn default_report_interval_secs() -> u64 {
    60
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            window_secs: 0,
            fetch_timeout_ms: default_fetch_timeout_ms(),
            report_interval_secs: default_report_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntitiesConfig {
    /// Topics reporting "on"/"off"
    #[serde(default = "default_binary_topics")]
    pub binary: Vec<String>,
    /// Topics reporting one active state out of many (e.g. active app)
    #[serde(default = "default_exclusive_topics")]
    pub exclusive: Vec<String>,
    /// Labels that end the active state without becoming active
    #[serde(default = "default_excluded_labels")]
    pub excluded_labels: Vec<String>,
    /// Topics reporting numeric temperature readings
    #[serde(default = "default_temperature_topics")]
    pub temperature: Vec<String>,
    #[serde(default = "default_temperature_unit")]
    pub temperature_unit: String,
}

fn default_binary_topics() -> Vec<String> {
    [
        "home/ezras_room_heater/state",
        "home/nikos_room_heater/state",
        "home/bulb_b/state",
        "home/bulb_d/state",
        "home/doorbell_motion/state",
        "home/aquarium_power_monitor/state",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_exclusive_topics() -> Vec<String> {
    [
        "home/living_room_roku_active_app",
        "home/office_roku_active_app",
        "home/basement_roku_active_app",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_excluded_labels() -> Vec<String> {
    ["Roku", "Home", "Roku Dynamic Menu", "unknown"].into_iter().map(String::from).collect()
}

fn default_temperature_topics() -> Vec<String> {
    vec![DEFAULT_TEMPERATURE_TOPIC.to_string()]
}

fn default_temperature_unit() -> String {
    "fahrenheit".to_string()
}

/// Topic the temperature API falls back to when none is given
pub const DEFAULT_TEMPERATURE_TOPIC: &str = "home/kitchen_temperature/state";

impl Default for EntitiesConfig {
    fn default() -> Self {
        Self {
            binary: default_binary_topics(),
            exclusive: default_exclusive_topics(),
            excluded_labels: default_excluded_labels(),
            temperature: default_temperature_topics(),
            temperature_unit: default_temperature_unit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub entities: EntitiesConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_topic: String,
    mqtt_client_id: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    mqtt_enabled: bool,
    store_path: String,
    http_port: u16,
    http_bind_address: String,
    interval_secs: u64,
    window_secs: u64,
    fetch_timeout_ms: u64,
    report_interval_secs: u64,
    binary_topics: Vec<String>,
    exclusive_topics: Vec<String>,
    excluded_labels: Vec<String>,
    temperature_topics: Vec<String>,
    temperature_unit: String,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(
            TomlConfig {
                mqtt: MqttConfig::default(),
                store: StoreConfig::default(),
                http: HttpConfig::default(),
                aggregation: AggregationConfig::default(),
                entities: EntitiesConfig::default(),
            },
            "default".to_string(),
        )
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_topic: toml_config.mqtt.topic,
            mqtt_client_id: toml_config.mqtt.client_id,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            mqtt_enabled: toml_config.mqtt.enabled,
            store_path: toml_config.store.path,
            http_port: toml_config.http.port,
            http_bind_address: toml_config.http.bind_address,
            interval_secs: toml_config.aggregation.interval_secs,
            window_secs: toml_config.aggregation.window_secs,
            fetch_timeout_ms: toml_config.aggregation.fetch_timeout_ms,
            report_interval_secs: toml_config.aggregation.report_interval_secs,
            binary_topics: toml_config.entities.binary,
            exclusive_topics: toml_config.entities.exclusive,
            excluded_labels: toml_config.entities.excluded_labels,
            temperature_topics: toml_config.entities.temperature,
            temperature_unit: toml_config.entities.temperature_unit,
            config_file,
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration - tries the TOML file first, falls back to defaults
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_topic(&self) -> &str {
        &self.mqtt_topic
    }

    pub fn mqtt_client_id(&self) -> &str {
        &self.mqtt_client_id
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn mqtt_enabled(&self) -> bool {
        self.mqtt_enabled
    }

    pub fn store_path(&self) -> &str {
        &self.store_path
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn http_bind_address(&self) -> &str {
        &self.http_bind_address
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    /// Evaluation window length; `None` means all history
    pub fn window(&self) -> Option<chrono::Duration> {
        match self.window_secs {
            0 => None,
            secs => chrono::Duration::try_seconds(i64::try_from(secs).unwrap_or(i64::MAX / 1000)),
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs.max(1))
    }

    pub fn binary_topics(&self) -> &[String] {
        &self.binary_topics
    }

    pub fn exclusive_topics(&self) -> &[String] {
        &self.exclusive_topics
    }

    pub fn excluded_labels(&self) -> &[String] {
        &self.excluded_labels
    }

    pub fn temperature_topics(&self) -> &[String] {
        &self.temperature_topics
    }

    pub fn temperature_unit(&self) -> &str {
        &self.temperature_unit
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }
}
