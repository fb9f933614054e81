//! Integration tests for configuration loading

use home_metrics::infra::Config;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[mqtt]
host = "test-host"
port = 1884
topic = "test/#"
username = "ingest"
password = "secret"

[store]
path = "/tmp/events.jsonl"

[http]
port = 9091
bind_address = "127.0.0.1"

[aggregation]
interval_secs = 15
window_secs = 3600
fetch_timeout_ms = 2500

[entities]
binary = ["home/porch_light/state"]
exclusive = ["home/den_roku_active_app"]
excluded_labels = ["Home"]
temperature = []
temperature_unit = "celsius"
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.mqtt_host(), "test-host");
    assert_eq!(config.mqtt_port(), 1884);
    assert_eq!(config.mqtt_topic(), "test/#");
    assert_eq!(config.mqtt_username(), Some("ingest"));
    assert_eq!(config.mqtt_password(), Some("secret"));
    assert_eq!(config.store_path(), "/tmp/events.jsonl");
    assert_eq!(config.http_port(), 9091);
    assert_eq!(config.http_bind_address(), "127.0.0.1");
    assert_eq!(config.interval(), Duration::from_secs(15));
    assert_eq!(config.window(), Some(chrono::Duration::hours(1)));
    assert_eq!(config.fetch_timeout(), Duration::from_millis(2500));
    assert_eq!(config.binary_topics(), ["home/porch_light/state"]);
    assert_eq!(config.exclusive_topics(), ["home/den_roku_active_app"]);
    assert_eq!(config.excluded_labels(), ["Home"]);
    assert!(config.temperature_topics().is_empty());
    assert_eq!(config.temperature_unit(), "celsius");
}

#[test]
fn test_missing_mqtt_section_is_an_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[http]\nport = 9000\n").unwrap();
    temp_file.flush().unwrap();

    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("Failed to parse config file"));
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.mqtt_host(), "localhost");
    assert_eq!(config.mqtt_port(), 1883);
    assert_eq!(config.config_file(), "default");
    assert_eq!(config.binary_topics().len(), 6);
}
