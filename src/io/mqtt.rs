//! MQTT ingestor - subscribes to home topics and appends every message to the event log

use crate::domain::record::{parse_payload, EventRecord};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::event_store::EventLog;
use chrono::{DateTime, Utc};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Build and store one record; returns false if the append failed
pub fn ingest_message(
    log: &dyn EventLog,
    metrics: &Metrics,
    topic: &str,
    payload: &[u8],
    received_at: DateTime<Utc>,
) -> bool {
    let record = EventRecord::new(topic, parse_payload(payload), received_at);
    match log.append(&record) {
        Ok(()) => {
            metrics.record_event_ingested();
            debug!(topic = %topic, device = %record.device, "mqtt_event_stored");
            true
        }
        Err(e) => {
            metrics.record_ingest_error();
            error!(topic = %topic, error = %e, "mqtt_event_store_failed");
            false
        }
    }
}

/// Start the MQTT ingestor
///
/// Messages are timestamped on receipt. A failed append is logged and
/// counted; the loop keeps consuming.
pub async fn start_mqtt_ingestor(
    config: &Config,
    log: Arc<dyn EventLog>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut mqttoptions =
        MqttOptions::new(config.mqtt_client_id(), config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    client.subscribe(config.mqtt_topic(), QoS::AtLeastOnce).await?;

    info!(
        topic = %config.mqtt_topic(),
        host = %config.mqtt_host(),
        port = %config.mqtt_port(),
        "mqtt_ingestor_subscribed"
    );

    // Rate-limit append failure warnings to 1 per second
    let mut last_fail_warn = Instant::now() - Duration::from_secs(2);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("mqtt_shutdown");
                    let _ = client.disconnect().await;
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let stored = ingest_message(
                            log.as_ref(),
                            &metrics,
                            &publish.topic,
                            &publish.payload,
                            Utc::now(),
                        );
                        if !stored && last_fail_warn.elapsed() > Duration::from_secs(1) {
                            warn!(errors = %metrics.report().ingest_errors_total, "mqtt_ingest_failing");
                            last_fail_warn = Instant::now();
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "mqtt_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}
