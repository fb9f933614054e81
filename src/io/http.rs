//! HTTP endpoint - Prometheus scrape, health, and temperature queries
//!
//! Routes:
//! - `GET /metrics` - published gauges plus service counters
//! - `GET /health` - liveness
//! - `GET /api/v1/temperature/{average,max,min}?topic=&start=&end=` - ad-hoc
//!   statistics over stored readings, dates as `YYYY-MM-DD`, end day inclusive

use crate::domain::types::{decode_readings, Window};
use crate::infra::config::DEFAULT_TEMPERATURE_TOPIC;
use crate::infra::metrics::Metrics;
use crate::io::event_store::{EventSource, FetchError};
use crate::io::prometheus::{format_prometheus_metrics, GaugeRegistry};
use crate::services::stats::{ReadingStats, Statistic};
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Shared state for request handlers
#[derive(Clone)]
pub struct HttpState {
    pub registry: Arc<GaugeRegistry>,
    pub metrics: Arc<Metrics>,
    pub source: Arc<dyn EventSource>,
    pub fetch_timeout: Duration,
}

/// Parsed temperature query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemperatureQuery {
    pub topic: String,
    pub window: Window,
}

impl TemperatureQuery {
    /// Parse `topic`, `start`, `end` from a raw query string
    pub fn parse(query: Option<&str>) -> Result<Self, String> {
        let mut topic = None;
        let mut start = None;
        let mut end = None;
        for (key, value) in form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
            match key.as_ref() {
                "topic" => topic = Some(value.into_owned()),
                "start" => start = Some(value.into_owned()),
                "end" => end = Some(value.into_owned()),
                _ => {}
            }
        }

        let topic = topic
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_TEMPERATURE_TOPIC.to_string());
        let start = parse_day("start", start.as_deref())?;
        let end = parse_day("end", end.as_deref())? + chrono::Duration::days(1);
        Ok(Self { topic, window: Window::between(start, end) })
    }
}

fn parse_day(name: &str, value: Option<&str>) -> Result<DateTime<Utc>, String> {
    let value = value.ok_or_else(|| format!("missing {name} date"))?;
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map(|d| d.and_time(NaiveTime::MIN).and_utc())
        .map_err(|e| format!("invalid {name} date {value:?}: {e}"))
}

fn statistic_for(path: &str) -> Option<Statistic> {
    match path.strip_prefix("/api/v1/temperature/")? {
        "average" => Some(Statistic::Average),
        "max" => Some(Statistic::Max),
        "min" => Some(Statistic::Min),
        _ => None,
    }
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .expect("static response should not fail")
}

async fn temperature_statistic(
    state: &HttpState,
    stat: Statistic,
    query: Option<&str>,
) -> Response<Full<Bytes>> {
    let query = match TemperatureQuery::parse(query) {
        Ok(q) => q,
        Err(e) => return json_response(StatusCode::BAD_REQUEST, json!({ "error": e })),
    };

    let fetched = tokio::time::timeout(state.fetch_timeout, state.source.fetch(&query.topic, query.window))
        .await
        .unwrap_or(Err(FetchError::Timeout(state.fetch_timeout)));
    let records = match fetched {
        Ok(records) => records,
        Err(e) => {
            warn!(topic = %query.topic, error = %e, "temperature_query_failed");
            return json_response(StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": e.to_string() }));
        }
    };

    let (readings, _) = decode_readings(&query.topic, &records);
    match ReadingStats::from_readings(&readings) {
        Some(stats) => {
            debug!(topic = %query.topic, stat = %stat.as_str(), readings = %stats.count, "temperature_query");
            json_response(StatusCode::OK, json!({ "value": stats.get(stat) }))
        }
        None => json_response(StatusCode::NOT_FOUND, json!({ "message": "No data found" })),
    }
}

/// Route one request
pub async fn route(
    state: &HttpState,
    method: &Method,
    path: &str,
    query: Option<&str>,
) -> Response<Full<Bytes>> {
    match (method, path) {
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&state.registry, &state.metrics);
            Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail")
        }
        (&Method::GET, "/health") => Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("ok")))
            .expect("static response should not fail"),
        (&Method::GET, path) => match statistic_for(path) {
            Some(stat) => temperature_statistic(state, stat, query).await,
            None => not_found(),
        },
        _ => not_found(),
    }
}

fn not_found() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Full::new(Bytes::from("Not Found")))
        .expect("static response should not fail")
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: HttpState,
) -> Result<Response<Full<Bytes>>, Infallible> {
    Ok(route(&state, req.method(), req.uri().path(), req.uri().query()).await)
}

/// Start the HTTP server
pub async fn start_http_server(
    addr: SocketAddr,
    state: HttpState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;

    info!(addr = %addr, "http_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| handle_request(req, state.clone()));

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "http_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "http_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("http_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
