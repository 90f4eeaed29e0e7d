//! Shared fixtures: an in-memory scripted transport and table helpers.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use timegpt_client::error_code::StatusClass;
use timegpt_client::resilience::{FixedJitter, ManualClock};
use timegpt_client::transport::wire::HISTORIC_FORECAST_PATH;
use timegpt_client::transport::Transport;
use timegpt_client::{Error, SeriesTable, TimeGptClient, TimeGptClientBuilder};

type Handler = dyn Fn(&Value) -> timegpt_client::Result<Value> + Send + Sync;
type Delay = dyn Fn(&Value) -> Duration + Send + Sync;

/// Transport answering forecast calls through a closure and recording every payload.
///
/// In-sample calls go to a separate handler, [`echo_history`] by default.
pub struct ScriptedTransport {
    handler: Box<Handler>,
    history_handler: Box<Handler>,
    delay: Option<Box<Delay>>,
    get_response: Value,
    probe_status: u16,
    posts: Mutex<Vec<(String, Value)>>,
    gets: Mutex<Vec<(String, Vec<(String, String)>)>>,
}

impl ScriptedTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&Value) -> timegpt_client::Result<Value> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            history_handler: Box::new(|payload| Ok(echo_history(payload))),
            delay: None,
            get_response: Value::Null,
            probe_status: 200,
            posts: Mutex::new(Vec::new()),
            gets: Mutex::new(Vec::new()),
        }
    }

    /// Answers every forecast call with [`echo_forecast`].
    pub fn echo() -> Self {
        Self::new(|payload| Ok(echo_forecast(payload)))
    }

    pub fn with_delay<F>(mut self, delay: F) -> Self
    where
        F: Fn(&Value) -> Duration + Send + Sync + 'static,
    {
        self.delay = Some(Box::new(delay));
        self
    }

    pub fn with_history_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Value) -> timegpt_client::Result<Value> + Send + Sync + 'static,
    {
        self.history_handler = Box::new(handler);
        self
    }

    pub fn with_get_response(mut self, body: Value) -> Self {
        self.get_response = body;
        self
    }

    pub fn with_probe_status(mut self, status: u16) -> Self {
        self.probe_status = status;
        self
    }

    /// Every POST body, in send order.
    pub fn posts(&self) -> Vec<Value> {
        self.posts.lock().unwrap().iter().map(|(_, body)| body.clone()).collect()
    }

    /// POST bodies sent to `path`.
    pub fn posts_to(&self, path: &str) -> Vec<Value> {
        self.posts
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, body)| body.clone())
            .collect()
    }

    pub fn gets(&self) -> Vec<(String, Vec<(String, String)>)> {
        self.gets.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn post_json(&self, path: &str, body: Bytes) -> timegpt_client::Result<Value> {
        let payload: Value = serde_json::from_slice(&body)?;
        self.posts.lock().unwrap().push((path.to_string(), payload.clone()));
        if let Some(delay) = &self.delay {
            tokio::time::sleep(delay(&payload)).await;
        }
        if path == HISTORIC_FORECAST_PATH {
            return (self.history_handler)(&payload);
        }
        (self.handler)(&payload)
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> timegpt_client::Result<Value> {
        self.gets.lock().unwrap().push((
            path.to_string(),
            query.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        ));
        Ok(self.get_response.clone())
    }

    async fn probe(&self, _path: &str) -> timegpt_client::Result<u16> {
        Ok(self.probe_status)
    }
}

/// Forecast of `last + step` for each series in the payload, with
/// `±1` bands for every requested level.
pub fn echo_forecast(payload: &Value) -> Value {
    let y: Vec<f64> = payload["series"]["y"]
        .as_array()
        .map(|a| a.iter().filter_map(Value::as_f64).collect())
        .unwrap_or_default();
    let sizes: Vec<usize> = payload["series"]["sizes"]
        .as_array()
        .map(|a| a.iter().filter_map(|s| s.as_u64().map(|s| s as usize)).collect())
        .unwrap_or_default();
    let h = payload["h"].as_u64().unwrap_or(0) as usize;

    let mut mean = Vec::with_capacity(sizes.len() * h);
    let mut offset = 0;
    for size in sizes {
        let last = y[offset + size - 1];
        mean.extend((1..=h).map(|step| last + step as f64));
        offset += size;
    }

    let intervals = match payload["level"].as_array() {
        Some(levels) => {
            let mut bands = serde_json::Map::new();
            for level in levels {
                bands.insert(format!("lo-{}", level), json!(mean.iter().map(|m| m - 1.0).collect::<Vec<_>>()));
                bands.insert(format!("hi-{}", level), json!(mean.iter().map(|m| m + 1.0).collect::<Vec<_>>()));
            }
            Value::Object(bands)
        }
        None => Value::Null,
    };
    json!({ "mean": mean, "intervals": intervals })
}

/// Fitted values for every observation but the first of each series:
/// the previous observation, with `±1` bands per requested level.
pub fn echo_history(payload: &Value) -> Value {
    let y: Vec<f64> = payload["series"]["y"]
        .as_array()
        .map(|a| a.iter().filter_map(Value::as_f64).collect())
        .unwrap_or_default();
    let sizes: Vec<usize> = payload["series"]["sizes"]
        .as_array()
        .map(|a| a.iter().filter_map(|s| s.as_u64().map(|s| s as usize)).collect())
        .unwrap_or_default();

    let mut mean = Vec::with_capacity(y.len());
    let mut fitted_sizes = Vec::with_capacity(sizes.len());
    let mut offset = 0;
    for size in sizes {
        mean.extend_from_slice(&y[offset..offset + size - 1]);
        fitted_sizes.push(size - 1);
        offset += size;
    }

    let intervals = match payload["level"].as_array() {
        Some(levels) => {
            let mut bands = serde_json::Map::new();
            for level in levels {
                bands.insert(format!("lo-{}", level), json!(mean.iter().map(|m| m - 1.0).collect::<Vec<_>>()));
                bands.insert(format!("hi-{}", level), json!(mean.iter().map(|m| m + 1.0).collect::<Vec<_>>()));
            }
            Value::Object(bands)
        }
        None => Value::Null,
    };
    json!({ "mean": mean, "intervals": intervals, "sizes": fitted_sizes })
}

/// First observed target of the payload's first series.
pub fn first_y(payload: &Value) -> f64 {
    payload["series"]["y"][0].as_f64().unwrap_or(f64::NAN)
}

pub fn remote(status: u16) -> Error {
    Error::Remote {
        status,
        class: StatusClass::from_http_status(status).name().to_string(),
        message: format!("scripted {status}"),
        retry_after_ms: None,
    }
}

pub fn day(offset: i64) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        + ChronoDuration::days(offset)
}

/// Daily series starting 2024-01-01. Series `i` holds `1000 * i + t`.
pub fn daily_table(series: &[(&str, usize)]) -> SeriesTable {
    let mut table = SeriesTable::new();
    for (i, (id, len)) in series.iter().enumerate() {
        let base = 1000.0 * i as f64;
        table.push_series(id, (0..*len).map(|t| (day(t as i64), base + t as f64)));
    }
    table
}

pub fn builder(transport: Arc<ScriptedTransport>, clock: Arc<ManualClock>) -> TimeGptClientBuilder {
    TimeGptClient::builder()
        .api_key("test-key")
        .transport(transport)
        .clock(clock)
        .jitter(Arc::new(FixedJitter(0.0)))
}

/// Client over `transport` with a virtual clock and no jitter.
pub fn client(transport: Arc<ScriptedTransport>) -> (TimeGptClient, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let client = builder(transport, clock.clone()).build().unwrap();
    (client, clock)
}
