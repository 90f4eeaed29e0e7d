use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::Proxy;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use super::Transport;
use crate::client::ClientConfig;
use crate::error_code::StatusClass;
use crate::{Error, ErrorContext, Result};

/// Correlation header attached to every outgoing call.
pub const REQUEST_ID_HEADER: &str = "x-timegpt-request-id";

/// reqwest-backed transport talking to the forecast service.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs.max(1)))
            .pool_max_idle_per_host(32)
            .pool_idle_timeout(Some(Duration::from_secs(90)));

        if let Some(proxy_url) = &config.proxy_url {
            let proxy = Proxy::all(proxy_url).map_err(|e| {
                Error::configuration_with_context(
                    format!("invalid proxy URL: {}", e),
                    ErrorContext::new()
                        .with_field_path("proxy_url")
                        .with_source("http_transport"),
                )
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| Error::Transport(TransportError::Other(e.to_string())))?;

        Ok(Self {
            client,
            base_url: config.parsed_base_url()?,
            api_key: config.api_key.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| {
                Error::configuration_with_context(
                    format!("cannot build endpoint URL: {}", e),
                    ErrorContext::new()
                        .with_details(path.to_string())
                        .with_source("http_transport"),
                )
            })
    }

    async fn send(&self, request: reqwest::RequestBuilder, path: &str) -> Result<reqwest::Response> {
        let request_id = Uuid::new_v4().to_string();
        let mut request = request.header(REQUEST_ID_HEADER, request_id.as_str());
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let start = Instant::now();
        let resp = request.send().await.map_err(TransportError::from)?;
        let status = resp.status().as_u16();

        if !resp.status().is_success() {
            let class = StatusClass::from_http_status(status);
            let retry_after_ms = retry_after_ms(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            info!(
                http_status = status,
                error_class = class.name(),
                request_id = request_id.as_str(),
                endpoint = path,
                duration_ms = start.elapsed().as_millis(),
                "timegpt request failed"
            );
            return Err(Error::Remote {
                status,
                class: class.name().to_string(),
                message: error_message(&body),
                retry_after_ms,
            });
        }

        debug!(
            http_status = status,
            request_id = request_id.as_str(),
            endpoint = path,
            duration_ms = start.elapsed().as_millis(),
            "timegpt request completed"
        );
        Ok(resp)
    }

    async fn read_json(resp: reqwest::Response, path: &str) -> Result<Value> {
        let body = resp.bytes().await.map_err(TransportError::from)?;
        serde_json::from_slice(&body).map_err(|e| {
            Error::response_format_with_context(
                format!("response is not valid JSON: {}", e),
                ErrorContext::new()
                    .with_field_path(path.to_string())
                    .with_details(String::from_utf8_lossy(&body[..body.len().min(200)]).into_owned())
                    .with_source("http_transport"),
            )
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_json(&self, path: &str, body: Bytes) -> Result<Value> {
        let request = self
            .client
            .post(self.url(path)?)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        let resp = self.send(request, path).await?;
        Self::read_json(resp, path).await
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let request = self.client.get(self.url(path)?).query(query);
        let resp = self.send(request, path).await?;
        Self::read_json(resp, path).await
    }

    async fn probe(&self, path: &str) -> Result<u16> {
        let request = self.client.get(self.url(path)?);
        match self.send(request, path).await {
            Ok(resp) => Ok(resp.status().as_u16()),
            Err(Error::Remote { status, .. }) => Ok(status),
            Err(e) => Err(e),
        }
    }
}

/// Only the `Retry-After: <seconds>` form is understood.
fn retry_after_ms(headers: &HeaderMap) -> Option<u64> {
    let raw = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?;
    let secs: u64 = raw.trim().parse().ok()?;
    Some(secs.saturating_mul(1000))
}

/// Prefer the service's `detail`/`message` field over the raw body.
fn error_message(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        for key in ["detail", "message", "error"] {
            match json.get(key) {
                Some(Value::String(s)) => return s.clone(),
                Some(other) if !other.is_null() => return other.to_string(),
                _ => {}
            }
        }
    }
    body.trim().to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Connection-level failures that are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            TransportError::Connection(_) => true,
            TransportError::Other(_) => false,
        }
    }
}
