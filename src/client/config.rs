use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

use crate::batch::{BatchLimits, OversizedSeries};
use crate::resilience::RetryConfig;
use crate::{Error, ErrorContext, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.nixtla.io";

/// Client-wide settings. Per-call [`ForecastOptions`](crate::ForecastOptions)
/// override the batching, retry, concurrency and timeout defaults.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub http_timeout_secs: u64,
    pub max_concurrency: usize,
    pub batch: BatchLimits,
    pub oversized: OversizedSeries,
    pub retry: RetryConfig,
    /// Wall time limit for a whole forecast call.
    pub timeout_ms: Option<u64>,
    pub proxy_url: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            http_timeout_secs: 60,
            max_concurrency: 10,
            batch: BatchLimits::default(),
            oversized: OversizedSeries::default(),
            retry: RetryConfig::default(),
            timeout_ms: None,
            proxy_url: None,
        }
    }
}

// The API key never shows up in logs.
impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("base_url", &self.base_url)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("max_concurrency", &self.max_concurrency)
            .field("batch", &self.batch)
            .field("oversized", &self.oversized)
            .field("retry", &self.retry)
            .field("timeout_ms", &self.timeout_ms)
            .field("proxy_url", &self.proxy_url)
            .finish()
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse::<T>().ok())
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl ClientConfig {
    /// Defaults overlaid with the environment:
    /// - `NIXTLA_API_KEY`
    /// - `NIXTLA_BASE_URL`
    /// - `TIMEGPT_HTTP_TIMEOUT_SECS` (default 60)
    /// - `TIMEGPT_MAX_CONCURRENCY` (default 10)
    /// - `TIMEGPT_PROXY_URL`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Overwrite fields for which an environment variable is set.
    pub fn apply_env(&mut self) {
        if let Some(key) = env_string("NIXTLA_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(url) = env_string("NIXTLA_BASE_URL") {
            self.base_url = url;
        }
        if let Some(secs) = env_parse::<u64>("TIMEGPT_HTTP_TIMEOUT_SECS") {
            self.http_timeout_secs = secs.max(1);
        }
        if let Some(n) = env_parse::<usize>("TIMEGPT_MAX_CONCURRENCY") {
            self.max_concurrency = n.max(1);
        }
        if let Some(proxy) = env_string("TIMEGPT_PROXY_URL") {
            self.proxy_url = Some(proxy);
        }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid client configuration: {}", e),
                ErrorContext::new().with_source("client_config"),
            )
        })?;
        config.validate_limits()?;
        Ok(config)
    }

    /// Batch and concurrency limits must be positive.
    pub fn validate_limits(&self) -> Result<()> {
        let limits = [
            (self.batch.max_rows, "batch.max_rows"),
            (self.batch.max_series, "batch.max_series"),
            (Some(self.max_concurrency), "max_concurrency"),
        ];
        for (value, field) in limits {
            if value == Some(0) {
                return Err(Error::configuration_with_context(
                    "limit must be positive",
                    ErrorContext::new()
                        .with_field_path(field)
                        .with_details("got 0")
                        .with_source("client_config"),
                ));
            }
        }
        Ok(())
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text).map_err(|e| match e {
            Error::Configuration { message, context } => Error::Configuration {
                message,
                context: context.with_details(path.display().to_string()),
            },
            other => other,
        })
    }

    /// The base URL with a trailing `/`, so endpoint paths join under it.
    pub fn parsed_base_url(&self) -> Result<Url> {
        let raw = self.base_url.trim();
        let normalized = if raw.ends_with('/') {
            raw.to_string()
        } else {
            format!("{}/", raw)
        };
        let url = Url::parse(&normalized).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid base URL: {}", e),
                ErrorContext::new()
                    .with_field_path("base_url")
                    .with_details(raw.to_string())
                    .with_source("client_config"),
            )
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::configuration_with_context(
                "base URL must use http or https",
                ErrorContext::new()
                    .with_field_path("base_url")
                    .with_details(raw.to_string())
                    .with_source("client_config"),
            ));
        }
        Ok(url)
    }

    /// Azure AI deployments serve a single fixed model.
    pub fn is_azure(&self) -> bool {
        self.base_url.contains("ai.azure")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_overrides_and_defaults() {
        let config = ClientConfig::from_yaml_str(
            r#"
base_url: http://localhost:8080/api
max_concurrency: 4
batch:
  max_rows: 5000
  max_series: 100
retry:
  max_attempts: 5
  base_delay_ms: 100
oversized: reject
"#,
        )
        .unwrap();
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.batch.max_rows, Some(5000));
        assert_eq!(config.oversized, OversizedSeries::Reject);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.max_rate_limit_retries, 5);
        assert_eq!(config.http_timeout_secs, 60);
        assert_eq!(
            config.parsed_base_url().unwrap().as_str(),
            "http://localhost:8080/api/"
        );
    }

    #[test]
    fn test_zero_limits_rejected() {
        for yaml in [
            "batch:\n  max_rows: 0\n",
            "batch:\n  max_series: 0\n",
            "max_concurrency: 0\n",
        ] {
            let err = ClientConfig::from_yaml_str(yaml).unwrap_err();
            assert!(matches!(err, Error::Configuration { .. }), "{yaml}");
        }
        let unbounded = ClientConfig::from_yaml_str("batch:\n  max_rows: null\n").unwrap();
        assert_eq!(unbounded.batch.max_rows, None);
    }

    #[test]
    fn test_invalid_base_url() {
        let config = ClientConfig {
            base_url: "not a url".into(),
            ..ClientConfig::default()
        };
        let err = config.parsed_base_url().unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));

        let ftp = ClientConfig {
            base_url: "ftp://example.com".into(),
            ..ClientConfig::default()
        };
        assert!(ftp.parsed_base_url().is_err());
    }

    #[test]
    fn test_azure_detection_and_redacted_debug() {
        let config = ClientConfig {
            api_key: Some("secret-key".into()),
            base_url: "https://my-endpoint.eastus.inference.ai.azure.com".into(),
            ..ClientConfig::default()
        };
        assert!(config.is_azure());
        assert!(!format!("{:?}", config).contains("secret-key"));
        assert!(!ClientConfig::default().is_azure());
    }
}
