use std::sync::Arc;
use std::time::Duration;

use crate::batch::{BatchLimits, OversizedSeries};
use crate::client::config::ClientConfig;
use crate::client::core::TimeGptClient;
use crate::resilience::{Clock, JitterSource, RetryConfig, RetryPolicy};
use crate::transport::{HttpTransport, Transport};
use crate::Result;

/// Builder for creating clients with custom configuration.
///
/// Starts from [`ClientConfig::default`]; use [`TimeGptClientBuilder::from_env`]
/// to pick up `NIXTLA_API_KEY` and friends.
pub struct TimeGptClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    clock: Option<Arc<dyn Clock>>,
    jitter: Option<Arc<dyn JitterSource>>,
}

impl TimeGptClientBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            transport: None,
            clock: None,
            jitter: None,
        }
    }

    pub fn from_env() -> Self {
        Self::new().config(ClientConfig::from_env())
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    /// Override the service base URL (also used to point at mock servers).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.config.http_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.config.max_concurrency = n.max(1);
        self
    }

    pub fn batch_limits(mut self, limits: BatchLimits) -> Self {
        self.config.batch = limits;
        self
    }

    pub fn oversized_series(mut self, policy: OversizedSeries) -> Self {
        self.config.oversized = policy;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Default wall time limit for each forecast call.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn proxy(mut self, url: impl Into<String>) -> Self {
        self.config.proxy_url = Some(url.into());
        self
    }

    /// Use a custom transport instead of the reqwest one.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = Some(jitter);
        self
    }

    pub fn build(self) -> Result<TimeGptClient> {
        // fail on a bad base URL even when a custom transport is injected
        self.config.parsed_base_url()?;
        self.config.validate_limits()?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(t) => t,
            None => Arc::new(HttpTransport::new(&self.config)?),
        };

        let mut retry = RetryPolicy::new(self.config.retry.clone());
        if let Some(clock) = self.clock {
            retry = retry.with_clock(clock);
        }
        if let Some(jitter) = self.jitter {
            retry = retry.with_jitter(jitter);
        }

        Ok(TimeGptClient::from_parts(self.config, transport, retry))
    }
}

impl Default for TimeGptClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
