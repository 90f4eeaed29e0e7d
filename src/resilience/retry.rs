//! Bounded retries with exponential backoff and jitter.
//!
//! Failures are sorted into three classes:
//! - retryable: connection failures and the configured HTTP statuses;
//!   these consume `max_attempts`.
//! - rate limited: HTTP 429, budgeted separately by `max_rate_limit_retries`
//!   and delayed by at least the server's `Retry-After`.
//! - fatal: everything else, returned after the attempt that produced it.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::clock::{Clock, JitterSource, RandomJitter, TokioClock};
use crate::error_code::StatusClass;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts for retryable failures, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Jitter amplitude as a fraction of the computed delay.
    pub jitter: f64,
    pub retryable_statuses: Vec<u16>,
    pub max_rate_limit_retries: u32,
    /// Wall time budget across all retries of one call.
    pub max_elapsed_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            jitter: 0.25,
            retryable_statuses: vec![408, 409, 500, 502, 503, 504],
            max_rate_limit_retries: 5,
            max_elapsed_ms: Some(360_000),
        }
    }
}

/// How a failed attempt is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Retryable,
    RateLimited { retry_after: Option<Duration> },
    Fatal,
}

/// A successful value plus the number of attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

#[derive(Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    clock: Arc<dyn Clock>,
    jitter: Arc<dyn JitterSource>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            clock: Arc::new(TokioClock::new()),
            jitter: Arc::new(RandomJitter),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts.max(1);
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn classify(&self, err: &Error) -> FailureClass {
        match err {
            Error::Remote {
                status,
                retry_after_ms,
                ..
            } => {
                let class = StatusClass::from_http_status(*status);
                if class.is_credential_failure() {
                    FailureClass::Fatal
                } else if class == StatusClass::RateLimited {
                    FailureClass::RateLimited {
                        retry_after: retry_after_ms.map(Duration::from_millis),
                    }
                } else if self.config.retryable_statuses.contains(status) {
                    FailureClass::Retryable
                } else {
                    FailureClass::Fatal
                }
            }
            Error::Transport(t) if t.is_retryable() => FailureClass::Retryable,
            _ => FailureClass::Fatal,
        }
    }

    /// Delay before retry number `retry` (0-based): `base * 2^retry` plus jitter,
    /// raised to `retry_after` when given, capped at `max_delay_ms`.
    pub fn backoff_delay(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
        let base = self.config.base_delay_ms.saturating_mul(factor) as f64;
        let jittered = (base + base * self.config.jitter * self.jitter.sample()).max(0.0);
        let cap = self.config.max_delay_ms as f64;
        let mut delay = Duration::from_millis(jittered.min(cap) as u64);
        if let Some(after) = retry_after {
            delay = delay.max(after.min(Duration::from_millis(self.config.max_delay_ms)));
        }
        delay
    }

    /// Run `op` until it succeeds, fails fatally, or a budget runs out.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<Attempted<T>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = self.clock.now();
        let max_elapsed = self.config.max_elapsed_ms.map(Duration::from_millis);
        let mut attempts = 0u32;
        let mut failures = 0u32;
        let mut throttled = 0u32;

        loop {
            attempts += 1;
            let err = match op(attempts).await {
                Ok(value) => return Ok(Attempted { value, attempts }),
                Err(err) => err,
            };

            let (retry, retry_after) = match self.classify(&err) {
                FailureClass::Fatal => {
                    debug!(label, attempt = attempts, error = %err, "fatal failure; not retrying");
                    return Err(err);
                }
                FailureClass::Retryable => {
                    failures += 1;
                    if failures >= self.config.max_attempts {
                        return Err(exhausted(label, attempts, err));
                    }
                    (failures - 1, None)
                }
                FailureClass::RateLimited { retry_after } => {
                    throttled += 1;
                    if throttled > self.config.max_rate_limit_retries {
                        return Err(exhausted(label, attempts, err));
                    }
                    (throttled - 1, retry_after)
                }
            };

            let delay = self.backoff_delay(retry, retry_after);
            if let Some(limit) = max_elapsed {
                if self.clock.now().saturating_sub(started) + delay > limit {
                    return Err(exhausted(label, attempts, err));
                }
            }

            warn!(
                label,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                http_status = err.http_status().unwrap_or(0),
                error = %err,
                "attempt failed; retrying"
            );
            self.clock.sleep(delay).await;
        }
    }
}

fn exhausted(label: &str, attempts: u32, last: Error) -> Error {
    warn!(label, attempts, error = %last, "retry budget exhausted");
    Error::RetryExhausted {
        attempts,
        last: Box::new(last),
    }
}
