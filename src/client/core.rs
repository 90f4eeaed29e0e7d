use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

use crate::batch::{partition, BatchLimits, Dispatcher};
use crate::client::builder::TimeGptClientBuilder;
use crate::client::config::ClientConfig;
use crate::client::types::{CallPhase, CallStats, PhaseTracker};
use crate::reconcile::{reconcile, reconcile_history};
use crate::request::{
    FutureTable, ForecastOptions, ModelParams, RequestBuilder, SeriesTable, AZURE_MODEL,
};
use crate::resilience::RetryPolicy;
use crate::transport::wire::{decode_model_params, MODEL_PARAMS_PATH, USAGE_PATH, VALIDATE_KEY_PATH};
use crate::transport::Transport;
use crate::types::{ForecastResult, Frequency};
use crate::{Error, Result};

/// Client for the TimeGPT forecast service.
///
/// Cheap to clone; clones share the underlying connection pool. The client
/// holds no per-call state, so one instance can serve concurrent calls.
#[derive(Clone)]
pub struct TimeGptClient {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
}

struct CallOutcome {
    result: ForecastResult,
    series: usize,
    batches: usize,
    requests: usize,
    attempts: u32,
}

impl TimeGptClient {
    /// Client configured from the environment (`NIXTLA_API_KEY`, `NIXTLA_BASE_URL`, ...).
    pub fn new() -> Result<Self> {
        TimeGptClientBuilder::from_env().build()
    }

    pub fn builder() -> TimeGptClientBuilder {
        TimeGptClientBuilder::new()
    }

    pub(crate) fn from_parts(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            config,
            transport,
            retry,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Forecast every series in `table`, `opts.horizon` steps ahead.
    pub async fn forecast(&self, table: &SeriesTable, opts: &ForecastOptions) -> Result<ForecastResult> {
        self.forecast_with_stats(table, None, opts)
            .await
            .map(|(result, _)| result)
    }

    /// Like [`forecast`](Self::forecast), with future covariate values for the horizon.
    pub async fn forecast_with_future(
        &self,
        table: &SeriesTable,
        future: &FutureTable,
        opts: &ForecastOptions,
    ) -> Result<ForecastResult> {
        self.forecast_with_stats(table, Some(future), opts)
            .await
            .map(|(result, _)| result)
    }

    /// Forecast and report how the call went.
    ///
    /// The call either returns a forecast for every input series or fails;
    /// partial results are never returned.
    pub async fn forecast_with_stats(
        &self,
        table: &SeriesTable,
        future: Option<&FutureTable>,
        opts: &ForecastOptions,
    ) -> Result<(ForecastResult, CallStats)> {
        let start = Instant::now();
        let call_id = Uuid::new_v4().to_string();
        let mut tracker = PhaseTracker::new(call_id.as_str());

        let limit = opts
            .timeout()
            .or_else(|| self.config.timeout_ms.map(Duration::from_millis));
        let outcome = {
            let call = self.run_call(table, future, opts, &mut tracker);
            match limit {
                Some(limit) => tokio::time::timeout(limit, call)
                    .await
                    .unwrap_or(Err(Error::Timeout { limit })),
                None => call.await,
            }
        };

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                tracker.fail(&err);
                return Err(err);
            }
        };
        tracker.advance(CallPhase::Succeeded);

        info!(
            call_id = %call_id,
            series = outcome.series,
            batches = outcome.batches,
            requests = outcome.requests,
            attempts = outcome.attempts,
            duration_ms = start.elapsed().as_millis(),
            "forecast completed"
        );
        let stats = CallStats {
            call_id,
            phases: tracker.into_history(),
            series: outcome.series,
            batches: outcome.batches,
            requests: outcome.requests,
            attempts: outcome.attempts,
            duration: start.elapsed(),
        };
        Ok((outcome.result, stats))
    }

    async fn run_call(
        &self,
        table: &SeriesTable,
        future: Option<&FutureTable>,
        opts: &ForecastOptions,
        tracker: &mut PhaseTracker,
    ) -> Result<CallOutcome> {
        let opts = self.effective_options(opts);
        let mut request = RequestBuilder::new(opts.clone()).build(table, future)?;
        if opts.restrict_input || opts.add_history {
            let params = self
                .model_params(&request.model.model, request.frequency)
                .await?;
            request.restrict_input(params)?;
        }

        tracker.advance(CallPhase::Dispatching);
        let limits = BatchLimits {
            max_rows: opts.max_batch_size.or(self.config.batch.max_rows),
            max_series: opts.max_series_per_batch.or(self.config.batch.max_series),
        };
        let batches = partition(&request.series, limits, self.config.oversized)?;

        let mut retry = self.retry.clone();
        if let Some(attempts) = opts.retry_max_attempts {
            retry = retry.with_max_attempts(attempts);
        }
        let concurrency = opts.max_concurrency.unwrap_or(self.config.max_concurrency);
        let dispatcher = Dispatcher::new(self.transport.clone(), retry, concurrency);

        let endpoints = if request.add_history { 2 } else { 1 };
        tracker.advance(CallPhase::Awaiting {
            batches: batches.len() * endpoints,
        });
        let responses = dispatcher.dispatch(&request, &batches).await?;
        let history = if request.add_history {
            dispatcher.dispatch_history(&request, &batches).await?
        } else {
            Vec::new()
        };

        tracker.advance(CallPhase::Reconciling);
        let mut result = reconcile(&request, &batches, &responses)?;
        if request.add_history {
            result = result.with_history(reconcile_history(&request, &batches, &history)?);
        }
        Ok(CallOutcome {
            result,
            series: request.len(),
            batches: batches.len(),
            requests: batches.len() * endpoints,
            attempts: responses.iter().chain(&history).map(|r| r.attempts).sum(),
        })
    }

    fn effective_options(&self, opts: &ForecastOptions) -> ForecastOptions {
        let mut opts = opts.clone();
        if self.config.is_azure() && opts.model != AZURE_MODEL {
            warn!(
                requested = %opts.model,
                model = AZURE_MODEL,
                "Azure AI deployments serve a single model; overriding the requested model"
            );
            opts.model = AZURE_MODEL.to_string();
        }
        opts
    }

    /// `true` when the service accepts the configured API key.
    pub async fn validate_api_key(&self) -> Result<bool> {
        let status = self.transport.probe(VALIDATE_KEY_PATH).await?;
        if status != 200 {
            warn!(http_status = status, "API key was not accepted");
        }
        Ok(status == 200)
    }

    /// Account usage as reported by the service.
    pub async fn usage(&self) -> Result<Value> {
        let transport = self.transport.clone();
        let attempted = self
            .retry
            .run("usage", |_| {
                let transport = transport.clone();
                async move { transport.get_json(USAGE_PATH, &[]).await }
            })
            .await?;
        Ok(attempted.value)
    }

    /// Input size and native horizon of `model` at `frequency`.
    pub async fn model_params(&self, model: &str, frequency: Frequency) -> Result<ModelParams> {
        let query = vec![("model", model.to_string()), ("freq", frequency.alias())];
        let transport = self.transport.clone();
        let attempted = self
            .retry
            .run("model_params", |_| {
                let transport = transport.clone();
                let query = query.clone();
                async move { transport.get_json(MODEL_PARAMS_PATH, &query).await }
            })
            .await?;
        decode_model_params(attempted.value)
    }
}

impl std::fmt::Debug for TimeGptClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeGptClient")
            .field("config", &self.config)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
