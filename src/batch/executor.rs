//! Batch dispatcher: fans batches out to the transport with bounded parallelism.

use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

use super::partition::Batch;
use crate::request::ForecastRequest;
use crate::resilience::RetryPolicy;
use crate::transport::wire::{decode_forecast, encode_batch, Endpoint, ForecastOutput};
use crate::transport::Transport;
use crate::{Error, ErrorContext, Result};

/// Largest serialized batch the service accepts.
pub const MAX_PAYLOAD_BYTES: usize = 200 * 1024 * 1024;

/// Decoded response of one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResponse {
    pub batch: usize,
    pub output: ForecastOutput,
    pub attempts: u32,
    pub duration: Duration,
}

#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    max_concurrency: usize,
    max_payload_bytes: usize,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, retry: RetryPolicy, max_concurrency: usize) -> Self {
        Self {
            transport,
            retry,
            max_concurrency: max_concurrency.max(1),
            max_payload_bytes: MAX_PAYLOAD_BYTES,
        }
    }

    pub fn with_max_payload_bytes(mut self, bytes: usize) -> Self {
        self.max_payload_bytes = bytes;
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Send every batch to the forecast endpoint and collect the responses
    /// in batch order.
    ///
    /// Fails fast: the first unrecoverable batch failure is returned and
    /// the batches still in flight are dropped.
    pub async fn dispatch(
        &self,
        request: &ForecastRequest,
        batches: &[Batch],
    ) -> Result<Vec<BatchResponse>> {
        self.dispatch_to(Endpoint::Forecast, request, batches).await
    }

    /// Same as [`Dispatcher::dispatch`], asking for fitted values over each
    /// batch's history instead.
    pub async fn dispatch_history(
        &self,
        request: &ForecastRequest,
        batches: &[Batch],
    ) -> Result<Vec<BatchResponse>> {
        self.dispatch_to(Endpoint::HistoricForecast, request, batches).await
    }

    pub async fn dispatch_to(
        &self,
        endpoint: Endpoint,
        request: &ForecastRequest,
        batches: &[Batch],
    ) -> Result<Vec<BatchResponse>> {
        let mut responses: Vec<BatchResponse> = stream::iter(batches.iter())
            .map(|batch| self.send_batch(endpoint, request, batch))
            .buffer_unordered(self.max_concurrency)
            .try_collect()
            .await?;
        responses.sort_by_key(|r| r.batch);
        Ok(responses)
    }

    pub fn encode(
        &self,
        endpoint: Endpoint,
        request: &ForecastRequest,
        batch: &Batch,
    ) -> Result<Bytes> {
        let body = encode_batch(endpoint, request, batch)
            .map_err(|e| Error::dispatch(batch.index, e.into()))?;
        if body.len() > self.max_payload_bytes {
            return Err(Error::dispatch(
                batch.index,
                Error::validation_with_context(
                    "payload exceeds the service size limit",
                    ErrorContext::new()
                        .with_field_path("options.max_batch_size")
                        .with_details(format!(
                            "{} bytes for {} rows, limit is {} bytes; use a smaller max_batch_size",
                            body.len(),
                            batch.rows(),
                            self.max_payload_bytes
                        ))
                        .with_source("batch_dispatcher"),
                ),
            ));
        }
        Ok(Bytes::from(body))
    }

    async fn send_batch(
        &self,
        endpoint: Endpoint,
        request: &ForecastRequest,
        batch: &Batch,
    ) -> Result<BatchResponse> {
        let start = Instant::now();
        let body = self.encode(endpoint, request, batch)?;
        let label = match endpoint {
            Endpoint::Forecast => format!("batch-{}", batch.index),
            Endpoint::HistoricForecast => format!("history-batch-{}", batch.index),
        };

        let attempted = self
            .retry
            .run(&label, |_| {
                let transport = self.transport.clone();
                let body = body.clone();
                async move { transport.post_json(endpoint.path(), body).await }
            })
            .await
            .map_err(|e| Error::dispatch(batch.index, e))?;
        let output = decode_forecast(attempted.value)?;

        info!(
            endpoint = endpoint.name(),
            batch = batch.index,
            series = batch.len(),
            rows = batch.rows(),
            attempts = attempted.attempts,
            duration_ms = start.elapsed().as_millis(),
            "batch completed"
        );
        Ok(BatchResponse {
            batch: batch.index,
            output,
            attempts: attempted.attempts,
            duration: start.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{partition, BatchLimits, OversizedSeries};
    use crate::request::{ForecastOptions, RequestBuilder, SeriesTable, TableRow};
    use crate::resilience::{FixedJitter, ManualClock, RetryConfig};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, NaiveDate};
    use serde_json::{json, Value};
    use std::sync::Mutex;

    /// Echoes one forecast of `1.0` per point for every series in the payload,
    /// or one fitted `0.0` per observation on the historic endpoint.
    #[derive(Default)]
    struct EchoTransport {
        bodies: Mutex<Vec<Value>>,
        paths: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for EchoTransport {
        async fn post_json(&self, path: &str, body: Bytes) -> Result<Value> {
            let payload: Value = serde_json::from_slice(&body)?;
            let sizes: Vec<u64> = payload["series"]["sizes"]
                .as_array()
                .map(|s| s.iter().filter_map(Value::as_u64).collect())
                .unwrap_or_default();
            let h = payload["h"].as_u64().unwrap_or(0) as usize;
            self.bodies.lock().unwrap().push(payload);
            self.paths.lock().unwrap().push(path.to_string());
            if path == Endpoint::HistoricForecast.path() {
                let total = sizes.iter().sum::<u64>() as usize;
                return Ok(json!({"mean": vec![0.0; total], "intervals": null, "sizes": sizes}));
            }
            Ok(json!({"mean": vec![1.0; sizes.len() * h], "intervals": null}))
        }

        async fn get_json(&self, _path: &str, _query: &[(&str, String)]) -> Result<Value> {
            Ok(Value::Null)
        }

        async fn probe(&self, _path: &str) -> Result<u16> {
            Ok(200)
        }
    }

    fn request(lengths: &[usize]) -> ForecastRequest {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let mut table = SeriesTable::new();
        for (i, len) in lengths.iter().enumerate() {
            for d in 0..*len {
                table.push(TableRow::new(format!("s{i}"), start + ChronoDuration::days(d as i64), d as f64));
            }
        }
        RequestBuilder::new(ForecastOptions::new(3))
            .build(&table, None)
            .unwrap()
    }

    fn dispatcher(transport: Arc<EchoTransport>, concurrency: usize) -> Dispatcher {
        let retry = RetryPolicy::new(RetryConfig::default())
            .with_clock(Arc::new(ManualClock::new()))
            .with_jitter(Arc::new(FixedJitter(0.0)));
        Dispatcher::new(transport, retry, concurrency)
    }

    #[tokio::test]
    async fn test_responses_in_batch_order() {
        let req = request(&[5, 5, 5, 5]);
        let batches = partition(&req.series, BatchLimits::unbounded().with_max_series(1), OversizedSeries::Truncate).unwrap();
        let transport = Arc::new(EchoTransport::default());
        let responses = dispatcher(transport.clone(), 4).dispatch(&req, &batches).await.unwrap();
        assert_eq!(responses.iter().map(|r| r.batch).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert!(responses.iter().all(|r| r.attempts == 1 && r.output.mean.len() == 3));
        assert_eq!(transport.bodies.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_truncated_member_sends_tail() {
        let req = request(&[4, 12]);
        let batches = partition(&req.series, BatchLimits::unbounded().with_max_rows(10), OversizedSeries::Truncate).unwrap();
        let transport = Arc::new(EchoTransport::default());
        dispatcher(transport.clone(), 1).dispatch(&req, &batches).await.unwrap();
        let bodies = transport.bodies.lock().unwrap();
        assert_eq!(bodies[1]["series"]["sizes"], json!([10]));
        assert_eq!(bodies[1]["series"]["y"][0], json!(2.0));
        assert_eq!(bodies[1]["freq"], json!("D"));
        assert_eq!(bodies[1]["h"], json!(3));
    }

    #[test]
    fn test_payload_guard() {
        let req = request(&[50]);
        let batches = partition(&req.series, BatchLimits::unbounded(), OversizedSeries::Truncate).unwrap();
        let d = dispatcher(Arc::new(EchoTransport::default()), 1).with_max_payload_bytes(64);
        let err = d.encode(Endpoint::Forecast, &req, &batches[0]).unwrap_err();
        assert!(matches!(err, Error::Dispatch { batch: 0, .. }));
        assert!(err.to_string().contains("max_batch_size"));
    }

    #[tokio::test]
    async fn test_history_batches_use_historic_endpoint() {
        let req = request(&[5, 7]);
        let batches = partition(&req.series, BatchLimits::unbounded().with_max_series(1), OversizedSeries::Truncate).unwrap();
        let transport = Arc::new(EchoTransport::default());
        let responses = dispatcher(transport.clone(), 2)
            .dispatch_history(&req, &batches)
            .await
            .unwrap();
        assert_eq!(responses[0].output.sizes, Some(vec![5]));
        assert_eq!(responses[1].output.mean.len(), 7);
        assert!(transport
            .paths
            .lock()
            .unwrap()
            .iter()
            .all(|p| p == "v2/historic_forecast"));
        assert!(transport.bodies.lock().unwrap().iter().all(|b| b.get("h").is_none()));
    }
}
