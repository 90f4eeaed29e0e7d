//! JSON bodies exchanged with the forecast endpoints.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::batch::Batch;
use crate::request::{FinetuneLoss, ForecastRequest, ModelParams};
use crate::{Error, ErrorContext, Result};

pub const FORECAST_PATH: &str = "v2/forecast";
pub const HISTORIC_FORECAST_PATH: &str = "v2/historic_forecast";
pub const MODEL_PARAMS_PATH: &str = "model_params";
pub const VALIDATE_KEY_PATH: &str = "validate_api_key";
pub const USAGE_PATH: &str = "usage";

/// Endpoint a batch is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Forecasts `h` steps past the end of each series.
    Forecast,
    /// Fitted values over the observed history.
    HistoricForecast,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Self::Forecast => FORECAST_PATH,
            Self::HistoricForecast => HISTORIC_FORECAST_PATH,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Forecast => "forecast",
            Self::HistoricForecast => "historic_forecast",
        }
    }
}

/// Series block of the payload. Covariates are column-major.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireSeries {
    pub y: Vec<f64>,
    pub sizes: Vec<usize>,
    #[serde(rename = "X")]
    pub x: Option<Vec<Vec<f64>>>,
    #[serde(rename = "X_future")]
    pub x_future: Option<Vec<Vec<f64>>>,
}

/// Body of `POST v2/forecast` for one batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastPayload<'a> {
    pub series: WireSeries,
    pub model: &'a str,
    pub h: usize,
    pub freq: String,
    pub clean_ex_first: bool,
    pub level: Option<Vec<Value>>,
    pub finetune_steps: u32,
    pub finetune_depth: u8,
    pub finetune_loss: FinetuneLoss,
    pub finetuned_model_id: Option<&'a str>,
    pub feature_contributions: bool,
}

impl<'a> ForecastPayload<'a> {
    pub fn from_batch(request: &'a ForecastRequest, batch: &Batch) -> Self {
        let rows = batch.rows();
        let n_exog = request.futr_exog.len() + request.hist_exog.len();
        let n_futr = request.futr_exog.len();

        let mut y = Vec::with_capacity(rows);
        let mut sizes = Vec::with_capacity(batch.members.len());
        let mut x: Vec<Vec<f64>> = (0..n_exog).map(|_| Vec::with_capacity(rows)).collect();
        let mut x_future: Vec<Vec<f64>> = (0..n_futr)
            .map(|_| Vec::with_capacity(batch.members.len() * request.horizon))
            .collect();

        for member in &batch.members {
            let s = &request.series[member.series];
            y.extend_from_slice(&s.target[member.skip..]);
            sizes.push(s.len() - member.skip);
            for row in s.exog.iter().skip(member.skip) {
                for (col, value) in x.iter_mut().zip(row) {
                    col.push(*value);
                }
            }
            for row in &s.future_exog {
                for (col, value) in x_future.iter_mut().zip(row) {
                    col.push(*value);
                }
            }
        }

        Self {
            series: WireSeries {
                y,
                sizes,
                x: (n_exog > 0).then_some(x),
                x_future: (n_futr > 0).then_some(x_future),
            },
            model: &request.model.model,
            h: request.horizon,
            freq: request.frequency.alias(),
            clean_ex_first: request.model.clean_ex_first,
            level: (!request.level.is_empty())
                .then(|| request.level.iter().map(|l| level_value(*l)).collect()),
            finetune_steps: request.model.finetune_steps,
            finetune_depth: request.model.finetune_depth,
            finetune_loss: request.model.finetune_loss,
            finetuned_model_id: request.model.finetuned_model_id.as_deref(),
            feature_contributions: false,
        }
    }
}

/// Series block of an in-sample payload; there is nothing to forecast
/// so future covariates are left out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InSampleSeries {
    pub y: Vec<f64>,
    pub sizes: Vec<usize>,
    #[serde(rename = "X")]
    pub x: Option<Vec<Vec<f64>>>,
}

/// Body of `POST v2/historic_forecast`: the forecast payload without the
/// horizon and fine-tuning schedule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InSamplePayload<'a> {
    pub series: InSampleSeries,
    pub model: &'a str,
    pub freq: String,
    pub clean_ex_first: bool,
    pub level: Option<Vec<Value>>,
    pub finetune_depth: u8,
    pub finetuned_model_id: Option<&'a str>,
    pub feature_contributions: bool,
}

impl<'a> From<ForecastPayload<'a>> for InSamplePayload<'a> {
    fn from(payload: ForecastPayload<'a>) -> Self {
        Self {
            series: InSampleSeries {
                y: payload.series.y,
                sizes: payload.series.sizes,
                x: payload.series.x,
            },
            model: payload.model,
            freq: payload.freq,
            clean_ex_first: payload.clean_ex_first,
            level: payload.level,
            finetune_depth: payload.finetune_depth,
            finetuned_model_id: payload.finetuned_model_id,
            feature_contributions: payload.feature_contributions,
        }
    }
}

/// Serialize the body `endpoint` expects for one batch.
pub fn encode_batch(
    endpoint: Endpoint,
    request: &ForecastRequest,
    batch: &Batch,
) -> serde_json::Result<Vec<u8>> {
    let payload = ForecastPayload::from_batch(request, batch);
    match endpoint {
        Endpoint::Forecast => serde_json::to_vec(&payload),
        Endpoint::HistoricForecast => serde_json::to_vec(&InSamplePayload::from(payload)),
    }
}

/// Whole levels go out as integers so band keys read `lo-80`.
fn level_value(level: f64) -> Value {
    if level.fract() == 0.0 {
        Value::from(level as i64)
    } else {
        Value::from(level)
    }
}

/// Decoded body of a forecast or in-sample response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ForecastOutput {
    /// Per-series values concatenated in payload order.
    pub mean: Vec<f64>,
    #[serde(default)]
    pub intervals: Option<BTreeMap<String, Vec<f64>>>,
    #[serde(default)]
    pub sizes: Option<Vec<usize>>,
}

fn format_error(message: impl Into<String>, field: &str, details: String) -> Error {
    Error::response_format_with_context(
        message,
        ErrorContext::new()
            .with_field_path(field)
            .with_details(details)
            .with_source("response_decoder"),
    )
}

/// Some deployments wrap the payload in `{"data": ...}`.
fn unwrap_data(value: Value) -> Value {
    match value {
        Value::Object(mut map) if !map.contains_key("mean") && map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

pub fn decode_forecast(value: Value) -> Result<ForecastOutput> {
    serde_json::from_value(unwrap_data(value)).map_err(|e| {
        format_error(
            "forecast response does not match the expected shape",
            "response",
            e.to_string(),
        )
    })
}

/// Body of `GET model_params`: `{"detail": {"input_size": .., "horizon": ..}}`.
pub fn decode_model_params(value: Value) -> Result<ModelParams> {
    let value = unwrap_data(value);
    let detail = value.get("detail").cloned().unwrap_or(value);
    serde_json::from_value(detail).map_err(|e| {
        format_error(
            "model parameters response does not match the expected shape",
            "response.detail",
            e.to_string(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_wrapped_and_plain() {
        let plain = decode_forecast(json!({"mean": [1.0, 2.0], "intervals": null})).unwrap();
        assert_eq!(plain.mean, vec![1.0, 2.0]);
        assert!(plain.intervals.is_none());

        let wrapped = decode_forecast(json!({
            "data": {"mean": [1.0], "intervals": {"lo-80": [0.5], "hi-80": [1.5]}}
        }))
        .unwrap();
        assert_eq!(wrapped.intervals.unwrap()["hi-80"], vec![1.5]);
    }

    #[test]
    fn test_decode_rejects_missing_mean() {
        let err = decode_forecast(json!({"forecast": [1.0]})).unwrap_err();
        assert!(matches!(err, Error::ResponseFormat { .. }));
    }

    #[test]
    fn test_model_params() {
        let params = decode_model_params(json!({"detail": {"input_size": 512, "horizon": 24}})).unwrap();
        assert_eq!(params.input_size, 512);
        assert_eq!(params.horizon, 24);
    }

    #[test]
    fn test_in_sample_payload_drops_forecast_only_fields() {
        use crate::batch::{partition, BatchLimits, OversizedSeries};
        use crate::request::{ForecastOptions, RequestBuilder, SeriesTable};
        use chrono::{Duration, NaiveDate};

        let start = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let mut table = SeriesTable::new();
        table.push_series("a", (0..4).map(|d| (start + Duration::days(d), d as f64)));
        let req = RequestBuilder::new(ForecastOptions::new(2).with_level(vec![80.0]))
            .build(&table, None)
            .unwrap();
        let batches = partition(&req.series, BatchLimits::unbounded(), OversizedSeries::Truncate).unwrap();

        let body: Value =
            serde_json::from_slice(&encode_batch(Endpoint::HistoricForecast, &req, &batches[0]).unwrap()).unwrap();
        assert_eq!(body["series"]["y"], json!([0.0, 1.0, 2.0, 3.0]));
        assert_eq!(body["series"]["sizes"], json!([4]));
        assert_eq!(body["level"], json!([80]));
        assert_eq!(body["model"], "timegpt-1");
        for key in ["h", "finetune_steps", "finetune_loss"] {
            assert!(body.get(key).is_none(), "{key} should not be sent");
        }
        assert!(body["series"].get("X_future").is_none());

        let forecast: Value =
            serde_json::from_slice(&encode_batch(Endpoint::Forecast, &req, &batches[0]).unwrap()).unwrap();
        assert_eq!(forecast["h"], 2);
        assert!(forecast["series"].get("X_future").is_some());
    }

    #[test]
    fn test_level_values() {
        assert_eq!(level_value(80.0), json!(80));
        assert_eq!(level_value(97.5), json!(97.5));
    }
}
