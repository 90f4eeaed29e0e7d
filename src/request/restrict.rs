//! History trimming driven by the model's declared input size.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::builder::ForecastRequest;
use crate::{Error, ErrorContext, Result};

/// Input window and native horizon reported by `GET /model_params`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelParams {
    pub input_size: usize,
    pub horizon: usize,
}

impl ModelParams {
    /// Observations the model can use for a plain forecast.
    ///
    /// Interval estimation needs extra history for its calibration windows.
    pub fn input_window(&self, horizon: usize, with_intervals: bool) -> usize {
        if with_intervals {
            3 * self.input_size + self.horizon.max(horizon)
        } else {
            self.input_size
        }
    }
}

impl ForecastRequest {
    /// Apply the model's limits to this request.
    ///
    /// Fine-tuning and in-sample forecasts require `input_size + horizon`
    /// observations per series. Otherwise, without covariates, every series
    /// is cut to the model's input window.
    pub fn restrict_input(&mut self, params: ModelParams) -> Result<()> {
        if self.horizon > params.horizon {
            warn!(
                horizon = self.horizon,
                model_horizon = params.horizon,
                "requested horizon exceeds the model horizon; forecasts may be less accurate"
            );
        }

        if self.model.finetune_steps > 0 || self.add_history {
            let required = params.input_size + params.horizon;
            if let Some(short) = self.series.iter().find(|s| s.len() < required) {
                let purpose = if self.model.finetune_steps > 0 {
                    "fine-tuning"
                } else {
                    "in-sample forecasts"
                };
                return Err(Error::validation_with_context(
                    format!("series is too short for {}", purpose),
                    ErrorContext::new()
                        .with_field_path(format!("series[{}]", short.id))
                        .with_details(format!(
                            "need at least {} observations, got {}",
                            required,
                            short.len()
                        ))
                        .with_source("request_builder"),
                ));
            }
            return Ok(());
        }
        if self.has_exog() {
            return Ok(());
        }

        let window = params.input_window(self.horizon, self.wants_intervals());
        let before = self.total_rows();
        for s in &mut self.series {
            s.keep_tail(window);
        }
        info!(
            window,
            rows_before = before,
            rows_after = self.total_rows(),
            "restricted input to the model window"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::request::{ForecastOptions, RequestBuilder, SeriesTable, TableRow};
    use crate::request::ModelParams;
    use chrono::{Duration, NaiveDate};

    fn table(len: i64) -> SeriesTable {
        let start = NaiveDate::from_ymd_opt(2023, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let mut t = SeriesTable::new();
        for i in 0..len {
            t.push(TableRow::new("a", start + Duration::days(i), i as f64));
        }
        t
    }

    const PARAMS: ModelParams = ModelParams {
        input_size: 20,
        horizon: 7,
    };

    #[test]
    fn test_plain_forecast_keeps_input_window() {
        let mut req = RequestBuilder::new(ForecastOptions::new(7))
            .build(&table(100), None)
            .unwrap();
        req.restrict_input(PARAMS).unwrap();
        assert_eq!(req.series[0].len(), 20);
        assert_eq!(req.series[0].target[0], 80.0);
    }

    #[test]
    fn test_intervals_keep_calibration_history() {
        let mut req = RequestBuilder::new(ForecastOptions::new(10).with_level(vec![90.0]))
            .build(&table(100), None)
            .unwrap();
        req.restrict_input(PARAMS).unwrap();
        assert_eq!(req.series[0].len(), 3 * 20 + 10);
    }

    #[test]
    fn test_finetuning_requires_enough_history() {
        let opts = ForecastOptions::new(7).with_finetuning(5, 1, Default::default());
        let mut req = RequestBuilder::new(opts).build(&table(26), None).unwrap();
        let err = req.restrict_input(PARAMS).unwrap_err();
        assert!(err.is_validation());

        let opts = ForecastOptions::new(7).with_finetuning(5, 1, Default::default());
        let mut req = RequestBuilder::new(opts).build(&table(27), None).unwrap();
        req.restrict_input(PARAMS).unwrap();
        assert_eq!(req.series[0].len(), 27);
    }

    #[test]
    fn test_history_requests_keep_full_series() {
        let opts = ForecastOptions::new(7).with_add_history(true);
        let mut req = RequestBuilder::new(opts).build(&table(100), None).unwrap();
        req.restrict_input(PARAMS).unwrap();
        assert_eq!(req.series[0].len(), 100);

        let opts = ForecastOptions::new(7).with_add_history(true);
        let mut req = RequestBuilder::new(opts).build(&table(20), None).unwrap();
        let err = req.restrict_input(PARAMS).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("in-sample"));
    }
}
