//! Per-call forecast options.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::types::Frequency;

/// Default model variant.
pub const DEFAULT_MODEL: &str = "timegpt-1";

/// Loss optimised while fine-tuning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinetuneLoss {
    #[default]
    Default,
    Mae,
    Mse,
    Rmse,
    Mape,
    Smape,
}

impl FinetuneLoss {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Mae => "mae",
            Self::Mse => "mse",
            Self::Rmse => "rmse",
            Self::Mape => "mape",
            Self::Smape => "smape",
        }
    }
}

impl fmt::Display for FinetuneLoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for a single forecast call.
///
/// Fields left as `None` fall back to the client's configured defaults.
/// Deserializable from YAML/JSON; absent keys take their defaults.
///
/// ```rust
/// use timegpt_client::ForecastOptions;
///
/// let opts = ForecastOptions::new(12)
///     .with_frequency_alias("MS")
///     .unwrap()
///     .with_level(vec![80.0, 95.0]);
/// assert_eq!(opts.horizon, 12);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastOptions {
    pub horizon: usize,
    /// Inferred from the longest series when absent.
    pub frequency: Option<Frequency>,
    pub model: String,
    pub finetune_steps: u32,
    /// 1..=5
    pub finetune_depth: u8,
    pub finetune_loss: FinetuneLoss,
    pub finetuned_model_id: Option<String>,
    pub clean_ex_first: bool,
    pub level: Option<Vec<f64>>,
    pub quantiles: Option<Vec<f64>>,
    /// Table covariates that are only known historically.
    pub hist_exog: Vec<String>,
    /// Maximum cumulative rows per batch.
    pub max_batch_size: Option<usize>,
    pub max_series_per_batch: Option<usize>,
    /// Total attempts per batch for retryable failures.
    pub retry_max_attempts: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub max_concurrency: Option<usize>,
    /// Query the model's input size and trim history accordingly.
    ///
    /// Off by default, so full histories are sent unless asked otherwise.
    /// Fine-tuned, covariate and `add_history` calls are never trimmed.
    pub restrict_input: bool,
    /// Also return fitted values over the observed history.
    pub add_history: bool,
}

impl Default for ForecastOptions {
    fn default() -> Self {
        Self {
            horizon: 0,
            frequency: None,
            model: DEFAULT_MODEL.to_string(),
            finetune_steps: 0,
            finetune_depth: 1,
            finetune_loss: FinetuneLoss::Default,
            finetuned_model_id: None,
            clean_ex_first: true,
            level: None,
            quantiles: None,
            hist_exog: Vec::new(),
            max_batch_size: None,
            max_series_per_batch: None,
            retry_max_attempts: None,
            timeout_ms: None,
            max_concurrency: None,
            restrict_input: false,
            add_history: false,
        }
    }
}

impl ForecastOptions {
    pub fn new(horizon: usize) -> Self {
        Self {
            horizon,
            ..Self::default()
        }
    }

    pub fn with_frequency(mut self, frequency: Frequency) -> Self {
        self.frequency = Some(frequency);
        self
    }

    pub fn with_frequency_alias(self, alias: &str) -> crate::Result<Self> {
        Ok(self.with_frequency(Frequency::parse(alias)?))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_finetuning(mut self, steps: u32, depth: u8, loss: FinetuneLoss) -> Self {
        self.finetune_steps = steps;
        self.finetune_depth = depth;
        self.finetune_loss = loss;
        self
    }

    pub fn with_finetuned_model_id(mut self, id: impl Into<String>) -> Self {
        self.finetuned_model_id = Some(id.into());
        self
    }

    pub fn with_clean_ex_first(mut self, enable: bool) -> Self {
        self.clean_ex_first = enable;
        self
    }

    pub fn with_level(mut self, level: Vec<f64>) -> Self {
        self.level = Some(level);
        self
    }

    pub fn with_quantiles(mut self, quantiles: Vec<f64>) -> Self {
        self.quantiles = Some(quantiles);
        self
    }

    pub fn with_hist_exog<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hist_exog = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_batch_size(mut self, rows: usize) -> Self {
        self.max_batch_size = Some(rows);
        self
    }

    pub fn with_max_series_per_batch(mut self, series: usize) -> Self {
        self.max_series_per_batch = Some(series);
        self
    }

    pub fn with_retry_max_attempts(mut self, attempts: u32) -> Self {
        self.retry_max_attempts = Some(attempts);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = Some(n);
        self
    }

    pub fn with_restrict_input(mut self, enable: bool) -> Self {
        self.restrict_input = enable;
        self
    }

    pub fn with_add_history(mut self, enable: bool) -> Self {
        self.add_history = enable;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_defaults() {
        let yaml = "horizon: 7\nfrequency: W-MON\nlevel: [80, 95]\nfinetune_loss: mae\n";
        let opts: ForecastOptions = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(opts.horizon, 7);
        assert_eq!(opts.frequency.map(|f| f.alias()).as_deref(), Some("W-MON"));
        assert_eq!(opts.level, Some(vec![80.0, 95.0]));
        assert_eq!(opts.finetune_loss, FinetuneLoss::Mae);
        assert_eq!(opts.model, DEFAULT_MODEL);
        assert_eq!(opts.finetune_depth, 1);
        assert!(opts.clean_ex_first);
        assert!(!opts.restrict_input);
        assert!(!opts.add_history);
    }

    #[test]
    fn test_unknown_frequency_rejected_on_load() {
        let err = serde_json::from_str::<ForecastOptions>(r#"{"horizon": 3, "frequency": "fortnight"}"#);
        assert!(err.is_err());
    }
}
