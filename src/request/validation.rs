//! Option checks that run before any series data is touched.

use once_cell::sync::Lazy;
use regex::Regex;

use super::options::ForecastOptions;
use crate::{Error, ErrorContext, Result};

/// Model variant used by Azure AI deployments.
pub const AZURE_MODEL: &str = "azureai";

static MODEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^timegpt-.+$").expect("model name regex is valid"));

pub fn is_supported_model(model: &str) -> bool {
    model == AZURE_MODEL || MODEL_RE.is_match(model)
}

fn invalid(message: impl Into<String>, field: &str, details: Option<String>) -> Error {
    let mut ctx = ErrorContext::new()
        .with_field_path(field)
        .with_source("request_builder");
    if let Some(details) = details {
        ctx = ctx.with_details(details);
    }
    Error::validation_with_context(message, ctx)
}

/// Validate the option set on its own.
pub fn validate_options(opts: &ForecastOptions) -> Result<()> {
    if opts.horizon == 0 {
        return Err(invalid("horizon must be positive", "options.horizon", None));
    }
    if !is_supported_model(&opts.model) {
        return Err(invalid(
            format!("unsupported model '{}'", opts.model),
            "options.model",
            Some("expected 'timegpt-<variant>' or 'azureai'".into()),
        ));
    }
    if !(1..=5).contains(&opts.finetune_depth) {
        return Err(invalid(
            "finetune_depth must be between 1 and 5",
            "options.finetune_depth",
            Some(format!("got {}", opts.finetune_depth)),
        ));
    }
    if let Some(id) = &opts.finetuned_model_id {
        if id.trim().is_empty() {
            return Err(invalid(
                "finetuned_model_id must not be empty",
                "options.finetuned_model_id",
                None,
            ));
        }
    }
    if opts.level.is_some() && opts.quantiles.is_some() {
        return Err(invalid(
            "level and quantiles are mutually exclusive",
            "options.level",
            None,
        ));
    }
    if let Some(levels) = &opts.level {
        if let Some(bad) = levels.iter().find(|l| !(0.0..100.0).contains(*l)) {
            return Err(invalid(
                "levels must lie in [0, 100)",
                "options.level",
                Some(format!("got {}", bad)),
            ));
        }
    }
    if let Some(quantiles) = &opts.quantiles {
        if let Some(bad) = quantiles.iter().find(|q| !(**q > 0.0 && **q < 1.0)) {
            return Err(invalid(
                "quantiles must lie in (0, 1)",
                "options.quantiles",
                Some(format!("got {}", bad)),
            ));
        }
    }
    for (i, col) in opts.hist_exog.iter().enumerate() {
        if opts.hist_exog[..i].contains(col) {
            return Err(invalid(
                format!("historic covariate '{}' listed twice", col),
                "options.hist_exog",
                None,
            ));
        }
    }
    for (value, field) in [
        (opts.max_batch_size, "options.max_batch_size"),
        (opts.max_series_per_batch, "options.max_series_per_batch"),
        (opts.max_concurrency, "options.max_concurrency"),
    ] {
        if value == Some(0) {
            return Err(invalid("limit must be positive", field, None));
        }
    }
    if opts.retry_max_attempts == Some(0) {
        return Err(invalid(
            "at least one attempt is required",
            "options.retry_max_attempts",
            None,
        ));
    }
    Ok(())
}
