//! Reconciled forecast output.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use super::frequency::Frequency;

/// Column name of the point forecast in tabular output.
pub const FORECAST_COLUMN: &str = "TimeGPT";

/// Forecast for a single series.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesForecast {
    pub id: String,
    pub timestamps: Vec<NaiveDateTime>,
    pub mean: Vec<f64>,
    /// Interval bands keyed `lo-<level>` / `hi-<level>`, each `horizon` long.
    pub intervals: BTreeMap<String, Vec<f64>>,
}

impl SeriesForecast {
    pub fn len(&self) -> usize {
        self.mean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }

    /// (timestamp, point forecast) pairs.
    pub fn points(&self) -> impl Iterator<Item = (NaiveDateTime, f64)> + '_ {
        self.timestamps.iter().copied().zip(self.mean.iter().copied())
    }
}

/// One output row: a (series, forecast timestamp) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastRow {
    pub unique_id: String,
    pub ds: NaiveDateTime,
    #[serde(rename = "TimeGPT")]
    pub value: f64,
    /// Extra columns such as `TimeGPT-lo-80` or `TimeGPT-q-10`.
    #[serde(flatten)]
    pub bands: BTreeMap<String, f64>,
}

/// The complete result of a forecast call.
///
/// Holds every requested series exactly once, in the caller's original order.
/// When fitted values were requested, `history` holds them in the same order.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastResult {
    horizon: usize,
    frequency: Frequency,
    quantiles: Option<Vec<f64>>,
    series: Vec<SeriesForecast>,
    history: Vec<SeriesForecast>,
}

impl ForecastResult {
    pub(crate) fn new(
        horizon: usize,
        frequency: Frequency,
        quantiles: Option<Vec<f64>>,
        series: Vec<SeriesForecast>,
    ) -> Self {
        Self {
            horizon,
            frequency,
            quantiles,
            series,
            history: Vec::new(),
        }
    }

    pub(crate) fn with_history(mut self, history: Vec<SeriesForecast>) -> Self {
        self.history = history;
        self
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn series(&self) -> &[SeriesForecast] {
        &self.series
    }

    pub fn into_series(self) -> Vec<SeriesForecast> {
        self.series
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SeriesForecast> {
        self.series.iter()
    }

    pub fn get(&self, id: &str) -> Option<&SeriesForecast> {
        self.series.iter().find(|s| s.id == id)
    }

    /// Fitted values over the observed history; empty unless requested.
    pub fn history(&self) -> &[SeriesForecast] {
        &self.history
    }

    pub fn history_for(&self, id: &str) -> Option<&SeriesForecast> {
        self.history.iter().find(|s| s.id == id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.series.iter().map(|s| s.id.as_str()).collect()
    }

    /// Flatten into rows shaped like the input table.
    ///
    /// When quantiles were requested the interval bands are re-labelled as
    /// `TimeGPT-q-<pct>` columns; otherwise they appear as `TimeGPT-lo-<level>`
    /// and `TimeGPT-hi-<level>`. Fitted history rows, if any, come right
    /// before each series' forecast rows.
    pub fn to_rows(&self) -> Vec<ForecastRow> {
        let history: HashMap<&str, &SeriesForecast> =
            self.history.iter().map(|h| (h.id.as_str(), h)).collect();
        let fitted_rows: usize = self.history.iter().map(SeriesForecast::len).sum();
        let mut rows = Vec::with_capacity(self.series.len() * self.horizon + fitted_rows);
        for s in &self.series {
            if let Some(fitted) = history.get(s.id.as_str()) {
                self.push_rows(&mut rows, fitted);
            }
            self.push_rows(&mut rows, s);
        }
        rows
    }

    fn push_rows(&self, rows: &mut Vec<ForecastRow>, s: &SeriesForecast) {
        for (step, (ds, value)) in s.points().enumerate() {
            let bands = match &self.quantiles {
                Some(quantiles) => quantile_columns(s, step, value, quantiles),
                None => s
                    .intervals
                    .iter()
                    .filter_map(|(key, values)| {
                        values
                            .get(step)
                            .map(|v| (format!("{}-{}", FORECAST_COLUMN, key), *v))
                    })
                    .collect(),
            };
            rows.push(ForecastRow {
                unique_id: s.id.clone(),
                ds,
                value,
                bands,
            });
        }
    }
}

impl<'a> IntoIterator for &'a ForecastResult {
    type Item = &'a SeriesForecast;
    type IntoIter = std::slice::Iter<'a, SeriesForecast>;

    fn into_iter(self) -> Self::IntoIter {
        self.series.iter()
    }
}

fn quantile_columns(
    s: &SeriesForecast,
    step: usize,
    point: f64,
    quantiles: &[f64],
) -> BTreeMap<String, f64> {
    let mut sorted = quantiles.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
        .into_iter()
        .filter_map(|q| {
            let column = format!("{}-q-{}", FORECAST_COLUMN, (q * 100.0).trunc() as i64);
            let value = match quantile_band_key(q) {
                None => Some(point),
                Some(key) => s.intervals.get(&key).and_then(|v| v.get(step).copied()),
            };
            value.map(|v| (column, v))
        })
        .collect()
}

/// Interval level that brackets quantile `q`: `|100 - 200q|`, truncated.
///
/// Truncation keeps the level below 100 for every `q` in `(0, 1)`.
pub(crate) fn quantile_level(q: f64) -> f64 {
    (100.0 - 200.0 * q).trunc().abs()
}

/// Band key holding quantile `q`; `None` for the median, which is the point forecast.
pub(crate) fn quantile_band_key(q: f64) -> Option<String> {
    let signed = (100.0 - 200.0 * q).trunc();
    if signed == 0.0 {
        return None;
    }
    let side = if signed > 0.0 { "lo" } else { "hi" };
    Some(format!("{}-{}", side, level_label(signed.abs())))
}

/// Render a level the way the service names its bands (`80`, not `80.0`).
pub(crate) fn level_label(level: f64) -> String {
    if level.fract() == 0.0 {
        format!("{}", level as i64)
    } else {
        format!("{}", level)
    }
}
