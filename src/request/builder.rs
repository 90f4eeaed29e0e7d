//! Turns a [`SeriesTable`] plus options into a validated [`ForecastRequest`].
//!
//! The builder is pure: it performs no I/O and either returns a complete
//! request or the first violation it finds.

use chrono::NaiveDateTime;
use std::collections::HashMap;
use tracing::{info, warn};

use super::options::{FinetuneLoss, ForecastOptions};
use super::table::{FutureTable, SeriesTable, TimeValue};
use super::validation::validate_options;
use crate::types::result::quantile_level;
use crate::types::{Frequency, Series};
use crate::{Error, ErrorContext, Result};

/// Model selection and fine-tuning settings sent with every batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub model: String,
    pub finetune_steps: u32,
    pub finetune_depth: u8,
    pub finetune_loss: FinetuneLoss,
    pub finetuned_model_id: Option<String>,
    pub clean_ex_first: bool,
}

/// A fully validated forecast request.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastRequest {
    /// Series in the caller's order of first appearance.
    pub series: Vec<Series>,
    pub horizon: usize,
    pub frequency: Frequency,
    pub model: ModelConfig,
    /// Interval levels to request; derived from quantiles when those were given.
    pub level: Vec<f64>,
    pub quantiles: Option<Vec<f64>>,
    pub futr_exog: Vec<String>,
    pub hist_exog: Vec<String>,
    /// Fitted values over the history are requested as well.
    pub add_history: bool,
}

impl ForecastRequest {
    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn total_rows(&self) -> usize {
        self.series.iter().map(Series::len).sum()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.series.iter().map(|s| s.id.as_str()).collect()
    }

    /// Covariate names in wire order: future columns, then historic ones.
    pub fn exog_columns(&self) -> Vec<&str> {
        self.futr_exog
            .iter()
            .chain(self.hist_exog.iter())
            .map(String::as_str)
            .collect()
    }

    pub fn has_exog(&self) -> bool {
        !self.futr_exog.is_empty() || !self.hist_exog.is_empty()
    }

    pub fn wants_intervals(&self) -> bool {
        !self.level.is_empty()
    }
}

/// Builds [`ForecastRequest`]s from tabular input.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    options: ForecastOptions,
}

fn series_error(
    message: impl Into<String>,
    field: impl Into<String>,
    details: impl Into<String>,
) -> Error {
    Error::validation_with_context(
        message,
        ErrorContext::new()
            .with_field_path(field)
            .with_details(details)
            .with_source("request_builder"),
    )
}

/// Where the selected covariates live in the input tables.
struct CovariateLayout {
    futr: Vec<String>,
    hist: Vec<String>,
    /// Indices into the history table's covariate columns, future then historic.
    table_idx: Vec<usize>,
    /// Indices into the future table's covariate columns.
    future_idx: Vec<usize>,
}

impl RequestBuilder {
    pub fn new(options: ForecastOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ForecastOptions {
        &self.options
    }

    pub fn build(
        &self,
        table: &SeriesTable,
        future: Option<&FutureTable>,
    ) -> Result<ForecastRequest> {
        let opts = &self.options;
        validate_options(opts)?;
        if table.is_empty() {
            return Err(series_error("no series to forecast", "table", "table has no rows"));
        }

        let layout = resolve_covariates(table, future, &opts.hist_exog)?;
        let mut series = group_rows(table, &layout)?;
        for s in &series {
            check_increasing(s)?;
        }

        let frequency = match opts.frequency {
            Some(freq) => freq,
            None => infer_frequency(&series)?,
        };
        for s in &series {
            check_contiguous(s, frequency)?;
        }

        if let Some(future) = future.filter(|_| !layout.futr.is_empty()) {
            attach_future(&mut series, future, &layout, frequency, opts.horizon)?;
        }

        let (level, quantiles) = resolve_intervals(opts);

        Ok(ForecastRequest {
            series,
            horizon: opts.horizon,
            frequency,
            model: ModelConfig {
                model: opts.model.clone(),
                finetune_steps: opts.finetune_steps,
                finetune_depth: opts.finetune_depth,
                finetune_loss: opts.finetune_loss,
                finetuned_model_id: opts.finetuned_model_id.clone(),
                clean_ex_first: opts.clean_ex_first,
            },
            level,
            quantiles,
            futr_exog: layout.futr,
            hist_exog: layout.hist,
            add_history: opts.add_history,
        })
    }
}

fn resolve_covariates(
    table: &SeriesTable,
    future: Option<&FutureTable>,
    hist_exog: &[String],
) -> Result<CovariateLayout> {
    let table_cols = &table.exog_columns;
    if let Some(missing) = hist_exog.iter().find(|c| !table_cols.contains(c)) {
        return Err(series_error(
            format!("historic covariate '{}' not found in the series table", missing),
            "options.hist_exog",
            format!("table covariates: {:?}", table_cols),
        ));
    }

    let mut futr = Vec::new();
    if let Some(future) = future {
        for col in &future.exog_columns {
            if !table_cols.contains(col) {
                return Err(series_error(
                    format!("future covariate '{}' is missing from the series table", col),
                    format!("future.{}", col),
                    "future covariates must also be given over the history",
                ));
            }
            if hist_exog.contains(col) {
                warn!(column = %col, "covariate declared historic but also given in the future table; treating as historic");
            } else {
                futr.push(col.clone());
            }
        }
    }

    for col in table_cols {
        if !futr.contains(col) && !hist_exog.contains(col) {
            warn!(column = %col, "ignoring covariate with no future values and no historic declaration");
        }
    }

    let position = |cols: &[String], name: &String| cols.iter().position(|c| c == name);
    let table_idx = futr
        .iter()
        .chain(hist_exog.iter())
        .filter_map(|c| position(table_cols.as_slice(), c))
        .collect();
    let future_idx = match future {
        Some(f) => futr
            .iter()
            .filter_map(|c| position(f.exog_columns.as_slice(), c))
            .collect(),
        None => Vec::new(),
    };

    Ok(CovariateLayout {
        futr,
        hist: hist_exog.to_vec(),
        table_idx,
        future_idx,
    })
}

fn resolve_timestamp(ds: &TimeValue, field: impl Into<String>) -> Result<NaiveDateTime> {
    ds.resolve().ok_or_else(|| {
        let raw = match ds {
            TimeValue::Raw(raw) => raw.clone(),
            TimeValue::Parsed(ts) => ts.to_string(),
        };
        series_error("timestamp could not be parsed", field, format!("got '{}'", raw))
    })
}

fn group_rows(table: &SeriesTable, layout: &CovariateLayout) -> Result<Vec<Series>> {
    let width = table.exog_columns.len();
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut series: Vec<Series> = Vec::new();

    for (i, row) in table.rows.iter().enumerate() {
        let id = row.unique_id.as_deref().ok_or_else(|| {
            series_error(
                "identifier column contains a null value",
                format!("rows[{}].unique_id", i),
                "every row needs a series identifier",
            )
        })?;
        if row.exog.len() != width {
            return Err(series_error(
                "row covariate count does not match the table columns",
                format!("rows[{}].exog", i),
                format!("expected {}, got {}", width, row.exog.len()),
            ));
        }

        let ds = resolve_timestamp(&row.ds, format!("series[{}].ds", id))?;
        let y = row.y.filter(|v| v.is_finite()).ok_or_else(|| {
            series_error(
                "target contains missing values",
                format!("series[{}].y", id),
                format!("at {}", ds),
            )
        })?;
        let exog = layout
            .table_idx
            .iter()
            .map(|&c| {
                row.exog[c].filter(|v| v.is_finite()).ok_or_else(|| {
                    series_error(
                        "covariate contains missing values",
                        format!("series[{}].{}", id, table.exog_columns[c]),
                        format!("at {}", ds),
                    )
                })
            })
            .collect::<Result<Vec<f64>>>()?;

        let slot = *index.entry(id).or_insert_with(|| {
            series.push(Series::new(id, Vec::new(), Vec::new()));
            series.len() - 1
        });
        let s = &mut series[slot];
        s.timestamps.push(ds);
        s.target.push(y);
        if !layout.table_idx.is_empty() {
            s.exog.push(exog);
        }
    }
    Ok(series)
}

fn check_increasing(s: &Series) -> Result<()> {
    match s.timestamps.windows(2).find(|w| w[1] <= w[0]) {
        Some(w) => Err(series_error(
            "timestamps must be strictly increasing",
            format!("series[{}].ds", s.id),
            format!("{} follows {}", w[1], w[0]),
        )),
        None => Ok(()),
    }
}

fn infer_frequency(series: &[Series]) -> Result<Frequency> {
    let mut longest = &series[0];
    for s in &series[1..] {
        if s.len() > longest.len() {
            longest = s;
        }
    }
    let freq = Frequency::infer(&longest.timestamps).ok_or_else(|| {
        series_error(
            "frequency could not be inferred",
            "options.frequency",
            format!("series '{}' has no regular spacing; pass a frequency", longest.id),
        )
    })?;
    info!(frequency = %freq, series = %longest.id, "inferred frequency from the longest series");
    Ok(freq)
}

fn check_contiguous(s: &Series, freq: Frequency) -> Result<()> {
    let field = || format!("series[{}].ds", s.id);
    if let Some(off) = s.timestamps.iter().find(|t| !freq.is_on_offset(**t)) {
        return Err(series_error(
            format!("timestamp is not on the {} grid", freq),
            field(),
            format!("at {}", off),
        ));
    }
    for w in s.timestamps.windows(2) {
        if freq.advance(w[0], 1) != Some(w[1]) {
            return Err(series_error(
                format!("series is not contiguous on the {} grid", freq),
                field(),
                format!("gap between {} and {}", w[0], w[1]),
            ));
        }
    }
    Ok(())
}

fn attach_future(
    series: &mut [Series],
    future: &FutureTable,
    layout: &CovariateLayout,
    freq: Frequency,
    horizon: usize,
) -> Result<()> {
    let mut rows_by_id: HashMap<&str, Vec<(NaiveDateTime, Vec<f64>)>> = HashMap::new();
    for (i, row) in future.rows.iter().enumerate() {
        let id = row.unique_id.as_deref().ok_or_else(|| {
            series_error(
                "identifier column contains a null value",
                format!("future.rows[{}].unique_id", i),
                "every row needs a series identifier",
            )
        })?;
        if !series.iter().any(|s| s.id == id) {
            return Err(series_error(
                "future covariates given for an unknown series",
                format!("future[{}]", id),
                "the identifier does not appear in the series table",
            ));
        }
        let ds = resolve_timestamp(&row.ds, format!("future[{}].ds", id))?;
        let values = layout
            .future_idx
            .iter()
            .map(|&c| {
                row.exog
                    .get(c)
                    .copied()
                    .flatten()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| {
                        series_error(
                            "future covariate contains missing values",
                            format!("future[{}].{}", id, future.exog_columns[c]),
                            format!("at {}", ds),
                        )
                    })
            })
            .collect::<Result<Vec<f64>>>()?;
        rows_by_id.entry(id).or_default().push((ds, values));
    }

    for s in series.iter_mut() {
        let rows = rows_by_id.remove(s.id.as_str()).unwrap_or_default();
        let expected = s
            .last_timestamp()
            .and_then(|last| freq.grid_after(last, horizon))
            .unwrap_or_default();
        let stamps: Vec<NaiveDateTime> = rows.iter().map(|(ds, _)| *ds).collect();
        if stamps != expected {
            return Err(series_error(
                format!("future covariates must cover exactly {} steps after the history", horizon),
                format!("future[{}].ds", s.id),
                format!("expected {} rows starting {:?}, got {}", horizon, expected.first(), rows.len()),
            ));
        }
        s.future_exog = rows.into_iter().map(|(_, values)| values).collect();
    }
    Ok(())
}

fn resolve_intervals(opts: &ForecastOptions) -> (Vec<f64>, Option<Vec<f64>>) {
    if let Some(quantiles) = &opts.quantiles {
        let mut qs = quantiles.clone();
        qs.sort_by(|a, b| a.total_cmp(b));
        qs.dedup();
        let mut levels: Vec<f64> = qs
            .iter()
            .map(|q| quantile_level(*q))
            .filter(|l| *l > 0.0)
            .collect();
        levels.sort_by(|a, b| a.total_cmp(b));
        levels.dedup();
        return (levels, Some(qs));
    }
    let mut levels: Vec<f64> = Vec::new();
    for l in opts.level.iter().flatten() {
        if !levels.contains(l) {
            levels.push(*l);
        }
    }
    (levels, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::table::{FutureRow, TableRow};
    use chrono::{Duration, NaiveDate};

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn daily(id: &str, n: u32) -> Vec<TableRow> {
        (1..=n).map(|d| TableRow::new(id, day(d), d as f64)).collect()
    }

    fn field(err: &Error) -> Option<&str> {
        err.context().and_then(|c| c.field_path.as_deref())
    }

    #[test]
    fn test_groups_interleaved_rows_in_first_appearance_order() {
        let mut table = SeriesTable::new();
        let (b, a) = (daily("b", 3), daily("a", 3));
        for (rb, ra) in b.into_iter().zip(a) {
            table.push(rb);
            table.push(ra);
        }
        let req = RequestBuilder::new(ForecastOptions::new(2))
            .build(&table, None)
            .unwrap();
        assert_eq!(req.ids(), vec!["b", "a"]);
        assert_eq!(req.total_rows(), 6);
        assert_eq!(req.frequency, Frequency::daily());
    }

    #[test]
    fn test_rejects_missing_target() {
        let mut table = SeriesTable::new();
        table.rows = daily("id1", 5);
        table.rows[2].y = None;
        let err = RequestBuilder::new(ForecastOptions::new(2))
            .build(&table, None)
            .unwrap_err();
        assert_eq!(field(&err), Some("series[id1].y"));
    }

    #[test]
    fn test_rejects_null_identifier() {
        let mut table = SeriesTable::new();
        table.rows = daily("id1", 3);
        table.rows[1].unique_id = None;
        let err = RequestBuilder::new(ForecastOptions::new(2))
            .build(&table, None)
            .unwrap_err();
        assert_eq!(field(&err), Some("rows[1].unique_id"));
    }

    #[test]
    fn test_rejects_unordered_and_gapped_series() {
        let mut unordered = SeriesTable::new();
        unordered.rows = daily("x", 4);
        unordered.rows.swap(1, 2);
        let err = RequestBuilder::new(ForecastOptions::new(1))
            .build(&unordered, None)
            .unwrap_err();
        assert_eq!(field(&err), Some("series[x].ds"));

        let mut gapped = SeriesTable::new();
        gapped.rows = daily("long", 10);
        gapped.rows.extend(
            [1u32, 2, 4]
                .iter()
                .map(|d| TableRow::new("gappy", day(*d), 1.0)),
        );
        let err = RequestBuilder::new(ForecastOptions::new(1))
            .build(&gapped, None)
            .unwrap_err();
        assert_eq!(field(&err), Some("series[gappy].ds"));
        assert!(err.to_string().contains("contiguous"));
    }

    #[test]
    fn test_single_point_series_needs_explicit_frequency() {
        let mut table = SeriesTable::new();
        table.push(TableRow::new("solo", day(1), 3.0));
        let err = RequestBuilder::new(ForecastOptions::new(2))
            .build(&table, None)
            .unwrap_err();
        assert_eq!(field(&err), Some("options.frequency"));

        let req = RequestBuilder::new(ForecastOptions::new(2).with_frequency(Frequency::daily()))
            .build(&table, None)
            .unwrap();
        assert_eq!(req.len(), 1);
    }

    #[test]
    fn test_covariate_layout_and_future_values() {
        let mut table = SeriesTable::with_exog_columns(["price", "temp", "noise"]);
        for d in 1..=4 {
            table.push(
                TableRow::new("a", day(d), d as f64)
                    .with_exog(vec![Some(1.0), Some(20.0 + d as f64), Some(0.0)]),
            );
        }
        let mut future = FutureTable::with_exog_columns(["price"]);
        future.push(FutureRow::new("a", day(5), vec![1.5]));
        future.push(FutureRow::new("a", day(6), vec![2.5]));

        let opts = ForecastOptions::new(2).with_hist_exog(["temp"]);
        let req = RequestBuilder::new(opts).build(&table, Some(&future)).unwrap();
        assert_eq!(req.exog_columns(), vec!["price", "temp"]);
        let a = &req.series[0];
        assert_eq!(a.exog[0], vec![1.0, 21.0]);
        assert_eq!(a.future_exog, vec![vec![1.5], vec![2.5]]);
    }

    #[test]
    fn test_future_covariate_absent_from_history_is_rejected() {
        let mut table = SeriesTable::new();
        table.rows = daily("a", 3);
        let mut future = FutureTable::with_exog_columns(["price"]);
        future.push(FutureRow::new("a", day(4), vec![1.0]));
        let err = RequestBuilder::new(ForecastOptions::new(1))
            .build(&table, Some(&future))
            .unwrap_err();
        assert_eq!(field(&err), Some("future.price"));
    }

    #[test]
    fn test_future_rows_must_cover_the_horizon() {
        let mut table = SeriesTable::with_exog_columns(["price"]);
        for d in 1..=3 {
            table.push(TableRow::new("a", day(d), 1.0).with_exog(vec![Some(1.0)]));
        }
        let mut future = FutureTable::with_exog_columns(["price"]);
        future.push(FutureRow::new("a", day(4), vec![1.0]));
        let err = RequestBuilder::new(ForecastOptions::new(2))
            .build(&table, Some(&future))
            .unwrap_err();
        assert_eq!(field(&err), Some("future[a].ds"));
    }

    #[test]
    fn test_declared_historic_wins_over_future_table() {
        let mut table = SeriesTable::with_exog_columns(["price"]);
        for d in 1..=3 {
            table.push(TableRow::new("a", day(d), 1.0).with_exog(vec![Some(1.0)]));
        }
        let mut future = FutureTable::with_exog_columns(["price"]);
        future.push(FutureRow::new("a", day(4), vec![1.0]));
        let req = RequestBuilder::new(ForecastOptions::new(1).with_hist_exog(["price"]))
            .build(&table, Some(&future))
            .unwrap();
        assert!(req.futr_exog.is_empty());
        assert_eq!(req.hist_exog, vec!["price"]);
        assert!(req.series[0].future_exog.is_empty());
    }

    #[test]
    fn test_quantiles_become_levels() {
        let mut table = SeriesTable::new();
        table.rows = daily("a", 3);
        let req = RequestBuilder::new(ForecastOptions::new(1).with_quantiles(vec![0.9, 0.1, 0.5, 0.2]))
            .build(&table, None)
            .unwrap();
        assert_eq!(req.level, vec![60.0, 80.0]);
        assert_eq!(req.quantiles, Some(vec![0.1, 0.2, 0.5, 0.9]));
    }

    #[test]
    fn test_extreme_quantiles_map_to_valid_levels() {
        let mut table = SeriesTable::new();
        table.rows = daily("a", 3);
        let req = RequestBuilder::new(ForecastOptions::new(2).with_quantiles(vec![0.001, 0.999]))
            .build(&table, None)
            .unwrap();
        assert_eq!(req.level, vec![99.0]);
        assert!(req.level.iter().all(|l| (0.0..100.0).contains(l)));
    }

    #[test]
    fn test_hourly_series_inferred() {
        let mut table = SeriesTable::new();
        table.push_series(
            "h",
            (0..24).map(|i| (day(1) + Duration::hours(i), i as f64)),
        );
        let req = RequestBuilder::new(ForecastOptions::new(6))
            .build(&table, None)
            .unwrap();
        assert_eq!(req.frequency.alias(), "h");
    }
}
