//! 响应合并模块：将各批次的预测结果按调用方顺序合并为完整结果。
//!
//! # Reconcile Module
//!
//! Merging happens in two steps:
//!
//! 1. [`split_batch`] slices a batch's flat `mean` (and interval bands)
//!    into one [`SeriesSlice`] per member, in payload order.
//! 2. [`merge`] places every slice into the caller's series order and
//!    attaches the forecast timestamps.
//!
//! A result is only returned when every requested series is present
//! exactly once with `horizon` values.
//!
//! In-sample responses go through [`split_history`] and [`merge_history`]
//! the same way. Their per-series lengths come from the response's `sizes`
//! and their timestamps are the tail of each series' own history.

use std::collections::{BTreeMap, HashMap};

use crate::batch::{Batch, BatchResponse};
use crate::request::ForecastRequest;
use crate::transport::wire::ForecastOutput;
use crate::types::result::level_label;
use crate::types::{ForecastResult, Series, SeriesForecast};
use crate::{Error, ErrorContext, Result};

/// One series' forecast as returned by a batch, before timestamps are attached.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesSlice {
    pub id: String,
    pub mean: Vec<f64>,
    pub intervals: BTreeMap<String, Vec<f64>>,
}

fn format_error(message: impl Into<String>, field: impl Into<String>, details: String) -> Error {
    Error::response_format_with_context(
        message,
        ErrorContext::new()
            .with_field_path(field)
            .with_details(details)
            .with_source("reconciler"),
    )
}

/// Reconcile all batch responses of a call into one ordered result.
pub fn reconcile(
    request: &ForecastRequest,
    batches: &[Batch],
    responses: &[BatchResponse],
) -> Result<ForecastResult> {
    let mut slices = Vec::with_capacity(request.len());
    for response in responses {
        let batch = batch_of(batches, response)?;
        slices.extend(split_batch(request, batch, &response.output)?);
    }
    merge(request, slices)
}

/// Reconcile in-sample responses into fitted values, one entry per series
/// in caller order.
pub fn reconcile_history(
    request: &ForecastRequest,
    batches: &[Batch],
    responses: &[BatchResponse],
) -> Result<Vec<SeriesForecast>> {
    let mut slices = Vec::with_capacity(request.len());
    for response in responses {
        let batch = batch_of(batches, response)?;
        slices.extend(split_history(request, batch, &response.output)?);
    }
    merge_history(request, slices)
}

fn batch_of<'a>(batches: &'a [Batch], response: &BatchResponse) -> Result<&'a Batch> {
    batches.get(response.batch).ok_or_else(|| {
        format_error(
            "response for a batch that was never sent",
            "response.batch",
            format!("batch {} of {}", response.batch, batches.len()),
        )
    })
}

/// Slice a batch response into per-series forecasts.
pub fn split_batch(
    request: &ForecastRequest,
    batch: &Batch,
    output: &ForecastOutput,
) -> Result<Vec<SeriesSlice>> {
    let h = request.horizon;
    let n = batch.len();
    let field = format!("batch[{}].mean", batch.index);

    let sizes = match &output.sizes {
        Some(sizes) => {
            if sizes.len() != n || sizes.iter().sum::<usize>() != output.mean.len() {
                return Err(format_error(
                    "response sizes do not match the batch",
                    field,
                    format!(
                        "{} series sent, sizes {:?} for {} values",
                        n,
                        sizes,
                        output.mean.len()
                    ),
                ));
            }
            sizes.clone()
        }
        None => {
            if output.mean.len() != n * h {
                return Err(format_error(
                    "forecast length does not match the batch",
                    field,
                    format!(
                        "expected {} values ({} series x horizon {}), got {}",
                        n * h,
                        n,
                        h,
                        output.mean.len()
                    ),
                ));
            }
            vec![h; n]
        }
    };

    let bands = requested_bands(request, batch, output)?;

    let mut slices = Vec::with_capacity(n);
    let mut offset = 0;
    for (member, size) in batch.members.iter().zip(sizes) {
        let id = &request.series[member.series].id;
        if size != h {
            return Err(format_error(
                "forecast length differs from the horizon",
                format!("series[{}]", id),
                format!("expected {}, got {}", h, size),
            ));
        }
        let range = offset..offset + size;
        slices.push(SeriesSlice {
            id: id.clone(),
            mean: output.mean[range.clone()].to_vec(),
            intervals: bands
                .iter()
                .map(|(key, values)| (key.clone(), values[range.clone()].to_vec()))
                .collect(),
        });
        offset += size;
    }
    Ok(slices)
}

/// Slice an in-sample response into per-series fitted values.
///
/// The service may leave out the first observations of a series, so the
/// response must carry `sizes`; no member may get more values than it sent.
pub fn split_history(
    request: &ForecastRequest,
    batch: &Batch,
    output: &ForecastOutput,
) -> Result<Vec<SeriesSlice>> {
    let field = format!("batch[{}].sizes", batch.index);
    let sizes = output.sizes.as_ref().ok_or_else(|| {
        format_error(
            "in-sample response has no sizes",
            field.clone(),
            format!("{} values for {} series", output.mean.len(), batch.len()),
        )
    })?;
    if sizes.len() != batch.len() || sizes.iter().sum::<usize>() != output.mean.len() {
        return Err(format_error(
            "response sizes do not match the batch",
            field,
            format!(
                "{} series sent, sizes {:?} for {} values",
                batch.len(),
                sizes,
                output.mean.len()
            ),
        ));
    }

    let bands = requested_bands(request, batch, output)?;

    let mut slices = Vec::with_capacity(batch.len());
    let mut offset = 0;
    for (member, &size) in batch.members.iter().zip(sizes) {
        let series = &request.series[member.series];
        let sent = series.len() - member.skip;
        if size > sent {
            return Err(format_error(
                "more fitted values than observations sent",
                format!("series[{}]", series.id),
                format!("sent {}, got {}", sent, size),
            ));
        }
        let range = offset..offset + size;
        slices.push(SeriesSlice {
            id: series.id.clone(),
            mean: output.mean[range.clone()].to_vec(),
            intervals: bands
                .iter()
                .map(|(key, values)| (key.clone(), values[range.clone()].to_vec()))
                .collect(),
        });
        offset += size;
    }
    Ok(slices)
}

/// The `lo-L` / `hi-L` bands for every requested level.
fn requested_bands<'a>(
    request: &ForecastRequest,
    batch: &Batch,
    output: &'a ForecastOutput,
) -> Result<Vec<(String, &'a Vec<f64>)>> {
    let mut bands = Vec::with_capacity(request.level.len() * 2);
    for level in &request.level {
        for side in ["lo", "hi"] {
            let key = format!("{}-{}", side, level_label(*level));
            let values = output
                .intervals
                .as_ref()
                .and_then(|i| i.get(&key))
                .ok_or_else(|| {
                    format_error(
                        "missing prediction interval band",
                        format!("batch[{}].intervals.{}", batch.index, key),
                        format!("requested levels {:?}", request.level),
                    )
                })?;
            if values.len() != output.mean.len() {
                return Err(format_error(
                    "interval band length differs from the point forecast",
                    format!("batch[{}].intervals.{}", batch.index, key),
                    format!("expected {}, got {}", output.mean.len(), values.len()),
                ));
            }
            bands.push((key, values));
        }
    }
    Ok(bands)
}

/// Place slices in caller order and attach forecast timestamps.
pub fn merge(request: &ForecastRequest, slices: Vec<SeriesSlice>) -> Result<ForecastResult> {
    let placed = place(request, slices)?;

    let mut out = Vec::with_capacity(request.len());
    for (series, slice) in request.series.iter().zip(placed) {
        if slice.mean.len() != request.horizon {
            return Err(format_error(
                "forecast length differs from the horizon",
                format!("series[{}]", slice.id),
                format!("expected {}, got {}", request.horizon, slice.mean.len()),
            ));
        }
        let timestamps = series
            .last_timestamp()
            .and_then(|last| request.frequency.grid_after(last, request.horizon))
            .ok_or_else(|| {
                format_error(
                    "forecast timestamps cannot be computed",
                    format!("series[{}].ds", series.id),
                    format!("{} steps of {} overflow the calendar", request.horizon, request.frequency),
                )
            })?;
        out.push(SeriesForecast {
            id: slice.id,
            timestamps,
            mean: slice.mean,
            intervals: slice.intervals,
        });
    }

    Ok(ForecastResult::new(
        request.horizon,
        request.frequency,
        request.quantiles.clone(),
        out,
    ))
}

/// Place in-sample slices in caller order, stamped with the last
/// observed timestamps of each series.
pub fn merge_history(
    request: &ForecastRequest,
    slices: Vec<SeriesSlice>,
) -> Result<Vec<SeriesForecast>> {
    let placed = place(request, slices)?;
    request
        .series
        .iter()
        .zip(placed)
        .map(|(series, slice)| fitted(series, slice))
        .collect()
}

fn fitted(series: &Series, slice: SeriesSlice) -> Result<SeriesForecast> {
    let n = slice.mean.len();
    if n > series.len() {
        return Err(format_error(
            "more fitted values than observations",
            format!("series[{}]", series.id),
            format!("{} observations, got {}", series.len(), n),
        ));
    }
    Ok(SeriesForecast {
        id: slice.id,
        timestamps: series.timestamps[series.len() - n..].to_vec(),
        mean: slice.mean,
        intervals: slice.intervals,
    })
}

/// Order slices like the request's series; every series exactly once.
fn place(request: &ForecastRequest, slices: Vec<SeriesSlice>) -> Result<Vec<SeriesSlice>> {
    let position: HashMap<&str, usize> = request
        .series
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();
    let mut slots: Vec<Option<SeriesSlice>> = vec![None; request.len()];

    for slice in slices {
        let idx = *position.get(slice.id.as_str()).ok_or_else(|| {
            format_error(
                "forecast returned for an unknown series",
                format!("series[{}]", slice.id),
                "identifier was not part of the request".to_string(),
            )
        })?;
        if slots[idx].is_some() {
            return Err(format_error(
                "forecast returned twice for the same series",
                format!("series[{}]", slice.id),
                "duplicate identifier across batch responses".to_string(),
            ));
        }
        slots[idx] = Some(slice);
    }

    let missing: Vec<String> = request
        .series
        .iter()
        .zip(&slots)
        .filter(|(_, slot)| slot.is_none())
        .map(|(s, _)| s.id.clone())
        .collect();
    if !missing.is_empty() {
        return Err(Error::IncompleteResult { missing });
    }
    Ok(slots.into_iter().flatten().collect())
}
