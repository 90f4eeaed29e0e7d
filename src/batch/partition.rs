//! Deterministic, order-preserving partitioning of series into batches.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::Series;
use crate::{Error, ErrorContext, Result};

/// Upper bounds for a single batch. `None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchLimits {
    pub max_rows: Option<usize>,
    pub max_series: Option<usize>,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_rows: Some(100_000),
            max_series: None,
        }
    }
}

impl BatchLimits {
    pub fn unbounded() -> Self {
        Self {
            max_rows: None,
            max_series: None,
        }
    }

    pub fn with_max_rows(mut self, rows: usize) -> Self {
        self.max_rows = Some(rows.max(1));
        self
    }

    pub fn with_max_series(mut self, series: usize) -> Self {
        self.max_series = Some(series.max(1));
        self
    }

    /// Zero limits, possible through deserialization, raised to one.
    fn at_least_one(self) -> Self {
        Self {
            max_rows: self.max_rows.map(|r| r.max(1)),
            max_series: self.max_series.map(|s| s.max(1)),
        }
    }
}

/// What to do with a series longer than `max_rows`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OversizedSeries {
    /// Send only the most recent `max_rows` observations.
    #[default]
    Truncate,
    Reject,
}

/// A series (or its tail) assigned to a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchMember {
    /// Index into the request's series list.
    pub series: usize,
    /// Leading observations left out of the payload.
    pub skip: usize,
    pub rows: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub index: usize,
    pub members: Vec<BatchMember>,
}

impl Batch {
    pub fn rows(&self) -> usize {
        self.members.iter().map(|m| m.rows).sum()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn series_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.members.iter().map(|m| m.series)
    }
}

/// Split `series` into batches, in order.
///
/// A new batch is opened whenever adding the next series would exceed a
/// limit. The same input and limits always yield the same batches.
pub fn partition(
    series: &[Series],
    limits: BatchLimits,
    oversized: OversizedSeries,
) -> Result<Vec<Batch>> {
    let limits = limits.at_least_one();
    let mut batches: Vec<Batch> = Vec::new();
    let mut current: Vec<BatchMember> = Vec::new();
    let mut current_rows = 0usize;

    for (i, s) in series.iter().enumerate() {
        let mut member = BatchMember {
            series: i,
            skip: 0,
            rows: s.len(),
        };

        if let Some(max_rows) = limits.max_rows {
            if member.rows > max_rows {
                match oversized {
                    OversizedSeries::Truncate => {
                        warn!(
                            series = %s.id,
                            rows = member.rows,
                            max_rows,
                            "series exceeds the batch row limit; sending its most recent rows only"
                        );
                        member.skip = member.rows - max_rows;
                        member.rows = max_rows;
                    }
                    OversizedSeries::Reject => {
                        let batch = batches.len() + usize::from(!current.is_empty());
                        return Err(Error::dispatch(
                            batch,
                            Error::validation_with_context(
                                "series exceeds the batch row limit",
                                ErrorContext::new()
                                    .with_field_path(format!("series[{}]", s.id))
                                    .with_details(format!(
                                        "{} rows, max_batch_size is {}",
                                        member.rows, max_rows
                                    ))
                                    .with_source("batch_partitioner"),
                            ),
                        ));
                    }
                }
            }
        }

        let rows_full = limits
            .max_rows
            .map_or(false, |max| current_rows + member.rows > max);
        let series_full = limits
            .max_series
            .map_or(false, |max| current.len() + 1 > max);
        if !current.is_empty() && (rows_full || series_full) {
            batches.push(Batch {
                index: batches.len(),
                members: std::mem::take(&mut current),
            });
            current_rows = 0;
        }

        current_rows += member.rows;
        current.push(member);
    }

    if !current.is_empty() {
        batches.push(Batch {
            index: batches.len(),
            members: current,
        });
    }
    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn series(id: &str, len: usize) -> Series {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        Series::new(
            id,
            (0..len).map(|i| start + Duration::days(i as i64)).collect(),
            vec![0.0; len],
        )
    }

    fn shape(batches: &[Batch]) -> Vec<Vec<(usize, usize)>> {
        batches
            .iter()
            .map(|b| b.members.iter().map(|m| (m.series, m.rows)).collect())
            .collect()
    }

    #[test]
    fn test_packs_in_order_by_rows() {
        let input = vec![
            series("a", 40),
            series("b", 40),
            series("c", 40),
            series("d", 10),
        ];
        let batches = partition(
            &input,
            BatchLimits::unbounded().with_max_rows(100),
            OversizedSeries::Truncate,
        ).unwrap();
        assert_eq!(
            shape(&batches),
            vec![vec![(0, 40), (1, 40)], vec![(2, 40), (3, 10)]]
        );
        assert_eq!(batches[1].index, 1);
    }

    #[test]
    fn test_series_limit() {
        let input: Vec<_> = (0..5).map(|i| series(&format!("s{i}"), 3)).collect();
        let batches = partition(
            &input,
            BatchLimits::unbounded().with_max_series(2),
            OversizedSeries::Truncate,
        ).unwrap();
        assert_eq!(batches.iter().map(Batch::len).collect::<Vec<_>>(), vec![2, 2, 1]);
    }

    #[test]
    fn test_deserialized_zero_limits_never_send_empty_series() {
        let limits: BatchLimits = serde_json::from_str(r#"{"max_rows": 0, "max_series": 0}"#).unwrap();
        let input = vec![series("a", 3), series("b", 3)];
        let batches = partition(&input, limits, OversizedSeries::Truncate).unwrap();
        assert_eq!(shape(&batches), vec![vec![(0, 1)], vec![(1, 1)]]);
    }

    #[test]
    fn test_oversized_series_truncated_to_tail() {
        let input = vec![series("A", 50), series("B", 5000)];
        let batches = partition(
            &input,
            BatchLimits::unbounded().with_max_rows(1000),
            OversizedSeries::Truncate,
        ).unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(
            batches[0].members,
            vec![BatchMember {
                series: 0,
                skip: 0,
                rows: 50
            }]
        );
        assert_eq!(
            batches[1].members,
            vec![BatchMember {
                series: 1,
                skip: 4000,
                rows: 1000
            }]
        );
        assert!(batches.iter().all(|b| b.rows() <= 1000));
    }

    #[test]
    fn test_oversized_series_rejected() {
        let input = vec![series("A", 50), series("B", 5000)];
        let err = partition(
            &input,
            BatchLimits::unbounded().with_max_rows(1000),
            OversizedSeries::Reject,
        ).unwrap_err();
        match err {
            Error::Dispatch { batch, source } => {
                assert_eq!(batch, 1);
                assert!(source.is_validation());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_deterministic_and_complete() {
        let input: Vec<_> = (0..50)
            .map(|i| series(&format!("s{i}"), 1 + (i * 37) % 90))
            .collect();
        let limits = BatchLimits::unbounded().with_max_rows(200).with_max_series(7);
        let first = partition(&input, limits, OversizedSeries::Truncate).unwrap();
        let second = partition(&input, limits, OversizedSeries::Truncate).unwrap();
        assert_eq!(first, second);

        let covered: Vec<usize> = first.iter().flat_map(|b| b.series_indices()).collect();
        assert_eq!(covered, (0..50).collect::<Vec<_>>());
        for b in &first {
            assert!(b.rows() <= 200);
            assert!(b.len() <= 7);
        }
    }
}
