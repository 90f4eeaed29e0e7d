//! Validated series data.

use chrono::NaiveDateTime;

/// One validated time series.
///
/// `exog` holds one row per timestamp with the covariate values in the
/// request's covariate order (future covariates first, then historic ones).
/// `future_exog` holds exactly `horizon` rows of future covariate values.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub id: String,
    pub timestamps: Vec<NaiveDateTime>,
    pub target: Vec<f64>,
    pub exog: Vec<Vec<f64>>,
    pub future_exog: Vec<Vec<f64>>,
}

impl Series {
    pub fn new(id: impl Into<String>, timestamps: Vec<NaiveDateTime>, target: Vec<f64>) -> Self {
        Self {
            id: id.into(),
            timestamps,
            target,
            exog: Vec::new(),
            future_exog: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.target.is_empty()
    }

    pub fn last_timestamp(&self) -> Option<NaiveDateTime> {
        self.timestamps.last().copied()
    }

    /// Keep only the most recent `n` observations.
    pub(crate) fn keep_tail(&mut self, n: usize) {
        let len = self.len();
        if n >= len {
            return;
        }
        let skip = len - n;
        self.timestamps.drain(..skip);
        self.target.drain(..skip);
        if !self.exog.is_empty() {
            self.exog.drain(..skip);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_keep_tail_trims_every_column() {
        let ts: Vec<_> = (1..=5)
            .map(|d| {
                NaiveDate::from_ymd_opt(2024, 1, d)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
            })
            .collect();
        let mut s = Series::new("a", ts.clone(), vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        s.exog = (0..5).map(|i| vec![i as f64]).collect();

        s.keep_tail(2);
        assert_eq!(s.target, vec![4.0, 5.0]);
        assert_eq!(s.timestamps, ts[3..].to_vec());
        assert_eq!(s.exog, vec![vec![3.0], vec![4.0]]);
        assert_eq!(s.last_timestamp(), Some(ts[4]));

        s.keep_tail(10);
        assert_eq!(s.len(), 2);
    }
}
