//! Tabular input: long-format rows of (identifier, timestamp, target, covariates).

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, ErrorContext, Result};

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// A timestamp cell, either already parsed or still raw text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeValue {
    Parsed(NaiveDateTime),
    Raw(String),
}

impl TimeValue {
    /// Resolve to a naive timestamp. Offsets are converted to UTC.
    pub fn resolve(&self) -> Option<NaiveDateTime> {
        match self {
            TimeValue::Parsed(ts) => Some(*ts),
            TimeValue::Raw(raw) => parse_timestamp(raw),
        }
    }
}

impl From<NaiveDateTime> for TimeValue {
    fn from(ts: NaiveDateTime) -> Self {
        TimeValue::Parsed(ts)
    }
}

impl From<NaiveDate> for TimeValue {
    fn from(date: NaiveDate) -> Self {
        TimeValue::Parsed(date.and_time(chrono::NaiveTime::MIN))
    }
}

impl From<&str> for TimeValue {
    fn from(raw: &str) -> Self {
        TimeValue::Raw(raw.to_string())
    }
}

impl From<String> for TimeValue {
    fn from(raw: String) -> Self {
        TimeValue::Raw(raw)
    }
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    for fmt in DATETIME_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(ts);
        }
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc).naive_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(chrono::NaiveTime::MIN))
}

/// Names of the identifier, timestamp and target columns in record input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnNames {
    pub id_col: String,
    pub time_col: String,
    pub target_col: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            id_col: "unique_id".to_string(),
            time_col: "ds".to_string(),
            target_col: "y".to_string(),
        }
    }
}

/// One row of the history table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub unique_id: Option<String>,
    pub ds: TimeValue,
    pub y: Option<f64>,
    /// Covariate cells aligned with [`SeriesTable::exog_columns`].
    pub exog: Vec<Option<f64>>,
}

impl TableRow {
    pub fn new(unique_id: impl Into<String>, ds: impl Into<TimeValue>, y: f64) -> Self {
        Self {
            unique_id: Some(unique_id.into()),
            ds: ds.into(),
            y: Some(y),
            exog: Vec::new(),
        }
    }

    pub fn with_exog(mut self, exog: Vec<Option<f64>>) -> Self {
        self.exog = exog;
        self
    }
}

/// Long-format history: rows of several series, possibly interleaved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesTable {
    pub exog_columns: Vec<String>,
    pub rows: Vec<TableRow>,
}

impl SeriesTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exog_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            exog_columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: TableRow) {
        self.rows.push(row);
    }

    /// Append all observations of one series.
    pub fn push_series<I>(&mut self, id: &str, points: I)
    where
        I: IntoIterator<Item = (NaiveDateTime, f64)>,
    {
        self.rows
            .extend(points.into_iter().map(|(ds, y)| TableRow::new(id, ds, y)));
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Build a table from JSON records (`[{"unique_id": .., "ds": .., "y": .., ..}]`).
    ///
    /// Every key other than the identifier, timestamp and target columns is
    /// treated as a covariate. Records may omit covariates; missing cells are `None`.
    pub fn from_json_records(records: &[Value], columns: &ColumnNames) -> Result<Self> {
        let objects = as_objects(records)?;
        let exog_columns = covariate_columns(
            &objects,
            &[&columns.id_col, &columns.time_col, &columns.target_col],
        );

        let mut rows = Vec::with_capacity(objects.len());
        for (i, obj) in objects.iter().enumerate() {
            let unique_id = id_cell(obj.get(&columns.id_col));
            let ds = time_cell(obj.get(&columns.time_col));
            let y = number_cell(obj.get(&columns.target_col), i, &columns.target_col)?;
            let exog = exog_columns
                .iter()
                .map(|c| number_cell(obj.get(c), i, c))
                .collect::<Result<Vec<_>>>()?;
            rows.push(TableRow {
                unique_id,
                ds,
                y,
                exog,
            });
        }
        Ok(Self { exog_columns, rows })
    }

    /// Parse a JSON array of records.
    pub fn from_json_str(json: &str, columns: &ColumnNames) -> Result<Self> {
        let records: Vec<Value> = serde_json::from_str(json)?;
        Self::from_json_records(&records, columns)
    }
}

/// One row of the future covariate table.
#[derive(Debug, Clone, PartialEq)]
pub struct FutureRow {
    pub unique_id: Option<String>,
    pub ds: TimeValue,
    pub exog: Vec<Option<f64>>,
}

impl FutureRow {
    pub fn new(unique_id: impl Into<String>, ds: impl Into<TimeValue>, exog: Vec<f64>) -> Self {
        Self {
            unique_id: Some(unique_id.into()),
            ds: ds.into(),
            exog: exog.into_iter().map(Some).collect(),
        }
    }
}

/// Covariate values over the forecast window: exactly `horizon` rows per series.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FutureTable {
    pub exog_columns: Vec<String>,
    pub rows: Vec<FutureRow>,
}

impl FutureTable {
    pub fn with_exog_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            exog_columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: FutureRow) {
        self.rows.push(row);
    }

    /// Same record layout as [`SeriesTable::from_json_records`]; a target column, if present, is ignored.
    pub fn from_json_records(records: &[Value], columns: &ColumnNames) -> Result<Self> {
        let objects = as_objects(records)?;
        let exog_columns = covariate_columns(
            &objects,
            &[&columns.id_col, &columns.time_col, &columns.target_col],
        );

        let mut rows = Vec::with_capacity(objects.len());
        for (i, obj) in objects.iter().enumerate() {
            let exog = exog_columns
                .iter()
                .map(|c| number_cell(obj.get(c), i, c))
                .collect::<Result<Vec<_>>>()?;
            rows.push(FutureRow {
                unique_id: id_cell(obj.get(&columns.id_col)),
                ds: time_cell(obj.get(&columns.time_col)),
                exog,
            });
        }
        Ok(Self { exog_columns, rows })
    }
}

type Object = serde_json::Map<String, Value>;

fn as_objects(records: &[Value]) -> Result<Vec<&Object>> {
    records
        .iter()
        .enumerate()
        .map(|(i, r)| {
            r.as_object().ok_or_else(|| {
                Error::validation_with_context(
                    "each record must be a JSON object",
                    ErrorContext::new()
                        .with_field_path(format!("records[{}]", i))
                        .with_source("table_loader"),
                )
            })
        })
        .collect()
}

fn covariate_columns(objects: &[&Object], reserved: &[&String]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for obj in objects {
        for key in obj.keys() {
            if !reserved.iter().any(|r| *r == key) && !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }
    columns
}

fn id_cell(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn time_cell(value: Option<&Value>) -> TimeValue {
    match value {
        Some(Value::String(s)) => TimeValue::Raw(s.clone()),
        Some(other) => TimeValue::Raw(other.to_string()),
        None => TimeValue::Raw(String::new()),
    }
}

fn number_cell(value: Option<&Value>, row: usize, column: &str) -> Result<Option<f64>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(other) => Err(Error::validation_with_context(
            format!("column '{}' must be numeric", column),
            ErrorContext::new()
                .with_field_path(format!("records[{}].{}", row, column))
                .with_details(format!("got {}", other))
                .with_source("table_loader"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_timestamp_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap();
        for raw in [
            "2024-03-01T12:30:00",
            "2024-03-01 12:30:00",
            "2024-03-01T14:30:00+02:00",
        ] {
            assert_eq!(TimeValue::from(raw).resolve(), Some(expected), "{raw}");
        }
        assert_eq!(
            TimeValue::from("2024-03-01").resolve(),
            NaiveDate::from_ymd_opt(2024, 3, 1).map(|d| d.and_time(chrono::NaiveTime::MIN))
        );
        assert_eq!(TimeValue::from("yesterday").resolve(), None);
    }

    #[test]
    fn test_records_with_custom_columns() {
        let records = vec![
            json!({"item": "a", "date": "2024-01-01", "sales": 1.0, "price": 9.5}),
            json!({"item": 7, "date": "2024-01-02", "sales": null, "promo": 1}),
        ];
        let columns = ColumnNames {
            id_col: "item".into(),
            time_col: "date".into(),
            target_col: "sales".into(),
        };
        let table = SeriesTable::from_json_records(&records, &columns).unwrap();
        assert_eq!(table.exog_columns, vec!["price", "promo"]);
        assert_eq!(table.rows[0].exog, vec![Some(9.5), None]);
        assert_eq!(table.rows[1].unique_id.as_deref(), Some("7"));
        assert_eq!(table.rows[1].y, None);
    }

    #[test]
    fn test_non_numeric_cell_rejected() {
        let records = vec![json!({"unique_id": "a", "ds": "2024-01-01", "y": "ten"})];
        let err = SeriesTable::from_json_records(&records, &ColumnNames::default()).unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("records[0].y")
        );
    }
}
