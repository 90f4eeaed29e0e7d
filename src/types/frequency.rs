//! Sampling frequencies and calendar arithmetic.
//!
//! Aliases follow the pandas offset vocabulary the forecast service speaks
//! (`"D"`, `"15min"`, `"MS"`, `"W-MON"`, ...). Polars' `"mo"` is accepted as
//! an alias for month start.

use chrono::{Datelike, Duration, Months, NaiveDate, NaiveDateTime, Weekday};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::{Error, ErrorContext, Result};

static ALIAS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d*)([A-Za-z]+)(?:-([A-Za-z]{3}))?$").expect("frequency alias regex is valid")
});

const SECONDS_PER_DAY: i64 = 86_400;

/// The calendar unit a frequency steps by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrequencyUnit {
    Second,
    Minute,
    Hour,
    Day,
    /// Monday to Friday.
    BusinessDay,
    /// Weekly, anchored on the given weekday.
    Week(Weekday),
    MonthStart,
    MonthEnd,
    /// Quarters aligned to January.
    QuarterStart,
    /// Quarters aligned to December.
    QuarterEnd,
    YearStart,
    YearEnd,
}

impl FrequencyUnit {
    /// Months per period for the calendar-anchored units.
    fn span_months(&self) -> Option<u32> {
        match self {
            Self::MonthStart | Self::MonthEnd => Some(1),
            Self::QuarterStart | Self::QuarterEnd => Some(3),
            Self::YearStart | Self::YearEnd => Some(12),
            _ => None,
        }
    }
}

/// A sampling frequency: a positive multiple of a [`FrequencyUnit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Frequency {
    multiple: u32,
    unit: FrequencyUnit,
}

impl Frequency {
    pub fn new(multiple: u32, unit: FrequencyUnit) -> Self {
        Self {
            multiple: multiple.max(1),
            unit,
        }
    }

    pub fn daily() -> Self {
        Self::new(1, FrequencyUnit::Day)
    }

    pub fn multiple(&self) -> u32 {
        self.multiple
    }

    pub fn unit(&self) -> FrequencyUnit {
        self.unit
    }

    /// Parse a pandas/polars style alias such as `"D"`, `"15min"` or `"W-MON"`.
    pub fn parse(alias: &str) -> Result<Self> {
        let invalid = |details: &str| {
            Error::validation_with_context(
                format!("unsupported frequency alias '{}'", alias),
                ErrorContext::new()
                    .with_field_path("options.frequency")
                    .with_details(details.to_string())
                    .with_source("frequency_parser"),
            )
        };

        let caps = ALIAS_RE
            .captures(alias.trim())
            .ok_or_else(|| invalid("expected <multiple><unit>[-<anchor>]"))?;
        let multiple = match caps.get(1).map(|m| m.as_str()).unwrap_or("") {
            "" => 1,
            digits => digits
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| invalid("multiple must be a positive integer"))?,
        };
        let base = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        let anchor = caps.get(3).map(|m| m.as_str().to_ascii_uppercase());

        let unit = match (base, anchor.as_deref()) {
            ("s" | "S" | "sec", None) => FrequencyUnit::Second,
            ("min" | "T" | "m", None) => FrequencyUnit::Minute,
            ("h" | "H", None) => FrequencyUnit::Hour,
            ("D" | "d", None) => FrequencyUnit::Day,
            ("B", None) => FrequencyUnit::BusinessDay,
            ("W" | "w", None) => FrequencyUnit::Week(Weekday::Sun),
            ("W" | "w", Some(day)) => {
                FrequencyUnit::Week(parse_weekday(day).ok_or_else(|| invalid("unknown weekday anchor"))?)
            }
            ("MS" | "mo", None) => FrequencyUnit::MonthStart,
            ("M" | "ME", None) => FrequencyUnit::MonthEnd,
            ("QS", None | Some("JAN")) => FrequencyUnit::QuarterStart,
            ("Q" | "QE", None | Some("DEC")) => FrequencyUnit::QuarterEnd,
            ("YS" | "AS", None | Some("JAN")) => FrequencyUnit::YearStart,
            ("Y" | "A" | "YE", None | Some("DEC")) => FrequencyUnit::YearEnd,
            _ => return Err(invalid("unknown unit or anchor")),
        };
        Ok(Self::new(multiple, unit))
    }

    /// Canonical alias sent to the forecast service.
    pub fn alias(&self) -> String {
        let base = match self.unit {
            FrequencyUnit::Second => "s".to_string(),
            FrequencyUnit::Minute => "min".to_string(),
            FrequencyUnit::Hour => "h".to_string(),
            FrequencyUnit::Day => "D".to_string(),
            FrequencyUnit::BusinessDay => "B".to_string(),
            FrequencyUnit::Week(day) => format!("W-{}", weekday_code(day)),
            FrequencyUnit::MonthStart => "MS".to_string(),
            FrequencyUnit::MonthEnd => "ME".to_string(),
            FrequencyUnit::QuarterStart => "QS-JAN".to_string(),
            FrequencyUnit::QuarterEnd => "QE-DEC".to_string(),
            FrequencyUnit::YearStart => "YS-JAN".to_string(),
            FrequencyUnit::YearEnd => "YE-DEC".to_string(),
        };
        if self.multiple > 1 {
            format!("{}{}", self.multiple, base)
        } else {
            base
        }
    }

    /// Whether `ts` lies on this frequency's anchor (always true for fixed-width units).
    pub fn is_on_offset(&self, ts: NaiveDateTime) -> bool {
        let date = ts.date();
        match self.unit {
            FrequencyUnit::Second
            | FrequencyUnit::Minute
            | FrequencyUnit::Hour
            | FrequencyUnit::Day => true,
            FrequencyUnit::BusinessDay => !is_weekend(date),
            FrequencyUnit::Week(anchor) => date.weekday() == anchor,
            FrequencyUnit::MonthStart | FrequencyUnit::QuarterStart | FrequencyUnit::YearStart => {
                let span = self.unit.span_months().unwrap_or(1);
                period_start(date, span) == Some(date)
            }
            FrequencyUnit::MonthEnd | FrequencyUnit::QuarterEnd | FrequencyUnit::YearEnd => {
                let span = self.unit.span_months().unwrap_or(1);
                period_start(date, span).and_then(|s| period_end(s, span)) == Some(date)
            }
        }
    }

    /// Move `ts` forward by `steps` periods. `None` on calendar overflow.
    ///
    /// Anchored units roll an off-anchor timestamp onto the anchor with the
    /// first step, the way pandas offsets do.
    pub fn advance(&self, ts: NaiveDateTime, steps: u32) -> Option<NaiveDateTime> {
        if steps == 0 {
            return Some(ts);
        }
        let n = i64::from(self.multiple).checked_mul(i64::from(steps))?;
        match self.unit {
            FrequencyUnit::Second => ts.checked_add_signed(Duration::try_seconds(n)?),
            FrequencyUnit::Minute => ts.checked_add_signed(Duration::try_minutes(n)?),
            FrequencyUnit::Hour => ts.checked_add_signed(Duration::try_hours(n)?),
            FrequencyUnit::Day => ts.checked_add_signed(Duration::try_days(n)?),
            FrequencyUnit::BusinessDay => add_business_days(ts, n),
            FrequencyUnit::Week(anchor) => {
                let to_anchor = days_until(ts.weekday(), anchor);
                let days = if to_anchor == 0 {
                    n.checked_mul(7)?
                } else {
                    to_anchor + (n - 1).checked_mul(7)?
                };
                ts.checked_add_signed(Duration::try_days(days)?)
            }
            FrequencyUnit::MonthStart | FrequencyUnit::QuarterStart | FrequencyUnit::YearStart => {
                let span = self.unit.span_months()?;
                let start = period_start(ts.date(), span)?;
                let shifted = add_months(start, i64::from(span).checked_mul(n)?)?;
                Some(shifted.and_time(ts.time()))
            }
            FrequencyUnit::MonthEnd | FrequencyUnit::QuarterEnd | FrequencyUnit::YearEnd => {
                let span = self.unit.span_months()?;
                let start = period_start(ts.date(), span)?;
                let on_anchor = period_end(start, span)? == ts.date();
                let periods = if on_anchor { n } else { n - 1 };
                let shifted = add_months(start, i64::from(span).checked_mul(periods)?)?;
                Some(period_end(shifted, span)?.and_time(ts.time()))
            }
        }
    }

    /// The `horizon` timestamps following `last`.
    pub fn grid_after(&self, last: NaiveDateTime, horizon: usize) -> Option<Vec<NaiveDateTime>> {
        (1..=horizon)
            .map(|i| u32::try_from(i).ok().and_then(|step| self.advance(last, step)))
            .collect()
    }

    /// Infer the frequency of a strictly increasing timestamp sequence.
    ///
    /// Returns `None` when fewer than two points are given or the spacing is
    /// irregular.
    pub fn infer(timestamps: &[NaiveDateTime]) -> Option<Self> {
        if timestamps.len() < 2 {
            return None;
        }
        if let Some(freq) = infer_calendar(timestamps) {
            return Some(freq);
        }

        let deltas: Vec<i64> = timestamps
            .windows(2)
            .map(|w| w[1].signed_duration_since(w[0]).num_seconds())
            .collect();
        let first = deltas[0];
        if first <= 0 {
            return None;
        }

        if deltas.iter().all(|d| *d == first) {
            let freq = if first % (7 * SECONDS_PER_DAY) == 0
                && timestamps.iter().all(|t| t.weekday() == timestamps[0].weekday())
            {
                Self::new(
                    u32::try_from(first / (7 * SECONDS_PER_DAY)).ok()?,
                    FrequencyUnit::Week(timestamps[0].weekday()),
                )
            } else if first % SECONDS_PER_DAY == 0 {
                Self::new(u32::try_from(first / SECONDS_PER_DAY).ok()?, FrequencyUnit::Day)
            } else if first % 3600 == 0 {
                Self::new(u32::try_from(first / 3600).ok()?, FrequencyUnit::Hour)
            } else if first % 60 == 0 {
                Self::new(u32::try_from(first / 60).ok()?, FrequencyUnit::Minute)
            } else {
                Self::new(u32::try_from(first).ok()?, FrequencyUnit::Second)
            };
            return Some(freq);
        }

        let business = Self::new(1, FrequencyUnit::BusinessDay);
        let is_business_grid = timestamps.iter().all(|t| business.is_on_offset(*t))
            && timestamps
                .windows(2)
                .all(|w| business.advance(w[0], 1) == Some(w[1]));
        if is_business_grid {
            return Some(business);
        }

        None
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.alias())
    }
}

impl FromStr for Frequency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Frequency {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.alias())
    }
}

impl<'de> Deserialize<'de> for Frequency {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Month-, quarter- and year-anchored sequences. Requires a constant
/// time of day and a constant month distance between points.
fn infer_calendar(timestamps: &[NaiveDateTime]) -> Option<Frequency> {
    let time = timestamps[0].time();
    if timestamps.iter().any(|t| t.time() != time) {
        return None;
    }
    let month_index = |t: &NaiveDateTime| i64::from(t.year()) * 12 + i64::from(t.month0());
    let step = month_index(&timestamps[1]) - month_index(&timestamps[0]);
    if step <= 0
        || timestamps
            .windows(2)
            .any(|w| month_index(&w[1]) - month_index(&w[0]) != step)
    {
        return None;
    }
    let step = u32::try_from(step).ok()?;

    let all_starts = timestamps.iter().all(|t| t.day() == 1);
    let all_ends = timestamps
        .iter()
        .all(|t| period_start(t.date(), 1).and_then(|s| period_end(s, 1)) == Some(t.date()));

    if all_starts {
        let freq = if step % 12 == 0 && timestamps.iter().all(|t| t.month() == 1) {
            Frequency::new(step / 12, FrequencyUnit::YearStart)
        } else if step % 3 == 0 && timestamps.iter().all(|t| t.month0() % 3 == 0) {
            Frequency::new(step / 3, FrequencyUnit::QuarterStart)
        } else {
            Frequency::new(step, FrequencyUnit::MonthStart)
        };
        return Some(freq);
    }
    if all_ends {
        let freq = if step % 12 == 0 && timestamps.iter().all(|t| t.month() == 12) {
            Frequency::new(step / 12, FrequencyUnit::YearEnd)
        } else if step % 3 == 0 && timestamps.iter().all(|t| t.month() % 3 == 0) {
            Frequency::new(step / 3, FrequencyUnit::QuarterEnd)
        } else {
            Frequency::new(step, FrequencyUnit::MonthEnd)
        };
        return Some(freq);
    }
    None
}

fn parse_weekday(code: &str) -> Option<Weekday> {
    match code {
        "MON" => Some(Weekday::Mon),
        "TUE" => Some(Weekday::Tue),
        "WED" => Some(Weekday::Wed),
        "THU" => Some(Weekday::Thu),
        "FRI" => Some(Weekday::Fri),
        "SAT" => Some(Weekday::Sat),
        "SUN" => Some(Weekday::Sun),
        _ => None,
    }
}

fn weekday_code(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "MON",
        Weekday::Tue => "TUE",
        Weekday::Wed => "WED",
        Weekday::Thu => "THU",
        Weekday::Fri => "FRI",
        Weekday::Sat => "SAT",
        Weekday::Sun => "SUN",
    }
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

fn days_until(from: Weekday, to: Weekday) -> i64 {
    let diff = i64::from(to.num_days_from_monday()) - i64::from(from.num_days_from_monday());
    diff.rem_euclid(7)
}

fn add_business_days(ts: NaiveDateTime, n: i64) -> Option<NaiveDateTime> {
    let mut current = ts;
    let mut remaining = n;
    while remaining > 0 {
        current = current.checked_add_signed(Duration::try_days(1)?)?;
        if !is_weekend(current.date()) {
            remaining -= 1;
        }
    }
    Some(current)
}

/// First day of the `span`-month period containing `date`, periods aligned to January.
fn period_start(date: NaiveDate, span: u32) -> Option<NaiveDate> {
    let month0 = date.month0();
    NaiveDate::from_ymd_opt(date.year(), month0 - month0 % span + 1, 1)
}

fn period_end(start: NaiveDate, span: u32) -> Option<NaiveDate> {
    start.checked_add_months(Months::new(span))?.pred_opt()
}

fn add_months(date: NaiveDate, months: i64) -> Option<NaiveDate> {
    date.checked_add_months(Months::new(u32::try_from(months).ok()?))
}
