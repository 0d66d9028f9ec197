// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bucket keys for imported snapshots.
//!
//! Import payloads carry their date under many different field names and in
//! many formats. [`derive_bucket`] scans a record for the first populated
//! field in priority order and normalises the first parseable value to
//! `YYYY-MM` or `YYYY-MM-DD`. A day bucket is only taken from a value that
//! names a day. An unparseable record yields `None`, the explicit "unknown
//! bucket".

use std::sync::LazyLock;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde_json::Value;

/// Date fields of month-granular families, in priority order.
pub const MONTH_FIELDS: &[&str] = &[
    "year_month_file",
    "yearMonth",
    "year_month",
    "month",
    "report_month",
    "report_date",
    "date",
    "collected_at",
    "created_at",
    "timestamp",
];

/// Date fields of the API response family, in priority order.
pub const DAY_FIELDS: &[&str] = &[
    "api_date",
    "apiDate",
    "report_date",
    "date",
    "collected_at",
    "created_at",
    "timestamp",
];

/// Resolution of a bucket key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    /// `YYYY-MM`
    Month,
    /// `YYYY-MM-DD`
    Day,
}

impl Granularity {
    pub fn format(&self, date: NaiveDate) -> String {
        match self {
            Self::Month => date.format("%Y-%m").to_string(),
            Self::Day => date.format("%Y-%m-%d").to_string(),
        }
    }
}

static DATE_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4})[-/](\d{1,2})(?:[-/](\d{1,2}))?").expect("date prefix pattern is valid")
});

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &[
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%Y%m%d",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%b %d %Y",
    "%d %B %Y",
    "%d %b %Y",
];

/// Formats with no day; parsed with the first of the month prepended.
const MONTH_FORMATS: &[&str] = &["%d %B %Y", "%d %b %Y"];

/// Smallest integer read as epoch milliseconds (1973-03-03).
const MIN_EPOCH_MILLIS: i64 = 100_000_000_000;

/// A parsed date and whether the input named a day.
#[derive(Debug, Clone, Copy)]
struct ParsedDate {
    date: NaiveDate,
    has_day: bool,
}

impl ParsedDate {
    fn day(date: NaiveDate) -> Self {
        Self {
            date,
            has_day: true,
        }
    }

    fn month(date: NaiveDate) -> Self {
        Self {
            date,
            has_day: false,
        }
    }

    fn fits(&self, granularity: Granularity) -> bool {
        self.has_day || granularity == Granularity::Month
    }
}

/// Scan `record` for the first date field that parses and format it.
pub fn derive_bucket(record: &Value, fields: &[&str], granularity: Granularity) -> Option<String> {
    let object = record.as_object()?;
    fields
        .iter()
        .filter_map(|field| object.get(*field))
        .find_map(|value| parse_date_value(value, granularity))
        .map(|date| granularity.format(date))
}

/// Bucket of the current local month.
pub fn current_month() -> String {
    Granularity::Month.format(Local::now().date_naive())
}

/// Parse a JSON value as a date precise enough for `granularity`.
///
/// Strings go through [`parse_date`]; integers are epoch milliseconds from
/// 1973-03-03 on. Smaller integers are not dates.
pub fn parse_date_value(value: &Value, granularity: Granularity) -> Option<NaiveDate> {
    match value {
        Value::String(s) => parse_date(s, granularity),
        Value::Number(n) => n.as_i64().and_then(epoch_millis).map(|p| p.date),
        _ => None,
    }
}

/// Parse a date string: a `YYYY-MM[-DD]` prefix first, then the general
/// formats. Day granularity only accepts inputs that carry a day.
pub fn parse_date(raw: &str, granularity: Granularity) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    parse_prefix(raw)
        .filter(|p| p.fits(granularity))
        .or_else(|| parse_general(raw).filter(|p| p.fits(granularity)))
        .map(|p| p.date)
}

fn epoch_millis(millis: i64) -> Option<ParsedDate> {
    if millis < MIN_EPOCH_MILLIS {
        return None;
    }
    DateTime::from_timestamp_millis(millis).map(|dt| ParsedDate::day(dt.date_naive()))
}

fn parse_prefix(raw: &str) -> Option<ParsedDate> {
    let caps = DATE_PREFIX.captures(raw)?;
    let year: i32 = caps.get(1)?.as_str().parse().ok()?;
    let month: u32 = caps.get(2)?.as_str().parse().ok()?;
    match caps.get(3) {
        Some(d) => {
            let day: u32 = d.as_str().parse().ok()?;
            NaiveDate::from_ymd_opt(year, month, day).map(ParsedDate::day)
        }
        None => NaiveDate::from_ymd_opt(year, month, 1).map(ParsedDate::month),
    }
}

fn parse_general(raw: &str) -> Option<ParsedDate> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(ParsedDate::day(dt.date_naive()));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(ParsedDate::day(dt.date_naive()));
    }
    if let Some(dt) = DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(raw, f).ok())
    {
        return Some(ParsedDate::day(dt.date()));
    }
    if let Some(date) = DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(raw, f).ok())
    {
        return Some(ParsedDate::day(date));
    }
    let with_day = format!("1 {raw}");
    if let Some(date) = MONTH_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(&with_day, f).ok())
    {
        return Some(ParsedDate::month(date));
    }
    // Long digit strings are epoch milliseconds.
    if raw.len() > 8 && raw.bytes().all(|b| b.is_ascii_digit()) {
        return raw.parse::<i64>().ok().and_then(epoch_millis);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn month(record: Value) -> Option<String> {
        derive_bucket(&record, MONTH_FIELDS, Granularity::Month)
    }

    fn day(record: Value) -> Option<String> {
        derive_bucket(&record, DAY_FIELDS, Granularity::Day)
    }

    #[test]
    fn test_prefix_shapes() {
        let cases = [
            ("2024-03", Some("2024-03")),
            ("2024/3", Some("2024-03")),
            ("2024-03-15", Some("2024-03")),
            ("2024/03/15 08:00", Some("2024-03")),
            ("2024-03-15T23:59:59Z", Some("2024-03")),
            ("2024-12-31T23:30:00-05:00", Some("2024-12")),
            ("2024-13", None),
            ("2024-02-30", None),
            ("", None),
            ("soon", None),
        ];
        for (input, expected) in cases {
            assert_eq!(
                month(json!({ "year_month_file": input })).as_deref(),
                expected,
                "input {input:?}"
            );
        }
    }

    #[test]
    fn test_general_formats() {
        let cases = [
            ("Fri, 15 Mar 2024 10:00:00 +0000", "2024-03-15"),
            ("15/03/2024", "2024-03-15"),
            ("15.03.2024", "2024-03-15"),
            ("20240315", "2024-03-15"),
            ("March 15, 2024", "2024-03-15"),
            ("15 Mar 2024", "2024-03-15"),
            ("1710496800000", "2024-03-15"),
        ];
        for (input, expected) in cases {
            assert_eq!(
                day(json!({ "api_date": input })).as_deref(),
                Some(expected),
                "input {input:?}"
            );
        }
        assert_eq!(month(json!({ "month": "March 2024" })).as_deref(), Some("2024-03"));
    }

    #[test]
    fn test_epoch_millis_number() {
        let cases = [
            (json!({ "timestamp": 1_710_496_800_000_i64 }), Some("2024-03-15")),
            (json!({ "timestamp": 3 }), None),
            (json!({ "timestamp": 20_240_315 }), None),
            (json!({ "timestamp": 99_999_999_999_i64 }), None),
            (json!({ "timestamp": -1_710_496_800_000_i64 }), None),
            (json!({ "timestamp": "1710496800000" }), Some("2024-03-15")),
            (json!({ "timestamp": "123456789" }), None),
        ];
        for (record, expected) in cases {
            assert_eq!(day(record.clone()).as_deref(), expected, "record {record}");
        }
    }

    #[test]
    fn test_small_integer_falls_through_to_next_field() {
        let record = json!({ "month": 3, "date": "2024-03-10" });
        assert_eq!(month(record).as_deref(), Some("2024-03"));
        assert_eq!(month(json!({ "month": 3 })), None);
    }

    #[test]
    fn test_day_bucket_requires_a_day() {
        let cases = [
            (json!({ "api_date": "2024-03" }), None),
            (json!({ "api_date": "2024/3" }), None),
            (json!({ "api_date": "March 2024" }), None),
            (json!({ "api_date": "2024-03", "date": "2024-03-09" }), Some("2024-03-09")),
            (json!({ "api_date": "2024-03-01" }), Some("2024-03-01")),
        ];
        for (record, expected) in cases {
            assert_eq!(day(record.clone()).as_deref(), expected, "record {record}");
        }
        assert_eq!(month(json!({ "month": "2024-03" })).as_deref(), Some("2024-03"));
    }

    #[test]
    fn test_field_priority_and_fallthrough() {
        let record = json!({
            "date": "2023-01-02",
            "year_month_file": "2024-05",
        });
        assert_eq!(month(record).as_deref(), Some("2024-05"));

        let record = json!({
            "year_month_file": "not a date",
            "yearMonth": null,
            "created_at": "2022-07-09T10:00:00Z",
        });
        assert_eq!(month(record).as_deref(), Some("2022-07"));

        let record = json!({ "apiDate": "2024-02-29", "date": "2024-01-01" });
        assert_eq!(day(record).as_deref(), Some("2024-02-29"));
    }

    #[test]
    fn test_unknown_bucket() {
        assert_eq!(month(json!({ "value": 1 })), None);
        assert_eq!(month(json!(["2024-01"])), None);
        assert_eq!(month(json!({ "date": true })), None);
    }

    #[test]
    fn test_current_month_shape() {
        let bucket = current_month();
        assert_eq!(bucket.len(), 7);
        assert_eq!(
            parse_date(&bucket, Granularity::Month).map(|d| Granularity::Month.format(d)),
            Some(bucket)
        );
    }
}
