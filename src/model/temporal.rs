//! Temporal value parsing and calendar extraction.
//!
//! Backends receive temporal values either as epoch milliseconds or as one
//! of a small set of common string formats. The format of a column is
//! sniffed from a sample value and shipped alongside range queries so
//! every backend parses consistently.
//!
//! Calendar extraction composes a display offset (minutes, positive west
//! of UTC) with the timestamp before reading components, so "month" means
//! month in the viewer's timezone, not the server's.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime};

use super::expression::DateTimeLevel;

/// Recognized encodings of temporal values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeFormat {
    /// Epoch milliseconds as a JSON number.
    #[serde(rename = "timestamp")]
    TimestampMs,
    /// `YYYY-MM-DD`
    #[serde(rename = "YYYY-MM-DD")]
    Date,
    /// `YYYY/MM/DD`
    #[serde(rename = "YYYY/MM/DD")]
    DateSlash,
    /// `YYYY.MM.DD`
    #[serde(rename = "YYYY.MM.DD")]
    DateDot,
    /// `MM/DD/YYYY`
    #[serde(rename = "MM/DD/YYYY")]
    DateMdy,
    /// `YYYY-MM-DD HH:MM:SS`
    #[serde(rename = "YYYY-MM-DD HH:mm:ss")]
    DateTime,
    /// ISO-8601 with a `T` separator, optional offset.
    #[serde(rename = "ISO-8601")]
    Iso8601,
}

impl TimeFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeFormat::TimestampMs => "timestamp",
            TimeFormat::Date => "YYYY-MM-DD",
            TimeFormat::DateSlash => "YYYY/MM/DD",
            TimeFormat::DateDot => "YYYY.MM.DD",
            TimeFormat::DateMdy => "MM/DD/YYYY",
            TimeFormat::DateTime => "YYYY-MM-DD HH:mm:ss",
            TimeFormat::Iso8601 => "ISO-8601",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "timestamp" => Some(TimeFormat::TimestampMs),
            "YYYY-MM-DD" => Some(TimeFormat::Date),
            "YYYY/MM/DD" => Some(TimeFormat::DateSlash),
            "YYYY.MM.DD" => Some(TimeFormat::DateDot),
            "MM/DD/YYYY" => Some(TimeFormat::DateMdy),
            "YYYY-MM-DD HH:mm:ss" => Some(TimeFormat::DateTime),
            "ISO-8601" => Some(TimeFormat::Iso8601),
            _ => None,
        }
    }
}

/// Sniff the time format of a sample value.
///
/// Numbers are epoch milliseconds; unrecognized strings fall back to the
/// millisecond interpretation so a backend at least degrades predictably.
pub fn sniff_time_format(sample: &Value) -> TimeFormat {
    let text = match sample {
        Value::Number(_) => return TimeFormat::TimestampMs,
        Value::String(s) => s.as_str(),
        _ => return TimeFormat::TimestampMs,
    };
    let patterns: [(&str, TimeFormat); 6] = [
        (r"^\d{4}-\d{2}-\d{2}$", TimeFormat::Date),
        (r"^\d{4}/\d{2}/\d{2}$", TimeFormat::DateSlash),
        (r"^\d{4}\.\d{2}\.\d{2}$", TimeFormat::DateDot),
        (r"^\d{2}/\d{2}/\d{4}$", TimeFormat::DateMdy),
        (
            r"^\d{4}-\d{2}-\d{2}\s\d{2}:\d{2}:\d{2}$",
            TimeFormat::DateTime,
        ),
        (
            r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}",
            TimeFormat::Iso8601,
        ),
    ];
    for (pattern, format) in patterns {
        let re = Regex::new(pattern).expect("static pattern");
        if re.is_match(text) {
            return format;
        }
    }
    TimeFormat::TimestampMs
}

/// Parse a temporal value into epoch milliseconds.
///
/// Naive date strings (no offset) are interpreted as UTC. Returns `None`
/// for values that are not temporal.
pub fn parse_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_f64().map(|f| f as i64),
        Value::String(s) => parse_timestamp_str(s),
        _ => None,
    }
}

fn parse_timestamp_str(text: &str) -> Option<i64> {
    if let Ok(dt) = OffsetDateTime::parse(text, &Rfc3339) {
        return Some((dt.unix_timestamp_nanos() / 1_000_000) as i64);
    }
    let datetime_formats = [
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
    ];
    for format in datetime_formats {
        if let Ok(dt) = PrimitiveDateTime::parse(text, format) {
            return Some((dt.assume_utc().unix_timestamp_nanos() / 1_000_000) as i64);
        }
    }
    let date_formats = [
        format_description!("[year]-[month]-[day]"),
        format_description!("[year]/[month]/[day]"),
        format_description!("[year].[month].[day]"),
        format_description!("[month]/[day]/[year]"),
    ];
    for format in date_formats {
        if let Ok(date) = Date::parse(text, format) {
            return Some(
                (date.midnight().assume_utc().unix_timestamp_nanos() / 1_000_000) as i64,
            );
        }
    }
    None
}

/// Shift a timestamp by a display offset (minutes) and expose its civil
/// components in UTC.
fn civil(ms: i64, offset_minutes: i32) -> Option<OffsetDateTime> {
    let shifted = ms as i128 - offset_minutes as i128 * 60_000;
    OffsetDateTime::from_unix_timestamp_nanos(shifted * 1_000_000).ok()
}

/// Sunday-based week of year, 1-based; days before the first Sunday count
/// as week 1.
fn sunday_week(date: Date) -> i32 {
    let jan1 = Date::from_calendar_date(date.year(), Month::January, 1).expect("january 1st");
    let jan1_weekday = jan1.weekday().number_days_from_sunday() as i32;
    (date.ordinal() as i32 - 1 + jan1_weekday) / 7 + 1
}

/// Extract an order-comparable calendar component.
///
/// Years are numbers; composite levels are zero-padded strings so that
/// lexicographic order matches chronological order.
pub fn drill(ms: i64, offset_minutes: i32, level: DateTimeLevel) -> Value {
    let Some(dt) = civil(ms, offset_minutes) else {
        return Value::Null;
    };
    let date = dt.date();
    let (iso_year, iso_week, _) = date.to_iso_week_date();
    let year = date.year();
    let month = u8::from(date.month());
    match level {
        DateTimeLevel::Year => Value::from(year as i64),
        DateTimeLevel::IsoYear => Value::from(iso_year as i64),
        DateTimeLevel::Quarter => Value::from(format!("{} Q{}", year, (month - 1) / 3 + 1)),
        DateTimeLevel::Month => Value::from(format!("{}-{:02}", year, month)),
        DateTimeLevel::Week => Value::from(format!("{} W{:02}", year, sunday_week(date))),
        DateTimeLevel::IsoWeek => Value::from(format!("{}-W{:02}", iso_year, iso_week)),
        DateTimeLevel::Day => Value::from(format!("{}-{:02}-{:02}", year, month, date.day())),
        DateTimeLevel::Hour => Value::from(format!(
            "{}-{:02}-{:02} {:02}",
            year,
            month,
            date.day(),
            dt.hour()
        )),
        DateTimeLevel::Minute => Value::from(format!(
            "{}-{:02}-{:02} {:02}:{:02}",
            year,
            month,
            date.day(),
            dt.hour(),
            dt.minute()
        )),
        DateTimeLevel::Second => Value::from(format!(
            "{}-{:02}-{:02} {:02}:{:02}:{:02}",
            year,
            month,
            date.day(),
            dt.hour(),
            dt.minute(),
            dt.second()
        )),
        // Weekday has no chronological order; fall through to the feature
        // extraction.
        DateTimeLevel::Weekday => feature(ms, offset_minutes, level),
    }
}

/// Extract a calendar feature as a plain number. Weekday 0 is Sunday.
pub fn feature(ms: i64, offset_minutes: i32, level: DateTimeLevel) -> Value {
    let Some(dt) = civil(ms, offset_minutes) else {
        return Value::Null;
    };
    let date = dt.date();
    let (iso_year, iso_week, _) = date.to_iso_week_date();
    let month = u8::from(date.month());
    let n: i64 = match level {
        DateTimeLevel::Year => date.year() as i64,
        DateTimeLevel::IsoYear => iso_year as i64,
        DateTimeLevel::Quarter => ((month - 1) / 3 + 1) as i64,
        DateTimeLevel::Month => month as i64,
        DateTimeLevel::Week => sunday_week(date) as i64,
        DateTimeLevel::IsoWeek => iso_week as i64,
        DateTimeLevel::Weekday => date.weekday().number_days_from_sunday() as i64,
        DateTimeLevel::Day => date.day() as i64,
        DateTimeLevel::Hour => dt.hour() as i64,
        DateTimeLevel::Minute => dt.minute() as i64,
        DateTimeLevel::Second => dt.second() as i64,
    };
    Value::from(n)
}
