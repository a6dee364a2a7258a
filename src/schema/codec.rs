// ABOUTME: Value codecs for the datetime and precise timestamp storage formats
// ABOUTME: Converts between NaiveDateTime, datetime text, and epoch-second decimals

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};

/// Text layout used for `DATETIME` values stored as strings
pub const DATETIME_TEXT_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

const MICROS_PER_SECOND: i64 = 1_000_000;

/// Format a datetime as `YYYY-MM-DD HH:MM:SS.ffffff`
pub fn format_datetime(value: &NaiveDateTime) -> String {
    value.format(DATETIME_TEXT_FORMAT).to_string()
}

/// Parse datetime text, with or without fractional seconds
///
/// # Examples
///
/// ```
/// # use precise_timestamp_migrator::schema::codec::{parse_datetime, format_datetime};
/// let value = parse_datetime("2013-06-15 12:30:00").unwrap();
/// assert_eq!(format_datetime(&value), "2013-06-15 12:30:00.000000");
/// ```
pub fn parse_datetime(text: &str) -> Result<NaiveDateTime> {
    let text = text.trim();
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
        .with_context(|| format!("Invalid datetime value '{}'", text))
}

/// Encode a datetime as epoch seconds with six fractional digits
///
/// # Examples
///
/// ```
/// # use precise_timestamp_migrator::schema::codec::{datetime_to_decimal, parse_datetime};
/// let value = parse_datetime("2013-01-01 00:00:00.5").unwrap();
/// assert_eq!(datetime_to_decimal(&value), "1356998400.500000");
/// ```
pub fn datetime_to_decimal(value: &NaiveDateTime) -> String {
    let utc = value.and_utc();
    let total = utc.timestamp() * MICROS_PER_SECOND + i64::from(utc.timestamp_subsec_micros());
    let sign = if total < 0 { "-" } else { "" };
    let magnitude = total.unsigned_abs();
    format!(
        "{}{}.{:06}",
        sign,
        magnitude / MICROS_PER_SECOND as u64,
        magnitude % MICROS_PER_SECOND as u64
    )
}

/// Decode epoch-second decimal text back into a datetime
///
/// Digits past the sixth fractional place are truncated.
pub fn decimal_to_datetime(text: &str) -> Result<NaiveDateTime> {
    let trimmed = text.trim();
    let (negative, unsigned) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };

    let (whole, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if whole.is_empty() || !all_digits(whole) || !all_digits(fraction) {
        bail!("Invalid decimal timestamp '{}'", text);
    }

    let seconds: i64 = whole
        .parse()
        .with_context(|| format!("Decimal timestamp '{}' out of range", text))?;
    let mut micros_text: String = fraction.chars().take(6).collect();
    while micros_text.len() < 6 {
        micros_text.push('0');
    }
    let micros: i64 = micros_text
        .parse()
        .with_context(|| format!("Invalid fractional seconds in '{}'", text))?;

    let total = seconds
        .checked_mul(MICROS_PER_SECOND)
        .and_then(|s| s.checked_add(micros))
        .ok_or_else(|| anyhow!("Decimal timestamp '{}' out of range", text))?;

    epoch_micros_to_datetime(if negative { -total } else { total })
}

/// Convert floating point epoch seconds, rounding to the nearest microsecond
pub fn epoch_seconds_to_datetime(seconds: f64) -> Result<NaiveDateTime> {
    if !seconds.is_finite() {
        bail!("Non-finite timestamp value {}", seconds);
    }
    let micros = (seconds * MICROS_PER_SECOND as f64).round();
    if micros.abs() >= i64::MAX as f64 {
        bail!("Timestamp value {} out of range", seconds);
    }
    epoch_micros_to_datetime(micros as i64)
}

pub fn epoch_micros_to_datetime(micros: i64) -> Result<NaiveDateTime> {
    let seconds = micros.div_euclid(MICROS_PER_SECOND);
    let nanos = (micros.rem_euclid(MICROS_PER_SECOND) * 1_000) as u32;
    DateTime::<Utc>::from_timestamp(seconds, nanos)
        .map(|utc| utc.naive_utc())
        .ok_or_else(|| anyhow!("Timestamp {} microseconds out of range", micros))
}
