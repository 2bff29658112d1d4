//! Aggregation cutoff expressions
//!
//! A cutoff is an RFC 3339 timestamp, a Unix epoch in seconds, or a relative
//! age such as `7d` meaning "now minus seven days".

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CutoffError {
    #[error("empty cutoff expression")]
    Empty,
    #[error("unrecognized cutoff '{0}': expected RFC 3339, epoch seconds, or <n>s|m|h|d|w")]
    Unrecognized(String),
    #[error("cutoff '{0}' is out of range")]
    OutOfRange(String),
}

/// Resolve `input` against `now`
pub fn parse_cutoff(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, CutoffError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CutoffError::Empty);
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(input) {
        return Ok(ts.with_timezone(&Utc));
    }

    if let Ok(epoch) = input.parse::<i64>() {
        return DateTime::from_timestamp(epoch, 0)
            .ok_or_else(|| CutoffError::OutOfRange(input.to_string()));
    }

    let age = parse_age(input)?;
    now.checked_sub_signed(age)
        .ok_or_else(|| CutoffError::OutOfRange(input.to_string()))
}

fn parse_age(input: &str) -> Result<Duration, CutoffError> {
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| CutoffError::Unrecognized(input.to_string()))?;
    let (digits, unit) = input.split_at(split);
    if digits.is_empty() {
        return Err(CutoffError::Unrecognized(input.to_string()));
    }

    let amount: i64 = digits
        .parse()
        .map_err(|_| CutoffError::OutOfRange(input.to_string()))?;

    let seconds_per_unit = match unit.to_ascii_lowercase().as_str() {
        "s" => 1,
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        "w" => 604_800,
        _ => return Err(CutoffError::Unrecognized(input.to_string())),
    };

    amount
        .checked_mul(seconds_per_unit)
        .and_then(Duration::try_seconds)
        .ok_or_else(|| CutoffError::OutOfRange(input.to_string()))
}
