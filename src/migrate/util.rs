use crate::error::ParseError;
use anyhow::{Context, Result};
use chrono::{LocalResult, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use std::time::{SystemTime, UNIX_EPOCH};

const LEGACY_TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Return the current Unix epoch in seconds.
pub fn now_epoch_secs() -> Result<i64> {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before UNIX_EPOCH")?
        .as_secs();
    i64::try_from(secs).context("system clock out of range")
}

/// Parse a legacy `productionDirectory.creation`/`remove` value.
pub fn parse_legacy_timestamp(raw: &str) -> Result<NaiveDateTime, ParseError> {
    let trimmed = raw.trim();
    LEGACY_TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .ok_or_else(|| ParseError::Timestamp(raw.to_string()))
}

/// Epoch seconds of a legacy wall-clock timestamp read in `zone`.
///
/// A repeated local hour (DST fold) resolves to its earliest instant.
pub fn epoch_secs_in(naive: &NaiveDateTime, zone: Tz) -> Result<i64, ParseError> {
    match zone.from_local_datetime(naive) {
        LocalResult::Single(at) => Ok(at.timestamp()),
        LocalResult::Ambiguous(earliest, _) => Ok(earliest.timestamp()),
        LocalResult::None => Err(ParseError::NonexistentLocalTime {
            value: naive.to_string(),
            zone: zone.name().to_string(),
        }),
    }
}

struct SizeUnit {
    decimal_symbol: &'static str,
    decimal_name: &'static str,
    binary_symbol: &'static str,
    binary_name: &'static str,
    exponent: u32,
}

const SIZE_UNITS: &[SizeUnit] = &[
    SizeUnit {
        decimal_symbol: "kb",
        decimal_name: "kilobyte",
        binary_symbol: "kib",
        binary_name: "kibibyte",
        exponent: 1,
    },
    SizeUnit {
        decimal_symbol: "mb",
        decimal_name: "megabyte",
        binary_symbol: "mib",
        binary_name: "mebibyte",
        exponent: 2,
    },
    SizeUnit {
        decimal_symbol: "gb",
        decimal_name: "gigabyte",
        binary_symbol: "gib",
        binary_name: "gibibyte",
        exponent: 3,
    },
    SizeUnit {
        decimal_symbol: "tb",
        decimal_name: "terabyte",
        binary_symbol: "tib",
        binary_name: "tebibyte",
        exponent: 4,
    },
    SizeUnit {
        decimal_symbol: "pb",
        decimal_name: "petabyte",
        binary_symbol: "pib",
        binary_name: "pebibyte",
        exponent: 5,
    },
];

fn size_multiplier(unit: &str) -> Option<u64> {
    if unit.is_empty() || unit.starts_with('b') {
        return Some(1);
    }
    let singular = unit.trim_end_matches('s');
    for candidate in SIZE_UNITS {
        if singular == candidate.binary_symbol || singular == candidate.binary_name {
            return Some(1024u64.pow(candidate.exponent));
        }
        if singular == candidate.decimal_symbol || singular == candidate.decimal_name {
            return Some(1000u64.pow(candidate.exponent));
        }
    }
    let first = unit.chars().next()?;
    SIZE_UNITS
        .iter()
        .find(|candidate| candidate.decimal_symbol.starts_with(first))
        .map(|candidate| 1000u64.pow(candidate.exponent))
}

/// Parse a human size as written by the legacy tool, e.g. `1,5 GB`.
///
/// The decimal comma becomes a dot before parsing. Bare unit letters are
/// decimal; only the `*iB` forms are powers of 1024.
pub fn parse_human_size(raw: &str) -> Result<u64, ParseError> {
    let normalized = raw.trim().replace(',', ".");
    let split = normalized
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(normalized.len());
    let (number, unit) = normalized.split_at(split);
    let value = number
        .parse::<f64>()
        .map_err(|_| ParseError::Size(raw.to_string()))?;
    let multiplier = size_multiplier(&unit.trim().to_ascii_lowercase())
        .ok_or_else(|| ParseError::Size(raw.to_string()))?;
    Ok((value * multiplier as f64) as u64)
}
