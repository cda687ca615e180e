//! Normalization of the loose timestamps found in authored seed scenarios.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

const DATE_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M:%S", "%H:%M"];

/// Parses a seed timestamp, resolving time-only forms against `base_date`.
///
/// Accepted shapes: RFC 3339, naive ISO or space separated date-time (read as
/// UTC), bare `HH:MM[:SS]`, and the malformed `YYYY-HH:MM:SS` where the month
/// and day were lost (the time is placed on `base_date`).
pub fn normalize_seed_timestamp(raw: &str, base_date: NaiveDate) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    for format in DATE_TIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(parsed.and_utc());
        }
    }

    if let Some(time) = parse_time(raw) {
        return Some(base_date.and_time(time).and_utc());
    }

    if let Some((year, rest)) = raw.split_once('-') {
        if year.len() == 4 && year.chars().all(|c| c.is_ascii_digit()) {
            if let Some(time) = parse_time(rest) {
                return Some(base_date.and_time(time).and_utc());
            }
        }
    }

    None
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    TIME_FORMATS
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(raw, format).ok())
}
