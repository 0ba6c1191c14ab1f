//! Time-zone arithmetic for scheduling actions.
//!
//! Everything here is pure and total: unparsable input yields `None` (or the
//! input unchanged, for [`to_absolute_instant`]) instead of panicking. Unknown
//! zones degrade to UTC when converting wall-clock times, while the zoned
//! projections ([`hour_in_zone`], [`minute_in_zone`]) report `None` so callers
//! can decide to fail closed.

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, Offset, SecondsFormat, TimeZone, Utc};
use chrono_tz::Tz;

/// Wall-clock layouts accepted for zone-less timestamps
const LOCAL_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, Clone, Copy)]
enum Zone {
    Fixed(FixedOffset),
    Named(Tz),
}

impl Zone {
    fn parse(zone: &str) -> Option<Self> {
        let zone = zone.trim();
        if zone.is_empty() {
            return None;
        }
        if let Some(minutes) = parse_fixed_offset(zone) {
            return FixedOffset::east_opt(minutes * 60).map(Zone::Fixed);
        }
        zone.parse::<Tz>().ok().map(Zone::Named)
    }

    fn offset_minutes_at(&self, at: &DateTime<Utc>) -> i32 {
        match self {
            Zone::Fixed(offset) => offset.local_minus_utc() / 60,
            Zone::Named(tz) => tz.offset_from_utc_datetime(&at.naive_utc()).fix().local_minus_utc() / 60,
        }
    }

    fn local(&self, at: &DateTime<Utc>) -> NaiveDateTime {
        match self {
            Zone::Fixed(offset) => at.with_timezone(offset).naive_local(),
            Zone::Named(tz) => at.with_timezone(tz).naive_local(),
        }
    }
}

/// Parses `GMT+HH:MM` / `GMT-HH:MM` (case-insensitive) into signed minutes.
pub fn parse_fixed_offset(zone: &str) -> Option<i32> {
    let zone = zone.trim();
    if zone.len() != 9 || !zone.is_ascii() || !zone[..3].eq_ignore_ascii_case("GMT") {
        return None;
    }
    let bytes = zone.as_bytes();
    let sign = match bytes[3] {
        b'+' => 1,
        b'-' => -1,
        _ => return None,
    };
    if bytes[6] != b':' {
        return None;
    }
    let hours = two_digits(&zone[4..6])?;
    let minutes = two_digits(&zone[7..9])?;
    Some(sign * (hours * 60 + minutes))
}

fn two_digits(s: &str) -> Option<i32> {
    if s.len() == 2 && s.bytes().all(|b| b.is_ascii_digit()) {
        s.parse().ok()
    } else {
        None
    }
}

/// Offset of `zone` from UTC at the instant `at`, in minutes.
pub fn resolve_offset_minutes(zone: &str, at: &DateTime<Utc>) -> Option<i32> {
    Zone::parse(zone).map(|z| z.offset_minutes_at(at))
}

fn has_explicit_zone(value: &str) -> bool {
    if value.ends_with('Z') || value.ends_with('z') {
        return true;
    }
    let bytes = value.as_bytes();
    if bytes.len() < 6 {
        return false;
    }
    let tail = &bytes[bytes.len() - 6..];
    matches!(tail[0], b'+' | b'-')
        && tail[1].is_ascii_digit()
        && tail[2].is_ascii_digit()
        && tail[3] == b':'
        && tail[4].is_ascii_digit()
        && tail[5].is_ascii_digit()
}

fn parse_local(value: &str) -> Option<NaiveDateTime> {
    LOCAL_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
}

fn format_instant(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Converts a wall-clock timestamp in `zone` into a UTC RFC 3339 instant.
///
/// Strings already carrying `Z` or a numeric offset are returned unchanged.
/// The offset is resolved by two fixed-point passes so a single DST
/// transition between the naive guess and the true instant is absorbed.
pub fn to_absolute_instant(value: &str, zone: &str) -> String {
    let trimmed = value.trim();
    if has_explicit_zone(trimmed) {
        return value.to_string();
    }
    if zone.trim().is_empty() {
        return format!("{}Z", trimmed);
    }
    let Some(naive) = parse_local(trimmed) else {
        return value.to_string();
    };

    let zone = Zone::parse(zone);
    let offset_at = |at: &DateTime<Utc>| zone.map(|z| z.offset_minutes_at(at)).unwrap_or(0);

    let guess = Utc.from_utc_datetime(&naive);
    let first = guess - Duration::minutes(offset_at(&guess) as i64);
    let instant = guess - Duration::minutes(offset_at(&first) as i64);
    format_instant(&instant)
}

pub fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn add_minutes(value: &str, minutes: i64) -> Option<String> {
    let start = parse_instant(value)?;
    start
        .checked_add_signed(Duration::minutes(minutes))
        .map(|end| format_instant(&end))
}

pub fn hour_in_zone(value: &str, zone: &str) -> Option<u32> {
    use chrono::Timelike;
    let at = parse_instant(value)?;
    Zone::parse(zone).map(|z| z.local(&at).hour())
}

pub fn minute_in_zone(value: &str, zone: &str) -> Option<u32> {
    use chrono::Timelike;
    let at = parse_instant(value)?;
    Zone::parse(zone).map(|z| z.local(&at).minute())
}
