//! Date/time groups (DTG) and cycle lengths.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// A date/time group. Always UTC.
pub type Dtg = DateTime<Utc>;

/// Errors raised while parsing times and durations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeParseError {
    /// Not a recognised date/time group
    #[error("Invalid date/time group: {0}")]
    InvalidDtg(String),

    /// Not a recognised duration
    #[error("Invalid duration: {0}")]
    InvalidDuration(String),
}

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Parse a DTG.
///
/// Accepts RFC 3339, `YYYYMMDD`, `YYYYMMDDHH`, `YYYYMMDDHHMM` and the ISO
/// forms without offset. Values without an offset are taken as UTC.
pub fn parse_dtg(s: &str) -> Result<Dtg, TimeParseError> {
    let s = s.trim();
    let invalid = || TimeParseError::InvalidDtg(s.to_string());

    if s.chars().all(|c| c.is_ascii_digit()) {
        let date = s.get(0..8).ok_or_else(invalid)?;
        let date = NaiveDate::parse_from_str(date, "%Y%m%d").map_err(|_| invalid())?;
        let (hour, minute) = match s.len() {
            8 => (0, 0),
            10 => (s[8..10].parse().map_err(|_| invalid())?, 0),
            12 => (
                s[8..10].parse().map_err(|_| invalid())?,
                s[10..12].parse().map_err(|_| invalid())?,
            ),
            _ => return Err(invalid()),
        };
        let naive = date.and_hms_opt(hour, minute, 0).ok_or_else(invalid)?;
        return Ok(Utc.from_utc_datetime(&naive));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    let naive = s.trim_end_matches('Z');
    for format in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(naive, format) {
            return Ok(Utc.from_utc_datetime(&dt));
        }
    }

    Err(invalid())
}

/// Format a DTG the way it is written to persisted files and configs.
pub fn format_dtg(dtg: &Dtg) -> String {
    dtg.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Compact `YYYYMMDDHHMM` form used in node identities.
pub fn compact_dtg(dtg: &Dtg) -> String {
    dtg.format("%Y%m%d%H%M").to_string()
}

/// Decade key (`MMDD` of the decade centre) used by decadal static fields.
pub fn decade(dtg: &Dtg) -> String {
    let day = match dtg.day() {
        1..=10 => 5,
        11..=20 => 15,
        _ => 25,
    };
    format!("{:02}{:02}", dtg.month(), day)
}

/// Parse a duration.
///
/// Accepts ISO 8601 (`PT3H`, `P1DT12H`, `P2W`, `PT90M`, `PT30S`) and the
/// shorthand forms `3h`, `90m`, `1d`, `3600s`.
pub fn parse_duration(s: &str) -> Result<Duration, TimeParseError> {
    let s = s.trim();
    let invalid = || TimeParseError::InvalidDuration(s.to_string());

    if let Some(rest) = s.strip_prefix('P').or_else(|| s.strip_prefix('p')) {
        return parse_iso_duration(rest).ok_or_else(invalid);
    }

    let split = s.find(|c: char| !c.is_ascii_digit()).ok_or_else(invalid)?;
    let (value, unit) = s.split_at(split);
    let value: i64 = value.parse().map_err(|_| invalid())?;
    let duration = match unit.trim() {
        "s" | "sec" => Duration::seconds(value),
        "m" | "min" => Duration::minutes(value),
        "h" | "hr" | "hour" | "hours" => Duration::hours(value),
        "d" | "day" | "days" => Duration::days(value),
        _ => return Err(invalid()),
    };
    Ok(duration)
}

fn parse_iso_duration(rest: &str) -> Option<Duration> {
    if rest.is_empty() {
        return None;
    }
    let mut total = Duration::zero();
    let mut in_time = false;
    let mut number = String::new();
    let mut seen_component = false;

    for c in rest.chars() {
        match c {
            'T' | 't' => {
                if in_time || !number.is_empty() {
                    return None;
                }
                in_time = true;
            }
            '0'..='9' => number.push(c),
            unit => {
                let value: i64 = number.parse().ok()?;
                number.clear();
                seen_component = true;
                total = total
                    + match (in_time, unit.to_ascii_uppercase()) {
                        (false, 'W') => Duration::weeks(value),
                        (false, 'D') => Duration::days(value),
                        (true, 'H') => Duration::hours(value),
                        (true, 'M') => Duration::minutes(value),
                        (true, 'S') => Duration::seconds(value),
                        _ => return None,
                    };
            }
        }
    }

    if !number.is_empty() || !seen_component {
        return None;
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dtg_forms() {
        let expected = Utc.with_ymd_and_hms(2022, 2, 1, 3, 0, 0).unwrap();
        assert_eq!(parse_dtg("2022020103").unwrap(), expected);
        assert_eq!(parse_dtg("202202010300").unwrap(), expected);
        assert_eq!(parse_dtg("2022-02-01T03:00:00Z").unwrap(), expected);
        assert_eq!(parse_dtg("2022-02-01T03:00").unwrap(), expected);
        assert_eq!(parse_dtg("2022-02-01T04:00:00+01:00").unwrap(), expected);
    }

    #[test]
    fn test_parse_dtg_rejects_garbage() {
        assert!(parse_dtg("yesterday").is_err());
        assert!(parse_dtg("20221301").is_err());
        assert!(parse_dtg("2022020").is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("PT3H").unwrap(), Duration::hours(3));
        assert_eq!(parse_duration("P1DT6H").unwrap(), Duration::hours(30));
        assert_eq!(parse_duration("PT90M").unwrap(), Duration::minutes(90));
        assert_eq!(parse_duration("3h").unwrap(), Duration::hours(3));
        assert_eq!(parse_duration("1d").unwrap(), Duration::days(1));
        assert!(parse_duration("P").is_err());
        assert!(parse_duration("PT3").is_err());
        assert!(parse_duration("3 fortnights").is_err());
    }

    #[test]
    fn test_compact_and_decade() {
        let dtg = parse_dtg("2022-02-14T06:00:00Z").unwrap();
        assert_eq!(compact_dtg(&dtg), "202202140600");
        assert_eq!(decade(&dtg), "0215");
        assert_eq!(format_dtg(&dtg), "2022-02-14T06:00:00Z");
    }
}
