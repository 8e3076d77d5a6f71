//! The two time formats the wire contract pins exactly: `yyyyMMdd` for dates and
//! `yyyy-MM-dd HH:mm:ss` for timestamps. Kept as a single pair of formatter functions so
//! nothing downstream hand-rolls its own `chrono::format::strftime` string.

use chrono::{DateTime, NaiveDate, Utc};

const DATE_FORMAT: &str = "%Y%m%d";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format a calendar date as `yyyyMMdd`, e.g. `"20260118"`.
pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Parse a `yyyyMMdd` calendar date.
pub fn parse_date(value: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
}

/// Format a timestamp as `yyyy-MM-dd HH:mm:ss`, e.g. `"2026-01-18 13:01:01"`.
pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.format(TIMESTAMP_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_date_pinned() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 18).unwrap();
        assert_eq!(format_date(date), "20260118");
    }

    #[test]
    fn test_parse_date_round_trip() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 18).unwrap();
        assert_eq!(parse_date(&format_date(date)).unwrap(), date);
    }

    #[test]
    fn test_format_timestamp_pinned() {
        let time = Utc.with_ymd_and_hms(2026, 1, 18, 13, 1, 1).unwrap();
        assert_eq!(format_timestamp(time), "2026-01-18 13:01:01");
    }
}
