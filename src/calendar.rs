//! Pure trading-day calendar functions. No network/database access: weekends are never
//! trading days, and known market holidays are a fixed table (refreshed out of band, the
//! way this corpus treats exchange trading-session tables as static data rather than a
//! live lookup).

use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Weekday};
use std::collections::HashSet;
use std::sync::LazyLock;

/// Local trading-session close time, `15:30:00`. The only per-day timestamp that survives
/// the [`DataLoader`](crate::loader::DataLoader) boundary-rule subtraction.
pub static SESSION_CLOSE: LazyLock<NaiveTime> =
    LazyLock::new(|| NaiveTime::from_hms_opt(15, 30, 0).expect("valid time"));

/// Local trading-session open time, `09:30:00`.
pub static SESSION_OPEN: LazyLock<NaiveTime> =
    LazyLock::new(|| NaiveTime::from_hms_opt(9, 30, 0).expect("valid time"));

static HOLIDAYS: LazyLock<HashSet<NaiveDate>> = LazyLock::new(default_holidays);

fn default_holidays() -> HashSet<NaiveDate> {
    // A small fixed 2026 CN market-holiday table; a production deployment would source
    // this from the exchange calendar feed rather than compiling it in.
    [
        (2026, 1, 1),
        (2026, 2, 16),
        (2026, 2, 17),
        (2026, 2, 18),
        (2026, 2, 19),
        (2026, 2, 20),
        (2026, 4, 6),
        (2026, 5, 1),
        (2026, 6, 19),
        (2026, 9, 25),
        (2026, 10, 1),
        (2026, 10, 2),
        (2026, 10, 5),
        (2026, 10, 6),
        (2026, 10, 7),
    ]
    .into_iter()
    .filter_map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d))
    .collect()
}

/// Calendar of trading days. A trait so tests can substitute a fixed calendar without
/// depending on the wall-clock year the holiday table happens to cover.
pub trait TradingCalendar {
    fn is_trading_day(&self, date: NaiveDate) -> bool;

    /// The most recent trading day strictly before `date`.
    fn previous_trading_day(&self, date: NaiveDate) -> NaiveDate {
        let mut cursor = date - Duration::days(1);
        while !self.is_trading_day(cursor) {
            cursor -= Duration::days(1);
        }
        cursor
    }

    /// `date` itself if it's a trading day, otherwise the next one forward.
    fn next_trading_day_forward(&self, date: NaiveDate) -> NaiveDate {
        let mut cursor = date;
        while !self.is_trading_day(cursor) {
            cursor += Duration::days(1);
        }
        cursor
    }
}

/// Default calendar: weekends and a fixed CN market-holiday table are non-trading days.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTradingCalendar;

impl TradingCalendar for DefaultTradingCalendar {
    fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !HOLIDAYS.contains(&date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weekend_is_not_trading_day() {
        // 2026-01-17 is a Saturday.
        let saturday = NaiveDate::from_ymd_opt(2026, 1, 17).unwrap();
        assert!(!DefaultTradingCalendar.is_trading_day(saturday));
    }

    #[test]
    fn test_holiday_is_not_trading_day() {
        let new_year = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        assert!(!DefaultTradingCalendar.is_trading_day(new_year));
    }

    #[test]
    fn test_previous_trading_day_skips_weekend() {
        // 2026-01-19 is a Monday; the prior trading day is Friday 2026-01-16.
        let monday = NaiveDate::from_ymd_opt(2026, 1, 19).unwrap();
        let friday = NaiveDate::from_ymd_opt(2026, 1, 16).unwrap();
        assert_eq!(DefaultTradingCalendar.previous_trading_day(monday), friday);
    }

    #[test]
    fn test_next_trading_day_forward_is_identity_on_trading_day() {
        let monday = NaiveDate::from_ymd_opt(2026, 1, 19).unwrap();
        assert_eq!(
            DefaultTradingCalendar.next_trading_day_forward(monday),
            monday
        );
    }

    #[test]
    fn test_next_trading_day_forward_skips_weekend() {
        let saturday = NaiveDate::from_ymd_opt(2026, 1, 17).unwrap();
        let monday = NaiveDate::from_ymd_opt(2026, 1, 19).unwrap();
        assert_eq!(
            DefaultTradingCalendar.next_trading_day_forward(saturday),
            monday
        );
    }
}
