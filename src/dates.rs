//! Calendar arithmetic used by the recurrence engine.
//!
//! Days of the week are numbered `0` (Monday) through `6` (Sunday),
//! matching `chrono::Weekday::num_days_from_monday`.

use chrono::{Datelike, Duration, Months, NaiveDate, Weekday};

/// Highest valid day-of-week index (Sunday).
pub const MAX_DAY_OF_WEEK: u8 = 6;

/// Number of days in `month` (1-12) of `year`, or `None` for an invalid month.
pub fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = first.checked_add_months(Months::new(1))?;
    Some(next.signed_duration_since(first).num_days() as u32)
}

/// Build a date, falling back to the last valid day of the month when
/// `day` does not exist there (31 in April, 29 in a non-leap February).
pub fn clamped_date(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    if day == 0 {
        return None;
    }
    let last = days_in_month(year, month)?;
    NaiveDate::from_ymd_opt(year, month, day.min(last))
}

/// Move `base` forward by `months` calendar months and land on `day`,
/// clamped to the length of the target month.
pub fn add_months_clamped(base: NaiveDate, months: u32, day: u32) -> Option<NaiveDate> {
    let zero_based = base.month0() as i64 + months as i64;
    let year = base.year() as i64 + zero_based.div_euclid(12);
    let month = zero_based.rem_euclid(12) as u32 + 1;
    let year = i32::try_from(year).ok()?;
    clamped_date(year, month, day)
}

/// Move `base` forward by `years` and land on `month`/`day`, clamped
/// (Feb 29 becomes Feb 28 outside leap years).
pub fn add_years_clamped(base: NaiveDate, years: u32, month: u32, day: u32) -> Option<NaiveDate> {
    let year = base.year().checked_add(i32::try_from(years).ok()?)?;
    clamped_date(year, month, day)
}

pub fn add_days(base: NaiveDate, days: i64) -> Option<NaiveDate> {
    base.checked_add_signed(Duration::days(days))
}

pub fn day_of_week(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_monday() as u8
}

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// The first Monday-to-Friday date strictly after `base`.
pub fn next_weekday(base: NaiveDate) -> Option<NaiveDate> {
    let mut next = add_days(base, 1)?;
    while is_weekend(next) {
        next = add_days(next, 1)?;
    }
    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn month_lengths() {
        assert_eq!(days_in_month(2025, 2), Some(28));
        assert_eq!(days_in_month(2024, 2), Some(29));
        assert_eq!(days_in_month(2025, 4), Some(30));
        assert_eq!(days_in_month(2025, 12), Some(31));
        assert_eq!(days_in_month(2025, 13), None);
        assert_eq!(days_in_month(2025, 0), None);
    }

    #[test]
    fn february_follows_gregorian_leap_rules() {
        assert_eq!(days_in_month(2000, 2), Some(29));
        assert_eq!(days_in_month(1900, 2), Some(28));
        assert_eq!(days_in_month(2100, 2), Some(28));
    }

    #[test]
    fn add_months_clamps_to_month_end() {
        assert_eq!(add_months_clamped(date(2025, 1, 31), 1, 31), Some(date(2025, 2, 28)));
        assert_eq!(add_months_clamped(date(2024, 1, 31), 1, 31), Some(date(2024, 2, 29)));
        assert_eq!(add_months_clamped(date(2025, 3, 31), 1, 31), Some(date(2025, 4, 30)));
    }

    #[test]
    fn add_months_rolls_over_year() {
        assert_eq!(add_months_clamped(date(2025, 11, 15), 3, 15), Some(date(2026, 2, 15)));
        assert_eq!(add_months_clamped(date(2025, 12, 1), 12, 1), Some(date(2026, 12, 1)));
    }

    #[test]
    fn add_years_handles_leap_day() {
        assert_eq!(add_years_clamped(date(2024, 2, 29), 1, 2, 29), Some(date(2025, 2, 28)));
        assert_eq!(add_years_clamped(date(2027, 3, 1), 1, 2, 29), Some(date(2028, 2, 29)));
    }

    #[test]
    fn next_weekday_skips_weekend() {
        // 2025-01-03 is a Friday.
        assert_eq!(next_weekday(date(2025, 1, 3)), Some(date(2025, 1, 6)));
        assert_eq!(next_weekday(date(2025, 1, 4)), Some(date(2025, 1, 6)));
        assert_eq!(next_weekday(date(2025, 1, 6)), Some(date(2025, 1, 7)));
    }

    #[test]
    fn clamped_date_rejects_day_zero() {
        assert_eq!(clamped_date(2025, 1, 0), None);
    }
}
