//! Calendar-aware billing arithmetic
//!
//! Subscription periods are whole calendar months. When the start day does not
//! exist in the target month the end date is clamped to that month's last day
//! (Jan 31 + 1 month = Feb 28/29). Time of day is preserved.

use chrono::{DateTime, Datelike, NaiveDate, Utc};

use super::types::Plan;

/// Number of days in the given month
pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

/// Add `months` calendar months, clamping to the last valid day.
///
/// Returns `None` only when the result is outside chrono's representable range.
pub fn add_months(start: DateTime<Utc>, months: u32) -> Option<DateTime<Utc>> {
    let total = start.year() as i64 * 12 + start.month0() as i64 + months as i64;
    let year = i32::try_from(total.div_euclid(12)).ok()?;
    let month = total.rem_euclid(12) as u32 + 1;
    let day = start.day().min(days_in_month(year, month));

    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(date.and_time(start.time()).and_utc())
}

/// End of the period paid for by one payment of `plan` observed at `start`
pub fn period_end(start: DateTime<Utc>, plan: Plan) -> Option<DateTime<Utc>> {
    add_months(start, plan.months())
}
