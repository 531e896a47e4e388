//! Period Resolution
//!
//! Resolves weeks and months to their constituent calendar days.
//!
//! Weeks are counted from January 1st in blocks of seven days. Weeks 1..=52
//! are always full; week 53 holds whatever remains of the year (one day in a
//! common year, two in a leap year) and exists unless the year length is an
//! exact multiple of seven after the first 52 weeks.

use chrono::{Datelike, Days, NaiveDate};

use crate::error::{Error, Result};

/// Highest week number accepted in any year.
pub const MAX_WEEK: u32 = 53;

const DAYS_PER_WEEK: u32 = 7;
const FULL_WEEKS: u32 = 52;

/// January 1st of `year`, or `InvalidPeriod` if the year is unrepresentable.
pub fn first_day_of_year(year: i32) -> Result<NaiveDate> {
    NaiveDate::from_yo_opt(year, 1)
        .ok_or_else(|| Error::InvalidPeriod(format!("year {} is out of range", year)))
}

pub fn days_in_year(year: i32) -> Result<u32> {
    first_day_of_year(year)?;
    Ok(if NaiveDate::from_yo_opt(year, 366).is_some() {
        366
    } else {
        365
    })
}

/// Number of weeks (52 or 53) in `year`.
pub fn weeks_in_year(year: i32) -> Result<u32> {
    let remainder = days_in_year(year)? - FULL_WEEKS * DAYS_PER_WEEK;
    Ok(if remainder == 0 { FULL_WEEKS } else { MAX_WEEK })
}

/// Week number (1-based) containing `date`.
pub fn week_of(date: NaiveDate) -> u32 {
    date.ordinal0() / DAYS_PER_WEEK + 1
}

/// All days of `week` in `year`, ascending.
pub fn days_in_week(year: i32, week: u32) -> Result<Vec<NaiveDate>> {
    if !(1..=MAX_WEEK).contains(&week) {
        return Err(Error::InvalidPeriod(format!(
            "week must be from 1 to {}, got {}",
            MAX_WEEK, week
        )));
    }
    let first = first_day_of_year(year)?;
    let start = first
        .checked_add_days(Days::new(u64::from((week - 1) * DAYS_PER_WEEK)))
        .ok_or_else(|| Error::InvalidPeriod(format!("week {} of {} is out of range", week, year)))?;

    let days: Vec<NaiveDate> = (0..u64::from(DAYS_PER_WEEK))
        .map_while(|offset| start.checked_add_days(Days::new(offset)))
        .take_while(|d| d.year() == year)
        .collect();

    if days.is_empty() {
        return Err(Error::InvalidPeriod(format!("year {} has no week {}", year, week)));
    }
    Ok(days)
}

/// All days of `month` in `year`, ascending.
pub fn days_in_month(year: i32, month: u32) -> Result<Vec<NaiveDate>> {
    if !(1..=12).contains(&month) {
        return Err(Error::InvalidPeriod(format!(
            "month must be from 1 to 12, got {}",
            month
        )));
    }
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| Error::InvalidPeriod(format!("{:04}-{:02} is out of range", year, month)))?;

    Ok((0..31u64)
        .map_while(|offset| first.checked_add_days(Days::new(offset)))
        .take_while(|d| d.month() == month)
        .collect())
}
