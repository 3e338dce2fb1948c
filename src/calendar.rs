//! Gregorian to Ethiopian calendar conversion, and the dual-calendar dates
//! stamped onto every card.
//!
//! The Ethiopian calendar has twelve 30-day months followed by Pagume, a
//! 5-day month that gets a sixth day in leap years. A year `y` is a leap year
//! when `y % 4 == 3`, which lines the Ethiopian new year (Meskerem 1) up with
//! September 11 or 12 in the Gregorian calendar.

use std::{fmt, str::FromStr};

use chrono::{Datelike as _, Months, NaiveDate};
use schemars::JsonSchema;
use serde::Serialize;

use crate::prelude::*;

/// Day number of Meskerem 1, year 1 (Amete Mihret), counted the same way as
/// [`NaiveDate::num_days_from_ce`] (so 0001-01-01 Gregorian is day 1).
const ETHIOPIAN_EPOCH: i32 = 2796;

/// Number of days in a four-year Ethiopian leap cycle.
const DAYS_PER_CYCLE: i32 = 1461;

/// A date in the Ethiopian calendar.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, JsonSchema)]
pub struct EthiopianDate {
    year: i32,
    month: u32,
    day: u32,
}

impl EthiopianDate {
    /// Create a new Ethiopian date, checking that the day exists.
    pub fn new(year: i32, month: u32, day: u32) -> Result<Self> {
        if !(1..=13).contains(&month) {
            return Err(anyhow!("invalid Ethiopian month {month}"));
        }
        if day < 1 || day > days_in_month(year, month) {
            return Err(anyhow!(
                "invalid day {day} for Ethiopian month {month} of year {year}"
            ));
        }
        Ok(Self { year, month, day })
    }

    /// Convert a Gregorian date to the Ethiopian calendar.
    pub fn from_gregorian(date: NaiveDate) -> Self {
        let n = date.num_days_from_ce() - ETHIOPIAN_EPOCH;
        let year = (4 * n + 1463).div_euclid(DAYS_PER_CYCLE);
        let day_of_year = n - year_start_offset(year);
        // `day_of_year` is always in 0..366 here, so these casts are lossless.
        Self {
            year,
            month: (day_of_year / 30 + 1) as u32,
            day: (day_of_year % 30 + 1) as u32,
        }
    }

    /// Convert back to the Gregorian calendar. Returns `None` only for dates
    /// outside the range `chrono` can represent.
    pub fn to_gregorian(&self) -> Option<NaiveDate> {
        let days = ETHIOPIAN_EPOCH
            + year_start_offset(self.year)
            + 30 * (self.month as i32 - 1)
            + self.day as i32
            - 1;
        NaiveDate::from_num_days_from_ce_opt(days)
    }

    /// Shift this date by a whole number of years, keeping the month and day.
    /// Pagume 6 becomes Pagume 5 when the target year is not a leap year.
    pub fn plus_years(&self, years: i32) -> Self {
        let year = self.year + years;
        let day = self.day.min(days_in_month(year, self.month));
        Self {
            year,
            month: self.month,
            day,
        }
    }
}

impl FromStr for EthiopianDate {
    type Err = anyhow::Error;

    /// Parse `DD/MM/YYYY`.
    fn from_str(s: &str) -> Result<Self> {
        let parts = s.trim().split('/').collect::<Vec<_>>();
        let [day, month, year] = parts.as_slice() else {
            return Err(anyhow!("expected an Ethiopian date as DD/MM/YYYY, got {s:?}"));
        };
        let bad = || format!("invalid Ethiopian date {s:?}");
        Self::new(
            year.parse().with_context(bad)?,
            month.parse().with_context(bad)?,
            day.parse().with_context(bad)?,
        )
    }
}

impl fmt::Display for EthiopianDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}/{:02}/{}", self.day, self.month, self.year)
    }
}

/// Is this Ethiopian year a leap year?
pub fn is_ethiopian_leap_year(year: i32) -> bool {
    year.rem_euclid(4) == 3
}

fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1..=12 => 30,
        13 if is_ethiopian_leap_year(year) => 6,
        13 => 5,
        _ => 0,
    }
}

/// Days from the epoch to Meskerem 1 of `year`.
fn year_start_offset(year: i32) -> i32 {
    365 * (year - 1) + year.div_euclid(4)
}

/// A date rendered in both calendars. Both halves always come from the same
/// originating Gregorian date, so the only ways to build one are
/// [`DualDate::from_gregorian`] and [`DualDate::plus_years`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, JsonSchema)]
pub struct DualDate {
    gregorian: NaiveDate,
    ethiopian: EthiopianDate,
}

impl DualDate {
    pub fn from_gregorian(gregorian: NaiveDate) -> Self {
        Self {
            gregorian,
            ethiopian: EthiopianDate::from_gregorian(gregorian),
        }
    }

    /// Move both halves forward by the same number of calendar years. Each
    /// half is shifted within its own calendar, so an 8-year expiry is exactly
    /// 8 years from the issue date on both sides of the stamp.
    pub fn plus_years(&self, years: u32) -> Result<Self> {
        let gregorian = self
            .gregorian
            .checked_add_months(Months::new(years * 12))
            .ok_or_else(|| anyhow!("date {} + {years} years overflows", self.gregorian))?;
        let years = i32::try_from(years).context("year offset too large")?;
        Ok(Self {
            gregorian,
            ethiopian: self.ethiopian.plus_years(years),
        })
    }

    /// The Gregorian half as `DD/MM/YYYY`.
    pub fn gregorian_text(&self) -> String {
        self.gregorian.format("%d/%m/%Y").to_string()
    }

    /// The Ethiopian half as `DD/MM/YYYY`.
    pub fn ethiopian_text(&self) -> String {
        self.ethiopian.to_string()
    }

    /// Both halves as `"<gregorian> | <ethiopian>"`.
    pub fn combined_text(&self) -> String {
        format!("{} | {}", self.gregorian_text(), self.ethiopian_text())
    }
}

/// Issue and expiry dates for one card.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, JsonSchema)]
pub struct CardValidity {
    pub issued: DualDate,
    pub expires: DualDate,
}

impl CardValidity {
    pub fn starting(issued_on: NaiveDate, validity_years: u32) -> Result<Self> {
        let issued = DualDate::from_gregorian(issued_on);
        let expires = issued.plus_years(validity_years)?;
        Ok(Self { issued, expires })
    }
}
