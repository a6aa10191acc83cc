use chrono::{Datelike, Days, Months, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Rate};
use crate::errors::{Result, ServicingError};

/// day count convention for interest calculations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DayCountConvention {
    /// actual days / 365
    Actual365,
    /// actual days / actual days in year (handles leap years)
    ActualActual,
    /// 30 days per period / 365
    Thirty365,
    /// 30 days per period / 360
    Thirty360,
    /// actual days / 360
    Actual360,
}

impl DayCountConvention {
    /// get year basis for the convention
    pub fn year_basis(&self, date: NaiveDate) -> u32 {
        match self {
            DayCountConvention::Actual365 | DayCountConvention::Thirty365 => 365,
            DayCountConvention::Actual360 | DayCountConvention::Thirty360 => 360,
            DayCountConvention::ActualActual => days_in_year(date.year()),
        }
    }

    /// days charged for an accrual window
    pub fn interest_days(&self, actual_days: i64) -> i64 {
        match self {
            DayCountConvention::Thirty365 | DayCountConvention::Thirty360 => 30,
            _ => actual_days,
        }
    }

    /// interest earned on principal in one day
    pub fn per_day_interest(&self, principal: Money, rate: Rate, date: NaiveDate) -> Decimal {
        principal.as_decimal() * rate.as_decimal() / Decimal::from(self.year_basis(date))
    }

    /// unrounded interest for a window of days
    pub fn interest_for_days(&self, principal: Money, rate: Rate, days: i64, date: NaiveDate) -> Money {
        if days <= 0 {
            return Money::ZERO;
        }
        let per_day = self.per_day_interest(principal, rate, date);
        Money::from_decimal(per_day * Decimal::from(self.interest_days(days)))
    }
}

impl Default for DayCountConvention {
    fn default() -> Self {
        DayCountConvention::ActualActual
    }
}

/// check if year is a leap year
pub fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}

pub fn days_in_year(year: i32) -> u32 {
    if is_leap_year(year) {
        366
    } else {
        365
    }
}

/// signed day difference, later minus earlier
pub fn date_diff(later: NaiveDate, earlier: NaiveDate) -> i64 {
    (later - earlier).num_days()
}

pub fn add_days(date: NaiveDate, days: i64) -> Result<NaiveDate> {
    let shifted = if days >= 0 {
        date.checked_add_days(Days::new(days as u64))
    } else {
        date.checked_sub_days(Days::new(days.unsigned_abs()))
    };
    shifted.ok_or_else(|| overflow(date))
}

/// add months, clamping the day to the target month end
pub fn add_months(date: NaiveDate, months: u32) -> Result<NaiveDate> {
    date.checked_add_months(Months::new(months))
        .ok_or_else(|| overflow(date))
}

pub fn sub_months(date: NaiveDate, months: u32) -> Result<NaiveDate> {
    date.checked_sub_months(Months::new(months))
        .ok_or_else(|| overflow(date))
}

pub fn last_day_of_month(date: NaiveDate) -> Result<NaiveDate> {
    let first = NaiveDate::from_ymd_opt(date.year(), date.month(), 1).ok_or_else(|| overflow(date))?;
    let next_first = add_months(first, 1)?;
    next_first.pred_opt().ok_or_else(|| overflow(date))
}

pub fn is_last_day_of_month(date: NaiveDate) -> bool {
    date.succ_opt().map_or(true, |next| next.month() != date.month())
}

/// next installment date, month ends stay on month ends
pub fn add_single_month(date: NaiveDate) -> Result<NaiveDate> {
    if is_last_day_of_month(date) {
        last_day_of_month(add_months(date, 1)?)
    } else {
        add_months(date, 1)
    }
}

/// first repayment date for cycle-date schedules
pub fn cyclic_date(posting_date: NaiveDate, cyclic_day: u32, min_days_to_first_repayment: u32) -> Result<NaiveDate> {
    let cyclic = add_days(last_day_of_month(posting_date)?, i64::from(cyclic_day))?;

    if date_diff(cyclic, posting_date) < i64::from(min_days_to_first_repayment) {
        add_days(last_day_of_month(cyclic)?, i64::from(cyclic_day))
    } else {
        Ok(cyclic)
    }
}

fn overflow(date: NaiveDate) -> ServicingError {
    ServicingError::CalculationError {
        message: format!("date arithmetic overflow from {}", date),
    }
}
