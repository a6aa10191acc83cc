use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use crate::decimal::{Money, Rate};
use crate::errors::{Result, ServicingError};
use crate::interest::day_count::{add_single_month, date_diff, is_last_day_of_month, last_day_of_month, sub_months};
use crate::records::{RepaymentSchedule, ScheduleRow};
use crate::types::{LoanId, RepaymentMethod, ScheduleStatus, ScheduleType};

/// upper bound on rows for fixed-amount schedules
const MAX_INSTALLMENTS: usize = 1200;

/// inputs of one schedule generation
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleTerms {
    pub loan_amount: Money,
    pub rate_of_interest: Rate,
    pub repayment_periods: Option<u32>,
    pub monthly_repayment_amount: Option<Money>,
    pub repayment_start_date: NaiveDate,
    pub posting_date: NaiveDate,
    /// interest added to the first installment
    pub adjusted_interest: Money,
    /// rows carried over from the replaced schedule
    pub completed_rows: Vec<ScheduleRow>,
}

/// amortization calculator
pub struct ScheduleBuilder {
    schedule_type: ScheduleType,
    method: RepaymentMethod,
}

impl ScheduleBuilder {
    pub fn new(schedule_type: ScheduleType, method: RepaymentMethod) -> Self {
        Self {
            schedule_type,
            method,
        }
    }

    /// generate a draft schedule for a loan
    pub fn build_schedule(&self, loan: LoanId, terms: &ScheduleTerms) -> Result<RepaymentSchedule> {
        let (rows, monthly_repayment_amount) = self.calculate_rows(terms)?;

        Ok(RepaymentSchedule {
            id: Uuid::new_v4(),
            loan,
            status: ScheduleStatus::Initiated,
            posting_date: terms.posting_date,
            repayment_start_date: terms.repayment_start_date,
            loan_amount: terms.loan_amount,
            rate_of_interest: terms.rate_of_interest,
            schedule_type: self.schedule_type,
            repayment_method: self.method,
            repayment_periods: rows.len() as u32,
            monthly_repayment_amount,
            adjusted_interest: terms.adjusted_interest,
            loan_disbursement: None,
            loan_restructure: None,
            rows,
        })
    }

    /// calculate installment rows and the emi used
    pub fn calculate_rows(&self, terms: &ScheduleTerms) -> Result<(Vec<ScheduleRow>, Money)> {
        if !terms.loan_amount.is_positive() {
            return Err(ServicingError::InvalidAmount {
                message: "schedule loan amount must be positive".to_string(),
            });
        }

        let completed = terms.completed_rows.len() as u32;
        let (tenure, emi) = match self.method {
            RepaymentMethod::RepayOverNumberOfPeriods => {
                let periods = terms
                    .repayment_periods
                    .filter(|periods| *periods > completed)
                    .ok_or_else(|| ServicingError::rejected("please enter repayment periods"))?;
                let remaining = periods - completed;
                let emi = calculate_emi_amount(terms.loan_amount, terms.rate_of_interest, remaining);
                (Some(periods as usize), emi)
            }
            RepaymentMethod::RepayFixedAmountPerPeriod => {
                let emi = terms
                    .monthly_repayment_amount
                    .filter(|amount| amount.is_positive())
                    .ok_or_else(|| ServicingError::rejected("please enter monthly repayment amount"))?;
                if emi > terms.loan_amount {
                    return Err(ServicingError::rejected(
                        "monthly repayment amount cannot be greater than loan amount",
                    ));
                }
                (None, emi)
            }
        };

        let mut rows = terms.completed_rows.clone();
        let mut balance = terms.loan_amount;
        let mut payment_date = terms.repayment_start_date;
        let mut carry_forward_interest = terms.adjusted_interest;

        while balance.is_positive() {
            if rows.len() >= MAX_INSTALLMENTS {
                return Err(ServicingError::CalculationError {
                    message: format!("repayment amount {} never clears the loan", emi),
                });
            }

            let (days, months) = self.days_and_months(payment_date, terms.posting_date, rows.len())?;
            if self.schedule_type == ScheduleType::ProRatedCalendarMonths {
                payment_date = last_day_of_month(payment_date)?;
            }

            let interest = (balance * terms.rate_of_interest.as_decimal() * Decimal::from(days)
                / Decimal::from(months))
            .round_currency();
            let mut interest_amount = interest + carry_forward_interest;
            carry_forward_interest = Money::ZERO;

            // interest beyond one installment rolls into the next row
            if interest_amount > emi {
                carry_forward_interest = interest_amount - emi;
                interest_amount = emi;
            }

            let mut principal_amount = emi - interest_amount;
            balance = (balance - principal_amount).round_currency();
            if balance.is_negative() {
                principal_amount += balance;
                balance = Money::ZERO;
            }

            rows.push(ScheduleRow {
                idx: rows.len() as u32,
                payment_date,
                number_of_days: days,
                principal_amount,
                interest_amount,
                total_payment: principal_amount + interest_amount,
                balance_loan_amount: balance,
                demand_generated: false,
            });

            if tenure.map_or(false, |tenure| rows.len() >= tenure) {
                if let Some(last) = rows.last_mut() {
                    last.principal_amount += balance;
                    last.interest_amount += carry_forward_interest;
                    last.total_payment = last.principal_amount + last.interest_amount;
                    last.balance_loan_amount = Money::ZERO;
                }
                balance = Money::ZERO;
            }

            payment_date = add_single_month(payment_date)?;
        }

        Ok((rows, emi))
    }

    /// interest day fraction of one period
    fn days_and_months(&self, payment_date: NaiveDate, posting_date: NaiveDate, row: usize) -> Result<(i64, i64)> {
        match self.schedule_type {
            ScheduleType::MonthlyAsPerRepaymentStartDate => Ok((1, 12)),
            ScheduleType::MonthlyAsPerCycleDate | ScheduleType::LineOfCredit => {
                let days = if row == 0 && payment_date > posting_date {
                    date_diff(payment_date, posting_date).min(date_diff(payment_date, sub_months(payment_date, 1)?))
                } else {
                    date_diff(payment_date, sub_months(payment_date, 1)?)
                };
                Ok((days, 365))
            }
            ScheduleType::ProRatedCalendarMonths => {
                // full months count as 30 days
                if is_last_day_of_month(payment_date) {
                    Ok((30, 365))
                } else {
                    Ok((date_diff(last_day_of_month(payment_date)?, payment_date), 365))
                }
            }
        }
    }
}

/// equated installment, rounded up to a whole unit
pub fn calculate_emi_amount(principal: Money, annual_rate: Rate, periods: u32) -> Money {
    if periods == 0 {
        return principal;
    }

    let monthly_rate = annual_rate.as_decimal() / dec!(12);

    if monthly_rate.is_zero() {
        return (principal / Decimal::from(periods)).ceil();
    }

    // EMI = P * r * (1 + r)^n / ((1 + r)^n - 1)
    let mut compound = Decimal::ONE;
    let base = Decimal::ONE + monthly_rate;
    for _ in 0..periods {
        compound *= base;
    }

    let numerator = principal.as_decimal() * monthly_rate * compound;
    let denominator = compound - Decimal::ONE;

    Money::from_decimal(numerator / denominator).ceil()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn terms(amount: i64, rate: Decimal, periods: u32, start: NaiveDate) -> ScheduleTerms {
        ScheduleTerms {
            loan_amount: Money::from_major(amount),
            rate_of_interest: Rate::from_percent(rate),
            repayment_periods: Some(periods),
            monthly_repayment_amount: None,
            repayment_start_date: start,
            posting_date: start,
            adjusted_interest: Money::ZERO,
            completed_rows: Vec::new(),
        }
    }

    #[test]
    fn test_emi_amount() {
        assert_eq!(calculate_emi_amount(Money::from_major(280_000), Rate::from_percent(dec!(8.4)), 20), Money::from_major(15_052));
        assert_eq!(calculate_emi_amount(Money::from_major(1_000), Rate::ZERO, 3), Money::from_major(334));
    }

    #[test]
    fn test_term_loan_amortization() {
        let builder = ScheduleBuilder::new(ScheduleType::MonthlyAsPerRepaymentStartDate, RepaymentMethod::RepayOverNumberOfPeriods);
        let schedule = builder
            .build_schedule(Uuid::new_v4(), &terms(280_000, dec!(8.4), 20, date(2024, 2, 1)))
            .unwrap();

        assert_eq!(schedule.monthly_repayment_amount, Money::from_major(15_052));
        assert_eq!(schedule.rows.len(), 20);

        let first = &schedule.rows[0];
        assert_eq!(first.interest_amount, Money::from_major(1_960));
        assert_eq!(first.principal_amount, Money::from_major(13_092));
        assert_eq!(first.balance_loan_amount, Money::from_major(266_908));

        let fourth = &schedule.rows[3];
        assert_eq!(fourth.principal_amount.round_dp(0), Money::from_major(13_369));
        assert_eq!(fourth.interest_amount.round_dp(0), Money::from_major(1_683));
        assert_eq!(fourth.balance_loan_amount.round_dp(0), Money::from_major(227_080));

        let last = &schedule.rows[19];
        assert_eq!(last.principal_amount.round_dp(0), Money::from_major(14_941));
        assert_eq!(last.interest_amount.round_dp(0), Money::from_major(105));
        assert_eq!(last.balance_loan_amount, Money::ZERO);

        assert_eq!(schedule.total_principal(), Money::from_major(280_000));
        assert_eq!(schedule.total_interest().round_dp(0), Money::from_major(21_034));
        assert_eq!(schedule.total_payment().round_dp(0), Money::from_major(301_034));
    }

    #[test]
    fn test_monthly_dates_from_start_date() {
        let builder = ScheduleBuilder::new(ScheduleType::MonthlyAsPerRepaymentStartDate, RepaymentMethod::RepayOverNumberOfPeriods);
        let (rows, _) = builder.calculate_rows(&terms(12_000, dec!(0), 12, date(2022, 10, 17))).unwrap();

        let dates: Vec<NaiveDate> = rows.iter().map(|row| row.payment_date).collect();
        assert_eq!(dates[0], date(2022, 10, 17));
        assert_eq!(dates[1], date(2022, 11, 17));
        assert_eq!(dates[11], date(2023, 9, 17));
        assert!(rows.iter().all(|row| row.principal_amount == Money::from_major(1_000)));
    }

    #[test]
    fn test_month_end_start_stays_on_month_end() {
        let builder = ScheduleBuilder::new(ScheduleType::MonthlyAsPerRepaymentStartDate, RepaymentMethod::RepayOverNumberOfPeriods);
        let (rows, _) = builder.calculate_rows(&terms(1_200_000, dec!(10), 12, date(2023, 1, 31))).unwrap();

        assert_eq!(rows[1].payment_date, date(2023, 2, 28));
        assert_eq!(rows[2].payment_date, date(2023, 3, 31));
        assert_eq!(rows[3].payment_date, date(2023, 4, 30));
    }

    #[test]
    fn test_pro_rated_first_period() {
        let builder = ScheduleBuilder::new(ScheduleType::ProRatedCalendarMonths, RepaymentMethod::RepayOverNumberOfPeriods);
        let (rows, _) = builder.calculate_rows(&terms(100_000, dec!(12), 6, date(2024, 1, 10))).unwrap();

        assert_eq!(rows[0].payment_date, date(2024, 1, 31));
        assert_eq!(rows[0].number_of_days, 21);
        assert_eq!(rows[1].payment_date, date(2024, 2, 29));
        assert_eq!(rows[1].number_of_days, 30);
        assert_eq!(rows.last().unwrap().balance_loan_amount, Money::ZERO);
    }

    #[test]
    fn test_cycle_date_uses_actual_days() {
        let builder = ScheduleBuilder::new(ScheduleType::MonthlyAsPerCycleDate, RepaymentMethod::RepayOverNumberOfPeriods);
        let mut cycle = terms(100_000, dec!(12), 3, date(2024, 2, 5));
        cycle.posting_date = date(2024, 1, 10);
        let (rows, _) = builder.calculate_rows(&cycle).unwrap();

        assert_eq!(rows[0].number_of_days, 26);
        assert_eq!(rows[1].number_of_days, 29);
        assert_eq!(rows[2].number_of_days, 31);
    }

    #[test]
    fn test_fixed_amount_infers_periods() {
        let builder = ScheduleBuilder::new(ScheduleType::MonthlyAsPerRepaymentStartDate, RepaymentMethod::RepayFixedAmountPerPeriod);
        let mut fixed = terms(10_000, dec!(12), 0, date(2024, 1, 1));
        fixed.repayment_periods = None;
        fixed.monthly_repayment_amount = Some(Money::from_major(3_000));

        let schedule = builder.build_schedule(Uuid::new_v4(), &fixed).unwrap();
        assert_eq!(schedule.repayment_periods, 4);
        assert_eq!(schedule.total_principal(), Money::from_major(10_000));
        assert_eq!(schedule.rows.last().unwrap().balance_loan_amount, Money::ZERO);
    }

    #[test]
    fn test_add_to_first_emi_interest() {
        let builder = ScheduleBuilder::new(ScheduleType::MonthlyAsPerRepaymentStartDate, RepaymentMethod::RepayOverNumberOfPeriods);
        let mut adjusted = terms(12_000, dec!(12), 12, date(2024, 1, 1));
        adjusted.adjusted_interest = Money::from_major(500);

        let (rows, emi) = builder.calculate_rows(&adjusted).unwrap();
        assert_eq!(rows[0].interest_amount, Money::from_major(620));
        assert_eq!(rows[0].principal_amount, emi - Money::from_major(620));
        let principal: Money = rows.iter().map(|row| row.principal_amount).sum();
        assert_eq!(principal, Money::from_major(12_000));
    }

    #[test]
    fn test_missing_periods_rejected() {
        let builder = ScheduleBuilder::new(ScheduleType::MonthlyAsPerRepaymentStartDate, RepaymentMethod::RepayOverNumberOfPeriods);
        let mut missing = terms(12_000, dec!(12), 0, date(2024, 1, 1));
        missing.repayment_periods = None;
        assert!(builder.calculate_rows(&missing).is_err());
    }
}
