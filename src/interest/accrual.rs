use chrono::NaiveDate;
use tracing::debug;

use crate::config::Catalog;
use crate::decimal::Money;
use crate::errors::{Result, ServicingError};
use crate::events::Event;
use crate::interest::day_count::{add_days, date_diff};
use crate::interest::{IncomeAccounts, InterestCalculation};
use crate::ledger::VoucherType;
use crate::records::{Demand, InterestAccrual, RepaymentSchedule};
use crate::state::Loan;
use crate::store::LoanBook;
use crate::types::{AccrualId, AccrualType, DemandSubtype, DemandType, InterestType, LoanId, ScheduleId};

/// books normal interest accruals
pub struct AccrualEngine<'a> {
    catalog: &'a Catalog,
}

impl<'a> AccrualEngine<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// book normal interest for a loan up to the posting date
    pub fn accrue_interest(
        &self,
        book: &mut LoanBook,
        loan_id: LoanId,
        posting_date: NaiveDate,
        accrual_type: AccrualType,
    ) -> Result<Vec<AccrualId>> {
        let loan = book.loan(loan_id)?.clone();
        let posting_date = loan.servicing_cutoff(posting_date);

        if loan.is_scheduled() {
            self.accrue_schedule_rows(book, &loan, posting_date, accrual_type)
        } else {
            Ok(self
                .accrue_demand_loan(book, &loan, posting_date, accrual_type)?
                .into_iter()
                .collect())
        }
    }

    /// posting date of the latest normal interest accrual
    pub fn last_accrual_date(&self, book: &LoanBook, loan_id: LoanId) -> Option<NaiveDate> {
        book.last_accrual(loan_id, InterestType::NormalInterest)
            .map(|accrual| accrual.posting_date)
    }

    /// first day not yet covered by a normal accrual
    pub fn window_start(&self, book: &LoanBook, loan_id: LoanId) -> Result<Option<NaiveDate>> {
        if let Some(last) = self.last_accrual_date(book, loan_id) {
            return add_days(last, 1).map(Some);
        }

        Ok(book
            .disbursements_of(loan_id)
            .first()
            .map(|disbursement| disbursement.disbursement_date))
    }

    /// interest on a base for an inclusive window of days
    pub fn calculate_accrual_amount(
        &self,
        loan: &Loan,
        base_amount: Money,
        start_date: NaiveDate,
        posting_date: NaiveDate,
    ) -> InterestCalculation {
        let days = date_diff(posting_date, start_date) + 1;
        let interest_amount = self
            .catalog
            .policy
            .day_count_convention
            .interest_for_days(base_amount, loan.rate_of_interest, days, posting_date)
            .round_currency();

        InterestCalculation {
            interest_amount,
            base_amount,
            rate: loan.rate_of_interest,
            start_date,
            days,
        }
    }

    fn accrue_demand_loan(
        &self,
        book: &mut LoanBook,
        loan: &Loan,
        posting_date: NaiveDate,
        accrual_type: AccrualType,
    ) -> Result<Option<AccrualId>> {
        let start_date = match self.window_start(book, loan.id)? {
            Some(start_date) if start_date <= posting_date => start_date,
            _ => return Ok(None),
        };

        let calculation =
            self.calculate_accrual_amount(loan, loan.pending_principal_amount(), start_date, posting_date);
        if !calculation.interest_amount.is_positive() {
            return Ok(None);
        }

        let mut accrual = InterestAccrual::new(
            loan.id,
            posting_date,
            start_date,
            InterestType::NormalInterest,
            accrual_type,
        );
        accrual.last_accrual_date = self.last_accrual_date(book, loan.id);
        accrual.base_amount = calculation.base_amount;
        accrual.rate_of_interest = calculation.rate;
        accrual.interest_amount = calculation.interest_amount;

        self.book_accrual(book, loan, accrual, Some(DemandType::Normal)).map(Some)
    }

    fn accrue_schedule_rows(
        &self,
        book: &mut LoanBook,
        loan: &Loan,
        posting_date: NaiveDate,
        accrual_type: AccrualType,
    ) -> Result<Vec<AccrualId>> {
        let schedule = match book.active_schedule(loan.id) {
            Some(schedule) => schedule.clone(),
            None => return Ok(Vec::new()),
        };

        let mut booked = Vec::new();
        // demanded rows were accrued before their demand
        for row in schedule
            .rows
            .iter()
            .filter(|row| row.payment_date <= posting_date && !row.demand_generated)
        {
            if let Some(id) = self.accrue_schedule_row(book, loan, &schedule, row.idx, accrual_type)? {
                booked.push(id);
            }
        }
        Ok(booked)
    }

    /// book the interest of one installment, once
    pub fn accrue_schedule_row(
        &self,
        book: &mut LoanBook,
        loan: &Loan,
        schedule: &RepaymentSchedule,
        idx: u32,
        accrual_type: AccrualType,
    ) -> Result<Option<AccrualId>> {
        let row = schedule
            .rows
            .get(idx as usize)
            .ok_or_else(|| ServicingError::CalculationError {
                message: format!("schedule {} has no row {}", schedule.id, idx),
            })?;

        if self.row_accrual(book, loan.id, schedule.id, idx, row.payment_date).is_some() {
            return Ok(None);
        }

        // interest already booked inline by a prepayment inside this period
        let booked_inline = self.inline_accruals(book, loan.id, schedule.id, idx);

        let start_date = match idx.checked_sub(1).and_then(|prev| schedule.rows.get(prev as usize)) {
            Some(previous) => add_days(previous.payment_date, 1)?,
            None => schedule.posting_date,
        };

        let mut accrual = InterestAccrual::new(
            loan.id,
            row.payment_date,
            start_date,
            InterestType::NormalInterest,
            accrual_type,
        );
        accrual.last_accrual_date = self.last_accrual_date(book, loan.id);
        accrual.base_amount = row.opening_balance();
        accrual.rate_of_interest = schedule.rate_of_interest;
        accrual.interest_amount = (row.interest_amount - booked_inline).non_negative();
        accrual.payable_principal_amount = row.principal_amount;
        accrual.loan_repayment_schedule = Some(schedule.id);
        accrual.schedule_row = Some(idx);

        self.book_accrual(book, loan, accrual, None).map(Some)
    }

    /// the regular accrual booked for an installment
    pub fn row_accrual(
        &self,
        book: &LoanBook,
        loan_id: LoanId,
        schedule_id: ScheduleId,
        idx: u32,
        payment_date: NaiveDate,
    ) -> Option<AccrualId> {
        book.accruals_of(loan_id)
            .into_iter()
            .find(|accrual| {
                accrual.interest_type == InterestType::NormalInterest
                    && !is_inline(accrual.accrual_type)
                    && accrual.loan_repayment_schedule == Some(schedule_id)
                    && accrual.schedule_row == Some(idx)
                    && accrual.posting_date == payment_date
            })
            .map(|accrual| accrual.id)
    }

    fn inline_accruals(&self, book: &LoanBook, loan_id: LoanId, schedule_id: ScheduleId, idx: u32) -> Money {
        book.accruals_of(loan_id)
            .into_iter()
            .filter(|accrual| {
                accrual.interest_type == InterestType::NormalInterest
                    && is_inline(accrual.accrual_type)
                    && accrual.loan_repayment_schedule == Some(schedule_id)
                    && accrual.schedule_row == Some(idx)
            })
            .map(|accrual| accrual.interest_amount)
            .sum()
    }

    /// interest earned up to the date that no accrual covers yet
    pub fn unbooked_interest(
        &self,
        book: &LoanBook,
        loan_id: LoanId,
        posting_date: NaiveDate,
    ) -> Result<Money> {
        let loan = book.loan(loan_id)?;
        let posting_date = loan.servicing_cutoff(posting_date);

        if !loan.is_scheduled() {
            return Ok(match self.window_start(book, loan_id)? {
                Some(start_date) if start_date <= posting_date => {
                    self.calculate_accrual_amount(loan, loan.pending_principal_amount(), start_date, posting_date)
                        .interest_amount
                }
                _ => Money::ZERO,
            });
        }

        let schedule = match book.active_schedule(loan_id) {
            Some(schedule) => schedule,
            None => return Ok(Money::ZERO),
        };

        let mut unbooked = Money::ZERO;
        for row in schedule
            .rows
            .iter()
            .filter(|row| row.payment_date <= posting_date && !row.demand_generated)
        {
            if self.row_accrual(book, loan_id, schedule.id, row.idx, row.payment_date).is_none() {
                unbooked += (row.interest_amount - self.inline_accruals(book, loan_id, schedule.id, row.idx)).non_negative();
            }
        }

        Ok(unbooked + self.broken_period_interest(book, loan, schedule, posting_date)?.0)
    }

    /// interest of the running installment earned up to the date
    fn broken_period_interest(
        &self,
        book: &LoanBook,
        loan: &Loan,
        schedule: &RepaymentSchedule,
        posting_date: NaiveDate,
    ) -> Result<(Money, Option<u32>, Option<NaiveDate>)> {
        let next = match schedule.rows.iter().find(|row| row.payment_date > posting_date) {
            Some(next) => next,
            None => return Ok((Money::ZERO, None, None)),
        };

        let covered_until = match self.last_accrual_date(book, loan.id) {
            Some(last) => last,
            None => match book.disbursements_of(loan.id).first() {
                Some(disbursement) => disbursement.disbursement_date,
                None => return Ok((Money::ZERO, None, None)),
            },
        };
        if covered_until >= posting_date {
            return Ok((Money::ZERO, Some(next.idx), None));
        }

        let start_date = add_days(covered_until, 1)?;
        let remaining = (next.interest_amount - self.inline_accruals(book, loan.id, schedule.id, next.idx)).non_negative();
        let earned = self
            .calculate_accrual_amount(loan, loan.pending_principal_amount(), start_date, posting_date)
            .interest_amount
            .min(remaining);

        Ok((earned, Some(next.idx), Some(start_date)))
    }

    /// book interest earned up to the date with its demand, for collection or capitalization
    pub fn book_unbooked_interest(
        &self,
        book: &mut LoanBook,
        loan_id: LoanId,
        posting_date: NaiveDate,
        accrual_type: AccrualType,
    ) -> Result<Vec<AccrualId>> {
        let loan = book.loan(loan_id)?.clone();
        let posting_date = loan.servicing_cutoff(posting_date);

        if !loan.is_scheduled() {
            return Ok(self
                .accrue_demand_loan(book, &loan, posting_date, accrual_type)?
                .into_iter()
                .collect());
        }

        let schedule = match book.active_schedule(loan_id) {
            Some(schedule) => schedule.clone(),
            None => return Ok(Vec::new()),
        };

        let (earned, next_idx, start_date) =
            self.broken_period_interest(book, &loan, &schedule, posting_date)?;
        let (idx, start_date) = match (next_idx, start_date) {
            (Some(idx), Some(start_date)) if earned.is_positive() => (idx, start_date),
            _ => return Ok(Vec::new()),
        };

        let mut accrual = InterestAccrual::new(
            loan.id,
            posting_date,
            start_date,
            InterestType::NormalInterest,
            if is_inline(accrual_type) { accrual_type } else { AccrualType::Repayment },
        );
        accrual.last_accrual_date = self.last_accrual_date(book, loan.id);
        accrual.base_amount = loan.pending_principal_amount();
        accrual.rate_of_interest = loan.rate_of_interest;
        accrual.interest_amount = earned;
        accrual.loan_repayment_schedule = Some(schedule.id);
        accrual.schedule_row = Some(idx);

        Ok(vec![self.book_accrual(book, &loan, accrual, Some(DemandType::Normal))?])
    }

    /// persist an accrual, its ledger pair and optionally its demand
    fn book_accrual(
        &self,
        book: &mut LoanBook,
        loan: &Loan,
        mut accrual: InterestAccrual,
        demand_type: Option<DemandType>,
    ) -> Result<AccrualId> {
        let product = self.catalog.product(&loan.loan_product)?;
        let in_suspense = loan.is_npa || loan.manual_npa;
        accrual.is_npa = in_suspense;
        accrual.in_suspense = in_suspense;

        if let Some(demand_type) = demand_type {
            let mut demand = Demand::new(
                loan.id,
                accrual.posting_date,
                demand_type,
                DemandSubtype::Interest,
                accrual.interest_amount,
            );
            demand.interest_accrual = Some(accrual.id);
            demand.repayment_schedule = accrual.loan_repayment_schedule;
            accrual.loan_demand = Some(demand.id);

            debug!(loan = %loan.id, demand = %demand.id, amount = %demand.demand_amount, "interest demand raised");
            book.emit(Event::DemandRaised {
                loan_id: loan.id,
                demand_type,
                demand_subtype: DemandSubtype::Interest,
                amount: demand.demand_amount,
                demand_date: demand.demand_date,
            });
            book.demands.insert(demand.id, demand);
        }

        let pair = IncomeAccounts::NORMAL.accrual_pair(
            product,
            accrual.interest_amount,
            in_suspense,
            "interest accrued",
        )?;
        book.post(
            loan.id,
            accrual.posting_date,
            &self.catalog.cost_center(product),
            VoucherType::InterestAccrual,
            accrual.id,
            &[pair],
        )?;

        debug!(
            loan = %loan.id,
            posting_date = %accrual.posting_date,
            amount = %accrual.interest_amount,
            "normal interest accrued"
        );
        book.emit(Event::InterestAccrued {
            loan_id: loan.id,
            interest_type: InterestType::NormalInterest,
            amount: accrual.interest_amount,
            additional_interest: Money::ZERO,
            posting_date: accrual.posting_date,
        });

        let id = accrual.id;
        book.accruals.insert(id, accrual);
        Ok(id)
    }
}

/// booked off-cycle inside an installment period
fn is_inline(accrual_type: AccrualType) -> bool {
    matches!(accrual_type, AccrualType::Repayment | AccrualType::Restructure)
}
