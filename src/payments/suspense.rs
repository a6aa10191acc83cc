use chrono::NaiveDate;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Catalog;
use crate::decimal::Money;
use crate::errors::Result;
use crate::events::Event;
use crate::interest::{AccrualEngine, IncomeAccounts};
use crate::ledger::{GlPair, VoucherType};
use crate::records::InterestAccrual;
use crate::store::LoanBook;
use crate::types::{AccrualId, AccrualType, InterestType, LoanId};

/// moves unpaid interest income of npa loans in and out of suspense
pub struct SuspenseMover<'a> {
    catalog: &'a Catalog,
}

impl<'a> SuspenseMover<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// park unpaid income in suspense, returns the amount moved
    ///
    /// Interest already earned but not yet booked is accrued first. An npa loan books it
    /// straight to the suspense accounts; otherwise the shift below picks it up.
    pub fn move_to_suspense(&self, book: &mut LoanBook, loan_id: LoanId, posting_date: NaiveDate) -> Result<Money> {
        let booked = AccrualEngine::new(self.catalog).accrue_interest(book, loan_id, posting_date, AccrualType::Regular)?;
        let booked_in_suspense: Money = booked
            .iter()
            .filter_map(|id| book.accruals.get(id))
            .filter(|accrual| accrual.in_suspense)
            .map(|accrual| accrual.unpaid_interest())
            .sum();
        if booked_in_suspense.is_positive() {
            debug!(loan = %loan_id, amount = %booked_in_suspense, "unbooked interest accrued into suspense");
        }

        Ok(booked_in_suspense + self.shift(book, loan_id, posting_date, false)?)
    }

    /// recognize parked income again, returns the amount released
    pub fn release_from_suspense(&self, book: &mut LoanBook, loan_id: LoanId, posting_date: NaiveDate) -> Result<Money> {
        self.shift(book, loan_id, posting_date, true)
    }

    /// unpaid income currently parked for a loan
    pub fn suspended_amount(&self, book: &LoanBook, loan_id: LoanId) -> Money {
        self.suspended_portions(book, loan_id)
            .into_iter()
            .map(|(_, amount)| amount)
            .sum()
    }

    /// parked income grouped by the suspense accounts holding it
    pub fn suspended_portions(&self, book: &LoanBook, loan_id: LoanId) -> Vec<(IncomeAccounts, Money)> {
        let mut portions: Vec<(IncomeAccounts, Money)> = Vec::new();
        for accrual in book.accruals_of(loan_id).into_iter().filter(|accrual| accrual.in_suspense) {
            for (accounts, amount) in income_portions(accrual) {
                if !amount.is_positive() {
                    continue;
                }
                let held_in = |other: &IncomeAccounts| {
                    other.suspense_receivable == accounts.suspense_receivable
                        && other.suspense_income == accounts.suspense_income
                };
                match portions.iter_mut().find(|(other, _)| held_in(other)) {
                    Some((_, total)) => *total += amount,
                    None => portions.push((accounts, amount)),
                }
            }
        }
        portions
    }

    fn shift(&self, book: &mut LoanBook, loan_id: LoanId, posting_date: NaiveDate, release: bool) -> Result<Money> {
        let loan = book.loan(loan_id)?;
        let product = self.catalog.product(&loan.loan_product)?;

        let candidates: Vec<AccrualId> = book
            .accruals_of(loan_id)
            .into_iter()
            .filter(|accrual| accrual.in_suspense == release)
            .filter(|accrual| (accrual.unpaid_interest() + accrual.unpaid_additional_interest()).is_positive())
            .map(|accrual| accrual.id)
            .collect();

        let mut pairs: Vec<GlPair> = Vec::new();
        let mut moved = Money::ZERO;
        for id in candidates {
            let accrual = book.accrual_mut(id)?;
            for (accounts, amount) in income_portions(accrual) {
                if !amount.is_positive() {
                    continue;
                }
                moved += amount;
                pairs.extend(if release {
                    accounts.release_pairs(product, amount)?
                } else {
                    accounts.suspense_pairs(product, amount)?
                });
            }
            accrual.in_suspense = !release;
        }

        if moved.is_zero() {
            return Ok(Money::ZERO);
        }

        book.post(
            loan_id,
            posting_date,
            &self.catalog.cost_center(product),
            VoucherType::SuspenseMove,
            Uuid::new_v4(),
            &pairs,
        )?;

        info!(loan = %loan_id, amount = %moved, released = release, "suspense moved");
        book.emit(Event::SuspenseMoved {
            loan_id,
            amount: moved,
            reversed: release,
            posting_date,
        });
        Ok(moved)
    }
}

/// unpaid income of an accrual split by the accounts it was booked to
fn income_portions(accrual: &InterestAccrual) -> Vec<(IncomeAccounts, Money)> {
    match accrual.interest_type {
        InterestType::NormalInterest => vec![(IncomeAccounts::NORMAL, accrual.unpaid_interest())],
        InterestType::PenalInterest => vec![
            (IncomeAccounts::PENAL, accrual.unpaid_interest()),
            (IncomeAccounts::ADDITIONAL, accrual.unpaid_additional_interest()),
        ],
    }
}
