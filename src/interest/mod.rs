pub mod accrual;
pub mod day_count;
pub mod penalty;

use chrono::NaiveDate;

use crate::config::{AccountRole, LoanProduct};
use crate::decimal::{Money, Rate};
use crate::errors::Result;
use crate::ledger::GlPair;
use crate::types::{DemandSubtype, InterestType};

pub use accrual::AccrualEngine;
pub use day_count::DayCountConvention;
pub use penalty::{PenaltyEngine, PenaltyLine};

/// interest computed for one accrual window
#[derive(Debug, Clone, PartialEq)]
pub struct InterestCalculation {
    pub interest_amount: Money,
    pub base_amount: Money,
    pub rate: Rate,
    pub start_date: NaiveDate,
    pub days: i64,
}

/// ledger roles one kind of interest income is booked against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncomeAccounts {
    pub receivable: AccountRole,
    pub income: AccountRole,
    pub suspense_receivable: AccountRole,
    pub suspense_income: AccountRole,
}

impl IncomeAccounts {
    pub const NORMAL: IncomeAccounts = IncomeAccounts {
        receivable: AccountRole::InterestReceivable,
        income: AccountRole::InterestIncome,
        suspense_receivable: AccountRole::SuspenseInterestReceivable,
        suspense_income: AccountRole::SuspenseInterestIncome,
    };

    pub const PENAL: IncomeAccounts = IncomeAccounts {
        receivable: AccountRole::PenaltyReceivable,
        income: AccountRole::PenaltyIncome,
        suspense_receivable: AccountRole::SuspensePenaltyReceivable,
        suspense_income: AccountRole::SuspensePenaltyIncome,
    };

    pub const ADDITIONAL: IncomeAccounts = IncomeAccounts {
        receivable: AccountRole::AdditionalInterestReceivable,
        income: AccountRole::AdditionalInterestIncome,
        suspense_receivable: AccountRole::SuspenseInterestReceivable,
        suspense_income: AccountRole::SuspenseInterestIncome,
    };

    pub fn for_interest_type(interest_type: InterestType) -> Self {
        match interest_type {
            InterestType::NormalInterest => Self::NORMAL,
            InterestType::PenalInterest => Self::PENAL,
        }
    }

    /// accounts behind a demand subtype, none for principal and charges
    pub fn for_subtype(subtype: &DemandSubtype) -> Option<Self> {
        match subtype {
            DemandSubtype::Interest => Some(Self::NORMAL),
            DemandSubtype::Penalty => Some(Self::PENAL),
            DemandSubtype::AdditionalInterest => Some(Self::ADDITIONAL),
            DemandSubtype::Principal | DemandSubtype::Charge(_) => None,
        }
    }

    /// receivable and income booked for a new accrual
    pub fn booking(&self, in_suspense: bool) -> (AccountRole, AccountRole) {
        if in_suspense {
            (self.suspense_receivable, self.suspense_income)
        } else {
            (self.receivable, self.income)
        }
    }

    /// accrual posting: dr receivable, cr income
    pub fn accrual_pair(
        &self,
        product: &LoanProduct,
        amount: Money,
        in_suspense: bool,
        remarks: &str,
    ) -> Result<GlPair> {
        let (receivable, income) = self.booking(in_suspense);
        Ok(GlPair::new(
            product.account(receivable)?,
            product.account(income)?,
            amount,
            remarks,
        ))
    }

    /// move recognized income and its receivable into suspense
    pub fn suspense_pairs(&self, product: &LoanProduct, amount: Money) -> Result<Vec<GlPair>> {
        Ok(vec![
            GlPair::new(
                product.account(self.suspense_receivable)?,
                product.account(self.receivable)?,
                amount,
                "interest moved to suspense",
            ),
            GlPair::new(
                product.account(self.income)?,
                product.account(self.suspense_income)?,
                amount,
                "interest moved to suspense",
            ),
        ])
    }

    /// bring suspended income back, the mirror of suspense_pairs
    pub fn release_pairs(&self, product: &LoanProduct, amount: Money) -> Result<Vec<GlPair>> {
        Ok(vec![
            GlPair::new(
                product.account(self.receivable)?,
                product.account(self.suspense_receivable)?,
                amount,
                "interest released from suspense",
            ),
            GlPair::new(
                product.account(self.suspense_income)?,
                product.account(self.income)?,
                amount,
                "interest released from suspense",
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScheduleType;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_subtype_accounts() {
        assert_eq!(IncomeAccounts::for_subtype(&DemandSubtype::Interest), Some(IncomeAccounts::NORMAL));
        assert_eq!(IncomeAccounts::for_subtype(&DemandSubtype::Penalty), Some(IncomeAccounts::PENAL));
        assert_eq!(IncomeAccounts::for_subtype(&DemandSubtype::Principal), None);
        assert_eq!(IncomeAccounts::for_subtype(&DemandSubtype::Charge("Processing Fee".to_string())), None);
        assert_eq!(
            IncomeAccounts::NORMAL.booking(true),
            (AccountRole::SuspenseInterestReceivable, AccountRole::SuspenseInterestIncome)
        );
    }

    #[test]
    fn test_suspense_round_trip_pairs() {
        let product = LoanProduct::term_loan("Term Loan", Rate::from_percentage(10), ScheduleType::MonthlyAsPerRepaymentStartDate);
        let into = IncomeAccounts::NORMAL.suspense_pairs(&product, Money::from_major(100)).unwrap();
        let back = IncomeAccounts::NORMAL.release_pairs(&product, Money::from_major(100)).unwrap();

        assert_eq!(into.len(), 2);
        for (moved, released) in into.iter().zip(back.iter()) {
            assert_eq!(moved.debit_account, released.credit_account);
            assert_eq!(moved.credit_account, released.debit_account);
        }
    }
}
