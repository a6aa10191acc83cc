pub mod amortization;
pub mod repayment;
pub mod suspense;
pub mod waterfall;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::{AccountRole, Catalog};
use crate::decimal::Money;
use crate::errors::Result;
use crate::interest::{AccrualEngine, PenaltyEngine};
use crate::store::LoanBook;
use crate::types::{DemandFilter, LoanId, RepaymentType, RestructureId};

pub use amortization::{ScheduleBuilder, ScheduleTerms};
pub use repayment::RepaymentProcessor;
pub use suspense::SuspenseMover;
pub use waterfall::{Allocation, WaterfallAllocator};

/// repayment request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepaymentRequest {
    pub loan_id: LoanId,
    pub posting_date: NaiveDate,
    pub amount_paid: Money,
    pub repayment_type: RepaymentType,
    /// pick the collection sequence from the asset classification
    pub offset_based_on_npa: bool,
    /// narrower set of demands than the repayment type settles
    pub demand_filter: Option<DemandFilter>,
    pub loan_restructure: Option<RestructureId>,
    pub skip_classification: bool,
}

impl RepaymentRequest {
    pub fn new(loan_id: LoanId, posting_date: NaiveDate, amount_paid: Money, repayment_type: RepaymentType) -> Self {
        Self {
            loan_id,
            posting_date,
            amount_paid,
            repayment_type,
            offset_based_on_npa: true,
            demand_filter: None,
            loan_restructure: None,
            skip_classification: false,
        }
    }

    pub fn with_demand_filter(mut self, filter: DemandFilter) -> Self {
        self.demand_filter = Some(filter);
        self
    }

    /// component of a restructure, classification and closure are left to the restructure
    pub fn for_restructure(mut self, restructure: RestructureId) -> Self {
        self.loan_restructure = Some(restructure);
        self.skip_classification = true;
        self
    }

    pub fn demand_filter(&self) -> DemandFilter {
        self.demand_filter
            .unwrap_or_else(|| self.repayment_type.demand_filter())
    }
}

/// what a loan owes on a date
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PayableAmounts {
    pub pending_principal_amount: Money,
    /// principal demanded and unpaid
    pub payable_principal_amount: Money,
    pub interest_amount: Money,
    pub unbooked_interest: Money,
    pub penalty_amount: Money,
    pub unbooked_penalty: Money,
    pub charges_amount: Money,
}

impl PayableAmounts {
    pub fn interest_payable(&self) -> Money {
        self.interest_amount + self.unbooked_interest
    }

    pub fn penalty_payable(&self) -> Money {
        self.penalty_amount + self.unbooked_penalty
    }

    /// everything due today; interest not yet demanded waits for its installment
    pub fn payable_amount(&self) -> Money {
        self.payable_principal_amount + self.interest_amount + self.penalty_payable() + self.charges_amount
    }

    /// everything needed to close the loan today
    pub fn closure_amount(&self) -> Money {
        self.pending_principal_amount + self.interest_payable() + self.penalty_payable() + self.charges_amount
    }
}

/// dues of a loan on the posting date
pub fn calculate_amounts(
    catalog: &Catalog,
    book: &LoanBook,
    loan_id: LoanId,
    posting_date: NaiveDate,
) -> Result<PayableAmounts> {
    let loan = book.loan(loan_id)?;

    Ok(PayableAmounts {
        pending_principal_amount: loan.pending_principal_amount(),
        payable_principal_amount: book.outstanding(loan_id, posting_date, DemandFilter::Principal),
        interest_amount: book.outstanding(loan_id, posting_date, DemandFilter::Interest),
        unbooked_interest: AccrualEngine::new(catalog).unbooked_interest(book, loan_id, posting_date)?,
        penalty_amount: book.outstanding(loan_id, posting_date, DemandFilter::Penalty),
        unbooked_penalty: PenaltyEngine::new(catalog).unbooked_penalty(book, loan_id, posting_date)?,
        charges_amount: book.outstanding(loan_id, posting_date, DemandFilter::Charges),
    })
}

/// account debited for the collected side of a repayment
pub fn payment_account_role(repayment_type: RepaymentType) -> AccountRole {
    match repayment_type {
        RepaymentType::InterestWaiver => AccountRole::InterestWaiver,
        RepaymentType::PenaltyWaiver => AccountRole::PenaltyWaiver,
        RepaymentType::ChargesWaiver => AccountRole::ChargesWaiver,
        RepaymentType::PrincipalCapitalization
        | RepaymentType::InterestCapitalization
        | RepaymentType::PenaltyCapitalization
        | RepaymentType::ChargesCapitalization => AccountRole::LoanAccount,
        RepaymentType::PrincipalAdjustment
        | RepaymentType::InterestAdjustment
        | RepaymentType::SecurityDepositAdjustment => AccountRole::SecurityDeposit,
        RepaymentType::InterestCarryForward => AccountRole::InterestIncome,
        RepaymentType::NormalRepayment
        | RepaymentType::PrePayment
        | RepaymentType::AdvancePayment
        | RepaymentType::LoanClosure => AccountRole::PaymentAccount,
    }
}

/// repayment types drawn from the security deposit
pub fn draws_security_deposit(repayment_type: RepaymentType) -> bool {
    payment_account_role(repayment_type) == AccountRole::SecurityDeposit
}
