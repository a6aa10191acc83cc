use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::decimal::Money;

/// unique identifier for a loan
pub type LoanId = Uuid;
pub type ScheduleId = Uuid;
pub type DisbursementId = Uuid;
pub type DemandId = Uuid;
pub type AccrualId = Uuid;
pub type RepaymentId = Uuid;
pub type RestructureId = Uuid;
pub type WriteOffId = Uuid;

/// the party a loan is booked against
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Applicant {
    Customer(String),
    Employee(String),
    LoanPartner(String),
}

impl Applicant {
    /// party type as posted on ledger rows
    pub fn party_type(&self) -> &'static str {
        match self {
            Applicant::Customer(_) => "Customer",
            Applicant::Employee(_) => "Employee",
            Applicant::LoanPartner(_) => "Loan Partner",
        }
    }

    /// party identifier
    pub fn party(&self) -> &str {
        match self {
            Applicant::Customer(id) | Applicant::Employee(id) | Applicant::LoanPartner(id) => id,
        }
    }
}

impl fmt::Display for Applicant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.party_type(), self.party())
    }
}

/// submittable document state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocStatus {
    Draft,
    Submitted,
    Cancelled,
}

/// loan status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanStatus {
    /// booked, nothing disbursed yet
    Sanctioned,
    PartiallyDisbursed,
    Disbursed,
    /// line of credit in use
    Active,
    LoanClosureRequested,
    Closed,
    Cancelled,
    WrittenOff,
    /// settled with the borrower for less than dues
    Settled,
}

impl LoanStatus {
    /// loans picked up by the accrual and demand jobs
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            LoanStatus::Disbursed | LoanStatus::PartiallyDisbursed | LoanStatus::Active
        )
    }

    /// loans picked up by the classification job
    pub fn is_classifiable(&self) -> bool {
        matches!(
            self,
            LoanStatus::Disbursed
                | LoanStatus::PartiallyDisbursed
                | LoanStatus::Active
                | LoanStatus::WrittenOff
                | LoanStatus::Settled
        )
    }
}

/// how installment dates and day fractions are derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleType {
    MonthlyAsPerRepaymentStartDate,
    MonthlyAsPerCycleDate,
    ProRatedCalendarMonths,
    LineOfCredit,
}

/// amortization driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepaymentMethod {
    RepayOverNumberOfPeriods,
    RepayFixedAmountPerPeriod,
}

/// repayment schedule lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleStatus {
    Initiated,
    Active,
    Rejected,
    Restructured,
    Rescheduled,
    Outdated,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DemandType {
    Emi,
    Normal,
    Penalty,
    Charges,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DemandSubtype {
    Principal,
    Interest,
    Penalty,
    AdditionalInterest,
    /// charge item code
    Charge(String),
}

/// which group of demands an operation works on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DemandFilter {
    All,
    Principal,
    Interest,
    /// penalty and additional interest
    Penalty,
    Charges,
}

impl DemandFilter {
    pub fn matches(&self, demand_type: DemandType, subtype: &DemandSubtype) -> bool {
        match self {
            DemandFilter::All => true,
            DemandFilter::Principal => *subtype == DemandSubtype::Principal,
            DemandFilter::Interest => {
                *subtype == DemandSubtype::Interest && demand_type != DemandType::Penalty
            }
            DemandFilter::Penalty => matches!(
                subtype,
                DemandSubtype::Penalty | DemandSubtype::AdditionalInterest
            ),
            DemandFilter::Charges => demand_type == DemandType::Charges,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InterestType {
    NormalInterest,
    PenalInterest,
}

/// what caused an accrual to be booked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccrualType {
    Regular,
    Repayment,
    Disbursement,
    Restructure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepaymentType {
    NormalRepayment,
    PrePayment,
    AdvancePayment,
    LoanClosure,
    InterestWaiver,
    PenaltyWaiver,
    ChargesWaiver,
    PrincipalAdjustment,
    InterestAdjustment,
    InterestCapitalization,
    PrincipalCapitalization,
    ChargesCapitalization,
    PenaltyCapitalization,
    InterestCarryForward,
    SecurityDepositAdjustment,
}

impl RepaymentType {
    /// demands this repayment type may settle
    pub fn demand_filter(&self) -> DemandFilter {
        match self {
            RepaymentType::InterestWaiver
            | RepaymentType::InterestAdjustment
            | RepaymentType::InterestCapitalization
            | RepaymentType::InterestCarryForward => DemandFilter::Interest,
            RepaymentType::PenaltyWaiver | RepaymentType::PenaltyCapitalization => {
                DemandFilter::Penalty
            }
            RepaymentType::ChargesWaiver | RepaymentType::ChargesCapitalization => {
                DemandFilter::Charges
            }
            RepaymentType::PrincipalAdjustment | RepaymentType::PrincipalCapitalization => {
                DemandFilter::Principal
            }
            RepaymentType::NormalRepayment
            | RepaymentType::PrePayment
            | RepaymentType::AdvancePayment
            | RepaymentType::LoanClosure
            | RepaymentType::SecurityDepositAdjustment => DemandFilter::All,
        }
    }

    /// settles demands through waived_amount instead of paid_amount
    pub fn is_waiver(&self) -> bool {
        matches!(
            self,
            RepaymentType::InterestWaiver | RepaymentType::PenaltyWaiver | RepaymentType::ChargesWaiver
        )
    }

    /// cash or deposit actually collected from the borrower
    pub fn is_collection(&self) -> bool {
        matches!(
            self,
            RepaymentType::NormalRepayment
                | RepaymentType::PrePayment
                | RepaymentType::AdvancePayment
                | RepaymentType::LoanClosure
                | RepaymentType::SecurityDepositAdjustment
                | RepaymentType::PrincipalAdjustment
                | RepaymentType::InterestAdjustment
        )
    }

    /// a term loan may take more than the demanded amount
    pub fn allows_excess(&self) -> bool {
        matches!(
            self,
            RepaymentType::PrePayment | RepaymentType::AdvancePayment | RepaymentType::LoanClosure
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestructureType {
    NormalRestructure,
    PrePayment,
    AdvancePayment,
}

/// treatment of an overdue component on restructure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Treatment {
    Capitalize,
    AddToFirstEmi,
    Waive,
    CarryForward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestructureStatus {
    Draft,
    Initiated,
    Approved,
    Rejected,
    Cancelled,
}

/// payment split produced by the allocator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PaymentApplication {
    pub to_charges: Money,
    pub to_penalties: Money,
    pub to_interest: Money,
    pub to_principal: Money,
    pub excess: Money,
}

impl PaymentApplication {
    pub fn total_applied(&self) -> Money {
        self.to_charges + self.to_penalties + self.to_interest + self.to_principal
    }
}
