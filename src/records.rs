use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::{Money, Rate};
use crate::state::LoanTerms;
use crate::types::{
    AccrualId, AccrualType, DemandId, DemandSubtype, DemandType, DisbursementId, DocStatus,
    InterestType, LoanId, LoanStatus, RepaymentId, RepaymentMethod, RepaymentType,
    RestructureId, RestructureStatus, RestructureType, ScheduleId, ScheduleStatus, ScheduleType,
    Treatment,
};

/// one installment of a repayment schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRow {
    pub idx: u32,
    pub payment_date: NaiveDate,
    pub number_of_days: i64,
    pub principal_amount: Money,
    pub interest_amount: Money,
    pub total_payment: Money,
    pub balance_loan_amount: Money,
    pub demand_generated: bool,
}

impl ScheduleRow {
    /// balance before this installment
    pub fn opening_balance(&self) -> Money {
        self.balance_loan_amount + self.principal_amount
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepaymentSchedule {
    pub id: ScheduleId,
    pub loan: LoanId,
    pub status: ScheduleStatus,
    pub posting_date: NaiveDate,
    pub repayment_start_date: NaiveDate,
    pub loan_amount: Money,
    pub rate_of_interest: Rate,
    pub schedule_type: ScheduleType,
    pub repayment_method: RepaymentMethod,
    pub repayment_periods: u32,
    pub monthly_repayment_amount: Money,
    /// interest added to the first installment on restructure
    pub adjusted_interest: Money,
    pub loan_disbursement: Option<DisbursementId>,
    pub loan_restructure: Option<RestructureId>,
    pub rows: Vec<ScheduleRow>,
}

impl RepaymentSchedule {
    pub fn total_payment(&self) -> Money {
        self.rows.iter().map(|row| row.total_payment).sum()
    }

    pub fn total_interest(&self) -> Money {
        self.rows.iter().map(|row| row.interest_amount).sum()
    }

    pub fn total_principal(&self) -> Money {
        self.rows.iter().map(|row| row.principal_amount).sum()
    }

    /// rows already turned into demands
    pub fn completed_tenure(&self) -> u32 {
        self.rows.iter().filter(|row| row.demand_generated).count() as u32
    }
}

/// charge collected on a disbursement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisbursementCharge {
    pub charge: String,
    pub amount: Money,
    pub sales_invoice: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disbursement {
    pub id: DisbursementId,
    pub against_loan: LoanId,
    pub disbursement_date: NaiveDate,
    pub posting_date: NaiveDate,
    pub disbursed_amount: Money,
    pub withhold_security_deposit: bool,
    pub security_deposit_withheld: Money,
    pub charges: Vec<DisbursementCharge>,
    pub docstatus: DocStatus,
    pub status_before: LoanStatus,
    pub schedule: Option<ScheduleId>,
    pub replaced_schedule: Option<ScheduleId>,
    pub total_payment_before: Money,
    pub total_interest_payable_before: Money,
    pub monthly_repayment_amount_before: Money,
}

/// a dated unit of collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Demand {
    pub id: DemandId,
    pub loan: LoanId,
    pub demand_date: NaiveDate,
    pub demand_type: DemandType,
    pub demand_subtype: DemandSubtype,
    pub demand_amount: Money,
    pub paid_amount: Money,
    pub waived_amount: Money,
    pub outstanding_amount: Money,
    pub repayment_schedule: Option<ScheduleId>,
    pub repayment_schedule_detail: Option<u32>,
    pub loan_disbursement: Option<DisbursementId>,
    pub loan_repayment: Option<RepaymentId>,
    pub interest_accrual: Option<AccrualId>,
    pub sales_invoice: Option<String>,
    pub docstatus: DocStatus,
}

impl Demand {
    pub fn new(
        loan: LoanId,
        demand_date: NaiveDate,
        demand_type: DemandType,
        demand_subtype: DemandSubtype,
        demand_amount: Money,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            loan,
            demand_date,
            demand_type,
            demand_subtype,
            demand_amount,
            paid_amount: Money::ZERO,
            waived_amount: Money::ZERO,
            outstanding_amount: demand_amount,
            repayment_schedule: None,
            repayment_schedule_detail: None,
            loan_disbursement: None,
            loan_repayment: None,
            interest_accrual: None,
            sales_invoice: None,
            docstatus: DocStatus::Submitted,
        }
    }

    pub fn is_submitted(&self) -> bool {
        self.docstatus == DocStatus::Submitted
    }

    /// settle part of the demand
    pub fn settle(&mut self, amount: Money, waiver: bool) {
        if waiver {
            self.waived_amount += amount;
        } else {
            self.paid_amount += amount;
        }
        self.outstanding_amount = self.demand_amount - self.paid_amount - self.waived_amount;
    }

    /// undo a settlement
    pub fn unsettle(&mut self, amount: Money, waiver: bool) {
        self.settle(-amount, waiver);
    }
}

/// interest earned between two dates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterestAccrual {
    pub id: AccrualId,
    pub loan: LoanId,
    pub posting_date: NaiveDate,
    pub start_date: NaiveDate,
    pub last_accrual_date: Option<NaiveDate>,
    pub interest_type: InterestType,
    pub accrual_type: AccrualType,
    pub base_amount: Money,
    pub rate_of_interest: Rate,
    pub interest_amount: Money,
    pub additional_interest_amount: Money,
    pub payable_principal_amount: Money,
    pub paid_interest_amount: Money,
    pub paid_additional_interest_amount: Money,
    pub paid_principal_amount: Money,
    pub loan_demand: Option<DemandId>,
    pub loan_repayment_schedule: Option<ScheduleId>,
    pub schedule_row: Option<u32>,
    pub loan_repayment: Option<RepaymentId>,
    /// booked while the loan was npa
    pub is_npa: bool,
    /// income currently parked in suspense
    pub in_suspense: bool,
    pub docstatus: DocStatus,
}

impl InterestAccrual {
    pub fn new(
        loan: LoanId,
        posting_date: NaiveDate,
        start_date: NaiveDate,
        interest_type: InterestType,
        accrual_type: AccrualType,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            loan,
            posting_date,
            start_date,
            last_accrual_date: None,
            interest_type,
            accrual_type,
            base_amount: Money::ZERO,
            rate_of_interest: Rate::ZERO,
            interest_amount: Money::ZERO,
            additional_interest_amount: Money::ZERO,
            payable_principal_amount: Money::ZERO,
            paid_interest_amount: Money::ZERO,
            paid_additional_interest_amount: Money::ZERO,
            paid_principal_amount: Money::ZERO,
            loan_demand: None,
            loan_repayment_schedule: None,
            schedule_row: None,
            loan_repayment: None,
            is_npa: false,
            in_suspense: false,
            docstatus: DocStatus::Submitted,
        }
    }

    pub fn is_submitted(&self) -> bool {
        self.docstatus == DocStatus::Submitted
    }

    pub fn unpaid_interest(&self) -> Money {
        self.interest_amount - self.paid_interest_amount
    }

    pub fn unpaid_additional_interest(&self) -> Money {
        self.additional_interest_amount - self.paid_additional_interest_amount
    }
}

/// row of a repayment touching one demand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepaymentDetail {
    pub demand: DemandId,
    pub interest_accrual: Option<AccrualId>,
    pub demand_type: DemandType,
    pub demand_subtype: DemandSubtype,
    pub paid_amount: Money,
    /// interest income released from suspense by this row
    pub unsuspended: bool,
}

/// charge invoice settled by a repayment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingCharge {
    pub sales_invoice: String,
    pub allocated_amount: Money,
}

/// return invoice raised against a charge invoice when the charge is waived
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditNote {
    pub id: Uuid,
    pub loan: LoanId,
    pub repayment: RepaymentId,
    pub posting_date: NaiveDate,
    /// the sales invoice being returned
    pub return_against: String,
    pub qty: i32,
    pub rate: Money,
    pub docstatus: DocStatus,
}

impl CreditNote {
    pub fn against(loan: LoanId, repayment: RepaymentId, posting_date: NaiveDate, charge: &PendingCharge) -> Self {
        Self {
            id: Uuid::new_v4(),
            loan,
            repayment,
            posting_date,
            return_against: charge.sales_invoice.clone(),
            qty: -1,
            rate: charge.allocated_amount,
            docstatus: DocStatus::Submitted,
        }
    }

    pub fn grand_total(&self) -> Money {
        self.rate * rust_decimal::Decimal::from(self.qty)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repayment {
    pub id: RepaymentId,
    pub against_loan: LoanId,
    pub posting_date: NaiveDate,
    pub amount_paid: Money,
    pub repayment_type: RepaymentType,
    pub docstatus: DocStatus,

    // payable snapshot
    pub pending_principal_amount: Money,
    pub interest_payable: Money,
    pub penalty_amount: Money,
    pub payable_principal_amount: Money,

    // allocation
    pub principal_amount_paid: Money,
    pub total_interest_paid: Money,
    pub total_penalty_paid: Money,
    pub total_paid_charges: Money,
    pub shortfall_paid: Money,
    pub excess_principal_paid: Money,
    pub offset_based_on_npa: bool,
    pub repayment_details: Vec<RepaymentDetail>,
    pub pending_charges: Vec<PendingCharge>,

    /// accruals and demands booked inline for this repayment
    pub ad_hoc_accruals: Vec<AccrualId>,
    pub ad_hoc_demands: Vec<DemandId>,
    /// penal accruals reversed for a back-dated term loan repayment
    pub reversed_accruals: Vec<AccrualId>,
    pub reversed_demands: Vec<DemandId>,

    pub days_past_due_before: u32,
    pub status_before: LoanStatus,
    pub loan_restructure: Option<RestructureId>,
}

impl Repayment {
    pub fn new(
        against_loan: LoanId,
        posting_date: NaiveDate,
        amount_paid: Money,
        repayment_type: RepaymentType,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            against_loan,
            posting_date,
            amount_paid,
            repayment_type,
            docstatus: DocStatus::Draft,
            pending_principal_amount: Money::ZERO,
            interest_payable: Money::ZERO,
            penalty_amount: Money::ZERO,
            payable_principal_amount: Money::ZERO,
            principal_amount_paid: Money::ZERO,
            total_interest_paid: Money::ZERO,
            total_penalty_paid: Money::ZERO,
            total_paid_charges: Money::ZERO,
            shortfall_paid: Money::ZERO,
            excess_principal_paid: Money::ZERO,
            offset_based_on_npa: true,
            repayment_details: Vec::new(),
            pending_charges: Vec::new(),
            ad_hoc_accruals: Vec::new(),
            ad_hoc_demands: Vec::new(),
            reversed_accruals: Vec::new(),
            reversed_demands: Vec::new(),
            days_past_due_before: 0,
            status_before: LoanStatus::Disbursed,
            loan_restructure: None,
        }
    }

    pub fn is_submitted(&self) -> bool {
        self.docstatus == DocStatus::Submitted
    }
}

/// caller input for restructure_loan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestructureRequest {
    pub restructure_date: NaiveDate,
    pub restructure_type: RestructureType,
    pub interest_waiver_amount: Money,
    pub unaccrued_interest_waiver: Money,
    pub penalty_waiver_amount: Money,
    pub other_charges_waiver: Money,
    pub treatment_of_normal_interest: Treatment,
    pub unaccrued_interest_treatment: Treatment,
    pub treatment_of_penal_interest: Treatment,
    pub treatment_of_other_charges: Treatment,
    pub new_rate_of_interest: Option<Rate>,
    pub new_repayment_method: RepaymentMethod,
    pub new_repayment_period_in_months: Option<u32>,
    pub new_monthly_repayment_amount: Option<Money>,
    pub repayment_start_date: NaiveDate,
}

impl RestructureRequest {
    /// plain rescheduling with every component capitalized
    pub fn new(
        restructure_date: NaiveDate,
        repayment_start_date: NaiveDate,
        new_repayment_period_in_months: u32,
    ) -> Self {
        Self {
            restructure_date,
            restructure_type: RestructureType::NormalRestructure,
            interest_waiver_amount: Money::ZERO,
            unaccrued_interest_waiver: Money::ZERO,
            penalty_waiver_amount: Money::ZERO,
            other_charges_waiver: Money::ZERO,
            treatment_of_normal_interest: Treatment::Capitalize,
            unaccrued_interest_treatment: Treatment::Capitalize,
            treatment_of_penal_interest: Treatment::Capitalize,
            treatment_of_other_charges: Treatment::Capitalize,
            new_rate_of_interest: None,
            new_repayment_method: RepaymentMethod::RepayOverNumberOfPeriods,
            new_repayment_period_in_months: Some(new_repayment_period_in_months),
            new_monthly_repayment_amount: None,
            repayment_start_date,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Restructure {
    pub id: RestructureId,
    pub loan: LoanId,
    pub request: RestructureRequest,
    pub status: RestructureStatus,

    // overdue snapshot
    pub pending_principal_amount: Money,
    pub principal_overdue: Money,
    pub interest_overdue: Money,
    pub penalty_overdue: Money,
    pub charges_overdue: Money,
    pub unaccrued_interest: Money,
    pub available_security_deposit: Money,

    // security deposit allocation
    pub principal_adjusted: Money,
    pub interest_adjusted: Money,
    pub penalty_adjusted: Money,

    // balances after adjustment and waiver
    pub balance_interest: Money,
    pub balance_unaccrued_interest: Money,
    pub balance_penalty: Money,
    pub balance_charges: Money,

    pub new_loan_amount: Money,
    pub new_rate_of_interest: Rate,
    pub new_monthly_repayment_amount: Money,
    pub adjusted_interest: Money,
    pub completed_tenure: u32,

    pub old_schedule: Option<ScheduleId>,
    pub new_schedule: Option<ScheduleId>,
    pub previous_terms: LoanTerms,
    /// the applicant's other open loans, as they stood before approval
    pub sibling_npa: Vec<NpaState>,
    pub applicant_npa_before: Option<bool>,
    pub repayments: Vec<RepaymentId>,
    pub accruals: Vec<AccrualId>,
}

/// npa flags of a loan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpaState {
    pub loan: LoanId,
    pub is_npa: bool,
    pub manual_npa: bool,
    pub watch_period_end_date: Option<NaiveDate>,
}

impl NpaState {
    pub fn capture(loan: &crate::state::Loan) -> Self {
        Self {
            loan: loan.id,
            is_npa: loan.is_npa,
            manual_npa: loan.manual_npa,
            watch_period_end_date: loan.watch_period_end_date,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteOff {
    pub id: Uuid,
    pub loan: LoanId,
    pub posting_date: NaiveDate,
    pub write_off_amount: Money,
    pub write_off_account: String,
    pub docstatus: DocStatus,
    pub status_before: LoanStatus,
    /// waiver repayments booked to clear dues
    pub waivers: Vec<RepaymentId>,
    /// suspense interest written off with the loan
    pub suspense_written_off: Money,
    pub demands: Vec<DemandId>,
}
