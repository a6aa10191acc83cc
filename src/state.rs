use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{CompanyPolicy, OffsetLogic};
use crate::decimal::{Money, Rate};
use crate::types::{
    Applicant, DocStatus, LoanId, LoanStatus, RepaymentMethod, ScheduleType,
};

/// drawing limit of a line of credit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditLimit {
    pub maximum_limit_amount: Money,
    pub available_limit_amount: Money,
    pub utilized_limit_amount: Money,
    pub limit_applicable_start: NaiveDate,
    pub limit_applicable_end: NaiveDate,
}

impl CreditLimit {
    pub fn new(maximum: Money, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            maximum_limit_amount: maximum,
            available_limit_amount: maximum,
            utilized_limit_amount: Money::ZERO,
            limit_applicable_start: start,
            limit_applicable_end: end,
        }
    }

    pub fn covers(&self, date: NaiveDate) -> bool {
        date >= self.limit_applicable_start && date <= self.limit_applicable_end
    }

    /// move amount from available to utilized
    pub fn utilize(&mut self, amount: Money) {
        self.available_limit_amount -= amount;
        self.utilized_limit_amount += amount;
    }

    /// move amount from utilized back to available
    pub fn restore(&mut self, amount: Money) {
        self.available_limit_amount += amount;
        self.utilized_limit_amount -= amount;
    }
}

/// loan application handed to submit_loan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanApplication {
    pub applicant: Applicant,
    pub loan_product: String,
    pub loan_amount: Money,
    pub posting_date: NaiveDate,
    /// product rate when none
    pub rate_of_interest: Option<Rate>,
    pub is_secured_loan: bool,
    pub repayment_method: RepaymentMethod,
    pub repayment_periods: Option<u32>,
    pub monthly_repayment_amount: Option<Money>,
    pub repayment_start_date: Option<NaiveDate>,
    /// product schedule type when none
    pub repayment_schedule_type: Option<ScheduleType>,
    pub loan_partner: Option<String>,
    pub limit_applicable_start: Option<NaiveDate>,
    pub limit_applicable_end: Option<NaiveDate>,
}

impl LoanApplication {
    /// term loan repaid over a number of periods
    pub fn term_loan(
        applicant: Applicant,
        loan_product: &str,
        loan_amount: Money,
        repayment_periods: u32,
        posting_date: NaiveDate,
    ) -> Self {
        Self {
            applicant,
            loan_product: loan_product.to_string(),
            loan_amount,
            posting_date,
            rate_of_interest: None,
            is_secured_loan: false,
            repayment_method: RepaymentMethod::RepayOverNumberOfPeriods,
            repayment_periods: Some(repayment_periods),
            monthly_repayment_amount: None,
            repayment_start_date: None,
            repayment_schedule_type: None,
            loan_partner: None,
            limit_applicable_start: None,
            limit_applicable_end: None,
        }
    }

    /// demand loan without a schedule
    pub fn demand_loan(
        applicant: Applicant,
        loan_product: &str,
        loan_amount: Money,
        posting_date: NaiveDate,
    ) -> Self {
        Self {
            repayment_periods: None,
            ..Self::term_loan(applicant, loan_product, loan_amount, 0, posting_date)
        }
    }

    pub fn with_repayment_start_date(mut self, date: NaiveDate) -> Self {
        self.repayment_start_date = Some(date);
        self
    }

    pub fn with_loan_partner(mut self, partner: &str) -> Self {
        self.loan_partner = Some(partner.to_string());
        self
    }

    pub fn secured(mut self) -> Self {
        self.is_secured_loan = true;
        self
    }
}

/// booked loan and its running counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Loan {
    pub id: LoanId,
    pub applicant: Applicant,
    pub loan_product: String,
    pub loan_partner: Option<String>,
    pub posting_date: NaiveDate,
    pub docstatus: DocStatus,
    pub status: LoanStatus,

    // terms
    pub loan_amount: Money,
    pub rate_of_interest: Rate,
    pub penalty_interest_rate: Rate,
    pub is_term_loan: bool,
    pub is_secured_loan: bool,
    pub repayment_schedule_type: ScheduleType,
    pub repayment_method: RepaymentMethod,
    pub repayment_periods: Option<u32>,
    pub monthly_repayment_amount: Money,
    pub repayment_start_date: Option<NaiveDate>,
    pub credit_limit: Option<CreditLimit>,

    // flags
    pub is_npa: bool,
    pub manual_npa: bool,
    pub unmark_npa: bool,
    pub freeze_account: bool,
    pub freeze_date: Option<NaiveDate>,
    pub fldg_triggered: bool,

    // counters
    pub total_payment: Money,
    pub total_principal_paid: Money,
    pub total_interest_payable: Money,
    pub total_amount_paid: Money,
    pub disbursed_amount: Money,
    pub written_off_amount: Money,
    pub debit_adjustment_amount: Money,
    pub credit_adjustment_amount: Money,
    pub refund_amount: Money,
    pub shortfall_amount: Money,
    pub available_security_deposit: Money,

    // delinquency
    pub days_past_due: u32,
    pub classification_code: Option<String>,
    pub classification_name: Option<String>,
    pub watch_period_end_date: Option<NaiveDate>,
    pub restructure_count: u32,

    /// last batch job failure
    pub last_error: Option<String>,
}

impl Loan {
    /// create new loan from an application
    pub fn new(
        application: &LoanApplication,
        rate_of_interest: Rate,
        penalty_interest_rate: Rate,
        is_term_loan: bool,
        repayment_schedule_type: ScheduleType,
    ) -> Self {
        let credit_limit = match (
            repayment_schedule_type,
            application.limit_applicable_start,
            application.limit_applicable_end,
        ) {
            (ScheduleType::LineOfCredit, Some(start), Some(end)) => {
                Some(CreditLimit::new(application.loan_amount, start, end))
            }
            _ => None,
        };

        Self {
            id: Uuid::new_v4(),
            applicant: application.applicant.clone(),
            loan_product: application.loan_product.clone(),
            loan_partner: application.loan_partner.clone(),
            posting_date: application.posting_date,
            docstatus: DocStatus::Draft,
            status: LoanStatus::Sanctioned,
            loan_amount: application.loan_amount,
            rate_of_interest,
            penalty_interest_rate,
            is_term_loan,
            is_secured_loan: application.is_secured_loan,
            repayment_schedule_type,
            repayment_method: application.repayment_method,
            repayment_periods: application.repayment_periods,
            monthly_repayment_amount: application.monthly_repayment_amount.unwrap_or(Money::ZERO),
            repayment_start_date: application.repayment_start_date,
            credit_limit,
            is_npa: false,
            manual_npa: false,
            unmark_npa: false,
            freeze_account: false,
            freeze_date: None,
            fldg_triggered: false,
            total_payment: Money::ZERO,
            total_principal_paid: Money::ZERO,
            total_interest_payable: Money::ZERO,
            total_amount_paid: Money::ZERO,
            disbursed_amount: Money::ZERO,
            written_off_amount: Money::ZERO,
            debit_adjustment_amount: Money::ZERO,
            credit_adjustment_amount: Money::ZERO,
            refund_amount: Money::ZERO,
            shortfall_amount: Money::ZERO,
            available_security_deposit: Money::ZERO,
            days_past_due: 0,
            classification_code: None,
            classification_name: None,
            watch_period_end_date: None,
            restructure_count: 0,
            last_error: None,
        }
    }

    /// principal still owed by the borrower
    pub fn pending_principal_amount(&self) -> Money {
        let adjustments = self.debit_adjustment_amount - self.credit_adjustment_amount
            - self.total_principal_paid
            - self.written_off_amount
            + self.refund_amount;

        if self.disbursed_amount >= self.loan_amount
            || matches!(self.status, LoanStatus::Disbursed | LoanStatus::Closed)
        {
            self.total_payment - self.total_interest_payable + adjustments
        } else {
            self.disbursed_amount + adjustments
        }
    }

    pub fn is_line_of_credit(&self) -> bool {
        self.repayment_schedule_type == ScheduleType::LineOfCredit
    }

    /// amortizes against a repayment schedule
    pub fn is_scheduled(&self) -> bool {
        self.is_term_loan && !self.is_line_of_credit()
    }

    /// last date anything may be booked for, given a requested date
    pub fn servicing_cutoff(&self, date: NaiveDate) -> NaiveDate {
        match self.freeze_date {
            Some(freeze_date) if self.freeze_account && date > freeze_date => freeze_date,
            _ => date,
        }
    }

    /// true when nothing may be booked after the given date
    pub fn is_frozen_after(&self, date: NaiveDate) -> bool {
        self.freeze_account && self.freeze_date.map_or(false, |freeze| date > freeze)
    }

    /// true while a restructure watch period is running
    pub fn in_watch_period(&self, date: NaiveDate) -> bool {
        self.watch_period_end_date.map_or(false, |end| date < end)
    }

    /// whether collections follow the sub-standard sequence
    pub fn is_sub_standard(&self, policy: &CompanyPolicy) -> bool {
        match policy.collection_offset_logic_based_on {
            OffsetLogic::NpaFlag => self.is_npa || self.manual_npa,
            OffsetLogic::DaysPastDue => self.days_past_due > policy.days_past_due_threshold,
        }
    }

    /// update status and hand back the old one
    pub fn update_status(&mut self, status: LoanStatus) -> LoanStatus {
        std::mem::replace(&mut self.status, status)
    }
}

/// loan terms a restructure replaces and may need to put back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanTerms {
    pub loan_amount: Money,
    pub rate_of_interest: Rate,
    pub repayment_method: RepaymentMethod,
    pub repayment_periods: Option<u32>,
    pub monthly_repayment_amount: Money,
    pub repayment_start_date: Option<NaiveDate>,
    pub total_payment: Money,
    pub total_interest_payable: Money,
    pub total_principal_paid: Money,
    pub total_amount_paid: Money,
    pub restructure_count: u32,
    pub is_npa: bool,
    pub manual_npa: bool,
    pub days_past_due: u32,
    pub watch_period_end_date: Option<NaiveDate>,
}

impl LoanTerms {
    pub fn capture(loan: &Loan) -> Self {
        Self {
            loan_amount: loan.loan_amount,
            rate_of_interest: loan.rate_of_interest,
            repayment_method: loan.repayment_method,
            repayment_periods: loan.repayment_periods,
            monthly_repayment_amount: loan.monthly_repayment_amount,
            repayment_start_date: loan.repayment_start_date,
            total_payment: loan.total_payment,
            total_interest_payable: loan.total_interest_payable,
            total_principal_paid: loan.total_principal_paid,
            total_amount_paid: loan.total_amount_paid,
            restructure_count: loan.restructure_count,
            is_npa: loan.is_npa,
            manual_npa: loan.manual_npa,
            days_past_due: loan.days_past_due,
            watch_period_end_date: loan.watch_period_end_date,
        }
    }

    pub fn restore(&self, loan: &mut Loan) {
        loan.loan_amount = self.loan_amount;
        loan.rate_of_interest = self.rate_of_interest;
        loan.repayment_method = self.repayment_method;
        loan.repayment_periods = self.repayment_periods;
        loan.monthly_repayment_amount = self.monthly_repayment_amount;
        loan.repayment_start_date = self.repayment_start_date;
        loan.total_payment = self.total_payment;
        loan.total_interest_payable = self.total_interest_payable;
        loan.total_principal_paid = self.total_principal_paid;
        loan.total_amount_paid = self.total_amount_paid;
        loan.restructure_count = self.restructure_count;
        loan.is_npa = self.is_npa;
        loan.manual_npa = self.manual_npa;
        loan.days_past_due = self.days_past_due;
        loan.watch_period_end_date = self.watch_period_end_date;
    }
}

/// state snapshot for audit trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanSnapshot {
    pub snapshot_id: Uuid,
    pub loan_id: LoanId,
    pub posting_date: NaiveDate,
    pub state: Loan,
    pub trigger: String,
}

impl LoanSnapshot {
    pub fn capture(loan: &Loan, posting_date: NaiveDate, trigger: String) -> Self {
        Self {
            snapshot_id: Uuid::new_v4(),
            loan_id: loan.id,
            posting_date,
            state: loan.clone(),
            trigger,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn term_loan() -> Loan {
        let application = LoanApplication::term_loan(
            Applicant::Customer("CUST-0001".to_string()),
            "Term Loan",
            Money::from_major(280_000),
            20,
            date(2024, 1, 1),
        );
        Loan::new(
            &application,
            Rate::from_percent(dec!(8.4)),
            Rate::from_percentage(25),
            true,
            ScheduleType::MonthlyAsPerRepaymentStartDate,
        )
    }

    #[test]
    fn test_pending_principal_fully_disbursed() {
        let mut loan = term_loan();
        loan.disbursed_amount = Money::from_major(280_000);
        loan.total_payment = Money::from_major(301_034);
        loan.total_interest_payable = Money::from_major(21_034);
        loan.total_principal_paid = Money::from_major(13_092);

        assert_eq!(loan.pending_principal_amount(), Money::from_major(266_908));

        loan.written_off_amount = Money::from_major(266_908);
        assert_eq!(loan.pending_principal_amount(), Money::ZERO);
    }

    #[test]
    fn test_pending_principal_partially_disbursed() {
        let mut loan = term_loan();
        loan.status = LoanStatus::PartiallyDisbursed;
        loan.disbursed_amount = Money::from_major(100_000);
        loan.total_payment = Money::from_major(107_000);
        loan.total_interest_payable = Money::from_major(7_000);
        loan.total_principal_paid = Money::from_major(10_000);
        loan.refund_amount = Money::from_major(500);

        assert_eq!(loan.pending_principal_amount(), Money::from_major(90_500));
    }

    #[test]
    fn test_freeze_and_watch_period() {
        let mut loan = term_loan();
        assert!(!loan.is_frozen_after(date(2024, 5, 1)));

        loan.freeze_account = true;
        loan.freeze_date = Some(date(2024, 4, 1));
        assert!(loan.is_frozen_after(date(2024, 5, 1)));
        assert!(!loan.is_frozen_after(date(2024, 4, 1)));

        loan.watch_period_end_date = Some(date(2024, 10, 1));
        assert!(loan.in_watch_period(date(2024, 9, 30)));
        assert!(!loan.in_watch_period(date(2024, 10, 1)));
    }

    #[test]
    fn test_sub_standard_selection() {
        let mut policy = CompanyPolicy::standard("_Test Company");
        let mut loan = term_loan();
        assert!(!loan.is_sub_standard(&policy));

        loan.manual_npa = true;
        assert!(loan.is_sub_standard(&policy));

        policy.collection_offset_logic_based_on = OffsetLogic::DaysPastDue;
        loan.days_past_due = 90;
        assert!(!loan.is_sub_standard(&policy));
        loan.days_past_due = 91;
        assert!(loan.is_sub_standard(&policy));
    }

    #[test]
    fn test_terms_restore() {
        let mut loan = term_loan();
        loan.total_payment = Money::from_major(301_034);
        let terms = LoanTerms::capture(&loan);

        loan.loan_amount = Money::from_major(150_000);
        loan.total_payment = Money::from_major(160_000);
        loan.restructure_count = 1;
        terms.restore(&mut loan);

        assert_eq!(loan.loan_amount, Money::from_major(280_000));
        assert_eq!(loan.total_payment, Money::from_major(301_034));
        assert_eq!(loan.restructure_count, 0);
    }
}
