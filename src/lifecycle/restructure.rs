use chrono::NaiveDate;
use tracing::{debug, info};
use uuid::Uuid;

use crate::classification::ClassificationEngine;
use crate::config::Catalog;
use crate::decimal::Money;
use crate::demand::DemandGenerator;
use crate::errors::{Result, ServicingError};
use crate::events::Event;
use crate::interest::day_count::add_days;
use crate::interest::{AccrualEngine, PenaltyEngine};
use crate::payments::{
    calculate_amounts, RepaymentProcessor, RepaymentRequest, ScheduleBuilder, ScheduleTerms, SuspenseMover,
};
use crate::records::{NpaState, Restructure, RestructureRequest};
use crate::state::LoanTerms;
use crate::store::LoanBook;
use crate::types::{
    AccrualType, DemandFilter, DocStatus, LoanId, RepaymentType, RestructureId, RestructureStatus,
    RestructureType, ScheduleStatus, Treatment,
};

use super::check_future_entries;

/// reschedules delinquent loans on new terms
pub struct RestructureController<'a> {
    catalog: &'a Catalog,
}

impl<'a> RestructureController<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// snapshot the overdues, apply deposit and waivers, draft the new schedule
    pub fn initiate(&self, book: &mut LoanBook, loan_id: LoanId, request: &RestructureRequest) -> Result<RestructureId> {
        let loan = book.loan(loan_id)?.clone();
        let restructure_date = request.restructure_date;

        // validate
        if !loan.is_scheduled() {
            return Err(ServicingError::rejected("only term loans with a schedule can be restructured"));
        }
        if !loan.status.is_open() {
            return Err(ServicingError::InvalidLoanStatus {
                status: loan.status,
                message: "only running loans can be restructured".to_string(),
            });
        }
        if book
            .restructures
            .values()
            .any(|other| other.loan == loan_id && other.status == RestructureStatus::Initiated)
        {
            return Err(ServicingError::rejected("another restructure is already initiated for this loan"));
        }
        if let Some(last_due) = book.demands_of(loan_id).into_iter().map(|demand| demand.demand_date).max() {
            if restructure_date < last_due {
                return Err(ServicingError::InvalidDate {
                    message: format!("restructure date cannot be before last due date {}", last_due),
                });
            }
        }
        if request.repayment_start_date < restructure_date {
            return Err(ServicingError::InvalidDate {
                message: format!(
                    "repayment start date {} cannot be before restructure date {}",
                    request.repayment_start_date, restructure_date
                ),
            });
        }
        check_future_entries(book, loan_id, restructure_date)?;

        let old_schedule = book
            .active_schedule(loan_id)
            .cloned()
            .ok_or_else(|| ServicingError::rejected("loan has no active schedule"))?;

        // overdue snapshot
        let amounts = calculate_amounts(self.catalog, book, loan_id, restructure_date)?;
        let mut restructure = Restructure {
            id: Uuid::new_v4(),
            loan: loan_id,
            request: request.clone(),
            status: RestructureStatus::Initiated,
            pending_principal_amount: amounts.pending_principal_amount,
            principal_overdue: amounts.payable_principal_amount,
            interest_overdue: amounts.interest_amount,
            penalty_overdue: amounts.penalty_payable(),
            charges_overdue: amounts.charges_amount,
            unaccrued_interest: amounts.unbooked_interest,
            available_security_deposit: loan.available_security_deposit,
            principal_adjusted: Money::ZERO,
            interest_adjusted: Money::ZERO,
            penalty_adjusted: Money::ZERO,
            balance_interest: Money::ZERO,
            balance_unaccrued_interest: Money::ZERO,
            balance_penalty: Money::ZERO,
            balance_charges: Money::ZERO,
            new_loan_amount: Money::ZERO,
            new_rate_of_interest: request.new_rate_of_interest.unwrap_or(loan.rate_of_interest),
            new_monthly_repayment_amount: Money::ZERO,
            adjusted_interest: Money::ZERO,
            completed_tenure: old_schedule
                .rows
                .iter()
                .filter(|row| row.payment_date <= restructure_date)
                .count() as u32,
            old_schedule: Some(old_schedule.id),
            new_schedule: None,
            previous_terms: LoanTerms::capture(&loan),
            sibling_npa: Vec::new(),
            applicant_npa_before: None,
            repayments: Vec::new(),
            accruals: Vec::new(),
        };

        // deposit goes to principal, then interest, then penalty
        let mut deposit = restructure.available_security_deposit;
        for (overdue, adjusted) in [
            (restructure.principal_overdue, &mut restructure.principal_adjusted),
            (restructure.interest_overdue, &mut restructure.interest_adjusted),
            (restructure.penalty_overdue, &mut restructure.penalty_adjusted),
        ] {
            *adjusted = deposit.min(overdue).non_negative();
            deposit -= *adjusted;
        }

        for (component, overdue, waiver) in [
            ("Interest", restructure.interest_overdue - restructure.interest_adjusted, request.interest_waiver_amount),
            ("Unaccrued Interest", restructure.unaccrued_interest, request.unaccrued_interest_waiver),
            ("Penalty", restructure.penalty_overdue - restructure.penalty_adjusted, request.penalty_waiver_amount),
            ("Charges", restructure.charges_overdue, request.other_charges_waiver),
        ] {
            if waiver > overdue {
                return Err(ServicingError::WaiverExceedsOverdue {
                    component: component.to_string(),
                    overdue,
                    requested: waiver,
                });
            }
        }

        restructure.balance_interest =
            restructure.interest_overdue - restructure.interest_adjusted - request.interest_waiver_amount;
        restructure.balance_unaccrued_interest = restructure.unaccrued_interest - request.unaccrued_interest_waiver;
        restructure.balance_penalty =
            restructure.penalty_overdue - restructure.penalty_adjusted - request.penalty_waiver_amount;
        restructure.balance_charges = restructure.charges_overdue - request.other_charges_waiver;

        let mut new_loan_amount = restructure.pending_principal_amount - restructure.principal_adjusted;
        for (treatment, balance) in components(&restructure) {
            match treatment {
                Treatment::Capitalize => new_loan_amount += balance,
                Treatment::AddToFirstEmi | Treatment::CarryForward => restructure.adjusted_interest += balance,
                Treatment::Waive => {}
            }
        }
        if new_loan_amount > loan.disbursed_amount {
            return Err(ServicingError::rejected(format!(
                "new loan amount {} cannot be greater than disbursed amount {}",
                new_loan_amount, loan.disbursed_amount
            )));
        }
        restructure.new_loan_amount = new_loan_amount;

        let mut schedule = ScheduleBuilder::new(loan.repayment_schedule_type, request.new_repayment_method).build_schedule(
            loan_id,
            &ScheduleTerms {
                loan_amount: new_loan_amount,
                rate_of_interest: restructure.new_rate_of_interest,
                repayment_periods: request.new_repayment_period_in_months.or(loan.repayment_periods),
                monthly_repayment_amount: request.new_monthly_repayment_amount,
                repayment_start_date: request.repayment_start_date,
                posting_date: restructure_date,
                adjusted_interest: restructure.adjusted_interest,
                completed_rows: Vec::new(),
            },
        )?;
        schedule.loan_restructure = Some(restructure.id);
        restructure.new_schedule = Some(schedule.id);
        restructure.new_monthly_repayment_amount = schedule.monthly_repayment_amount;

        let restructure_id = restructure.id;
        info!(
            loan = %loan_id,
            restructure = %restructure_id,
            new_loan_amount = %new_loan_amount,
            emi = %schedule.monthly_repayment_amount,
            "restructure initiated"
        );
        book.emit(Event::RestructureStatusChanged {
            loan_id,
            restructure_id,
            status: RestructureStatus::Initiated,
            new_loan_amount,
            posting_date: restructure_date,
        });
        book.schedules.insert(schedule.id, schedule);
        book.restructures.insert(restructure_id, restructure);
        Ok(restructure_id)
    }

    /// settle the overdues by component and switch the loan to the new schedule
    pub fn approve(&self, book: &mut LoanBook, restructure_id: RestructureId) -> Result<()> {
        let mut restructure = self.expect_status(book, restructure_id, RestructureStatus::Initiated)?;
        let loan_id = restructure.loan;
        let request = restructure.request.clone();
        let restructure_date = request.restructure_date;
        restructure.previous_terms = LoanTerms::capture(book.loan(loan_id)?);
        let applicant = book.loan(loan_id)?.applicant.clone();
        restructure.applicant_npa_before = book.applicants_npa.get(&applicant).copied();
        restructure.sibling_npa = book
            .loans_of(&applicant)
            .into_iter()
            .filter(|id| *id != loan_id)
            .filter_map(|id| book.loans.get(&id))
            .filter(|loan| loan.status.is_open())
            .map(NpaState::capture)
            .collect();

        // bring every due component onto a demand
        DemandGenerator::new(self.catalog).generate_demands(book, loan_id, restructure_date)?;
        let mut accruals = AccrualEngine::new(self.catalog).book_unbooked_interest(
            book,
            loan_id,
            restructure_date,
            AccrualType::Restructure,
        )?;
        accruals.extend(PenaltyEngine::new(self.catalog).accrue_penal_interest(
            book,
            loan_id,
            restructure_date,
            AccrualType::Restructure,
        )?);
        restructure.accruals = accruals;

        let mut steps: Vec<(RepaymentType, Money, Option<DemandFilter>)> = vec![
            (RepaymentType::PrincipalAdjustment, restructure.principal_adjusted, None),
            (RepaymentType::InterestAdjustment, restructure.interest_adjusted, None),
            (RepaymentType::SecurityDepositAdjustment, restructure.penalty_adjusted, Some(DemandFilter::Penalty)),
            (RepaymentType::PenaltyWaiver, request.penalty_waiver_amount, None),
            (
                RepaymentType::InterestWaiver,
                request.interest_waiver_amount + request.unaccrued_interest_waiver,
                None,
            ),
            (RepaymentType::ChargesWaiver, request.other_charges_waiver, None),
        ];
        for ((treatment, balance), filter) in components(&restructure).into_iter().zip([
            DemandFilter::Interest,
            DemandFilter::Interest,
            DemandFilter::Penalty,
            DemandFilter::Charges,
        ]) {
            let step = match treatment {
                Treatment::Capitalize => (capitalization_type(filter), balance, None),
                Treatment::Waive => match RepaymentProcessor::waiver_type(filter) {
                    Some(waiver) => (waiver, balance, None),
                    None => continue,
                },
                Treatment::AddToFirstEmi | Treatment::CarryForward => {
                    (RepaymentType::InterestCarryForward, balance, Some(filter))
                }
            };
            steps.push(step);
        }

        let processor = RepaymentProcessor::new(self.catalog);
        for (repayment_type, amount, filter) in steps {
            if let Some(id) = self.post_component(book, &processor, &restructure, repayment_type, amount, filter)? {
                restructure.repayments.push(id);
            }
        }
        let principal_left = book.outstanding(loan_id, restructure_date, DemandFilter::Principal);
        if let Some(id) = self.post_component(
            book,
            &processor,
            &restructure,
            RepaymentType::PrincipalCapitalization,
            principal_left,
            None,
        )? {
            restructure.repayments.push(id);
        }

        // schedules
        let old_status = match request.restructure_type {
            RestructureType::NormalRestructure => ScheduleStatus::Restructured,
            RestructureType::PrePayment | RestructureType::AdvancePayment => ScheduleStatus::Rescheduled,
        };
        if let Some(old) = restructure.old_schedule {
            book.schedule_mut(old)?.status = old_status;
        }
        let new_schedule = match restructure.new_schedule {
            Some(id) => {
                let schedule = book.schedule_mut(id)?;
                schedule.status = ScheduleStatus::Active;
                schedule.clone()
            }
            None => return Err(ServicingError::rejected("restructure has no draft schedule")),
        };

        {
            let loan = book.loan_mut(loan_id)?;
            loan.loan_amount = restructure.new_loan_amount;
            loan.rate_of_interest = restructure.new_rate_of_interest;
            loan.repayment_method = request.new_repayment_method;
            loan.repayment_periods = Some(new_schedule.repayment_periods);
            loan.monthly_repayment_amount = new_schedule.monthly_repayment_amount;
            loan.repayment_start_date = Some(request.repayment_start_date);
            loan.total_payment = new_schedule.total_payment();
            loan.total_interest_payable = new_schedule.total_interest();
            loan.total_principal_paid = Money::ZERO;
            loan.total_amount_paid = Money::ZERO;
            loan.restructure_count += 1;
        }

        if request.restructure_type == RestructureType::NormalRestructure {
            ClassificationEngine::new(self.catalog).update_manual_npa(book, loan_id, true, restructure_date)?;

            let watch_period_end_date = add_days(
                restructure_date,
                i64::from(self.catalog.policy.watch_period_post_loan_restructure_in_days),
            )?;
            for id in book.loans_of(&applicant) {
                let loan = book.loan_mut(id)?;
                if id == loan_id || loan.status.is_open() {
                    loan.watch_period_end_date = Some(watch_period_end_date);
                }
            }
            book.loan_mut(loan_id)?.days_past_due = 0;
        }

        restructure.status = RestructureStatus::Approved;
        info!(
            loan = %loan_id,
            restructure = %restructure_id,
            components = restructure.repayments.len(),
            "restructure approved"
        );
        book.emit(Event::RestructureStatusChanged {
            loan_id,
            restructure_id,
            status: RestructureStatus::Approved,
            new_loan_amount: restructure.new_loan_amount,
            posting_date: restructure_date,
        });
        book.restructures.insert(restructure_id, restructure);
        book.snapshot(loan_id, restructure_date, "restructure approved".to_string())
    }

    /// drop an initiated restructure
    pub fn reject(&self, book: &mut LoanBook, restructure_id: RestructureId) -> Result<()> {
        let mut restructure = self.expect_status(book, restructure_id, RestructureStatus::Initiated)?;
        if let Some(schedule) = restructure.new_schedule {
            book.schedule_mut(schedule)?.status = ScheduleStatus::Rejected;
        }

        restructure.status = RestructureStatus::Rejected;
        info!(loan = %restructure.loan, restructure = %restructure_id, "restructure rejected");
        book.emit(Event::RestructureStatusChanged {
            loan_id: restructure.loan,
            restructure_id,
            status: RestructureStatus::Rejected,
            new_loan_amount: restructure.new_loan_amount,
            posting_date: restructure.request.restructure_date,
        });
        book.restructures.insert(restructure_id, restructure);
        Ok(())
    }

    /// undo an approved restructure and put the old schedule back
    pub fn cancel(&self, book: &mut LoanBook, restructure_id: RestructureId) -> Result<()> {
        let mut restructure = self.expect_status(book, restructure_id, RestructureStatus::Approved)?;
        let loan_id = restructure.loan;
        let restructure_date = restructure.request.restructure_date;
        check_future_entries(book, loan_id, restructure_date)?;

        let processor = RepaymentProcessor::new(self.catalog);
        for repayment in restructure.repayments.iter().rev() {
            processor.cancel(book, *repayment, false)?;
        }

        for accrual_id in &restructure.accruals {
            let accrual = book.accrual_mut(*accrual_id)?;
            if accrual.docstatus != DocStatus::Submitted {
                continue;
            }
            accrual.docstatus = DocStatus::Cancelled;
            let demand = accrual.loan_demand;
            book.ledger.reverse(*accrual_id, restructure_date);
            if let Some(demand) = demand {
                book.demand_mut(demand)?.docstatus = DocStatus::Cancelled;
            }
        }
        // penalty demands hang off their accrual
        let penalty_demands: Vec<_> = book
            .demands_of(loan_id)
            .into_iter()
            .filter(|demand| demand.interest_accrual.map_or(false, |id| restructure.accruals.contains(&id)))
            .map(|demand| demand.id)
            .collect();
        for demand in penalty_demands {
            book.demand_mut(demand)?.docstatus = DocStatus::Cancelled;
        }

        if let Some(schedule) = restructure.new_schedule {
            book.schedule_mut(schedule)?.status = ScheduleStatus::Cancelled;
        }
        if let Some(schedule) = restructure.old_schedule {
            book.schedule_mut(schedule)?.status = ScheduleStatus::Active;
        }
        let was_npa = book.loan(loan_id)?.is_npa;
        restructure.previous_terms.restore(book.loan_mut(loan_id)?);
        if was_npa && !restructure.previous_terms.is_npa {
            SuspenseMover::new(self.catalog).release_from_suspense(book, loan_id, restructure_date)?;
        }

        let classification = ClassificationEngine::new(self.catalog);
        for state in &restructure.sibling_npa {
            classification.flag_npa(book, state.loan, state.is_npa, restructure_date)?;
            let sibling = book.loan_mut(state.loan)?;
            sibling.is_npa = state.is_npa;
            sibling.manual_npa = state.manual_npa;
            sibling.watch_period_end_date = state.watch_period_end_date;
        }
        let applicant = book.loan(loan_id)?.applicant.clone();
        match restructure.applicant_npa_before {
            Some(is_npa) => {
                book.applicants_npa.insert(applicant, is_npa);
            }
            None => {
                book.applicants_npa.remove(&applicant);
            }
        }

        restructure.status = RestructureStatus::Cancelled;
        info!(loan = %loan_id, restructure = %restructure_id, "restructure cancelled");
        book.emit(Event::RestructureStatusChanged {
            loan_id,
            restructure_id,
            status: RestructureStatus::Cancelled,
            new_loan_amount: restructure.new_loan_amount,
            posting_date: restructure_date,
        });
        book.restructures.insert(restructure_id, restructure);
        Ok(())
    }

    fn expect_status(&self, book: &LoanBook, restructure_id: RestructureId, expected: RestructureStatus) -> Result<Restructure> {
        let restructure = book.restructure(restructure_id)?;
        if restructure.status != expected {
            return Err(ServicingError::InvalidState {
                document: "Loan Restructure".to_string(),
                id: restructure_id,
                current: format!("{:?}", restructure.status),
                expected: format!("{:?}", expected),
            });
        }
        Ok(restructure.clone())
    }

    /// one component repayment, clamped to what is still outstanding
    fn post_component(
        &self,
        book: &mut LoanBook,
        processor: &RepaymentProcessor,
        restructure: &Restructure,
        repayment_type: RepaymentType,
        amount: Money,
        filter: Option<DemandFilter>,
    ) -> Result<Option<Uuid>> {
        let date = restructure.request.restructure_date;
        let filter = filter.unwrap_or_else(|| repayment_type.demand_filter());
        let amount = amount.min(book.outstanding(restructure.loan, date, filter));
        if !amount.is_positive() {
            return Ok(None);
        }

        let request = RepaymentRequest::new(restructure.loan, date, amount, repayment_type)
            .with_demand_filter(filter)
            .for_restructure(restructure.id);
        debug!(loan = %restructure.loan, repayment_type = ?repayment_type, amount = %amount, "restructure component");
        processor.submit(book, &request).map(Some)
    }
}

/// balance and treatment of interest, unaccrued interest, penalty and charges
fn components(restructure: &Restructure) -> [(Treatment, Money); 4] {
    let request = &restructure.request;
    [
        (request.treatment_of_normal_interest, restructure.balance_interest),
        (request.unaccrued_interest_treatment, restructure.balance_unaccrued_interest),
        (request.treatment_of_penal_interest, restructure.balance_penalty),
        (request.treatment_of_other_charges, restructure.balance_charges),
    ]
}

fn capitalization_type(filter: DemandFilter) -> RepaymentType {
    match filter {
        DemandFilter::Penalty => RepaymentType::PenaltyCapitalization,
        DemandFilter::Charges => RepaymentType::ChargesCapitalization,
        DemandFilter::Principal => RepaymentType::PrincipalCapitalization,
        DemandFilter::Interest | DemandFilter::All => RepaymentType::InterestCapitalization,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CompanyPolicy, LoanProduct};
    use crate::decimal::Rate;
    use crate::errors::ErrorKind;
    use crate::lifecycle::{DisbursementProcessor, DisbursementRequest, LoanOriginator};
    use crate::state::LoanApplication;
    use crate::types::{Applicant, ScheduleType};
    use pretty_assertions::assert_eq;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// 100k over 24 months with three unpaid installments by 2023-04-05
    fn setup() -> (Catalog, LoanBook, LoanId) {
        let catalog = Catalog::new(CompanyPolicy::standard("_Test Company"))
            .with_product(LoanProduct::term_loan("Term Loan", Rate::from_percentage(10), ScheduleType::MonthlyAsPerRepaymentStartDate));
        let mut book = LoanBook::new();

        let application = LoanApplication::term_loan(
            Applicant::Customer("CUST-0001".to_string()),
            "Term Loan",
            Money::from_major(100_000),
            24,
            date(2023, 1, 1),
        )
        .with_repayment_start_date(date(2023, 1, 31));
        let loan_id = LoanOriginator::new(&catalog).submit_loan(&mut book, &application).unwrap();
        DisbursementProcessor::new(&catalog)
            .submit(&mut book, &DisbursementRequest::new(loan_id, date(2023, 1, 1), Money::from_major(100_000)))
            .unwrap();
        DemandGenerator::new(&catalog).generate_demands(&mut book, loan_id, date(2023, 4, 5)).unwrap();
        (catalog, book, loan_id)
    }

    fn carry_forward_request() -> RestructureRequest {
        let mut request = RestructureRequest::new(date(2023, 4, 5), date(2023, 5, 5), 24);
        request.treatment_of_normal_interest = Treatment::AddToFirstEmi;
        request.unaccrued_interest_treatment = Treatment::AddToFirstEmi;
        request.treatment_of_penal_interest = Treatment::Waive;
        request
    }

    #[test]
    fn test_initiate_snapshots_overdues() {
        let (catalog, mut book, loan_id) = setup();
        let controller = RestructureController::new(&catalog);

        let id = controller.initiate(&mut book, loan_id, &carry_forward_request()).unwrap();
        let restructure = book.restructure(id).unwrap().clone();

        assert_eq!(restructure.status, RestructureStatus::Initiated);
        assert_eq!(restructure.pending_principal_amount, Money::from_major(100_000));
        assert!(restructure.principal_overdue.is_positive());
        assert!(restructure.interest_overdue.is_positive());
        assert_eq!(restructure.completed_tenure, 3);
        assert_eq!(restructure.new_loan_amount, Money::from_major(100_000));
        assert_eq!(
            restructure.adjusted_interest,
            restructure.balance_interest + restructure.balance_unaccrued_interest
        );

        let draft = book.schedule(restructure.new_schedule.unwrap()).unwrap();
        assert_eq!(draft.status, ScheduleStatus::Initiated);
        assert_eq!(draft.rows.len(), 24);

        let err = controller.initiate(&mut book, loan_id, &carry_forward_request()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_initiate_validation() {
        let (catalog, mut book, loan_id) = setup();
        let controller = RestructureController::new(&catalog);

        // before the last due date
        let mut early = carry_forward_request();
        early.restructure_date = date(2023, 3, 1);
        assert!(matches!(
            controller.initiate(&mut book, loan_id, &early).unwrap_err(),
            ServicingError::InvalidDate { .. }
        ));

        let mut start_before = carry_forward_request();
        start_before.repayment_start_date = date(2023, 4, 1);
        assert!(matches!(
            controller.initiate(&mut book, loan_id, &start_before).unwrap_err(),
            ServicingError::InvalidDate { .. }
        ));

        let mut too_much_waiver = carry_forward_request();
        too_much_waiver.interest_waiver_amount = Money::from_major(1_000_000);
        assert!(matches!(
            controller.initiate(&mut book, loan_id, &too_much_waiver).unwrap_err(),
            ServicingError::WaiverExceedsOverdue { .. }
        ));

        // nothing repaid, so capitalized interest would exceed the disbursed amount
        let capitalized = RestructureRequest::new(date(2023, 4, 5), date(2023, 5, 5), 24);
        assert!(matches!(
            controller.initiate(&mut book, loan_id, &capitalized).unwrap_err(),
            ServicingError::Rejected { .. }
        ));
        assert!(book.restructures.is_empty());
    }

    #[test]
    fn test_approve_switches_schedule_and_marks_npa() {
        let (catalog, mut book, loan_id) = setup();
        let controller = RestructureController::new(&catalog);
        let old_schedule = book.active_schedule_id(loan_id).unwrap();

        let id = controller.initiate(&mut book, loan_id, &carry_forward_request()).unwrap();
        controller.approve(&mut book, id).unwrap();

        let restructure = book.restructure(id).unwrap().clone();
        assert_eq!(restructure.status, RestructureStatus::Approved);
        assert_eq!(book.schedule(old_schedule).unwrap().status, ScheduleStatus::Restructured);
        assert_eq!(book.active_schedule_id(loan_id), restructure.new_schedule);

        let loan = book.loan(loan_id).unwrap();
        assert_eq!(loan.restructure_count, 1);
        assert_eq!(loan.days_past_due, 0);
        assert!(loan.is_npa);
        assert_eq!(loan.watch_period_end_date, Some(date(2023, 10, 2)));
        assert_eq!(loan.pending_principal_amount(), Money::from_major(100_000));

        // every overdue component was carried, waived or capitalized
        for filter in [DemandFilter::Principal, DemandFilter::Interest, DemandFilter::Penalty] {
            assert_eq!(book.outstanding(loan_id, date(2023, 4, 5), filter), Money::ZERO);
        }

        let first = &book.active_schedule(loan_id).unwrap().rows[0];
        assert!(first.interest_amount > restructure.adjusted_interest);
    }

    #[test]
    fn test_security_deposit_reduces_new_amount() {
        let (catalog, mut book, loan_id) = setup();
        book.loan_mut(loan_id).unwrap().available_security_deposit = Money::from_major(5_000);
        let controller = RestructureController::new(&catalog);

        let id = controller.initiate(&mut book, loan_id, &carry_forward_request()).unwrap();
        let restructure = book.restructure(id).unwrap().clone();
        assert_eq!(restructure.principal_adjusted, Money::from_major(5_000));
        assert_eq!(restructure.interest_adjusted, Money::ZERO);
        assert_eq!(restructure.new_loan_amount, Money::from_major(95_000));

        controller.approve(&mut book, id).unwrap();
        let loan = book.loan(loan_id).unwrap();
        assert_eq!(loan.available_security_deposit, Money::ZERO);
        assert_eq!(loan.pending_principal_amount(), Money::from_major(95_000));
    }

    #[test]
    fn test_reject_marks_draft_schedule() {
        let (catalog, mut book, loan_id) = setup();
        let controller = RestructureController::new(&catalog);

        let id = controller.initiate(&mut book, loan_id, &carry_forward_request()).unwrap();
        controller.reject(&mut book, id).unwrap();

        let restructure = book.restructure(id).unwrap();
        assert_eq!(restructure.status, RestructureStatus::Rejected);
        assert_eq!(book.schedule(restructure.new_schedule.unwrap()).unwrap().status, ScheduleStatus::Rejected);

        let err = controller.approve(&mut book, id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);
    }

    #[test]
    fn test_cancel_restores_previous_terms() {
        let (catalog, mut book, loan_id) = setup();
        let controller = RestructureController::new(&catalog);
        let old_schedule = book.active_schedule_id(loan_id).unwrap();
        let before = LoanTerms::capture(book.loan(loan_id).unwrap());
        let interest_before = book.outstanding(loan_id, date(2023, 4, 5), DemandFilter::Interest);

        let id = controller.initiate(&mut book, loan_id, &carry_forward_request()).unwrap();
        controller.approve(&mut book, id).unwrap();
        controller.cancel(&mut book, id).unwrap();

        assert_eq!(book.restructure(id).unwrap().status, RestructureStatus::Cancelled);
        assert_eq!(book.schedule(old_schedule).unwrap().status, ScheduleStatus::Active);
        assert_eq!(LoanTerms::capture(book.loan(loan_id).unwrap()), before);
        assert_eq!(book.outstanding(loan_id, date(2023, 4, 5), DemandFilter::Interest), interest_before);
        assert!(book.outstanding(loan_id, date(2023, 4, 5), DemandFilter::Principal).is_positive());
    }

    #[test]
    fn test_cancel_restores_applicant_siblings() {
        let (catalog, mut book, loan_id) = setup();
        let application = LoanApplication::term_loan(
            Applicant::Customer("CUST-0001".to_string()),
            "Term Loan",
            Money::from_major(50_000),
            12,
            date(2023, 3, 1),
        )
        .with_repayment_start_date(date(2023, 3, 31));
        let sibling = LoanOriginator::new(&catalog).submit_loan(&mut book, &application).unwrap();
        DisbursementProcessor::new(&catalog)
            .submit(&mut book, &DisbursementRequest::new(sibling, date(2023, 3, 1), Money::from_major(50_000)))
            .unwrap();
        DemandGenerator::new(&catalog).generate_demands(&mut book, sibling, date(2023, 4, 5)).unwrap();

        let sibling_before = NpaState::capture(book.loan(sibling).unwrap());
        let mirror_before = book.applicants_npa.get(&Applicant::Customer("CUST-0001".to_string())).copied();
        let controller = RestructureController::new(&catalog);
        let id = controller.initiate(&mut book, loan_id, &carry_forward_request()).unwrap();
        controller.approve(&mut book, id).unwrap();

        let spread = book.loan(sibling).unwrap();
        assert!(spread.is_npa);
        assert_eq!(spread.watch_period_end_date, Some(date(2023, 10, 2)));
        assert!(book.ledger.balance("Suspense Interest Receivable", Some(sibling)).is_positive());

        controller.cancel(&mut book, id).unwrap();

        assert_eq!(NpaState::capture(book.loan(sibling).unwrap()), sibling_before);
        assert_eq!(book.ledger.balance("Suspense Interest Receivable", Some(sibling)), Money::ZERO);
        assert_eq!(book.ledger.balance("Suspense Interest Income", Some(sibling)), Money::ZERO);
        assert_eq!(
            book.applicants_npa.get(&Applicant::Customer("CUST-0001".to_string())).copied(),
            mirror_before
        );
        assert!(!book.loan(loan_id).unwrap().is_npa);
    }
}
