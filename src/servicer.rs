use chrono::NaiveDate;
use hourglass_rs::SafeTimeProvider;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::classification::ClassificationEngine;
use crate::config::Catalog;
use crate::decimal::Money;
use crate::demand::DemandGenerator;
use crate::errors::{Result, ServicingError};
use crate::events::Event;
use crate::interest::{AccrualEngine, PenaltyEngine};
use crate::lifecycle::{
    ClosureController, DisbursementProcessor, DisbursementRequest, FreezeController, LoanOriginator,
    RestructureController, WriteOffController,
};
use crate::payments::{calculate_amounts, PayableAmounts, RepaymentProcessor, RepaymentRequest};
use crate::records::RestructureRequest;
use crate::state::LoanApplication;
use crate::store::LoanBook;
use crate::types::{
    AccrualType, DisbursementId, LoanId, LoanStatus, RepaymentId, RestructureId, WriteOffId,
};

/// outcome of a batch job over many loans
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub job: &'static str,
    pub posting_date: NaiveDate,
    pub processed: Vec<LoanId>,
    pub failed: Vec<(LoanId, ServicingError)>,
}

impl BatchReport {
    fn new(job: &'static str, posting_date: NaiveDate) -> Self {
        Self {
            job,
            posting_date,
            processed: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// servicing operations over a loan book, one transaction each
pub struct LoanServicer {
    catalog: Catalog,
    book: LoanBook,
    time_provider: SafeTimeProvider,
}

impl LoanServicer {
    pub fn new(catalog: Catalog, time_provider: SafeTimeProvider) -> Self {
        Self::with_book(catalog, LoanBook::new(), time_provider)
    }

    pub fn with_book(catalog: Catalog, book: LoanBook, time_provider: SafeTimeProvider) -> Self {
        Self {
            catalog,
            book,
            time_provider,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn book(&self) -> &LoanBook {
        &self.book
    }

    pub fn time_provider(&self) -> &SafeTimeProvider {
        &self.time_provider
    }

    pub fn today(&self) -> NaiveDate {
        self.time_provider.now().date_naive()
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        self.book.events.take_events()
    }

    fn posting_date(&self, date: Option<NaiveDate>) -> NaiveDate {
        date.unwrap_or_else(|| self.today())
    }

    // origination and disbursement

    #[instrument(name = "loan_servicer.submit_loan", skip(self, application), fields(applicant = ?application.applicant, posting_date = %application.posting_date))]
    pub fn submit_loan(&mut self, application: &LoanApplication) -> Result<LoanId> {
        let catalog = &self.catalog;
        self.book
            .transaction(|tx| LoanOriginator::new(catalog).submit_loan(tx, application))
    }

    #[instrument(name = "loan_servicer.make_disbursement", skip(self, request), fields(loan = %request.loan_id, posting_date = %request.posting_date))]
    pub fn make_disbursement(&mut self, request: &DisbursementRequest) -> Result<DisbursementId> {
        let catalog = &self.catalog;
        self.book
            .transaction(|tx| DisbursementProcessor::new(catalog).submit(tx, request))
    }

    #[instrument(name = "loan_servicer.cancel_disbursement", skip(self))]
    pub fn cancel_disbursement(&mut self, disbursement_id: DisbursementId) -> Result<()> {
        let catalog = &self.catalog;
        self.book
            .transaction(|tx| DisbursementProcessor::new(catalog).cancel(tx, disbursement_id))
    }

    // collections

    #[instrument(name = "loan_servicer.make_repayment", skip(self, request), fields(loan = %request.loan_id, posting_date = %request.posting_date, repayment_type = ?request.repayment_type))]
    pub fn make_repayment(&mut self, request: &RepaymentRequest) -> Result<RepaymentId> {
        let catalog = &self.catalog;
        self.book
            .transaction(|tx| RepaymentProcessor::new(catalog).submit(tx, request))
    }

    #[instrument(name = "loan_servicer.cancel_repayment", skip(self))]
    pub fn cancel_repayment(&mut self, repayment_id: RepaymentId) -> Result<()> {
        let catalog = &self.catalog;
        self.book
            .transaction(|tx| RepaymentProcessor::new(catalog).cancel(tx, repayment_id, true))
    }

    /// what the loan owes as of the date
    pub fn payable_amounts(&self, loan_id: LoanId, posting_date: Option<NaiveDate>) -> Result<PayableAmounts> {
        calculate_amounts(&self.catalog, &self.book, loan_id, self.posting_date(posting_date))
    }

    // closure

    #[instrument(name = "loan_servicer.request_loan_closure", skip(self))]
    pub fn request_loan_closure(
        &mut self,
        loan_id: LoanId,
        posting_date: Option<NaiveDate>,
        auto_close: bool,
    ) -> Result<LoanStatus> {
        let posting_date = self.posting_date(posting_date);
        let catalog = &self.catalog;
        self.book.transaction(|tx| {
            ClosureController::new(catalog).request_loan_closure(tx, loan_id, posting_date, auto_close)
        })
    }

    #[instrument(name = "loan_servicer.close_unsecured_term_loan", skip(self))]
    pub fn close_unsecured_term_loan(&mut self, loan_id: LoanId, posting_date: Option<NaiveDate>) -> Result<()> {
        let posting_date = self.posting_date(posting_date);
        let catalog = &self.catalog;
        self.book
            .transaction(|tx| ClosureController::new(catalog).close_unsecured_term_loan(tx, loan_id, posting_date))
    }

    #[instrument(name = "loan_servicer.make_refund", skip(self))]
    pub fn make_refund(&mut self, loan_id: LoanId, posting_date: Option<NaiveDate>, amount: Option<Money>) -> Result<Uuid> {
        let posting_date = self.posting_date(posting_date);
        let catalog = &self.catalog;
        self.book
            .transaction(|tx| ClosureController::new(catalog).make_refund(tx, loan_id, posting_date, amount))
    }

    // write off

    #[instrument(name = "loan_servicer.make_loan_write_off", skip(self))]
    pub fn make_loan_write_off(
        &mut self,
        loan_id: LoanId,
        amount: Option<Money>,
        posting_date: Option<NaiveDate>,
    ) -> Result<WriteOffId> {
        let posting_date = self.posting_date(posting_date);
        let catalog = &self.catalog;
        self.book
            .transaction(|tx| WriteOffController::new(catalog).write_off(tx, loan_id, posting_date, amount))
    }

    #[instrument(name = "loan_servicer.cancel_write_off", skip(self))]
    pub fn cancel_write_off(&mut self, write_off_id: WriteOffId) -> Result<()> {
        let catalog = &self.catalog;
        self.book
            .transaction(|tx| WriteOffController::new(catalog).cancel(tx, write_off_id))
    }

    // restructure

    #[instrument(name = "loan_servicer.restructure_loan", skip(self, request), fields(posting_date = %request.restructure_date))]
    pub fn restructure_loan(&mut self, loan_id: LoanId, request: &RestructureRequest) -> Result<RestructureId> {
        let catalog = &self.catalog;
        self.book
            .transaction(|tx| RestructureController::new(catalog).initiate(tx, loan_id, request))
    }

    #[instrument(name = "loan_servicer.approve_restructure", skip(self))]
    pub fn approve_restructure(&mut self, restructure_id: RestructureId) -> Result<()> {
        let catalog = &self.catalog;
        self.book
            .transaction(|tx| RestructureController::new(catalog).approve(tx, restructure_id))
    }

    #[instrument(name = "loan_servicer.reject_restructure", skip(self))]
    pub fn reject_restructure(&mut self, restructure_id: RestructureId) -> Result<()> {
        let catalog = &self.catalog;
        self.book
            .transaction(|tx| RestructureController::new(catalog).reject(tx, restructure_id))
    }

    #[instrument(name = "loan_servicer.cancel_restructure", skip(self))]
    pub fn cancel_restructure(&mut self, restructure_id: RestructureId) -> Result<()> {
        let catalog = &self.catalog;
        self.book
            .transaction(|tx| RestructureController::new(catalog).cancel(tx, restructure_id))
    }

    // freeze

    #[instrument(name = "loan_servicer.freeze_loan", skip(self))]
    pub fn freeze_loan(&mut self, loan_id: LoanId, freeze_date: Option<NaiveDate>, reason: &str) -> Result<()> {
        let freeze_date = self.posting_date(freeze_date);
        let catalog = &self.catalog;
        self.book
            .transaction(|tx| FreezeController::new(catalog).freeze(tx, loan_id, freeze_date, reason))
    }

    #[instrument(name = "loan_servicer.unfreeze_loan", skip(self))]
    pub fn unfreeze_loan(&mut self, loan_id: LoanId, posting_date: Option<NaiveDate>) -> Result<()> {
        let posting_date = self.posting_date(posting_date);
        let catalog = &self.catalog;
        self.book
            .transaction(|tx| FreezeController::new(catalog).unfreeze(tx, loan_id, posting_date))
    }

    // classification

    /// operator npa flag, un-marking is checked against today's watch period
    #[instrument(name = "loan_servicer.update_manual_npa", skip(self))]
    pub fn update_manual_npa(&mut self, loan_id: LoanId, manual_npa: bool) -> Result<()> {
        let posting_date = self.today();
        let catalog = &self.catalog;
        self.book.transaction(|tx| {
            ClassificationEngine::new(catalog).update_manual_npa(tx, loan_id, manual_npa, posting_date)
        })
    }

    #[instrument(name = "loan_servicer.set_unmark_npa", skip(self))]
    pub fn set_unmark_npa(&mut self, loan_id: LoanId, unmark_npa: bool) -> Result<()> {
        let posting_date = self.today();
        let catalog = &self.catalog;
        self.book.transaction(|tx| {
            ClassificationEngine::new(catalog).set_unmark_npa(tx, loan_id, unmark_npa, posting_date)
        })
    }

    /// classify a single loan, errors are returned rather than recorded
    #[instrument(name = "loan_servicer.classify_loan", skip(self))]
    pub fn classify_loan(&mut self, loan_id: LoanId, posting_date: Option<NaiveDate>) -> Result<u32> {
        let posting_date = self.posting_date(posting_date);
        let catalog = &self.catalog;
        self.book.transaction(|tx| {
            ClassificationEngine::new(catalog).classify_loan(tx, loan_id, posting_date, Uuid::new_v4())
        })
    }

    // batch jobs

    /// penal then normal interest for every open loan
    #[instrument(name = "loan_servicer.run_daily_accrual", skip(self))]
    pub fn run_daily_accrual(&mut self, posting_date: NaiveDate) -> BatchReport {
        let loans = self.open_loans();
        self.run_batch("daily_accrual", posting_date, loans, |catalog, tx, loan_id| {
            PenaltyEngine::new(catalog).accrue_penal_interest(tx, loan_id, posting_date, AccrualType::Regular)?;
            AccrualEngine::new(catalog).accrue_interest(tx, loan_id, posting_date, AccrualType::Regular)?;
            Ok(())
        })
    }

    /// raise the installments that fell due
    #[instrument(name = "loan_servicer.run_daily_demand", skip(self))]
    pub fn run_daily_demand(&mut self, posting_date: NaiveDate) -> BatchReport {
        let loans = self.open_loans();
        self.run_batch("daily_demand", posting_date, loans, |catalog, tx, loan_id| {
            DemandGenerator::new(catalog).generate_demands(tx, loan_id, posting_date)?;
            Ok(())
        })
    }

    /// days past due, buckets, npa and auto write off under one run id
    #[instrument(name = "loan_servicer.run_daily_classification", skip(self))]
    pub fn run_daily_classification(&mut self, posting_date: NaiveDate) -> BatchReport {
        let run = Uuid::new_v4();
        let loans = ClassificationEngine::new(&self.catalog).eligible_loans(&self.book);
        self.run_batch("daily_classification", posting_date, loans, |catalog, tx, loan_id| {
            ClassificationEngine::new(catalog).classify_loan(tx, loan_id, posting_date, run)?;
            Ok(())
        })
    }

    /// the whole end of day cycle
    pub fn run_daily(&mut self, posting_date: NaiveDate) -> Vec<BatchReport> {
        vec![
            self.run_daily_accrual(posting_date),
            self.run_daily_demand(posting_date),
            self.run_daily_classification(posting_date),
        ]
    }

    fn open_loans(&self) -> Vec<LoanId> {
        self.book
            .loans
            .values()
            .filter(|loan| loan.status.is_open())
            .map(|loan| loan.id)
            .collect()
    }

    /// each loan in its own transaction, failures are recorded on the loan
    fn run_batch<F>(&mut self, job: &'static str, posting_date: NaiveDate, loans: Vec<LoanId>, work: F) -> BatchReport
    where
        F: Fn(&Catalog, &mut LoanBook, LoanId) -> Result<()>,
    {
        let mut report = BatchReport::new(job, posting_date);
        let catalog = &self.catalog;

        for loan_id in loans {
            let outcome = self.book.transaction(|tx| work(catalog, tx, loan_id));
            let last_error = match outcome {
                Ok(()) => {
                    report.processed.push(loan_id);
                    None
                }
                Err(err) => {
                    warn!(job, loan = %loan_id, error = %err, "loan skipped by batch job");
                    let message = err.to_string();
                    report.failed.push((loan_id, err));
                    Some(message)
                }
            };
            if let Some(loan) = self.book.loans.get_mut(&loan_id) {
                loan.last_error = last_error;
            }
        }

        info!(
            job,
            posting_date = %posting_date,
            processed = report.processed.len(),
            failed = report.failed.len(),
            "batch job finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CompanyPolicy, LoanProduct};
    use crate::decimal::Rate;
    use crate::errors::ErrorKind;
    use crate::interest::DayCountConvention;
    use crate::types::{Applicant, DemandFilter, RepaymentType, ScheduleType};
    use chrono::{Duration, TimeZone, Utc};
    use hourglass_rs::TimeSource;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn customer() -> Applicant {
        Applicant::Customer("CUST-0001".to_string())
    }

    fn servicer(today: NaiveDate) -> LoanServicer {
        let mut policy = CompanyPolicy::standard("_Test Company");
        policy.day_count_convention = DayCountConvention::Actual365;
        let catalog = Catalog::new(policy)
            .with_product(LoanProduct::demand_loan("Demand Loan", Rate::from_percent(dec!(13.5)), Rate::from_percentage(25)))
            .with_product(LoanProduct::term_loan("Term Loan", Rate::from_percentage(10), ScheduleType::MonthlyAsPerRepaymentStartDate))
            .with_sanctioned_limit(customer(), Money::from_major(1_500_000));
        let time = SafeTimeProvider::new(TimeSource::Test(
            Utc.from_utc_datetime(&today.and_hms_opt(0, 0, 0).unwrap()),
        ));
        LoanServicer::new(catalog, time)
    }

    fn term_loan(servicer: &mut LoanServicer, amount: i64, disbursed_on: NaiveDate, start: NaiveDate) -> LoanId {
        let application = LoanApplication::term_loan(customer(), "Term Loan", Money::from_major(amount), 12, disbursed_on)
            .with_repayment_start_date(start);
        let loan_id = servicer.submit_loan(&application).unwrap();
        servicer
            .make_disbursement(&DisbursementRequest::new(loan_id, disbursed_on, Money::from_major(amount)))
            .unwrap();
        loan_id
    }

    fn demand_loan(servicer: &mut LoanServicer, amount: i64, disbursed_on: NaiveDate) -> LoanId {
        let application = LoanApplication::demand_loan(customer(), "Demand Loan", Money::from_major(amount), disbursed_on);
        let loan_id = servicer.submit_loan(&application).unwrap();
        servicer
            .make_disbursement(&DisbursementRequest::new(loan_id, disbursed_on, Money::from_major(amount)))
            .unwrap();
        loan_id
    }

    #[test]
    fn test_demand_loan_accrual_and_repayment() {
        let mut servicer = servicer(date(2019, 10, 1));
        let loan_id = demand_loan(&mut servicer, 1_000_000, date(2019, 10, 1));

        let report = servicer.run_daily_accrual(date(2019, 10, 30));
        assert!(report.is_clean());
        assert_eq!(report.processed, vec![loan_id]);

        let accrued: Money = servicer
            .book()
            .accruals_of(loan_id)
            .iter()
            .map(|accrual| accrual.interest_amount)
            .sum();
        assert_eq!(accrued, Money::from_decimal(dec!(11095.89)));

        let request = RepaymentRequest::new(
            loan_id,
            date(2019, 11, 4),
            Money::from_decimal(dec!(1012983.21)),
            RepaymentType::NormalRepayment,
        );
        servicer.make_repayment(&request).unwrap();

        let loan = servicer.book().loan(loan_id).unwrap();
        assert_eq!(loan.pending_principal_amount(), Money::ZERO);
        assert_eq!(loan.status, LoanStatus::Closed);
        assert!(servicer.book().ledger.is_balanced());

        let events = servicer.take_events();
        assert!(events.iter().any(|event| matches!(event, Event::LoanClosed { .. })));
        assert!(servicer.take_events().is_empty());
    }

    #[test]
    fn test_daily_cycle_walks_loan_into_npa() {
        let mut servicer = servicer(date(2023, 1, 1));
        let application = LoanApplication::term_loan(customer(), "Term Loan", Money::from_major(1_200_000), 12, date(2023, 1, 1))
            .with_repayment_start_date(date(2023, 1, 31));
        let loan_id = servicer.submit_loan(&application).unwrap();
        // paid out after the first installment date
        servicer
            .make_disbursement(&DisbursementRequest::new(loan_id, date(2023, 2, 1), Money::from_major(1_200_000)))
            .unwrap();

        servicer.run_daily(date(2023, 2, 2));
        let loan = servicer.book().loan(loan_id).unwrap();
        assert_eq!(loan.days_past_due, 2);
        assert_eq!(loan.classification_code.as_deref(), Some("SMA-0"));

        servicer.run_daily(date(2023, 4, 5));
        let loan = servicer.book().loan(loan_id).unwrap();
        assert_eq!(loan.days_past_due, 64);
        assert_eq!(loan.classification_code.as_deref(), Some("SMA-2"));
        assert!(!loan.is_npa);

        let reports = servicer.run_daily(date(2023, 7, 5));
        assert!(reports.iter().all(BatchReport::is_clean));
        let loan = servicer.book().loan(loan_id).unwrap();
        assert_eq!(loan.days_past_due, 155);
        assert_eq!(loan.classification_code.as_deref(), Some("D1"));
        assert!(loan.is_npa);
        assert_eq!(servicer.book().applicants_npa.get(&customer()), Some(&true));
    }

    #[test]
    fn test_sanctioned_limit_rejects_second_loan() {
        let mut servicer = servicer(date(2024, 1, 1));
        let first = LoanApplication::term_loan(customer(), "Term Loan", Money::from_major(1_000_000), 12, date(2024, 1, 1))
            .with_repayment_start_date(date(2024, 2, 1));
        servicer.submit_loan(&first).unwrap();

        let second = LoanApplication::term_loan(customer(), "Term Loan", Money::from_major(1_000_000), 12, date(2024, 1, 1))
            .with_repayment_start_date(date(2024, 2, 1));
        let err = servicer.submit_loan(&second).unwrap_err();
        assert!(matches!(err, ServicingError::SanctionedLimitExceeded { .. }));
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(servicer.book().loans.len(), 1);
    }

    #[test]
    fn test_closure_writes_off_small_residue() {
        let mut servicer = servicer(date(2024, 1, 1));
        let loan_id = demand_loan(&mut servicer, 10_000, date(2024, 1, 1));

        servicer
            .make_repayment(&RepaymentRequest::new(
                loan_id,
                date(2024, 1, 1),
                Money::from_major(9_950),
                RepaymentType::NormalRepayment,
            ))
            .unwrap();
        let residue = servicer.book().loan(loan_id).unwrap().pending_principal_amount();
        assert!(residue.is_positive() && residue < Money::from_major(100));

        let status = servicer.request_loan_closure(loan_id, None, false).unwrap();
        assert_eq!(status, LoanStatus::LoanClosureRequested);
        let loan = servicer.book().loan(loan_id).unwrap();
        assert_eq!(loan.written_off_amount, residue);
        assert_eq!(servicer.book().write_offs.len(), 1);
    }

    #[test]
    fn test_failed_operation_leaves_book_untouched() {
        let mut servicer = servicer(date(2024, 1, 1));
        let loan_id = demand_loan(&mut servicer, 10_000, date(2024, 1, 1));
        let ledger_rows = servicer.book().ledger.entries().len();

        let err = servicer.make_loan_write_off(loan_id, Some(Money::from_major(1)), None).unwrap_err();
        assert!(matches!(err, ServicingError::WriteOffMismatch { .. }));
        let loan = servicer.book().loan(loan_id).unwrap();
        assert_eq!(loan.status, LoanStatus::Disbursed);
        assert_eq!(loan.written_off_amount, Money::ZERO);
        assert_eq!(servicer.book().ledger.entries().len(), ledger_rows);
        assert!(servicer.book().write_offs.is_empty());
    }

    #[test]
    fn test_batch_records_failure_and_continues() {
        let mut servicer = servicer(date(2019, 10, 1));
        let broken = demand_loan(&mut servicer, 100_000, date(2019, 10, 1));
        let healthy = demand_loan(&mut servicer, 100_000, date(2019, 10, 1));
        servicer.book.loan_mut(broken).unwrap().loan_product = "Retired Product".to_string();

        let report = servicer.run_daily_accrual(date(2019, 10, 30));

        assert_eq!(report.processed, vec![healthy]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, broken);
        assert_eq!(report.failed[0].1.kind(), ErrorKind::Configuration);
        assert!(servicer.book().loan(broken).unwrap().last_error.is_some());
        assert!(servicer.book().accruals_of(broken).is_empty());
        assert!(!servicer.book().accruals_of(healthy).is_empty());

        // a single loan run surfaces the error instead
        assert!(servicer.classify_loan(broken, Some(date(2019, 10, 30))).is_err());
    }

    #[test]
    fn test_repayment_cancel_round_trip() {
        let mut servicer = servicer(date(2023, 1, 1));
        let loan_id = term_loan(&mut servicer, 120_000, date(2023, 1, 1), date(2023, 1, 31));
        servicer.run_daily(date(2023, 3, 5));

        let before = servicer.book().loan(loan_id).unwrap().clone();
        let interest_before = servicer.book().outstanding(loan_id, date(2023, 3, 5), DemandFilter::Interest);

        let repayment = servicer
            .make_repayment(&RepaymentRequest::new(
                loan_id,
                date(2023, 3, 5),
                Money::from_major(5_000),
                RepaymentType::NormalRepayment,
            ))
            .unwrap();
        servicer.cancel_repayment(repayment).unwrap();

        let loan = servicer.book().loan(loan_id).unwrap();
        assert_eq!(loan.total_principal_paid, before.total_principal_paid);
        assert_eq!(loan.total_amount_paid, before.total_amount_paid);
        assert_eq!(
            servicer.book().outstanding(loan_id, date(2023, 3, 5), DemandFilter::Interest),
            interest_before
        );
    }

    #[test]
    fn test_same_day_repayment_keeps_paid_penalty() {
        let mut servicer = servicer(date(2023, 1, 1));
        let loan_id = term_loan(&mut servicer, 120_000, date(2023, 1, 1), date(2023, 1, 31));
        servicer.run_daily(date(2023, 3, 5));

        let dues = servicer.book().outstanding(loan_id, date(2023, 3, 5), DemandFilter::All);
        assert!(servicer.book().outstanding(loan_id, date(2023, 3, 5), DemandFilter::Penalty).is_positive());
        servicer
            .make_repayment(&RepaymentRequest::new(loan_id, date(2023, 3, 5), dues, RepaymentType::NormalRepayment))
            .unwrap();

        let penalty_paid = |servicer: &LoanServicer| -> Money {
            servicer
                .book()
                .demands_of(loan_id)
                .into_iter()
                .filter(|demand| demand.demand_type == crate::types::DemandType::Penalty)
                .map(|demand| demand.paid_amount)
                .sum()
        };
        let paid = penalty_paid(&servicer);
        assert!(paid.is_positive());

        servicer
            .make_repayment(&RepaymentRequest::new(
                loan_id,
                date(2023, 3, 5),
                Money::from_major(1_000),
                RepaymentType::PrePayment,
            ))
            .unwrap();

        assert_eq!(penalty_paid(&servicer), paid);
        let book = servicer.book();
        assert!(book
            .demands_of(loan_id)
            .iter()
            .all(|demand| demand.paid_amount + demand.waived_amount <= demand.demand_amount));
        assert_eq!(book.ledger.balance("Penalty Receivable", Some(loan_id)), Money::ZERO);
        assert!(book.ledger.is_balanced());
    }

    #[test]
    fn test_payable_amount_settles_as_normal_repayment() {
        let mut servicer = servicer(date(2023, 1, 1));
        let loan_id = term_loan(&mut servicer, 120_000, date(2023, 1, 1), date(2023, 1, 31));
        servicer.run_daily(date(2023, 3, 5));

        let amounts = servicer.payable_amounts(loan_id, Some(date(2023, 3, 5))).unwrap();
        assert!(amounts.unbooked_interest.is_positive());
        assert!(amounts.closure_amount() > amounts.payable_amount());

        servicer
            .make_repayment(&RepaymentRequest::new(
                loan_id,
                date(2023, 3, 5),
                amounts.payable_amount(),
                RepaymentType::NormalRepayment,
            ))
            .unwrap();
        assert_eq!(servicer.book().outstanding(loan_id, date(2023, 3, 5), DemandFilter::All), Money::ZERO);
    }

    #[test]
    fn test_unmark_waits_for_watch_period_from_today() {
        let mut servicer = servicer(date(2023, 4, 5));
        let loan_id = term_loan(&mut servicer, 120_000, date(2023, 1, 1), date(2023, 1, 31));
        servicer.book.loan_mut(loan_id).unwrap().watch_period_end_date = Some(date(2023, 10, 2));
        servicer.update_manual_npa(loan_id, true).unwrap();

        let err = servicer.update_manual_npa(loan_id, false).unwrap_err();
        assert!(matches!(err, ServicingError::WatchPeriodActive { .. }));

        servicer.time_provider().test_control().unwrap().advance(Duration::days(200));
        servicer.update_manual_npa(loan_id, false).unwrap();
        assert!(!servicer.book().loan(loan_id).unwrap().manual_npa);
    }

    #[test]
    fn test_freeze_defaults_to_today() {
        let mut servicer = servicer(date(2023, 2, 15));
        let loan_id = term_loan(&mut servicer, 120_000, date(2023, 1, 1), date(2023, 1, 31));

        servicer.freeze_loan(loan_id, None, "court order").unwrap();
        assert_eq!(servicer.book().loan(loan_id).unwrap().freeze_date, Some(date(2023, 2, 15)));

        servicer.run_daily(date(2023, 4, 5));
        assert!(servicer
            .book()
            .accruals_of(loan_id)
            .iter()
            .all(|accrual| accrual.posting_date <= date(2023, 2, 15)));

        servicer.unfreeze_loan(loan_id, Some(date(2023, 4, 5))).unwrap();
        assert!(servicer
            .book()
            .demands_of(loan_id)
            .iter()
            .any(|demand| demand.demand_date == date(2023, 3, 31)));
    }
}
