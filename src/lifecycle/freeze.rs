use chrono::NaiveDate;
use tracing::{debug, info};
use uuid::Uuid;

use crate::audit::{FreezeAction, FreezeLog};
use crate::classification::ClassificationEngine;
use crate::config::Catalog;
use crate::demand::DemandGenerator;
use crate::errors::{Result, ServicingError};
use crate::events::Event;
use crate::interest::day_count::add_days;
use crate::interest::{AccrualEngine, PenaltyEngine};
use crate::store::LoanBook;
use crate::types::{AccrualType, DemandFilter, DocStatus, LoanId};

/// stops and resumes accruals and demands on a loan
pub struct FreezeController<'a> {
    catalog: &'a Catalog,
}

impl<'a> FreezeController<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// freeze the loan as of the date, unwinding anything booked after it
    pub fn freeze(&self, book: &mut LoanBook, loan_id: LoanId, freeze_date: NaiveDate, reason: &str) -> Result<()> {
        let loan = book.loan(loan_id)?;
        if !loan.status.is_open() {
            return Err(ServicingError::InvalidLoanStatus {
                status: loan.status,
                message: "only running loans can be frozen".to_string(),
            });
        }
        if loan.freeze_account {
            return Err(ServicingError::rejected("loan is already frozen"));
        }

        {
            let loan = book.loan_mut(loan_id)?;
            loan.freeze_account = true;
            loan.freeze_date = Some(freeze_date);
        }

        let reversed = DemandGenerator::new(self.catalog).reverse_demands(
            book,
            loan_id,
            add_days(freeze_date, 1)?,
            DemandFilter::All,
        )?;

        let later: Vec<_> = book
            .accruals_of(loan_id)
            .into_iter()
            .filter(|accrual| accrual.posting_date > freeze_date)
            .map(|accrual| accrual.id)
            .collect();
        for accrual_id in &later {
            book.accrual_mut(*accrual_id)?.docstatus = DocStatus::Cancelled;
            book.ledger.reverse(*accrual_id, freeze_date);
        }
        debug!(loan = %loan_id, demands = reversed.len(), accruals = later.len(), "bookings after freeze unwound");

        ClassificationEngine::new(self.catalog).classify_loan(book, loan_id, freeze_date, Uuid::new_v4())?;
        AccrualEngine::new(self.catalog).accrue_interest(book, loan_id, freeze_date, AccrualType::Regular)?;

        book.audit.freeze_logs.push(FreezeLog {
            loan: loan_id,
            date: freeze_date,
            action: FreezeAction::Freeze,
            reason: reason.to_string(),
        });
        info!(loan = %loan_id, freeze_date = %freeze_date, reason, "loan frozen");
        book.emit(Event::LoanFrozen {
            loan_id,
            freeze_date,
            reason: reason.to_string(),
        });
        book.snapshot(loan_id, freeze_date, "loan frozen".to_string())
    }

    /// resume servicing and catch up accruals and demands to the date
    pub fn unfreeze(&self, book: &mut LoanBook, loan_id: LoanId, posting_date: NaiveDate) -> Result<()> {
        let loan = book.loan(loan_id)?;
        if !loan.freeze_account {
            return Err(ServicingError::rejected("loan is not frozen"));
        }
        if loan.freeze_date.map_or(false, |freeze_date| posting_date < freeze_date) {
            return Err(ServicingError::InvalidDate {
                message: format!("unfreeze date {} is before the freeze date", posting_date),
            });
        }

        {
            let loan = book.loan_mut(loan_id)?;
            loan.freeze_account = false;
            loan.freeze_date = None;
        }
        book.audit.freeze_logs.push(FreezeLog {
            loan: loan_id,
            date: posting_date,
            action: FreezeAction::Unfreeze,
            reason: String::new(),
        });

        PenaltyEngine::new(self.catalog).accrue_penal_interest(book, loan_id, posting_date, AccrualType::Regular)?;
        AccrualEngine::new(self.catalog).accrue_interest(book, loan_id, posting_date, AccrualType::Regular)?;
        DemandGenerator::new(self.catalog).generate_demands(book, loan_id, posting_date)?;
        ClassificationEngine::new(self.catalog).classify_loan(book, loan_id, posting_date, Uuid::new_v4())?;

        info!(loan = %loan_id, posting_date = %posting_date, "loan unfrozen");
        book.emit(Event::LoanUnfrozen { loan_id, posting_date });
        book.snapshot(loan_id, posting_date, "loan unfrozen".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CompanyPolicy, LoanProduct};
    use crate::decimal::{Money, Rate};
    use crate::lifecycle::{DisbursementProcessor, DisbursementRequest, LoanOriginator};
    use crate::state::LoanApplication;
    use crate::types::{Applicant, ScheduleType};
    use pretty_assertions::assert_eq;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

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
        AccrualEngine::new(&catalog)
            .accrue_interest(&mut book, loan_id, date(2023, 4, 5), AccrualType::Regular)
            .unwrap();
        DemandGenerator::new(&catalog).generate_demands(&mut book, loan_id, date(2023, 4, 5)).unwrap();
        (catalog, book, loan_id)
    }

    #[test]
    fn test_freeze_unwinds_later_bookings() {
        let (catalog, mut book, loan_id) = setup();
        assert_eq!(book.demands_of(loan_id).len(), 6);

        FreezeController::new(&catalog)
            .freeze(&mut book, loan_id, date(2023, 2, 15), "legal hold")
            .unwrap();

        let loan = book.loan(loan_id).unwrap();
        assert!(loan.freeze_account);
        assert_eq!(loan.days_past_due, 15);
        assert!(book.demands_of(loan_id).iter().all(|demand| demand.demand_date <= date(2023, 2, 15)));
        assert!(book.accruals_of(loan_id).iter().all(|accrual| accrual.posting_date <= date(2023, 2, 15)));
        assert_eq!(book.audit.freeze_logs.len(), 1);
        assert!(book.ledger.is_balanced());

        // nothing is raised past the freeze date
        DemandGenerator::new(&catalog).generate_demands(&mut book, loan_id, date(2023, 5, 5)).unwrap();
        assert!(book.demands_of(loan_id).iter().all(|demand| demand.demand_date <= date(2023, 2, 15)));
    }

    #[test]
    fn test_unfreeze_catches_up() {
        let (catalog, mut book, loan_id) = setup();
        let controller = FreezeController::new(&catalog);
        controller.freeze(&mut book, loan_id, date(2023, 2, 15), "legal hold").unwrap();

        let err = controller.freeze(&mut book, loan_id, date(2023, 3, 1), "again").unwrap_err();
        assert!(matches!(err, ServicingError::Rejected { .. }));

        controller.unfreeze(&mut book, loan_id, date(2023, 5, 10)).unwrap();

        let loan = book.loan(loan_id).unwrap();
        assert!(!loan.freeze_account);
        assert_eq!(loan.freeze_date, None);
        assert!(book
            .demands_of(loan_id)
            .iter()
            .any(|demand| demand.demand_date == date(2023, 4, 30)));
        assert_eq!(book.audit.freeze_logs.len(), 2);
        assert!(loan.days_past_due > 90);

        let err = controller.unfreeze(&mut book, loan_id, date(2023, 5, 11)).unwrap_err();
        assert!(matches!(err, ServicingError::Rejected { .. }));
    }
}
