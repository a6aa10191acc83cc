pub mod closure;
pub mod disbursement;
pub mod freeze;
pub mod origination;
pub mod restructure;
pub mod write_off;

use chrono::NaiveDate;

use crate::errors::{Result, ServicingError};
use crate::store::LoanBook;
use crate::types::LoanId;

pub use closure::ClosureController;
pub use disbursement::{DisbursementProcessor, DisbursementRequest};
pub use freeze::FreezeController;
pub use origination::LoanOriginator;
pub use restructure::RestructureController;
pub use write_off::WriteOffController;

/// fail when any servicing record of the loan is dated after the date
pub(crate) fn check_future_entries(book: &LoanBook, loan_id: LoanId, date: NaiveDate) -> Result<()> {
    let later = [
        (
            "Loan Disbursement",
            book.disbursements_of(loan_id)
                .into_iter()
                .map(|disbursement| disbursement.disbursement_date)
                .filter(|on| *on > date)
                .max(),
        ),
        (
            "Loan Repayment",
            book.repayments_of(loan_id)
                .into_iter()
                .map(|repayment| repayment.posting_date)
                .filter(|on| *on > date)
                .max(),
        ),
        (
            "Loan Interest Accrual",
            book.accruals_of(loan_id)
                .into_iter()
                .map(|accrual| accrual.posting_date)
                .filter(|on| *on > date)
                .max(),
        ),
        (
            "Loan Demand",
            book.demands_of(loan_id)
                .into_iter()
                .map(|demand| demand.demand_date)
                .filter(|on| *on > date)
                .max(),
        ),
    ];

    match later.into_iter().find_map(|(document, on)| on.map(|on| (document, on))) {
        Some((document, on)) => Err(ServicingError::FutureEntryExists {
            loan: loan_id,
            document: document.to_string(),
            date: on,
        }),
        None => Ok(()),
    }
}
