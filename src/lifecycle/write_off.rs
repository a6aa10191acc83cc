use chrono::NaiveDate;
use tracing::info;
use uuid::Uuid;

use crate::config::{AccountRole, Catalog};
use crate::decimal::Money;
use crate::demand::DemandGenerator;
use crate::errors::{Result, ServicingError};
use crate::events::Event;
use crate::ledger::{GlPair, VoucherType};
use crate::payments::{RepaymentProcessor, SuspenseMover};
use crate::records::WriteOff;
use crate::store::LoanBook;
use crate::types::{DocStatus, LoanId, LoanStatus, WriteOffId};

/// writes off the pending principal of a loan
pub struct WriteOffController<'a> {
    catalog: &'a Catalog,
}

impl<'a> WriteOffController<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// write off the loan, amount defaults to pending principal
    pub fn write_off(
        &self,
        book: &mut LoanBook,
        loan_id: LoanId,
        posting_date: NaiveDate,
        amount: Option<Money>,
    ) -> Result<WriteOffId> {
        let loan = book.loan(loan_id)?.clone();
        let product = self.catalog.product(&loan.loan_product)?;

        if !(loan.status.is_open() || loan.status == LoanStatus::LoanClosureRequested) {
            return Err(ServicingError::InvalidLoanStatus {
                status: loan.status,
                message: "only running loans can be written off".to_string(),
            });
        }

        let pending = loan.pending_principal_amount();
        let write_off_amount = amount.unwrap_or(pending);
        if !pending.is_positive() || write_off_amount != pending {
            return Err(ServicingError::WriteOffMismatch {
                pending,
                requested: write_off_amount,
            });
        }
        let write_off_account = self.catalog.write_off_account(product)?;

        let demands = DemandGenerator::new(self.catalog).generate_demands(book, loan_id, posting_date)?;
        let waivers = RepaymentProcessor::new(self.catalog).waive_outstanding(book, loan_id, posting_date, None)?;

        let write_off_id = Uuid::new_v4();
        let mut pairs = vec![GlPair::new(
            write_off_account.clone(),
            product.account(AccountRole::LoanAccount)?,
            write_off_amount,
            "loan written off",
        )];

        // income parked in suspense goes with the loan
        let suspended = SuspenseMover::new(self.catalog).suspended_portions(book, loan_id);
        let mut suspense_written_off = Money::ZERO;
        for (accounts, amount) in suspended {
            suspense_written_off += amount;
            pairs.push(GlPair::new(
                product.account(accounts.suspense_income)?,
                product.account(accounts.suspense_receivable)?,
                amount,
                "suspense written off",
            ));
        }

        book.post(
            loan_id,
            posting_date,
            &self.catalog.cost_center(product),
            VoucherType::LoanWriteOff,
            write_off_id,
            &pairs,
        )?;

        let status_before = {
            let stored = book.loan_mut(loan_id)?;
            stored.written_off_amount += write_off_amount;
            stored.update_status(LoanStatus::WrittenOff)
        };

        book.write_offs.insert(
            write_off_id,
            WriteOff {
                id: write_off_id,
                loan: loan_id,
                posting_date,
                write_off_amount,
                write_off_account,
                docstatus: DocStatus::Submitted,
                status_before,
                waivers,
                suspense_written_off,
                demands,
            },
        );

        info!(loan = %loan_id, amount = %write_off_amount, "loan written off");
        book.emit(Event::LoanWrittenOff {
            loan_id,
            amount: write_off_amount,
            posting_date,
        });
        book.emit(Event::StatusChanged {
            loan_id,
            old_status: status_before,
            new_status: LoanStatus::WrittenOff,
            posting_date,
        });
        book.snapshot(loan_id, posting_date, format!("write off: {}", write_off_amount))?;
        Ok(write_off_id)
    }

    /// put a written off loan back on the books
    pub fn cancel(&self, book: &mut LoanBook, write_off_id: WriteOffId) -> Result<()> {
        let write_off = book
            .write_offs
            .get(&write_off_id)
            .cloned()
            .ok_or_else(|| ServicingError::not_found("Loan Write Off", write_off_id))?;
        if write_off.docstatus != DocStatus::Submitted {
            return Err(ServicingError::InvalidState {
                document: "Loan Write Off".to_string(),
                id: write_off_id,
                current: format!("{:?}", write_off.docstatus),
                expected: "Submitted".to_string(),
            });
        }

        let loan_id = write_off.loan;
        book.ledger.reverse(write_off_id, write_off.posting_date);
        let old_status = {
            let loan = book.loan_mut(loan_id)?;
            loan.written_off_amount -= write_off.write_off_amount;
            loan.update_status(LoanStatus::Disbursed)
        };

        let processor = RepaymentProcessor::new(self.catalog);
        for waiver in write_off.waivers.iter().rev() {
            processor.cancel(book, *waiver, false)?;
        }
        book.loan_mut(loan_id)?.update_status(LoanStatus::Disbursed);

        if let Some(stored) = book.write_offs.get_mut(&write_off_id) {
            stored.docstatus = DocStatus::Cancelled;
        }

        info!(loan = %loan_id, amount = %write_off.write_off_amount, "write off cancelled");
        book.emit(Event::WriteOffCancelled {
            loan_id,
            amount: write_off.write_off_amount,
            posting_date: write_off.posting_date,
        });
        book.emit(Event::StatusChanged {
            loan_id,
            old_status,
            new_status: LoanStatus::Disbursed,
            posting_date: write_off.posting_date,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CompanyPolicy, LoanProduct};
    use crate::decimal::Rate;
    use crate::interest::IncomeAccounts;
    use crate::lifecycle::{DisbursementProcessor, DisbursementRequest, LoanOriginator};
    use crate::records::InterestAccrual;
    use crate::state::LoanApplication;
    use crate::types::{AccrualType, Applicant, DemandFilter, InterestType, ScheduleType};
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
        (catalog, book, loan_id)
    }

    #[test]
    fn test_write_off_clears_pending_principal() {
        let (catalog, mut book, loan_id) = setup();

        WriteOffController::new(&catalog)
            .write_off(&mut book, loan_id, date(2023, 4, 5), None)
            .unwrap();

        let loan = book.loan(loan_id).unwrap();
        assert_eq!(loan.status, LoanStatus::WrittenOff);
        assert_eq!(loan.written_off_amount, Money::from_major(100_000));
        assert_eq!(loan.pending_principal_amount(), Money::ZERO);

        // due interest is waived, not collected
        assert_eq!(book.outstanding(loan_id, date(2023, 4, 5), DemandFilter::Interest), Money::ZERO);
        assert_eq!(book.ledger.balance("Write Off Account", Some(loan_id)), Money::from_major(100_000));
        assert_eq!(book.ledger.balance("Loan Account", Some(loan_id)), Money::ZERO);
        assert!(book.ledger.is_balanced());
    }

    #[test]
    fn test_amount_must_match_pending_principal() {
        let (catalog, mut book, loan_id) = setup();

        let err = book
            .transaction(|tx| {
                WriteOffController::new(&catalog).write_off(tx, loan_id, date(2023, 4, 5), Some(Money::from_major(50_000)))
            })
            .unwrap_err();
        assert_eq!(
            err,
            ServicingError::WriteOffMismatch {
                pending: Money::from_major(100_000),
                requested: Money::from_major(50_000),
            }
        );
        assert_eq!(book.loan(loan_id).unwrap().status, LoanStatus::Disbursed);
    }

    #[test]
    fn test_cancel_restores_loan() {
        let (catalog, mut book, loan_id) = setup();
        let controller = WriteOffController::new(&catalog);

        let write_off = controller.write_off(&mut book, loan_id, date(2023, 4, 5), None).unwrap();
        let waived = book.outstanding(loan_id, date(2023, 4, 5), DemandFilter::Interest);
        assert_eq!(waived, Money::ZERO);

        controller.cancel(&mut book, write_off).unwrap();

        let loan = book.loan(loan_id).unwrap();
        assert_eq!(loan.status, LoanStatus::Disbursed);
        assert_eq!(loan.written_off_amount, Money::ZERO);
        assert_eq!(loan.pending_principal_amount(), Money::from_major(100_000));
        assert!(book.outstanding(loan_id, date(2023, 4, 5), DemandFilter::Interest).is_positive());
        assert_eq!(book.ledger.balance("Write Off Account", Some(loan_id)), Money::ZERO);

        let err = controller.cancel(&mut book, write_off).unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::Integrity);
    }

    #[test]
    fn test_penal_suspense_leaves_through_penal_accounts() {
        let (catalog, mut book, loan_id) = setup();
        let product = catalog.product("Term Loan").unwrap();

        // penal interest booked while npa, never demanded
        let mut penal = InterestAccrual::new(loan_id, date(2023, 3, 10), date(2023, 3, 1), InterestType::PenalInterest, AccrualType::Regular);
        penal.interest_amount = Money::from_major(30);
        penal.in_suspense = true;
        let pair = IncomeAccounts::PENAL.accrual_pair(product, penal.interest_amount, true, "penal interest accrued").unwrap();
        book.post(loan_id, date(2023, 3, 10), &catalog.cost_center(product), VoucherType::InterestAccrual, penal.id, &[pair])
            .unwrap();
        book.accruals.insert(penal.id, penal);

        let write_off = WriteOffController::new(&catalog)
            .write_off(&mut book, loan_id, date(2023, 4, 5), None)
            .unwrap();

        assert_eq!(book.write_offs[&write_off].suspense_written_off, Money::from_major(30));
        assert_eq!(book.ledger.balance("Suspense Penalty Receivable", Some(loan_id)), Money::ZERO);
        assert_eq!(book.ledger.balance("Suspense Penalty Income", Some(loan_id)), Money::ZERO);
        assert_eq!(book.ledger.balance("Suspense Interest Receivable", Some(loan_id)), Money::ZERO);
        assert_eq!(book.ledger.balance("Suspense Interest Income", Some(loan_id)), Money::ZERO);
        assert!(book.ledger.is_balanced());
    }
}
