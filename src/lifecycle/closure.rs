use chrono::NaiveDate;
use tracing::info;
use uuid::Uuid;

use crate::config::{AccountRole, Catalog};
use crate::decimal::Money;
use crate::errors::{Result, ServicingError};
use crate::events::Event;
use crate::ledger::{GlPair, VoucherType};
use crate::payments::{calculate_amounts, RepaymentProcessor};
use crate::store::LoanBook;
use crate::types::{LoanId, LoanStatus};

use super::WriteOffController;

/// closes repaid loans and refunds excess collections
pub struct ClosureController<'a> {
    catalog: &'a Catalog,
}

impl<'a> ClosureController<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// everything still owed to close the loan on the date
    pub fn closure_pending(&self, book: &LoanBook, loan_id: LoanId, posting_date: NaiveDate) -> Result<Money> {
        Ok(calculate_amounts(self.catalog, book, loan_id, posting_date)?.closure_amount())
    }

    /// move a repaid loan to closure requested, or closed with auto close
    pub fn request_loan_closure(
        &self,
        book: &mut LoanBook,
        loan_id: LoanId,
        posting_date: NaiveDate,
        auto_close: bool,
    ) -> Result<LoanStatus> {
        let loan = book.loan(loan_id)?.clone();
        let product = self.catalog.product(&loan.loan_product)?;

        if loan.status != LoanStatus::Settled {
            if !loan.status.is_open() {
                return Err(ServicingError::InvalidLoanStatus {
                    status: loan.status,
                    message: "closure can only be requested on running loans".to_string(),
                });
            }

            let pending = self.closure_pending(book, loan_id, posting_date)?;
            if pending.is_positive() && pending < product.write_off_amount {
                info!(loan = %loan_id, pending = %pending, "writing off residual dues on closure");
                if loan.pending_principal_amount().is_positive() {
                    WriteOffController::new(self.catalog).write_off(book, loan_id, posting_date, None)?;
                } else {
                    RepaymentProcessor::new(self.catalog).waive_outstanding(book, loan_id, posting_date, None)?;
                }
            } else if pending.is_positive() {
                return Err(ServicingError::OutstandingOnClosure { pending });
            }
        }

        let status = if auto_close {
            LoanStatus::Closed
        } else {
            LoanStatus::LoanClosureRequested
        };
        self.set_status(book, loan_id, status, posting_date)?;
        Ok(status)
    }

    /// close an unsecured term loan that is awaiting closure
    pub fn close_unsecured_term_loan(&self, book: &mut LoanBook, loan_id: LoanId, posting_date: NaiveDate) -> Result<()> {
        let loan = book.loan(loan_id)?;
        if loan.status != LoanStatus::LoanClosureRequested {
            return Err(ServicingError::InvalidLoanStatus {
                status: loan.status,
                message: "loan closure has not been requested".to_string(),
            });
        }
        if !loan.is_term_loan || loan.is_secured_loan {
            return Err(ServicingError::rejected("only unsecured term loans can be closed directly"));
        }

        self.set_status(book, loan_id, LoanStatus::Closed, posting_date)
    }

    /// pay back what was collected beyond the pending principal
    pub fn make_refund(
        &self,
        book: &mut LoanBook,
        loan_id: LoanId,
        posting_date: NaiveDate,
        amount: Option<Money>,
    ) -> Result<Uuid> {
        let loan = book.loan(loan_id)?.clone();
        let product = self.catalog.product(&loan.loan_product)?;

        let excess = -loan.pending_principal_amount();
        if !excess.is_positive() {
            return Err(ServicingError::InvalidAmount {
                message: "no excess amount to refund".to_string(),
            });
        }
        let amount = amount.unwrap_or(excess);
        if !amount.is_positive() || amount > excess {
            return Err(ServicingError::InvalidAmount {
                message: format!("refund of {} must be positive and at most the excess {}", amount, excess),
            });
        }

        let refund_id = Uuid::new_v4();
        book.post(
            loan_id,
            posting_date,
            &self.catalog.cost_center(product),
            VoucherType::LoanRefund,
            refund_id,
            &[GlPair::new(
                product.account(AccountRole::LoanAccount)?,
                product.account(AccountRole::PaymentAccount)?,
                amount,
                "excess refunded",
            )],
        )?;
        book.loan_mut(loan_id)?.refund_amount += amount;

        info!(loan = %loan_id, amount = %amount, "refund issued");
        book.emit(Event::RefundIssued {
            loan_id,
            amount,
            posting_date,
        });
        Ok(refund_id)
    }

    fn set_status(&self, book: &mut LoanBook, loan_id: LoanId, status: LoanStatus, posting_date: NaiveDate) -> Result<()> {
        let old_status = book.loan_mut(loan_id)?.update_status(status);

        info!(loan = %loan_id, from = ?old_status, to = ?status, "loan closure");
        book.emit(Event::StatusChanged {
            loan_id,
            old_status,
            new_status: status,
            posting_date,
        });
        if status == LoanStatus::Closed {
            book.emit(Event::LoanClosed { loan_id, posting_date });
        }
        book.snapshot(loan_id, posting_date, format!("closure: {:?}", status))
    }
}
