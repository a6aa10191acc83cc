use tracing::info;

use crate::config::{Catalog, LoanProduct};
use crate::decimal::Money;
use crate::errors::{Result, ServicingError};
use crate::events::Event;
use crate::interest::day_count::cyclic_date;
use crate::payments::{ScheduleBuilder, ScheduleTerms};
use crate::state::{Loan, LoanApplication};
use crate::store::LoanBook;
use crate::types::{Applicant, DocStatus, LoanId, LoanStatus, ScheduleType};

/// books new loans against a product
pub struct LoanOriginator<'a> {
    catalog: &'a Catalog,
}

impl<'a> LoanOriginator<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// validate an application and book it as a sanctioned loan
    pub fn submit_loan(&self, book: &mut LoanBook, application: &LoanApplication) -> Result<LoanId> {
        let product = self.catalog.product(&application.loan_product)?;
        product.validate()?;

        // validate
        if !application.loan_amount.is_positive() {
            return Err(ServicingError::InvalidAmount {
                message: "loan amount is mandatory".to_string(),
            });
        }
        if let Some(maximum) = product.maximum_loan_amount {
            if application.loan_amount > maximum {
                return Err(ServicingError::LoanAmountExceedsMaximum {
                    maximum,
                    requested: application.loan_amount,
                });
            }
        }
        self.check_sanctioned_limit(book, &application.applicant, application.loan_amount)?;

        let schedule_type = application
            .repayment_schedule_type
            .unwrap_or(product.repayment_schedule_type);
        let mut loan = Loan::new(
            application,
            application.rate_of_interest.unwrap_or(product.rate_of_interest),
            product.penalty_interest_rate,
            product.is_term_loan,
            schedule_type,
        );

        if loan.is_line_of_credit() && loan.credit_limit.is_none() {
            return Err(ServicingError::rejected(
                "limit applicable start and end dates are mandatory for a line of credit",
            ));
        }

        if loan.is_scheduled() {
            self.draft_schedule(book, &mut loan, product)?;
        } else {
            loan.total_payment = loan.loan_amount;
        }

        loan.docstatus = DocStatus::Submitted;
        loan.status = LoanStatus::Sanctioned;
        let loan_id = loan.id;

        info!(
            loan = %loan_id,
            applicant = %loan.applicant,
            amount = %loan.loan_amount,
            product = %loan.loan_product,
            "loan sanctioned"
        );
        book.emit(Event::LoanSanctioned {
            loan_id,
            applicant: loan.applicant.clone(),
            amount: loan.loan_amount,
            posting_date: loan.posting_date,
        });
        let posting_date = loan.posting_date;
        book.loans.insert(loan_id, loan);
        book.snapshot(loan_id, posting_date, "sanction".to_string())?;

        Ok(loan_id)
    }

    /// amount the applicant already owes or has been sanctioned
    pub fn applicant_exposure(&self, book: &LoanBook, applicant: &Applicant) -> Money {
        book.loans_of(applicant)
            .into_iter()
            .filter_map(|id| book.loans.get(&id))
            .filter(|loan| loan.docstatus == DocStatus::Submitted)
            .map(|loan| {
                let principal = match loan.status {
                    LoanStatus::Disbursed | LoanStatus::LoanClosureRequested | LoanStatus::Active => {
                        loan.pending_principal_amount()
                    }
                    LoanStatus::PartiallyDisbursed => loan.disbursed_amount - loan.total_principal_paid,
                    LoanStatus::Sanctioned => loan.total_payment,
                    _ => Money::ZERO,
                };

                let unpaid_interest: Money = book
                    .accruals_of(loan.id)
                    .into_iter()
                    .map(|accrual| accrual.unpaid_interest() + accrual.unpaid_additional_interest())
                    .sum();

                principal + unpaid_interest
            })
            .sum()
    }

    fn check_sanctioned_limit(&self, book: &LoanBook, applicant: &Applicant, amount: Money) -> Result<()> {
        let limit = match self.catalog.sanctioned_limits.get(applicant) {
            Some(limit) => *limit,
            None => return Ok(()),
        };

        let requested = self.applicant_exposure(book, applicant) + amount;
        if requested > limit {
            return Err(ServicingError::SanctionedLimitExceeded {
                applicant: applicant.clone(),
                limit,
                requested,
            });
        }
        Ok(())
    }

    /// initiated schedule that fixes the emi and totals before disbursement
    fn draft_schedule(&self, book: &mut LoanBook, loan: &mut Loan, product: &LoanProduct) -> Result<()> {
        if loan.repayment_schedule_type == ScheduleType::MonthlyAsPerCycleDate {
            loan.repayment_start_date = Some(cyclic_date(
                loan.posting_date,
                product.cyclic_day_of_the_month,
                product.min_days_bw_disbursement_first_repayment,
            )?);
        }

        let repayment_start_date = loan
            .repayment_start_date
            .ok_or_else(|| ServicingError::rejected("repayment start date is mandatory for term loans"))?;

        let schedule = ScheduleBuilder::new(loan.repayment_schedule_type, loan.repayment_method).build_schedule(
            loan.id,
            &ScheduleTerms {
                loan_amount: loan.loan_amount,
                rate_of_interest: loan.rate_of_interest,
                repayment_periods: loan.repayment_periods,
                monthly_repayment_amount: Some(loan.monthly_repayment_amount).filter(|amount| amount.is_positive()),
                repayment_start_date,
                posting_date: loan.posting_date,
                adjusted_interest: Money::ZERO,
                completed_rows: Vec::new(),
            },
        )?;

        loan.total_payment = schedule.total_payment();
        loan.total_interest_payable = schedule.total_interest();
        loan.monthly_repayment_amount = schedule.monthly_repayment_amount;
        book.schedules.insert(schedule.id, schedule);
        Ok(())
    }
}
