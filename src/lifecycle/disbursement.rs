use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::audit::{LimitChange, LimitChangeLog};
use crate::classification::ClassificationEngine;
use crate::config::{AccountRole, Catalog};
use crate::decimal::Money;
use crate::errors::{Result, ServicingError};
use crate::events::Event;
use crate::interest::day_count::{add_days, add_single_month};
use crate::interest::AccrualEngine;
use crate::ledger::{GlPair, VoucherType};
use crate::payments::{ScheduleBuilder, ScheduleTerms};
use crate::records::{Demand, Disbursement, DisbursementCharge, ScheduleRow};
use crate::state::Loan;
use crate::store::LoanBook;
use crate::types::{
    AccrualType, DemandSubtype, DemandType, DisbursementId, DocStatus, LoanId, LoanStatus,
    ScheduleStatus,
};

use super::check_future_entries;

/// caller input for make_disbursement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisbursementRequest {
    pub loan_id: LoanId,
    pub disbursement_date: NaiveDate,
    pub posting_date: NaiveDate,
    pub amount: Money,
    /// hold back one installment as security deposit
    pub withhold_security_deposit: bool,
    pub charges: Vec<DisbursementCharge>,
}

impl DisbursementRequest {
    pub fn new(loan_id: LoanId, disbursement_date: NaiveDate, amount: Money) -> Self {
        Self {
            loan_id,
            disbursement_date,
            posting_date: disbursement_date,
            amount,
            withhold_security_deposit: false,
            charges: Vec::new(),
        }
    }

    pub fn with_charge(mut self, charge: &str, amount: Money, sales_invoice: &str) -> Self {
        self.charges.push(DisbursementCharge {
            charge: charge.to_string(),
            amount,
            sales_invoice: sales_invoice.to_string(),
        });
        self
    }

    pub fn withholding_security_deposit(mut self) -> Self {
        self.withhold_security_deposit = true;
        self
    }
}

/// pays out sanctioned loans
pub struct DisbursementProcessor<'a> {
    catalog: &'a Catalog,
}

impl<'a> DisbursementProcessor<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// most that may be paid out now
    pub fn permitted_amount(&self, book: &LoanBook, loan_id: LoanId) -> Result<Money> {
        let loan = book.loan(loan_id)?;

        if loan.is_secured_loan && loan.shortfall_amount.is_positive() {
            return Ok(Money::ZERO);
        }
        if let Some(limit) = &loan.credit_limit {
            return Ok(limit.available_limit_amount);
        }

        let permitted = if loan.is_term_loan {
            loan.loan_amount - loan.disbursed_amount
        } else {
            loan.loan_amount - loan.pending_principal_amount()
        };
        Ok(permitted.non_negative())
    }

    /// disburse against a sanctioned loan
    pub fn submit(&self, book: &mut LoanBook, request: &DisbursementRequest) -> Result<DisbursementId> {
        let loan = book.loan(request.loan_id)?.clone();
        let product = self.catalog.product(&loan.loan_product)?;
        self.validate(book, &loan, request)?;

        let disbursement_id = Uuid::new_v4();
        if loan.is_line_of_credit() {
            self.utilize_limit(book, &loan, request)?;
        }

        // interest on the balance drawn so far
        if !loan.is_scheduled() && !book.disbursements_of(loan.id).is_empty() {
            AccrualEngine::new(self.catalog).accrue_interest(
                book,
                loan.id,
                add_days(request.disbursement_date, -1)?,
                AccrualType::Disbursement,
            )?;
        }

        let mut disbursement = Disbursement {
            id: disbursement_id,
            against_loan: loan.id,
            disbursement_date: request.disbursement_date,
            posting_date: request.posting_date,
            disbursed_amount: request.amount,
            withhold_security_deposit: request.withhold_security_deposit,
            security_deposit_withheld: Money::ZERO,
            charges: request.charges.clone(),
            docstatus: DocStatus::Submitted,
            status_before: loan.status,
            schedule: None,
            replaced_schedule: None,
            total_payment_before: loan.total_payment,
            total_interest_payable_before: loan.total_interest_payable,
            monthly_repayment_amount_before: loan.monthly_repayment_amount,
        };

        let new_status = {
            let stored = book.loan_mut(loan.id)?;
            stored.disbursed_amount += request.amount;
            let status = if stored.is_line_of_credit() {
                LoanStatus::Active
            } else if stored.disbursed_amount >= stored.loan_amount {
                LoanStatus::Disbursed
            } else {
                LoanStatus::PartiallyDisbursed
            };
            stored.update_status(status);
            status
        };

        if loan.is_scheduled() {
            self.rebuild_schedule(book, loan.id, &mut disbursement)?;
        }

        if request.withhold_security_deposit {
            let stored = book.loan_mut(loan.id)?;
            disbursement.security_deposit_withheld = stored.monthly_repayment_amount;
            stored.available_security_deposit += stored.monthly_repayment_amount;
        }

        for charge in &request.charges {
            let mut demand = Demand::new(
                loan.id,
                request.disbursement_date,
                DemandType::Charges,
                DemandSubtype::Charge(charge.charge.clone()),
                charge.amount,
            );
            demand.loan_disbursement = Some(disbursement_id);
            demand.sales_invoice = Some(charge.sales_invoice.clone());
            book.emit(Event::DemandRaised {
                loan_id: loan.id,
                demand_type: DemandType::Charges,
                demand_subtype: demand.demand_subtype.clone(),
                amount: charge.amount,
                demand_date: request.disbursement_date,
            });
            book.demands.insert(demand.id, demand);
        }

        book.post(
            loan.id,
            request.posting_date,
            &self.catalog.cost_center(product),
            VoucherType::LoanDisbursement,
            disbursement_id,
            &[GlPair::new(
                product.account(AccountRole::LoanAccount)?,
                product.account(AccountRole::DisbursementAccount)?,
                request.amount,
                "loan disbursed",
            )],
        )?;

        let disbursed_amount = book.loan(loan.id)?.disbursed_amount;
        info!(
            loan = %loan.id,
            amount = %request.amount,
            disbursed = %disbursed_amount,
            status = ?new_status,
            "loan disbursed"
        );
        book.emit(Event::Disbursed {
            loan_id: loan.id,
            amount: request.amount,
            disbursed_amount,
            posting_date: request.posting_date,
        });
        if new_status != loan.status {
            book.emit(Event::StatusChanged {
                loan_id: loan.id,
                old_status: loan.status,
                new_status,
                posting_date: request.posting_date,
            });
        }

        book.disbursements.insert(disbursement_id, disbursement);
        book.snapshot(loan.id, request.posting_date, format!("disbursement: {}", request.amount))?;

        ClassificationEngine::new(self.catalog).classify_loan(book, loan.id, request.posting_date, Uuid::new_v4())?;
        Ok(disbursement_id)
    }

    fn validate(&self, book: &LoanBook, loan: &Loan, request: &DisbursementRequest) -> Result<()> {
        if !request.amount.is_positive() {
            return Err(ServicingError::InvalidAmount {
                message: "disbursed amount must be greater than zero".to_string(),
            });
        }
        if loan.docstatus != DocStatus::Submitted {
            return Err(ServicingError::InvalidState {
                document: "Loan".to_string(),
                id: loan.id,
                current: format!("{:?}", loan.docstatus),
                expected: "Submitted".to_string(),
            });
        }
        if !matches!(
            loan.status,
            LoanStatus::Sanctioned | LoanStatus::PartiallyDisbursed | LoanStatus::Disbursed | LoanStatus::Active
        ) {
            return Err(ServicingError::InvalidLoanStatus {
                status: loan.status,
                message: "only sanctioned or running loans can be disbursed".to_string(),
            });
        }
        if loan.is_frozen_after(request.disbursement_date) {
            return Err(ServicingError::rejected("loan account is frozen"));
        }
        check_future_entries(book, loan.id, request.disbursement_date)?;

        if !loan.is_line_of_credit() {
            let permitted = self.permitted_amount(book, loan.id)?;
            if request.amount > permitted {
                return Err(ServicingError::DisbursalExceedsPermitted {
                    permitted,
                    requested: request.amount,
                });
            }
        }
        Ok(())
    }

    fn utilize_limit(&self, book: &mut LoanBook, loan: &Loan, request: &DisbursementRequest) -> Result<()> {
        let limit = book
            .loan_mut(loan.id)?
            .credit_limit
            .as_mut()
            .ok_or_else(|| ServicingError::rejected("line of credit has no limit"))?;

        if !limit.covers(request.disbursement_date) {
            return Err(ServicingError::InvalidDate {
                message: format!(
                    "disbursement date {} is outside the limit window {} to {}",
                    request.disbursement_date, limit.limit_applicable_start, limit.limit_applicable_end
                ),
            });
        }
        if request.amount > limit.available_limit_amount {
            return Err(ServicingError::LimitExceeded {
                available: limit.available_limit_amount,
                requested: request.amount,
            });
        }

        limit.utilize(request.amount);
        let log = LimitChangeLog {
            loan: loan.id,
            date: request.disbursement_date,
            change: LimitChange::Disbursement,
            amount: request.amount,
            available_limit_amount: limit.available_limit_amount,
            utilized_limit_amount: limit.utilized_limit_amount,
        };
        debug!(loan = %loan.id, available = %log.available_limit_amount, "credit limit utilized");
        book.audit.limit_change_logs.push(log);
        Ok(())
    }

    /// replace the running schedule with one on the disbursed amount
    fn rebuild_schedule(&self, book: &mut LoanBook, loan_id: LoanId, disbursement: &mut Disbursement) -> Result<()> {
        let loan = book.loan(loan_id)?.clone();
        let previous = book
            .active_schedule(loan_id)
            .or_else(|| {
                book.schedules.values().find(|schedule| {
                    schedule.loan == loan_id
                        && schedule.status == ScheduleStatus::Initiated
                        && schedule.loan_restructure.is_none()
                })
            })
            .cloned();

        let completed_rows: Vec<ScheduleRow> = previous
            .as_ref()
            .map(|schedule| schedule.rows.iter().filter(|row| row.demand_generated).cloned().collect())
            .unwrap_or_default();
        let demanded_principal: Money = completed_rows.iter().map(|row| row.principal_amount).sum();

        let repayment_start_date = match completed_rows.last() {
            Some(row) => add_single_month(row.payment_date)?,
            None => loan
                .repayment_start_date
                .ok_or_else(|| ServicingError::rejected("repayment start date is mandatory for term loans"))?,
        };

        let mut schedule = ScheduleBuilder::new(loan.repayment_schedule_type, loan.repayment_method).build_schedule(
            loan_id,
            &ScheduleTerms {
                loan_amount: loan.disbursed_amount - demanded_principal,
                rate_of_interest: loan.rate_of_interest,
                repayment_periods: loan.repayment_periods,
                monthly_repayment_amount: Some(loan.monthly_repayment_amount).filter(|amount| amount.is_positive()),
                repayment_start_date,
                posting_date: disbursement.disbursement_date,
                adjusted_interest: Money::ZERO,
                completed_rows,
            },
        )?;
        schedule.status = ScheduleStatus::Active;
        schedule.loan_disbursement = Some(disbursement.id);

        if let Some(previous) = &previous {
            book.schedule_mut(previous.id)?.status = ScheduleStatus::Outdated;
        }
        disbursement.replaced_schedule = previous.map(|schedule| schedule.id);
        disbursement.schedule = Some(schedule.id);

        let stored = book.loan_mut(loan_id)?;
        stored.total_payment = schedule.total_payment();
        stored.total_interest_payable = schedule.total_interest();
        stored.monthly_repayment_amount = schedule.monthly_repayment_amount;
        debug!(loan = %loan_id, schedule = %schedule.id, rows = schedule.rows.len(), "schedule rebuilt");
        book.schedules.insert(schedule.id, schedule);
        Ok(())
    }

    /// undo a disbursement that nothing later depends on
    pub fn cancel(&self, book: &mut LoanBook, disbursement_id: DisbursementId) -> Result<()> {
        let disbursement = book
            .disbursements
            .get(&disbursement_id)
            .cloned()
            .ok_or_else(|| ServicingError::not_found("Loan Disbursement", disbursement_id))?;
        if disbursement.docstatus != DocStatus::Submitted {
            return Err(ServicingError::InvalidState {
                document: "Loan Disbursement".to_string(),
                id: disbursement_id,
                current: format!("{:?}", disbursement.docstatus),
                expected: "Submitted".to_string(),
            });
        }

        let loan_id = disbursement.against_loan;
        check_future_entries(book, loan_id, disbursement.disbursement_date)?;

        let charges: Vec<&Demand> = book
            .demands_of(loan_id)
            .into_iter()
            .filter(|demand| demand.loan_disbursement == Some(disbursement_id))
            .collect();
        if let Some(settled) = charges
            .iter()
            .find(|demand| demand.paid_amount.is_positive() || demand.waived_amount.is_positive())
        {
            return Err(ServicingError::FutureEntryExists {
                loan: loan_id,
                document: "Loan Repayment against charges".to_string(),
                date: settled.demand_date,
            });
        }
        let charges: Vec<_> = charges.into_iter().map(|demand| demand.id).collect();

        let old_status = {
            let loan = book.loan_mut(loan_id)?;
            loan.disbursed_amount -= disbursement.disbursed_amount;
            loan.available_security_deposit -= disbursement.security_deposit_withheld;
            loan.total_payment = disbursement.total_payment_before;
            loan.total_interest_payable = disbursement.total_interest_payable_before;
            loan.monthly_repayment_amount = disbursement.monthly_repayment_amount_before;
            if let Some(limit) = loan.credit_limit.as_mut() {
                limit.restore(disbursement.disbursed_amount);
            }
            loan.update_status(disbursement.status_before)
        };

        if let Some(limit) = book.loan(loan_id)?.credit_limit.clone() {
            book.audit.limit_change_logs.push(LimitChangeLog {
                loan: loan_id,
                date: disbursement.disbursement_date,
                change: LimitChange::DisbursementCancelled,
                amount: disbursement.disbursed_amount,
                available_limit_amount: limit.available_limit_amount,
                utilized_limit_amount: limit.utilized_limit_amount,
            });
        }

        if let Some(schedule) = disbursement.schedule {
            book.schedule_mut(schedule)?.status = ScheduleStatus::Cancelled;
        }
        if let Some(previous) = disbursement.replaced_schedule {
            book.schedule_mut(previous)?.status = match disbursement.status_before {
                LoanStatus::Sanctioned => ScheduleStatus::Initiated,
                _ => ScheduleStatus::Active,
            };
        }

        for demand in charges {
            book.demand_mut(demand)?.docstatus = DocStatus::Cancelled;
        }
        book.ledger.reverse(disbursement_id, disbursement.posting_date);
        if let Some(stored) = book.disbursements.get_mut(&disbursement_id) {
            stored.docstatus = DocStatus::Cancelled;
        }

        info!(loan = %loan_id, amount = %disbursement.disbursed_amount, "disbursement cancelled");
        book.emit(Event::DisbursementCancelled {
            loan_id,
            amount: disbursement.disbursed_amount,
            posting_date: disbursement.posting_date,
        });
        if old_status != disbursement.status_before {
            book.emit(Event::StatusChanged {
                loan_id,
                old_status,
                new_status: disbursement.status_before,
                posting_date: disbursement.posting_date,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CompanyPolicy, LoanProduct};
    use crate::decimal::Rate;
    use crate::errors::ErrorKind;
    use crate::interest::DayCountConvention;
    use crate::lifecycle::LoanOriginator;
    use crate::state::LoanApplication;
    use crate::types::{Applicant, ScheduleType};
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn customer() -> Applicant {
        Applicant::Customer("CUST-0001".to_string())
    }

    fn catalog() -> Catalog {
        let mut policy = CompanyPolicy::standard("_Test Company");
        policy.day_count_convention = DayCountConvention::Actual365;
        Catalog::new(policy)
            .with_product(LoanProduct::term_loan("Term Loan", Rate::from_percent(dec!(8.4)), ScheduleType::MonthlyAsPerRepaymentStartDate))
            .with_product(LoanProduct::demand_loan("Demand Loan", Rate::from_percent(dec!(13.5)), Rate::from_percentage(25)))
    }

    fn sanctioned_term_loan(catalog: &Catalog, book: &mut LoanBook) -> LoanId {
        let application = LoanApplication::term_loan(customer(), "Term Loan", Money::from_major(280_000), 20, date(2024, 1, 1))
            .with_repayment_start_date(date(2024, 2, 1));
        LoanOriginator::new(catalog).submit_loan(book, &application).unwrap()
    }

    #[test]
    fn test_full_disbursement_activates_schedule() {
        let catalog = catalog();
        let mut book = LoanBook::new();
        let loan_id = sanctioned_term_loan(&catalog, &mut book);
        let draft = book.schedules.values().next().unwrap().id;

        let processor = DisbursementProcessor::new(&catalog);
        processor
            .submit(&mut book, &DisbursementRequest::new(loan_id, date(2024, 1, 1), Money::from_major(280_000)))
            .unwrap();

        let loan = book.loan(loan_id).unwrap();
        assert_eq!(loan.status, LoanStatus::Disbursed);
        assert_eq!(loan.pending_principal_amount(), Money::from_major(280_000));
        assert_eq!(book.schedule(draft).unwrap().status, ScheduleStatus::Outdated);

        let active = book.active_schedule(loan_id).unwrap();
        assert_eq!(active.rows.len(), 20);
        assert_eq!(active.monthly_repayment_amount, Money::from_major(15_052));
        assert_eq!(book.ledger.balance("Loan Account", Some(loan_id)), Money::from_major(280_000));
        assert_eq!(book.ledger.balance("Disbursement Account", Some(loan_id)), -Money::from_major(280_000));
        assert_eq!(processor.permitted_amount(&book, loan_id).unwrap(), Money::ZERO);
    }

    #[test]
    fn test_partial_disbursement_and_permitted_amount() {
        let catalog = catalog();
        let mut book = LoanBook::new();
        let loan_id = sanctioned_term_loan(&catalog, &mut book);
        let processor = DisbursementProcessor::new(&catalog);

        processor
            .submit(&mut book, &DisbursementRequest::new(loan_id, date(2024, 1, 1), Money::from_major(100_000)))
            .unwrap();
        assert_eq!(book.loan(loan_id).unwrap().status, LoanStatus::PartiallyDisbursed);
        assert_eq!(processor.permitted_amount(&book, loan_id).unwrap(), Money::from_major(180_000));
        assert_eq!(book.active_schedule(loan_id).unwrap().total_principal(), Money::from_major(100_000));

        let err = book
            .transaction(|tx| {
                processor.submit(tx, &DisbursementRequest::new(loan_id, date(2024, 1, 10), Money::from_major(200_000)))
            })
            .unwrap_err();
        assert_eq!(
            err,
            ServicingError::DisbursalExceedsPermitted {
                permitted: Money::from_major(180_000),
                requested: Money::from_major(200_000),
            }
        );
        assert_eq!(book.loan(loan_id).unwrap().disbursed_amount, Money::from_major(100_000));
    }

    #[test]
    fn test_withheld_deposit_and_charges() {
        let catalog = catalog();
        let mut book = LoanBook::new();
        let loan_id = sanctioned_term_loan(&catalog, &mut book);

        let request = DisbursementRequest::new(loan_id, date(2024, 1, 1), Money::from_major(280_000))
            .withholding_security_deposit()
            .with_charge("Processing Fee", Money::from_major(2_500), "SINV-0001");
        DisbursementProcessor::new(&catalog).submit(&mut book, &request).unwrap();

        let loan = book.loan(loan_id).unwrap();
        assert_eq!(loan.available_security_deposit, Money::from_major(15_052));

        let charges = book.unpaid_demands(loan_id, date(2024, 1, 1), crate::types::DemandFilter::Charges);
        assert_eq!(charges.len(), 1);
        assert_eq!(charges[0].demand_amount, Money::from_major(2_500));
        assert_eq!(charges[0].sales_invoice.as_deref(), Some("SINV-0001"));
    }

    #[test]
    fn test_rows_before_disbursement_fall_due_at_once() {
        let catalog = catalog();
        let mut book = LoanBook::new();
        let loan_id = sanctioned_term_loan(&catalog, &mut book);

        // first installment 2024-02-01, paid out later
        DisbursementProcessor::new(&catalog)
            .submit(&mut book, &DisbursementRequest::new(loan_id, date(2024, 2, 10), Money::from_major(280_000)))
            .unwrap();
        assert_eq!(book.loan(loan_id).unwrap().status, LoanStatus::Disbursed);
        assert_eq!(book.active_schedule(loan_id).unwrap().rows[0].payment_date, date(2024, 2, 1));

        let raised = crate::demand::DemandGenerator::new(&catalog)
            .generate_demands(&mut book, loan_id, date(2024, 2, 10))
            .unwrap();
        assert_eq!(raised.len(), 2);
        let due = book.unpaid_demands(loan_id, date(2024, 2, 10), crate::types::DemandFilter::All);
        assert!(due.iter().all(|demand| demand.demand_date == date(2024, 2, 1)));
        assert!(book.ledger.is_balanced());
    }

    #[test]
    fn test_second_demand_loan_disbursement_accrues_first() {
        let catalog = catalog();
        let mut book = LoanBook::new();
        let application = LoanApplication::demand_loan(customer(), "Demand Loan", Money::from_major(1_000_000), date(2019, 10, 1));
        let loan_id = LoanOriginator::new(&catalog).submit_loan(&mut book, &application).unwrap();
        let processor = DisbursementProcessor::new(&catalog);

        processor
            .submit(&mut book, &DisbursementRequest::new(loan_id, date(2019, 10, 1), Money::from_major(500_000)))
            .unwrap();
        assert_eq!(book.loan(loan_id).unwrap().status, LoanStatus::PartiallyDisbursed);
        assert_eq!(processor.permitted_amount(&book, loan_id).unwrap(), Money::from_major(500_000));

        processor
            .submit(&mut book, &DisbursementRequest::new(loan_id, date(2019, 10, 16), Money::from_major(500_000)))
            .unwrap();

        let accruals = book.accruals_of(loan_id);
        assert_eq!(accruals.len(), 1);
        assert_eq!(accruals[0].accrual_type, AccrualType::Disbursement);
        assert_eq!(accruals[0].posting_date, date(2019, 10, 15));
        assert_eq!(accruals[0].interest_amount, Money::from_decimal(dec!(2773.97)));
        assert_eq!(book.loan(loan_id).unwrap().status, LoanStatus::Disbursed);
    }

    #[test]
    fn test_line_of_credit_limit() {
        let catalog = catalog();
        let mut book = LoanBook::new();
        let mut application = LoanApplication::demand_loan(customer(), "Demand Loan", Money::from_major(100_000), date(2024, 1, 1));
        application.repayment_schedule_type = Some(ScheduleType::LineOfCredit);
        application.limit_applicable_start = Some(date(2024, 1, 1));
        application.limit_applicable_end = Some(date(2024, 12, 31));
        let loan_id = LoanOriginator::new(&catalog).submit_loan(&mut book, &application).unwrap();
        let processor = DisbursementProcessor::new(&catalog);

        processor
            .submit(&mut book, &DisbursementRequest::new(loan_id, date(2024, 2, 1), Money::from_major(60_000)))
            .unwrap();
        let loan = book.loan(loan_id).unwrap();
        assert_eq!(loan.status, LoanStatus::Active);
        assert_eq!(loan.credit_limit.as_ref().unwrap().available_limit_amount, Money::from_major(40_000));
        assert_eq!(book.audit.limit_change_logs.len(), 1);

        let err = book
            .transaction(|tx| processor.submit(tx, &DisbursementRequest::new(loan_id, date(2024, 3, 1), Money::from_major(50_000))))
            .unwrap_err();
        assert!(matches!(err, ServicingError::LimitExceeded { .. }));

        let err = book
            .transaction(|tx| processor.submit(tx, &DisbursementRequest::new(loan_id, date(2025, 1, 2), Money::from_major(10_000))))
            .unwrap_err();
        assert!(matches!(err, ServicingError::InvalidDate { .. }));
    }

    #[test]
    fn test_cancel_restores_loan() {
        let catalog = catalog();
        let mut book = LoanBook::new();
        let loan_id = sanctioned_term_loan(&catalog, &mut book);
        let draft = book.schedules.values().next().unwrap().id;
        let processor = DisbursementProcessor::new(&catalog);

        let disbursement = processor
            .submit(&mut book, &DisbursementRequest::new(loan_id, date(2024, 1, 1), Money::from_major(280_000)))
            .unwrap();
        processor.cancel(&mut book, disbursement).unwrap();

        let loan = book.loan(loan_id).unwrap();
        assert_eq!(loan.status, LoanStatus::Sanctioned);
        assert_eq!(loan.disbursed_amount, Money::ZERO);
        assert_eq!(book.schedule(draft).unwrap().status, ScheduleStatus::Initiated);
        assert!(book.active_schedule(loan_id).is_none());
        assert_eq!(book.ledger.balance("Loan Account", Some(loan_id)), Money::ZERO);
    }

    #[test]
    fn test_cancel_blocked_by_later_accrual() {
        let catalog = catalog();
        let mut book = LoanBook::new();
        let loan_id = sanctioned_term_loan(&catalog, &mut book);
        let processor = DisbursementProcessor::new(&catalog);

        let disbursement = processor
            .submit(&mut book, &DisbursementRequest::new(loan_id, date(2024, 1, 1), Money::from_major(280_000)))
            .unwrap();
        AccrualEngine::new(&catalog)
            .accrue_interest(&mut book, loan_id, date(2024, 2, 1), AccrualType::Regular)
            .unwrap();

        let err = book.transaction(|tx| processor.cancel(tx, disbursement)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Ordering);
        assert_eq!(book.loan(loan_id).unwrap().status, LoanStatus::Disbursed);
    }
}
