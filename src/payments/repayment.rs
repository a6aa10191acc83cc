use chrono::NaiveDate;
use tracing::{debug, info};
use uuid::Uuid;

use crate::audit::{LimitChange, LimitChangeLog};
use crate::classification::ClassificationEngine;
use crate::config::{AccountRole, Catalog, LoanProduct};
use crate::decimal::Money;
use crate::errors::{Result, ServicingError};
use crate::events::Event;
use crate::interest::{AccrualEngine, IncomeAccounts, PenaltyEngine};
use crate::ledger::{GlPair, VoucherType};
use crate::payments::{
    calculate_amounts, draws_security_deposit, payment_account_role, RepaymentRequest,
    WaterfallAllocator,
};
use crate::records::{CreditNote, Demand, PendingCharge, Repayment, RepaymentDetail};
use crate::store::LoanBook;
use crate::types::{
    AccrualId, AccrualType, DemandFilter, DemandSubtype, DocStatus, LoanId, LoanStatus,
    RepaymentId, RepaymentType,
};

/// posts and cancels repayments
pub struct RepaymentProcessor<'a> {
    catalog: &'a Catalog,
}

impl<'a> RepaymentProcessor<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// allocate a repayment over the loan's dues and post it
    pub fn submit(&self, book: &mut LoanBook, request: &RepaymentRequest) -> Result<RepaymentId> {
        let loan = book.loan(request.loan_id)?.clone();
        let product = self.catalog.product(&loan.loan_product)?;
        let repayment_type = request.repayment_type;
        let posting_date = request.posting_date;

        self.validate(book, request)?;

        let mut repayment = Repayment::new(loan.id, posting_date, request.amount_paid, repayment_type);
        repayment.offset_based_on_npa = request.offset_based_on_npa;
        repayment.loan_restructure = request.loan_restructure;
        repayment.days_past_due_before = loan.days_past_due;
        repayment.status_before = loan.status;

        let amounts = calculate_amounts(self.catalog, book, loan.id, posting_date)?;
        repayment.pending_principal_amount = amounts.pending_principal_amount;
        repayment.payable_principal_amount = amounts.payable_principal_amount;
        repayment.interest_payable = amounts.interest_payable();
        repayment.penalty_amount = amounts.penalty_payable();

        if repayment_type.is_collection() {
            let penalty = PenaltyEngine::new(self.catalog);
            if loan.is_scheduled() {
                let (accruals, demands) = penalty.reverse_penal_accruals(book, loan.id, posting_date)?;
                repayment.reversed_accruals = accruals;
                repayment.reversed_demands = demands;
            }
            let booked = penalty.accrue_penal_interest(book, loan.id, posting_date, AccrualType::Repayment)?;
            self.track_ad_hoc(book, &mut repayment, booked);
        }

        let mut remaining = request.amount_paid;

        if repayment_type.is_collection() && loan.shortfall_amount.is_positive() {
            let skim = remaining.min(loan.shortfall_amount);
            book.loan_mut(loan.id)?.shortfall_amount -= skim;
            repayment.shortfall_paid = skim;
            repayment.principal_amount_paid += skim;
            remaining -= skim;
        }

        let demands: Vec<Demand> = book
            .unpaid_demands(loan.id, posting_date, request.demand_filter())
            .into_iter()
            .cloned()
            .collect();
        let allocator = WaterfallAllocator::for_loan(&loan, &self.catalog.policy, request.offset_based_on_npa);
        let (allocations, application) = allocator.allocate(&demands, remaining);
        for allocation in &allocations {
            self.settle(book, &mut repayment, allocation.demand, allocation.amount)?;
        }
        remaining = application.excess;

        if remaining.is_positive() {
            remaining = self.apply_excess(book, &mut repayment, request, remaining)?;
        }
        if remaining.is_positive() {
            return Err(ServicingError::CalculationError {
                message: format!("{} of repayment {} left unallocated", remaining, repayment.id),
            });
        }

        {
            let loan = book.loan_mut(loan.id)?;
            loan.total_principal_paid += repayment.principal_amount_paid;
            if repayment_type.is_collection() {
                loan.total_amount_paid += repayment.amount_paid;
            }
            if draws_security_deposit(repayment_type) {
                loan.available_security_deposit -= repayment.amount_paid;
            }
        }
        self.restore_limit(book, loan.id, posting_date, repayment.principal_amount_paid, LimitChange::Repayment)?;

        let pairs = self.gl_pairs(product, &repayment)?;
        book.post(
            loan.id,
            posting_date,
            &self.catalog.cost_center(product),
            VoucherType::LoanRepayment,
            repayment.id,
            &pairs,
        )?;

        info!(
            loan = %loan.id,
            repayment = %repayment.id,
            repayment_type = ?repayment_type,
            amount = %repayment.amount_paid,
            principal = %repayment.principal_amount_paid,
            interest = %repayment.total_interest_paid,
            "repayment posted"
        );
        book.emit(Event::RepaymentPosted {
            loan_id: loan.id,
            repayment_type,
            amount: repayment.amount_paid,
            applied_to_principal: repayment.principal_amount_paid,
            applied_to_interest: repayment.total_interest_paid,
            applied_to_penalty: repayment.total_penalty_paid,
            applied_to_charges: repayment.total_paid_charges,
            posting_date,
        });

        if repayment_type == RepaymentType::ChargesWaiver {
            self.issue_credit_notes(book, &repayment);
        }

        repayment.docstatus = DocStatus::Submitted;
        let repayment_id = repayment.id;
        book.repayments.insert(repayment_id, repayment);

        if request.loan_restructure.is_none() {
            self.close_if_repaid(book, loan.id, posting_date, product)?;
        }

        if !request.skip_classification && repayment_type.is_collection() {
            let status = book.loan(loan.id)?.status;
            if status.is_classifiable() {
                ClassificationEngine::new(self.catalog).classify_loan(book, loan.id, posting_date, Uuid::new_v4())?;
            }
        }

        Ok(repayment_id)
    }

    fn validate(&self, book: &LoanBook, request: &RepaymentRequest) -> Result<()> {
        let loan = book.loan(request.loan_id)?;

        if !request.amount_paid.is_positive() {
            return Err(ServicingError::InvalidAmount {
                message: "amount paid must be greater than zero".to_string(),
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

        if !(loan.status.is_open() || loan.status == LoanStatus::LoanClosureRequested) {
            return Err(ServicingError::InvalidLoanStatus {
                status: loan.status,
                message: "repayments are only accepted on disbursed loans".to_string(),
            });
        }

        if let Some(later) = book
            .repayments_of(loan.id)
            .into_iter()
            .find(|repayment| repayment.posting_date > request.posting_date)
        {
            return Err(ServicingError::FutureEntryExists {
                loan: loan.id,
                document: "Loan Repayment".to_string(),
                date: later.posting_date,
            });
        }

        if draws_security_deposit(request.repayment_type) && request.amount_paid > loan.available_security_deposit {
            return Err(ServicingError::InvalidAmount {
                message: format!(
                    "adjustment of {} exceeds available security deposit {}",
                    request.amount_paid, loan.available_security_deposit
                ),
            });
        }

        Ok(())
    }

    /// remember accruals booked for this repayment and the demands they raised
    fn track_ad_hoc(&self, book: &LoanBook, repayment: &mut Repayment, accruals: Vec<AccrualId>) {
        let raised: Vec<Uuid> = book
            .demands
            .values()
            .filter(|demand| demand.is_submitted())
            .filter(|demand| demand.interest_accrual.map_or(false, |accrual| accruals.contains(&accrual)))
            .map(|demand| demand.id)
            .collect();
        repayment.ad_hoc_demands.extend(raised);
        repayment.ad_hoc_accruals.extend(accruals);
    }

    /// settle one demand and the accrual behind it
    fn settle(&self, book: &mut LoanBook, repayment: &mut Repayment, demand_id: Uuid, amount: Money) -> Result<()> {
        let waiver = repayment.repayment_type.is_waiver();
        let demand = book.demand_mut(demand_id)?;
        demand.settle(amount, waiver);
        let demand = demand.clone();

        let mut unsuspended = false;
        if let Some(accrual_id) = demand.interest_accrual {
            let accrual = book.accrual_mut(accrual_id)?;
            match demand.demand_subtype {
                DemandSubtype::Interest | DemandSubtype::Penalty => {
                    accrual.paid_interest_amount += amount;
                    unsuspended = accrual.in_suspense;
                }
                DemandSubtype::AdditionalInterest => {
                    accrual.paid_additional_interest_amount += amount;
                    unsuspended = accrual.in_suspense;
                }
                DemandSubtype::Principal => accrual.paid_principal_amount += amount,
                DemandSubtype::Charge(_) => {}
            }
        }

        match &demand.demand_subtype {
            DemandSubtype::Principal => repayment.principal_amount_paid += amount,
            DemandSubtype::Interest => repayment.total_interest_paid += amount,
            DemandSubtype::Penalty | DemandSubtype::AdditionalInterest => repayment.total_penalty_paid += amount,
            DemandSubtype::Charge(_) => {
                repayment.total_paid_charges += amount;
                if let Some(invoice) = &demand.sales_invoice {
                    repayment.pending_charges.push(PendingCharge {
                        sales_invoice: invoice.clone(),
                        allocated_amount: amount,
                    });
                }
            }
        }

        debug!(demand = %demand.id, subtype = ?demand.demand_subtype, amount = %amount, waiver, "demand settled");
        repayment.repayment_details.push(RepaymentDetail {
            demand: demand.id,
            interest_accrual: demand.interest_accrual,
            demand_type: demand.demand_type,
            demand_subtype: demand.demand_subtype,
            paid_amount: amount,
            unsuspended,
        });
        Ok(())
    }

    /// one return invoice per waived charge invoice
    fn issue_credit_notes(&self, book: &mut LoanBook, repayment: &Repayment) {
        for charge in &repayment.pending_charges {
            let note = CreditNote::against(repayment.against_loan, repayment.id, repayment.posting_date, charge);
            debug!(loan = %note.loan, return_against = %note.return_against, amount = %note.rate, "credit note issued");
            book.emit(Event::CreditNoteIssued {
                loan_id: note.loan,
                return_against: note.return_against.clone(),
                amount: note.rate,
                posting_date: note.posting_date,
            });
            book.credit_notes.insert(note.id, note);
        }
    }

    /// amount left after every due demand is settled
    fn apply_excess(
        &self,
        book: &mut LoanBook,
        repayment: &mut Repayment,
        request: &RepaymentRequest,
        mut remaining: Money,
    ) -> Result<Money> {
        let loan = book.loan(request.loan_id)?.clone();
        let repayment_type = request.repayment_type;

        if !repayment_type.is_collection() {
            return Err(ServicingError::WaiverExceedsOverdue {
                component: format!("{:?}", repayment_type),
                overdue: request.amount_paid - remaining,
                requested: request.amount_paid,
            });
        }

        if loan.is_scheduled() && !repayment_type.allows_excess() {
            return Err(ServicingError::rejected(format!(
                "amount paid exceeds payable by {}, post it as a pre payment",
                remaining
            )));
        }

        let booked = AccrualEngine::new(self.catalog).book_unbooked_interest(
            book,
            loan.id,
            request.posting_date,
            AccrualType::Repayment,
        )?;
        self.track_ad_hoc(book, repayment, booked.clone());

        for accrual in booked {
            let demand = book
                .accruals
                .get(&accrual)
                .and_then(|accrual| accrual.loan_demand)
                .and_then(|demand| book.demands.get(&demand))
                .map(|demand| (demand.id, demand.outstanding_amount));
            if let Some((demand_id, outstanding)) = demand {
                let paid = remaining.min(outstanding);
                if paid.is_positive() {
                    self.settle(book, repayment, demand_id, paid)?;
                    remaining -= paid;
                }
            }
        }

        if remaining.is_positive() {
            repayment.excess_principal_paid = remaining;
            repayment.principal_amount_paid += remaining;
        }
        Ok(Money::ZERO)
    }

    /// ledger pairs for a repayment, principal first then each detail
    fn gl_pairs(&self, product: &LoanProduct, repayment: &Repayment) -> Result<Vec<GlPair>> {
        let waiver = repayment.repayment_type.is_waiver();
        let payment_account = product.account(payment_account_role(repayment.repayment_type))?;
        let remarks = format!("{:?}", repayment.repayment_type);

        let mut pairs = vec![GlPair::new(
            payment_account.clone(),
            product.account(AccountRole::LoanAccount)?,
            repayment.principal_amount_paid,
            &remarks,
        )];

        for detail in &repayment.repayment_details {
            match IncomeAccounts::for_subtype(&detail.demand_subtype) {
                Some(accounts) if detail.unsuspended && waiver => pairs.push(GlPair::new(
                    product.account(accounts.suspense_income)?,
                    product.account(accounts.suspense_receivable)?,
                    detail.paid_amount,
                    &remarks,
                )),
                Some(accounts) if detail.unsuspended => {
                    pairs.push(GlPair::new(
                        payment_account.clone(),
                        product.account(accounts.suspense_receivable)?,
                        detail.paid_amount,
                        &remarks,
                    ));
                    pairs.push(GlPair::new(
                        product.account(accounts.suspense_income)?,
                        product.account(accounts.income)?,
                        detail.paid_amount,
                        &remarks,
                    ));
                }
                Some(accounts) => pairs.push(GlPair::new(
                    payment_account.clone(),
                    product.account(accounts.receivable)?,
                    detail.paid_amount,
                    &remarks,
                )),
                None if matches!(detail.demand_subtype, DemandSubtype::Charge(_)) => pairs.push(GlPair::new(
                    payment_account.clone(),
                    product.account(AccountRole::ChargesReceivable)?,
                    detail.paid_amount,
                    &remarks,
                )),
                // principal is posted in one pair above
                None => {}
            }
        }

        Ok(pairs)
    }

    fn restore_limit(
        &self,
        book: &mut LoanBook,
        loan_id: LoanId,
        date: NaiveDate,
        principal: Money,
        change: LimitChange,
    ) -> Result<()> {
        if principal.is_zero() {
            return Ok(());
        }

        let loan = book.loan_mut(loan_id)?;
        let limit = match loan.credit_limit.as_mut() {
            Some(limit) => limit,
            None => return Ok(()),
        };
        match change {
            LimitChange::RepaymentCancelled => limit.utilize(principal),
            _ => limit.restore(principal),
        }

        let log = LimitChangeLog {
            loan: loan_id,
            date,
            change,
            amount: principal,
            available_limit_amount: limit.available_limit_amount,
            utilized_limit_amount: limit.utilized_limit_amount,
        };
        debug!(loan = %loan_id, available = %log.available_limit_amount, "credit limit updated");
        book.audit.limit_change_logs.push(log);
        Ok(())
    }

    fn close_if_repaid(
        &self,
        book: &mut LoanBook,
        loan_id: LoanId,
        posting_date: NaiveDate,
        product: &LoanProduct,
    ) -> Result<()> {
        let outstanding = book.outstanding(loan_id, posting_date, DemandFilter::All);
        let loan = book.loan_mut(loan_id)?;
        if !loan.status.is_open() || loan.pending_principal_amount().is_positive() {
            return Ok(());
        }

        let status = if !loan.is_secured_loan && outstanding <= product.auto_close_tolerance {
            LoanStatus::Closed
        } else {
            LoanStatus::LoanClosureRequested
        };
        let old_status = loan.update_status(status);

        info!(loan = %loan_id, from = ?old_status, to = ?status, "loan repaid");
        book.emit(Event::StatusChanged {
            loan_id,
            old_status,
            new_status: status,
            posting_date,
        });
        if status == LoanStatus::Closed {
            book.emit(Event::LoanClosed { loan_id, posting_date });
        }
        Ok(())
    }

    /// reverse a submitted repayment exactly
    pub fn cancel(&self, book: &mut LoanBook, repayment_id: RepaymentId, reclassify: bool) -> Result<()> {
        let repayment = book.repayment(repayment_id)?.clone();
        if !repayment.is_submitted() {
            return Err(ServicingError::InvalidState {
                document: "Loan Repayment".to_string(),
                id: repayment_id,
                current: format!("{:?}", repayment.docstatus),
                expected: "Submitted".to_string(),
            });
        }

        if let Some(later) = book
            .repayments_of(repayment.against_loan)
            .into_iter()
            .find(|other| other.id != repayment.id && other.posting_date > repayment.posting_date)
        {
            return Err(ServicingError::FutureEntryExists {
                loan: repayment.against_loan,
                document: "Loan Repayment".to_string(),
                date: later.posting_date,
            });
        }

        let waiver = repayment.repayment_type.is_waiver();
        for detail in repayment.repayment_details.iter().rev() {
            book.demand_mut(detail.demand)?.unsettle(detail.paid_amount, waiver);
            if let Some(accrual_id) = detail.interest_accrual {
                let accrual = book.accrual_mut(accrual_id)?;
                match detail.demand_subtype {
                    DemandSubtype::Interest | DemandSubtype::Penalty => accrual.paid_interest_amount -= detail.paid_amount,
                    DemandSubtype::AdditionalInterest => accrual.paid_additional_interest_amount -= detail.paid_amount,
                    DemandSubtype::Principal => accrual.paid_principal_amount -= detail.paid_amount,
                    DemandSubtype::Charge(_) => {}
                }
            }
        }

        let loan_id = repayment.against_loan;
        {
            let loan = book.loan_mut(loan_id)?;
            loan.total_principal_paid -= repayment.principal_amount_paid;
            if repayment.repayment_type.is_collection() {
                loan.total_amount_paid -= repayment.amount_paid;
            }
            if draws_security_deposit(repayment.repayment_type) {
                loan.available_security_deposit += repayment.amount_paid;
            }
            loan.shortfall_amount += repayment.shortfall_paid;
        }
        self.restore_limit(
            book,
            loan_id,
            repayment.posting_date,
            repayment.principal_amount_paid,
            LimitChange::RepaymentCancelled,
        )?;

        book.ledger.reverse(repayment.id, repayment.posting_date);

        let notes: Vec<Uuid> = book
            .credit_notes
            .values()
            .filter(|note| note.repayment == repayment_id && note.docstatus == DocStatus::Submitted)
            .map(|note| note.id)
            .collect();
        for id in notes {
            if let Some(note) = book.credit_notes.get_mut(&id) {
                note.docstatus = DocStatus::Cancelled;
                let event = Event::CreditNoteCancelled {
                    loan_id: note.loan,
                    return_against: note.return_against.clone(),
                    posting_date: repayment.posting_date,
                };
                book.emit(event);
            }
        }

        for demand in &repayment.ad_hoc_demands {
            book.demand_mut(*demand)?.docstatus = DocStatus::Cancelled;
        }
        for accrual in &repayment.ad_hoc_accruals {
            book.accrual_mut(*accrual)?.docstatus = DocStatus::Cancelled;
            book.ledger.reverse(*accrual, repayment.posting_date);
        }
        PenaltyEngine::new(self.catalog).restore_penal_accruals(
            book,
            &repayment.reversed_accruals,
            &repayment.reversed_demands,
        )?;

        let old_status = {
            let loan = book.loan_mut(loan_id)?;
            loan.days_past_due = repayment.days_past_due_before;
            loan.update_status(repayment.status_before)
        };
        if old_status != repayment.status_before {
            book.emit(Event::StatusChanged {
                loan_id,
                old_status,
                new_status: repayment.status_before,
                posting_date: repayment.posting_date,
            });
        }

        if let Some(stored) = book.repayments.get_mut(&repayment_id) {
            stored.docstatus = DocStatus::Cancelled;
        }

        info!(loan = %loan_id, repayment = %repayment_id, amount = %repayment.amount_paid, "repayment cancelled");
        book.emit(Event::RepaymentCancelled {
            loan_id,
            amount: repayment.amount_paid,
            posting_date: repayment.posting_date,
        });

        if reclassify && book.loan(loan_id)?.status.is_classifiable() {
            ClassificationEngine::new(self.catalog).classify_loan(book, loan_id, repayment.posting_date, Uuid::new_v4())?;
        }
        Ok(())
    }

    /// repayment types in the order a waiver or write-off clears dues
    pub fn waiver_type(filter: DemandFilter) -> Option<RepaymentType> {
        match filter {
            DemandFilter::Interest => Some(RepaymentType::InterestWaiver),
            DemandFilter::Penalty => Some(RepaymentType::PenaltyWaiver),
            DemandFilter::Charges => Some(RepaymentType::ChargesWaiver),
            DemandFilter::All | DemandFilter::Principal => None,
        }
    }

    /// waive every outstanding interest, penalty and charge up to the date
    pub fn waive_outstanding(
        &self,
        book: &mut LoanBook,
        loan_id: LoanId,
        posting_date: NaiveDate,
        restructure: Option<Uuid>,
    ) -> Result<Vec<RepaymentId>> {
        let mut waivers = Vec::new();
        for filter in [DemandFilter::Penalty, DemandFilter::Interest, DemandFilter::Charges] {
            let outstanding = book.outstanding(loan_id, posting_date, filter);
            let repayment_type = match Self::waiver_type(filter) {
                Some(repayment_type) if outstanding.is_positive() => repayment_type,
                _ => continue,
            };

            let mut request = RepaymentRequest::new(loan_id, posting_date, outstanding, repayment_type);
            request.skip_classification = true;
            request.loan_restructure = restructure;
            waivers.push(self.submit(book, &request)?);
        }
        Ok(waivers)
    }
}
