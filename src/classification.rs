use chrono::NaiveDate;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{DpdLog, NpaLog};
use crate::config::{fldg_amount, Catalog};
use crate::errors::{Result, ServicingError};
use crate::events::Event;
use crate::ledger::{GlPair, VoucherType};
use crate::lifecycle::WriteOffController;
use crate::payments::SuspenseMover;
use crate::store::LoanBook;
use crate::types::{Applicant, DemandFilter, DemandSubtype, DemandType, LoanId};

/// days past due, asset classification and npa marking
pub struct ClassificationEngine<'a> {
    catalog: &'a Catalog,
}

impl<'a> ClassificationEngine<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// days since the oldest unpaid instalment, counted to the freeze date for frozen loans
    pub fn days_past_due(&self, book: &LoanBook, loan_id: LoanId, posting_date: NaiveDate) -> Result<u32> {
        let loan = book.loan(loan_id)?;
        let cutoff = loan.servicing_cutoff(posting_date);

        let oldest = book
            .unpaid_demands(loan_id, cutoff, DemandFilter::All)
            .into_iter()
            .filter(|demand| matches!(demand.demand_type, DemandType::Emi | DemandType::Normal))
            .filter(|demand| matches!(demand.demand_subtype, DemandSubtype::Principal | DemandSubtype::Interest))
            .map(|demand| demand.demand_date)
            .min();

        Ok(oldest.map_or(0, |due| (cutoff - due).num_days().max(0) as u32))
    }

    /// classify one loan, returns its days past due
    pub fn classify_loan(
        &self,
        book: &mut LoanBook,
        loan_id: LoanId,
        posting_date: NaiveDate,
        run: Uuid,
    ) -> Result<u32> {
        let days_past_due = self.days_past_due(book, loan_id, posting_date)?;
        let (code, name) = match self.catalog.policy.classify(days_past_due) {
            Some((code, name)) => (Some(code.to_string()), Some(name.to_string())),
            None => (None, None),
        };

        let loan = book.loan_mut(loan_id)?;
        loan.days_past_due = days_past_due;
        loan.classification_code = code.clone();
        loan.classification_name = name;
        let loan = loan.clone();

        book.audit.dpd_logs.push(DpdLog {
            loan: loan_id,
            posting_date,
            days_past_due,
            classification_code: code.clone(),
            process_loan_classification: run,
        });
        debug!(loan = %loan_id, dpd = days_past_due, code = ?code, "loan classified");
        book.emit(Event::LoanClassified {
            loan_id,
            days_past_due,
            classification_code: code,
            posting_date,
        });

        let product = self.catalog.product(&loan.loan_product)?;
        let threshold = product.days_past_due_threshold_for_npa;
        let flagged = loan.is_npa || loan.manual_npa;

        if threshold > 0 && days_past_due > threshold && !flagged {
            self.propagate_npa(book, loan_id, true, posting_date)?;
        } else if flagged
            && !loan.in_watch_period(posting_date)
            && self.max_days_past_due(book, &loan.applicant) == 0
        {
            self.propagate_npa(book, loan_id, false, posting_date)?;
        }

        self.trigger_fldg(book, loan_id, days_past_due, posting_date)?;

        if let Some(limit) = self.catalog.policy.days_past_due_threshold_for_auto_write_off {
            let loan = book.loan(loan_id)?;
            if days_past_due > limit && loan.status.is_open() && loan.pending_principal_amount().is_positive() {
                info!(loan = %loan_id, dpd = days_past_due, "auto write off");
                WriteOffController::new(self.catalog).write_off(book, loan_id, posting_date, None)?;
            }
        }

        Ok(days_past_due)
    }

    /// worst days past due across an applicant's loans
    pub fn max_days_past_due(&self, book: &LoanBook, applicant: &Applicant) -> u32 {
        book.loans_of(applicant)
            .into_iter()
            .filter_map(|id| book.loans.get(&id))
            .filter(|loan| loan.status.is_classifiable())
            .map(|loan| loan.days_past_due)
            .max()
            .unwrap_or(0)
    }

    /// loans the classification job runs over, in id order
    pub fn eligible_loans(&self, book: &LoanBook) -> Vec<LoanId> {
        book.loans
            .values()
            .filter(|loan| loan.status.is_classifiable())
            .map(|loan| loan.id)
            .collect()
    }

    /// operator npa marking, un-marking waits for the watch period
    pub fn update_manual_npa(
        &self,
        book: &mut LoanBook,
        loan_id: LoanId,
        manual_npa: bool,
        posting_date: NaiveDate,
    ) -> Result<()> {
        let loan = book.loan(loan_id)?;
        if !manual_npa {
            if let Some(end) = loan.watch_period_end_date.filter(|_| loan.in_watch_period(posting_date)) {
                return Err(ServicingError::WatchPeriodActive {
                    watch_period_end_date: end,
                });
            }
        }

        self.propagate_npa(book, loan_id, manual_npa, posting_date)?;
        Ok(())
    }

    /// exclude a loan from npa propagation, clearing its flag when set
    pub fn set_unmark_npa(
        &self,
        book: &mut LoanBook,
        loan_id: LoanId,
        unmark_npa: bool,
        posting_date: NaiveDate,
    ) -> Result<()> {
        book.loan_mut(loan_id)?.unmark_npa = unmark_npa;
        if unmark_npa {
            self.flag_npa(book, loan_id, false, posting_date)?;
        }
        Ok(())
    }

    /// flip the loan and every other open loan of the applicant, in id order
    fn propagate_npa(
        &self,
        book: &mut LoanBook,
        loan_id: LoanId,
        is_npa: bool,
        posting_date: NaiveDate,
    ) -> Result<Vec<LoanId>> {
        let applicant = book.loan(loan_id)?.applicant.clone();

        let mut targets: Vec<LoanId> = book
            .loans_of(&applicant)
            .into_iter()
            .filter(|id| *id != loan_id)
            .filter(|id| {
                book.loans.get(id).map_or(false, |other| {
                    other.status.is_open() && !other.unmark_npa && !other.in_watch_period(posting_date)
                })
            })
            .collect();
        targets.push(loan_id);
        targets.sort();

        let mut flipped = Vec::new();
        for id in targets {
            if self.flag_npa(book, id, is_npa, posting_date)? {
                flipped.push(id);
            }
        }

        book.applicants_npa.insert(applicant, is_npa);
        Ok(flipped)
    }

    /// set both npa flags on one loan, moving its income in or out of suspense
    pub(crate) fn flag_npa(&self, book: &mut LoanBook, loan_id: LoanId, is_npa: bool, posting_date: NaiveDate) -> Result<bool> {
        let loan = book.loan_mut(loan_id)?;
        if loan.is_npa == is_npa && loan.manual_npa == is_npa {
            return Ok(false);
        }
        loan.is_npa = is_npa;
        loan.manual_npa = is_npa;
        let applicant = loan.applicant.clone();

        let mover = SuspenseMover::new(self.catalog);
        if is_npa {
            mover.move_to_suspense(book, loan_id, posting_date)?;
        } else {
            mover.release_from_suspense(book, loan_id, posting_date)?;
        }

        book.audit.log_npa(NpaLog {
            loan: loan_id,
            applicant,
            posting_date,
            is_npa,
            manual_npa: is_npa,
            delinked: false,
        });
        info!(loan = %loan_id, is_npa, "npa status changed");
        book.emit(Event::NpaStatusChanged {
            loan_id,
            is_npa,
            posting_date,
        });
        Ok(true)
    }

    /// invoke the partner guarantee once the loan crosses the partner's trigger
    fn trigger_fldg(&self, book: &mut LoanBook, loan_id: LoanId, days_past_due: u32, posting_date: NaiveDate) -> Result<()> {
        let loan = book.loan(loan_id)?;
        let partner_name = match &loan.loan_partner {
            Some(name) if !loan.fldg_triggered => name.clone(),
            _ => return Ok(()),
        };
        let partner = self.catalog.partner(&partner_name)?;
        if partner.fldg_trigger_dpd.map_or(true, |trigger| days_past_due <= trigger) {
            return Ok(());
        }

        let fldg_account = partner
            .fldg_account
            .clone()
            .ok_or_else(|| ServicingError::missing_account(&partner.name, "fldg_account"))?;
        let payable_account = partner
            .partner_payable_account
            .clone()
            .ok_or_else(|| ServicingError::missing_account(&partner.name, "partner_payable_account"))?;

        let amount = fldg_amount(partner, loan.pending_principal_amount());
        let product = self.catalog.product(&loan.loan_product)?;
        let cost_center = self.catalog.cost_center(product);

        book.loan_mut(loan_id)?.fldg_triggered = true;
        if amount.is_positive() {
            book.post(
                loan_id,
                posting_date,
                &cost_center,
                VoucherType::Fldg,
                Uuid::new_v4(),
                &[GlPair::new(fldg_account, payable_account, amount, "FLDG invoked")],
            )?;
        } else {
            warn!(loan = %loan_id, partner = %partner.name, "fldg triggered with nothing to cover");
        }

        info!(loan = %loan_id, partner = %partner.name, amount = %amount, "fldg triggered");
        book.emit(Event::FldgTriggered {
            loan_id,
            partner: partner.name.clone(),
            amount,
            posting_date,
        });
        Ok(())
    }
}
