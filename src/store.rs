use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::ops::Deref;
use uuid::Uuid;

use crate::audit::AuditTrail;
use crate::decimal::Money;
use crate::errors::{Result, ServicingError};
use crate::events::{Event, EventStore};
use crate::ledger::{GlPair, Ledger, PostingContext, VoucherType};
use crate::records::{
    CreditNote, Demand, Disbursement, InterestAccrual, Repayment, RepaymentSchedule, Restructure, WriteOff,
};
use crate::state::{Loan, LoanSnapshot};
use crate::types::{
    AccrualId, Applicant, DemandFilter, DemandId, DisbursementId, InterestType, LoanId,
    RepaymentId, RestructureId, ScheduleId, ScheduleStatus,
};

/// keyed records that remember what each open transaction overwrote
///
/// Reads go through `Deref` to the map. Writes must use `insert` or `get_mut`
/// so the prior value is journaled once per savepoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Table<K, V> {
    rows: BTreeMap<K, V>,
    undo: Vec<BTreeMap<K, Option<V>>>,
}

impl<K, V> Default for Table<K, V> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            undo: Vec::new(),
        }
    }
}

impl<K, V> Deref for Table<K, V> {
    type Target = BTreeMap<K, V>;

    fn deref(&self) -> &Self::Target {
        &self.rows
    }
}

impl<K: Ord + Clone, V: Clone> Table<K, V> {
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.remember(&key);
        self.rows.insert(key, value)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.remember(key);
        self.rows.get_mut(key)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.remember(key);
        self.rows.remove(key)
    }

    fn remember(&mut self, key: &K) {
        if let Some(frame) = self.undo.last_mut() {
            if !frame.contains_key(key) {
                frame.insert(key.clone(), self.rows.get(key).cloned());
            }
        }
    }

    fn savepoint(&mut self) {
        self.undo.push(BTreeMap::new());
    }

    fn release(&mut self) {
        if let Some(frame) = self.undo.pop() {
            if let Some(parent) = self.undo.last_mut() {
                for (key, original) in frame {
                    parent.entry(key).or_insert(original);
                }
            }
        }
    }

    fn rollback(&mut self) {
        if let Some(frame) = self.undo.pop() {
            for (key, original) in frame {
                match original {
                    Some(value) => {
                        self.rows.insert(key, value);
                    }
                    None => {
                        self.rows.remove(&key);
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct BookMark {
    events: usize,
    snapshots: usize,
}

/// in-memory single-writer record store
#[derive(Debug, Clone, Default)]
pub struct LoanBook {
    pub loans: Table<LoanId, Loan>,
    pub schedules: Table<ScheduleId, RepaymentSchedule>,
    pub disbursements: Table<DisbursementId, Disbursement>,
    pub demands: Table<DemandId, Demand>,
    pub accruals: Table<AccrualId, InterestAccrual>,
    pub repayments: Table<RepaymentId, Repayment>,
    pub restructures: Table<RestructureId, Restructure>,
    pub write_offs: Table<Uuid, WriteOff>,
    pub credit_notes: Table<Uuid, CreditNote>,
    pub ledger: Ledger,
    pub audit: AuditTrail,
    pub events: EventStore,
    pub snapshots: Vec<LoanSnapshot>,
    /// applicant level npa mirror
    pub applicants_npa: Table<Applicant, bool>,
    marks: Vec<BookMark>,
}

impl LoanBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// run a unit of work, undoing every write it made unless it succeeds
    ///
    /// Only the records the work touches are journaled, so the cost follows
    /// the size of the change rather than the size of the book.
    pub fn transaction<T, F>(&mut self, work: F) -> Result<T>
    where
        F: FnOnce(&mut LoanBook) -> Result<T>,
    {
        self.savepoint();
        match work(self) {
            Ok(output) => {
                self.release();
                Ok(output)
            }
            Err(err) => {
                self.rollback();
                Err(err)
            }
        }
    }

    fn savepoint(&mut self) {
        self.marks.push(BookMark {
            events: self.events.len(),
            snapshots: self.snapshots.len(),
        });
        self.loans.savepoint();
        self.schedules.savepoint();
        self.disbursements.savepoint();
        self.demands.savepoint();
        self.accruals.savepoint();
        self.repayments.savepoint();
        self.restructures.savepoint();
        self.write_offs.savepoint();
        self.credit_notes.savepoint();
        self.applicants_npa.savepoint();
        self.ledger.savepoint();
        self.audit.savepoint();
    }

    fn release(&mut self) {
        self.marks.pop();
        self.loans.release();
        self.schedules.release();
        self.disbursements.release();
        self.demands.release();
        self.accruals.release();
        self.repayments.release();
        self.restructures.release();
        self.write_offs.release();
        self.credit_notes.release();
        self.applicants_npa.release();
        self.ledger.release();
        self.audit.release();
    }

    fn rollback(&mut self) {
        if let Some(mark) = self.marks.pop() {
            self.events.truncate(mark.events);
            self.snapshots.truncate(mark.snapshots);
        }
        self.loans.rollback();
        self.schedules.rollback();
        self.disbursements.rollback();
        self.demands.rollback();
        self.accruals.rollback();
        self.repayments.rollback();
        self.restructures.rollback();
        self.write_offs.rollback();
        self.credit_notes.rollback();
        self.applicants_npa.rollback();
        self.ledger.rollback();
        self.audit.rollback();
    }

    pub fn loan(&self, id: LoanId) -> Result<&Loan> {
        self.loans.get(&id).ok_or_else(|| ServicingError::not_found("Loan", id))
    }

    pub fn loan_mut(&mut self, id: LoanId) -> Result<&mut Loan> {
        self.loans
            .get_mut(&id)
            .ok_or_else(|| ServicingError::not_found("Loan", id))
    }

    pub fn schedule(&self, id: ScheduleId) -> Result<&RepaymentSchedule> {
        self.schedules
            .get(&id)
            .ok_or_else(|| ServicingError::not_found("Loan Repayment Schedule", id))
    }

    pub fn schedule_mut(&mut self, id: ScheduleId) -> Result<&mut RepaymentSchedule> {
        self.schedules
            .get_mut(&id)
            .ok_or_else(|| ServicingError::not_found("Loan Repayment Schedule", id))
    }

    pub fn demand_mut(&mut self, id: DemandId) -> Result<&mut Demand> {
        self.demands
            .get_mut(&id)
            .ok_or_else(|| ServicingError::not_found("Loan Demand", id))
    }

    pub fn accrual_mut(&mut self, id: AccrualId) -> Result<&mut InterestAccrual> {
        self.accruals
            .get_mut(&id)
            .ok_or_else(|| ServicingError::not_found("Loan Interest Accrual", id))
    }

    pub fn repayment(&self, id: RepaymentId) -> Result<&Repayment> {
        self.repayments
            .get(&id)
            .ok_or_else(|| ServicingError::not_found("Loan Repayment", id))
    }

    pub fn restructure(&self, id: RestructureId) -> Result<&Restructure> {
        self.restructures
            .get(&id)
            .ok_or_else(|| ServicingError::not_found("Loan Restructure", id))
    }

    /// the single active schedule of a loan
    pub fn active_schedule(&self, loan: LoanId) -> Option<&RepaymentSchedule> {
        self.schedules
            .values()
            .find(|schedule| schedule.loan == loan && schedule.status == ScheduleStatus::Active)
    }

    pub fn active_schedule_id(&self, loan: LoanId) -> Option<ScheduleId> {
        self.active_schedule(loan).map(|schedule| schedule.id)
    }

    /// submitted demands of a loan in date order
    pub fn demands_of(&self, loan: LoanId) -> Vec<&Demand> {
        let mut demands: Vec<&Demand> = self
            .demands
            .values()
            .filter(|demand| demand.loan == loan && demand.is_submitted())
            .collect();
        demands.sort_by(|a, b| {
            (a.demand_date, a.demand_type, &a.demand_subtype)
                .cmp(&(b.demand_date, b.demand_type, &b.demand_subtype))
        });
        demands
    }

    /// outstanding demands due on or before the posting date
    pub fn unpaid_demands(
        &self,
        loan: LoanId,
        posting_date: NaiveDate,
        filter: DemandFilter,
    ) -> Vec<&Demand> {
        self.demands_of(loan)
            .into_iter()
            .filter(|demand| demand.demand_date <= posting_date)
            .filter(|demand| demand.outstanding_amount.is_positive())
            .filter(|demand| filter.matches(demand.demand_type, &demand.demand_subtype))
            .collect()
    }

    pub fn outstanding(&self, loan: LoanId, posting_date: NaiveDate, filter: DemandFilter) -> Money {
        self.unpaid_demands(loan, posting_date, filter)
            .iter()
            .map(|demand| demand.outstanding_amount)
            .sum()
    }

    /// submitted accruals of a loan in posting order
    pub fn accruals_of(&self, loan: LoanId) -> Vec<&InterestAccrual> {
        let mut accruals: Vec<&InterestAccrual> = self
            .accruals
            .values()
            .filter(|accrual| accrual.loan == loan && accrual.is_submitted())
            .collect();
        accruals.sort_by_key(|accrual| (accrual.posting_date, accrual.interest_type));
        accruals
    }

    pub fn last_accrual(&self, loan: LoanId, interest_type: InterestType) -> Option<&InterestAccrual> {
        self.accruals_of(loan)
            .into_iter()
            .filter(|accrual| accrual.interest_type == interest_type)
            .last()
    }

    /// submitted repayments of a loan in posting order
    pub fn repayments_of(&self, loan: LoanId) -> Vec<&Repayment> {
        let mut repayments: Vec<&Repayment> = self
            .repayments
            .values()
            .filter(|repayment| repayment.against_loan == loan && repayment.is_submitted())
            .collect();
        repayments.sort_by_key(|repayment| repayment.posting_date);
        repayments
    }

    pub fn disbursements_of(&self, loan: LoanId) -> Vec<&Disbursement> {
        let mut disbursements: Vec<&Disbursement> = self
            .disbursements
            .values()
            .filter(|disbursement| {
                disbursement.against_loan == loan
                    && disbursement.docstatus == crate::types::DocStatus::Submitted
            })
            .collect();
        disbursements.sort_by_key(|disbursement| disbursement.disbursement_date);
        disbursements
    }

    /// every loan of an applicant in id order
    pub fn loans_of(&self, applicant: &Applicant) -> Vec<LoanId> {
        self.loans
            .values()
            .filter(|loan| &loan.applicant == applicant)
            .map(|loan| loan.id)
            .collect()
    }

    /// post balanced pairs for a loan voucher
    pub fn post(
        &mut self,
        loan: LoanId,
        posting_date: NaiveDate,
        cost_center: &str,
        voucher_type: VoucherType,
        voucher_no: Uuid,
        pairs: &[GlPair],
    ) -> Result<()> {
        let applicant = self.loan(loan)?.applicant.clone();
        let context = PostingContext {
            posting_date,
            applicant,
            against_voucher: loan,
            cost_center: cost_center.to_string(),
            voucher_type,
            voucher_no,
        };
        self.ledger.emit_gl_entries(&context, pairs);
        Ok(())
    }

    pub fn emit(&mut self, event: Event) {
        self.events.emit(event);
    }

    pub fn snapshot(&mut self, loan: LoanId, posting_date: NaiveDate, trigger: String) -> Result<()> {
        let snapshot = LoanSnapshot::capture(self.loan(loan)?, posting_date, trigger);
        self.snapshots.push(snapshot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Rate;
    use crate::state::LoanApplication;
    use crate::types::{DemandSubtype, DemandType, ScheduleType};

    fn book_with_loan() -> (LoanBook, LoanId) {
        let application = LoanApplication::demand_loan(
            Applicant::Customer("CUST-0001".to_string()),
            "Demand Loan",
            Money::from_major(1_000),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        );
        let loan = Loan::new(
            &application,
            Rate::from_percentage(12),
            Rate::from_percentage(25),
            false,
            ScheduleType::MonthlyAsPerRepaymentStartDate,
        );
        let id = loan.id;
        let mut book = LoanBook::new();
        book.loans.insert(id, loan);
        (book, id)
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let (mut book, id) = book_with_loan();

        let result: Result<()> = book.transaction(|tx| {
            tx.loan_mut(id)?.total_amount_paid = Money::from_major(500);
            Err(ServicingError::rejected("abort"))
        });

        assert!(result.is_err());
        assert_eq!(book.loan(id).unwrap().total_amount_paid, Money::ZERO);

        book.transaction(|tx| {
            tx.loan_mut(id)?.total_amount_paid = Money::from_major(500);
            Ok(())
        })
        .unwrap();
        assert_eq!(book.loan(id).unwrap().total_amount_paid, Money::from_major(500));
    }

    #[test]
    fn test_rollback_undoes_only_touched_records() {
        let (mut book, id) = book_with_loan();
        let kept = Demand::new(
            id,
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            DemandType::Normal,
            DemandSubtype::Interest,
            Money::from_major(10),
        );
        let kept_id = kept.id;
        book.demands.insert(kept_id, kept);

        let result: Result<()> = book.transaction(|tx| {
            tx.demand_mut(kept_id)?.settle(Money::from_major(4), false);
            let added = Demand::new(
                id,
                NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                DemandType::Normal,
                DemandSubtype::Interest,
                Money::from_major(10),
            );
            tx.demands.insert(added.id, added);
            tx.applicants_npa.insert(Applicant::Customer("CUST-0001".to_string()), true);
            tx.emit(Event::LoanClosed {
                loan_id: id,
                posting_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            });
            tx.snapshot(id, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), "closing".to_string())?;
            Err(ServicingError::rejected("abort"))
        });

        assert!(result.is_err());
        assert_eq!(book.demands.len(), 1);
        assert_eq!(book.demands[&kept_id].outstanding_amount, Money::from_major(10));
        assert!(book.applicants_npa.is_empty());
        assert!(book.events.is_empty());
        assert!(book.snapshots.is_empty());
    }

    #[test]
    fn test_nested_rollback_keeps_outer_work() {
        let (mut book, id) = book_with_loan();

        book.transaction(|tx| {
            tx.loan_mut(id)?.total_amount_paid = Money::from_major(100);
            let inner: Result<()> = tx.transaction(|inner| {
                inner.loan_mut(id)?.total_amount_paid = Money::from_major(900);
                Err(ServicingError::rejected("inner"))
            });
            assert!(inner.is_err());
            Ok(())
        })
        .unwrap();
        assert_eq!(book.loan(id).unwrap().total_amount_paid, Money::from_major(100));

        let outer: Result<()> = book.transaction(|tx| {
            tx.transaction(|inner| {
                inner.loan_mut(id)?.total_amount_paid = Money::from_major(900);
                Ok(())
            })?;
            Err(ServicingError::rejected("outer"))
        });
        assert!(outer.is_err());
        assert_eq!(book.loan(id).unwrap().total_amount_paid, Money::from_major(100));
    }

    #[test]
    fn test_unpaid_demands_are_date_ordered() {
        let (mut book, id) = book_with_loan();
        let later = Demand::new(
            id,
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            DemandType::Normal,
            DemandSubtype::Interest,
            Money::from_major(10),
        );
        let earlier = Demand::new(
            id,
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            DemandType::Normal,
            DemandSubtype::Interest,
            Money::from_major(10),
        );
        let earlier_id = earlier.id;
        book.demands.insert(later.id, later);
        book.demands.insert(earlier.id, earlier);

        let unpaid = book.unpaid_demands(id, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), DemandFilter::All);
        assert_eq!(unpaid.len(), 2);
        assert_eq!(unpaid[0].id, earlier_id);

        let unpaid = book.unpaid_demands(id, NaiveDate::from_ymd_opt(2024, 2, 15).unwrap(), DemandFilter::All);
        assert_eq!(unpaid.len(), 1);
        assert_eq!(book.outstanding(id, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), DemandFilter::Interest), Money::from_major(20));
    }

    #[test]
    fn test_missing_loan_is_integrity_error() {
        let book = LoanBook::new();
        let err = book.loan(Uuid::new_v4()).unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::Integrity);
    }
}
