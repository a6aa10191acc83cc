use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;
use crate::types::{Applicant, LoanId};

/// document that produced a ledger row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoucherType {
    LoanDisbursement,
    LoanRepayment,
    InterestAccrual,
    LoanDemand,
    LoanWriteOff,
    LoanRefund,
    SuspenseMove,
    Fldg,
}

/// one side of a posting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlEntry {
    pub posting_date: NaiveDate,
    pub account: String,
    pub debit: Money,
    pub credit: Money,
    pub party_type: String,
    pub party: String,
    pub against_voucher: LoanId,
    pub voucher_type: VoucherType,
    pub voucher_no: Uuid,
    pub cost_center: String,
    pub remarks: String,
    pub is_cancelled: bool,
}

/// balanced debit/credit pair
#[derive(Debug, Clone, PartialEq)]
pub struct GlPair {
    pub debit_account: String,
    pub credit_account: String,
    pub amount: Money,
    pub remarks: String,
}

impl GlPair {
    pub fn new(debit_account: String, credit_account: String, amount: Money, remarks: &str) -> Self {
        Self {
            debit_account,
            credit_account,
            amount,
            remarks: remarks.to_string(),
        }
    }
}

/// party, loan and cost center stamped on every row of a voucher
#[derive(Debug, Clone)]
pub struct PostingContext {
    pub posting_date: NaiveDate,
    pub applicant: Applicant,
    pub against_voucher: LoanId,
    pub cost_center: String,
    pub voucher_type: VoucherType,
    pub voucher_no: Uuid,
}

/// rows posted and flags flipped since a savepoint
#[derive(Debug, Clone, Default)]
struct LedgerMark {
    len: usize,
    cancelled: Vec<usize>,
}

/// append-only general ledger
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    entries: Vec<GlEntry>,
    marks: Vec<LedgerMark>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn savepoint(&mut self) {
        self.marks.push(LedgerMark {
            len: self.entries.len(),
            cancelled: Vec::new(),
        });
    }

    pub(crate) fn release(&mut self) {
        if let Some(mark) = self.marks.pop() {
            if let Some(parent) = self.marks.last_mut() {
                parent.cancelled.extend(mark.cancelled);
            }
        }
    }

    pub(crate) fn rollback(&mut self) {
        if let Some(mark) = self.marks.pop() {
            for idx in mark.cancelled.into_iter().filter(|idx| *idx < mark.len) {
                self.entries[idx].is_cancelled = false;
            }
            self.entries.truncate(mark.len);
        }
    }

    /// post balanced pairs, skipping zero amounts
    pub fn emit_gl_entries(&mut self, context: &PostingContext, pairs: &[GlPair]) {
        for pair in pairs.iter().filter(|pair| !pair.amount.is_zero()) {
            // negative postings flip sides
            let (debit_account, credit_account, amount) = if pair.amount.is_negative() {
                (&pair.credit_account, &pair.debit_account, -pair.amount)
            } else {
                (&pair.debit_account, &pair.credit_account, pair.amount)
            };

            self.entries.push(Self::row(context, debit_account, amount, Money::ZERO, &pair.remarks));
            self.entries.push(Self::row(context, credit_account, Money::ZERO, amount, &pair.remarks));
        }
    }

    fn row(
        context: &PostingContext,
        account: &str,
        debit: Money,
        credit: Money,
        remarks: &str,
    ) -> GlEntry {
        GlEntry {
            posting_date: context.posting_date,
            account: account.to_string(),
            debit,
            credit,
            party_type: context.applicant.party_type().to_string(),
            party: context.applicant.party().to_string(),
            against_voucher: context.against_voucher,
            voucher_type: context.voucher_type,
            voucher_no: context.voucher_no,
            cost_center: context.cost_center.clone(),
            remarks: remarks.to_string(),
            is_cancelled: false,
        }
    }

    /// mark a voucher cancelled and post mirror rows
    pub fn reverse(&mut self, voucher_no: Uuid, posting_date: NaiveDate) {
        let mut mirrors = Vec::new();
        for (idx, entry) in self
            .entries
            .iter_mut()
            .enumerate()
            .filter(|(_, entry)| entry.voucher_no == voucher_no && !entry.is_cancelled)
        {
            entry.is_cancelled = true;
            if let Some(mark) = self.marks.last_mut() {
                mark.cancelled.push(idx);
            }
            mirrors.push(GlEntry {
                posting_date,
                debit: entry.credit,
                credit: entry.debit,
                remarks: format!("reversal of {}", entry.remarks),
                ..entry.clone()
            });
        }
        self.entries.extend(mirrors);
    }

    pub fn entries(&self) -> &[GlEntry] {
        &self.entries
    }

    pub fn entries_for(&self, voucher_no: Uuid) -> impl Iterator<Item = &GlEntry> {
        self.entries.iter().filter(move |entry| entry.voucher_no == voucher_no)
    }

    /// debit minus credit for an account, optionally for one loan
    pub fn balance(&self, account: &str, loan: Option<LoanId>) -> Money {
        self.entries
            .iter()
            .filter(|entry| entry.account == account)
            .filter(|entry| loan.map_or(true, |loan| entry.against_voucher == loan))
            .map(|entry| entry.debit - entry.credit)
            .sum()
    }

    pub fn is_balanced(&self) -> bool {
        let debit: Money = self.entries.iter().map(|entry| entry.debit).sum();
        let credit: Money = self.entries.iter().map(|entry| entry.credit).sum();
        debit == credit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(voucher_no: Uuid, loan: LoanId) -> PostingContext {
        PostingContext {
            posting_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            applicant: Applicant::Customer("CUST-0001".to_string()),
            against_voucher: loan,
            cost_center: "Main".to_string(),
            voucher_type: VoucherType::LoanDisbursement,
            voucher_no,
        }
    }

    #[test]
    fn test_pairs_are_balanced() {
        let mut ledger = Ledger::new();
        let loan = Uuid::new_v4();
        let voucher = Uuid::new_v4();
        ledger.emit_gl_entries(
            &context(voucher, loan),
            &[
                GlPair::new("Loan Account".into(), "Bank".into(), Money::from_major(1_000), "disbursement"),
                GlPair::new("Loan Account".into(), "Bank".into(), Money::ZERO, "skipped"),
            ],
        );

        assert_eq!(ledger.entries().len(), 2);
        assert!(ledger.is_balanced());
        assert_eq!(ledger.balance("Loan Account", Some(loan)), Money::from_major(1_000));
        assert_eq!(ledger.entries()[0].party_type, "Customer");
    }

    #[test]
    fn test_negative_pair_flips_sides() {
        let mut ledger = Ledger::new();
        let loan = Uuid::new_v4();
        ledger.emit_gl_entries(
            &context(Uuid::new_v4(), loan),
            &[GlPair::new("Income".into(), "Suspense".into(), Money::from_major(-50), "un-suspense")],
        );

        assert_eq!(ledger.balance("Suspense", None), Money::from_major(50));
        assert_eq!(ledger.balance("Income", None), Money::from_major(-50));
    }

    #[test]
    fn test_reverse_nets_to_zero() {
        let mut ledger = Ledger::new();
        let loan = Uuid::new_v4();
        let voucher = Uuid::new_v4();
        ledger.emit_gl_entries(
            &context(voucher, loan),
            &[GlPair::new("Loan Account".into(), "Bank".into(), Money::from_major(1_000), "disbursement")],
        );
        ledger.reverse(voucher, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());

        assert_eq!(ledger.entries_for(voucher).count(), 4);
        assert!(ledger.entries_for(voucher).all(|entry| entry.is_cancelled || entry.remarks.starts_with("reversal")));
        assert_eq!(ledger.balance("Loan Account", Some(loan)), Money::ZERO);
        assert!(ledger.is_balanced());
    }

    #[test]
    fn test_rollback_drops_rows_and_uncancels() {
        let mut ledger = Ledger::new();
        let loan = Uuid::new_v4();
        let voucher = Uuid::new_v4();
        ledger.emit_gl_entries(
            &context(voucher, loan),
            &[GlPair::new("Loan Account".into(), "Bank".into(), Money::from_major(1_000), "disbursement")],
        );

        ledger.savepoint();
        ledger.reverse(voucher, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        ledger.emit_gl_entries(
            &context(Uuid::new_v4(), loan),
            &[GlPair::new("Loan Account".into(), "Bank".into(), Money::from_major(5), "second")],
        );
        ledger.rollback();

        assert_eq!(ledger.entries().len(), 2);
        assert!(ledger.entries().iter().all(|entry| !entry.is_cancelled));
        assert_eq!(ledger.balance("Loan Account", Some(loan)), Money::from_major(1_000));
    }
}
