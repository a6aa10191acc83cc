use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;
use crate::types::{Applicant, LoanId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DpdLog {
    pub loan: LoanId,
    pub posting_date: NaiveDate,
    pub days_past_due: u32,
    pub classification_code: Option<String>,
    /// classification run that wrote the row
    pub process_loan_classification: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpaLog {
    pub loan: LoanId,
    pub applicant: Applicant,
    pub posting_date: NaiveDate,
    pub is_npa: bool,
    pub manual_npa: bool,
    /// superseded by a later flip
    pub delinked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FreezeAction {
    Freeze,
    Unfreeze,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreezeLog {
    pub loan: LoanId,
    pub date: NaiveDate,
    pub action: FreezeAction,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LimitChange {
    Disbursement,
    DisbursementCancelled,
    Repayment,
    RepaymentCancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitChangeLog {
    pub loan: LoanId,
    pub date: NaiveDate,
    pub change: LimitChange,
    pub amount: Money,
    pub available_limit_amount: Money,
    pub utilized_limit_amount: Money,
}

#[derive(Debug, Clone, Default)]
struct AuditMark {
    dpd_logs: usize,
    npa_logs: usize,
    freeze_logs: usize,
    limit_change_logs: usize,
    delinked: Vec<usize>,
}

/// append-only audit trails
#[derive(Debug, Clone, Default)]
pub struct AuditTrail {
    pub dpd_logs: Vec<DpdLog>,
    pub npa_logs: Vec<NpaLog>,
    pub freeze_logs: Vec<FreezeLog>,
    pub limit_change_logs: Vec<LimitChangeLog>,
    marks: Vec<AuditMark>,
}

impl AuditTrail {
    /// record an npa flip, delinking earlier rows of the same loan
    pub fn log_npa(&mut self, log: NpaLog) {
        for (idx, previous) in self
            .npa_logs
            .iter_mut()
            .enumerate()
            .filter(|(_, previous)| previous.loan == log.loan && !previous.delinked)
        {
            previous.delinked = true;
            if let Some(mark) = self.marks.last_mut() {
                mark.delinked.push(idx);
            }
        }
        self.npa_logs.push(log);
    }

    pub(crate) fn savepoint(&mut self) {
        self.marks.push(AuditMark {
            dpd_logs: self.dpd_logs.len(),
            npa_logs: self.npa_logs.len(),
            freeze_logs: self.freeze_logs.len(),
            limit_change_logs: self.limit_change_logs.len(),
            delinked: Vec::new(),
        });
    }

    pub(crate) fn release(&mut self) {
        if let Some(mark) = self.marks.pop() {
            if let Some(parent) = self.marks.last_mut() {
                parent.delinked.extend(mark.delinked);
            }
        }
    }

    pub(crate) fn rollback(&mut self) {
        if let Some(mark) = self.marks.pop() {
            for idx in mark.delinked.into_iter().filter(|idx| *idx < mark.npa_logs) {
                self.npa_logs[idx].delinked = false;
            }
            self.dpd_logs.truncate(mark.dpd_logs);
            self.npa_logs.truncate(mark.npa_logs);
            self.freeze_logs.truncate(mark.freeze_logs);
            self.limit_change_logs.truncate(mark.limit_change_logs);
        }
    }

    pub fn dpd_history(&self, loan: LoanId) -> impl Iterator<Item = &DpdLog> {
        self.dpd_logs.iter().filter(move |log| log.loan == loan)
    }

    pub fn current_npa(&self, loan: LoanId) -> Option<&NpaLog> {
        self.npa_logs
            .iter()
            .rev()
            .find(|log| log.loan == loan && !log.delinked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_npa_log_delinks_previous() {
        let mut audit = AuditTrail::default();
        let loan = Uuid::new_v4();
        let applicant = Applicant::Customer("CUST-0001".to_string());
        let date = NaiveDate::from_ymd_opt(2023, 7, 5).unwrap();

        audit.log_npa(NpaLog {
            loan,
            applicant: applicant.clone(),
            posting_date: date,
            is_npa: true,
            manual_npa: true,
            delinked: false,
        });
        audit.log_npa(NpaLog {
            loan,
            applicant,
            posting_date: date.succ_opt().unwrap(),
            is_npa: false,
            manual_npa: false,
            delinked: false,
        });

        assert_eq!(audit.npa_logs.len(), 2);
        assert!(audit.npa_logs[0].delinked);
        assert_eq!(audit.current_npa(loan).map(|log| log.is_npa), Some(false));
    }
}
