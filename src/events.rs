use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::types::{
    Applicant, DemandSubtype, DemandType, InterestType, LoanId, LoanStatus, RepaymentType,
    RestructureId, RestructureStatus,
};

/// all events that can be emitted while servicing a loan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // lifecycle events
    LoanSanctioned {
        loan_id: LoanId,
        applicant: Applicant,
        amount: Money,
        posting_date: NaiveDate,
    },
    Disbursed {
        loan_id: LoanId,
        amount: Money,
        disbursed_amount: Money,
        posting_date: NaiveDate,
    },
    DisbursementCancelled {
        loan_id: LoanId,
        amount: Money,
        posting_date: NaiveDate,
    },
    StatusChanged {
        loan_id: LoanId,
        old_status: LoanStatus,
        new_status: LoanStatus,
        posting_date: NaiveDate,
    },
    LoanClosed {
        loan_id: LoanId,
        posting_date: NaiveDate,
    },

    // interest events
    InterestAccrued {
        loan_id: LoanId,
        interest_type: InterestType,
        amount: Money,
        additional_interest: Money,
        posting_date: NaiveDate,
    },
    DemandRaised {
        loan_id: LoanId,
        demand_type: DemandType,
        demand_subtype: DemandSubtype,
        amount: Money,
        demand_date: NaiveDate,
    },

    // payment events
    RepaymentPosted {
        loan_id: LoanId,
        repayment_type: RepaymentType,
        amount: Money,
        applied_to_principal: Money,
        applied_to_interest: Money,
        applied_to_penalty: Money,
        applied_to_charges: Money,
        posting_date: NaiveDate,
    },
    RepaymentCancelled {
        loan_id: LoanId,
        amount: Money,
        posting_date: NaiveDate,
    },
    CreditNoteIssued {
        loan_id: LoanId,
        return_against: String,
        amount: Money,
        posting_date: NaiveDate,
    },
    CreditNoteCancelled {
        loan_id: LoanId,
        return_against: String,
        posting_date: NaiveDate,
    },
    RefundIssued {
        loan_id: LoanId,
        amount: Money,
        posting_date: NaiveDate,
    },

    // delinquency events
    LoanClassified {
        loan_id: LoanId,
        days_past_due: u32,
        classification_code: Option<String>,
        posting_date: NaiveDate,
    },
    NpaStatusChanged {
        loan_id: LoanId,
        is_npa: bool,
        posting_date: NaiveDate,
    },
    SuspenseMoved {
        loan_id: LoanId,
        amount: Money,
        reversed: bool,
        posting_date: NaiveDate,
    },
    FldgTriggered {
        loan_id: LoanId,
        partner: String,
        amount: Money,
        posting_date: NaiveDate,
    },

    // restructure and write-off events
    RestructureStatusChanged {
        loan_id: LoanId,
        restructure_id: RestructureId,
        status: RestructureStatus,
        new_loan_amount: Money,
        posting_date: NaiveDate,
    },
    LoanWrittenOff {
        loan_id: LoanId,
        amount: Money,
        posting_date: NaiveDate,
    },
    WriteOffCancelled {
        loan_id: LoanId,
        amount: Money,
        posting_date: NaiveDate,
    },

    // freeze events
    LoanFrozen {
        loan_id: LoanId,
        freeze_date: NaiveDate,
        reason: String,
    },
    LoanUnfrozen {
        loan_id: LoanId,
        posting_date: NaiveDate,
    },
}

/// event store for collecting events during operations
#[derive(Debug, Clone, Default)]
pub struct EventStore {
    events: Vec<Event>,
}

impl EventStore {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
        }
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.events.truncate(len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_take_events_drains() {
        let mut store = EventStore::new();
        let loan_id = Uuid::new_v4();
        store.emit(Event::LoanClosed {
            loan_id,
            posting_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        });

        assert_eq!(store.events().len(), 1);
        let taken = store.take_events();
        assert_eq!(taken.len(), 1);
        assert!(store.events().is_empty());
    }
}
