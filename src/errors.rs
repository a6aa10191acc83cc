use chrono::NaiveDate;
use thiserror::Error;
use uuid::Uuid;

use crate::decimal::Money;
use crate::types::{Applicant, LoanId, LoanStatus};

/// broad failure classes surfaced to operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// rejected input, nothing was changed
    Validation,
    /// later-dated entries must be cancelled first
    Ordering,
    /// product or company setup is incomplete
    Configuration,
    /// referenced record missing or in the wrong state
    Integrity,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServicingError {
    // validation
    #[error("invalid amount: {message}")]
    InvalidAmount {
        message: String,
    },

    #[error("loan amount {requested} exceeds maximum loan amount {maximum}")]
    LoanAmountExceedsMaximum {
        maximum: Money,
        requested: Money,
    },

    #[error("sanctioned amount limit crossed for {applicant}: limit {limit}, requested exposure {requested}")]
    SanctionedLimitExceeded {
        applicant: Applicant,
        limit: Money,
        requested: Money,
    },

    #[error("disbursed amount cannot be greater than {permitted}, requested {requested}")]
    DisbursalExceedsPermitted {
        permitted: Money,
        requested: Money,
    },

    #[error("disbursement amount {requested} exceeds available limit {available}")]
    LimitExceeded {
        available: Money,
        requested: Money,
    },

    #[error("{component} waiver {requested} exceeds overdue amount {overdue}")]
    WaiverExceedsOverdue {
        component: String,
        overdue: Money,
        requested: Money,
    },

    #[error("cannot close loan as there is an outstanding of {pending}")]
    OutstandingOnClosure {
        pending: Money,
    },

    #[error("write off amount {requested} must equal pending principal {pending}")]
    WriteOffMismatch {
        pending: Money,
        requested: Money,
    },

    #[error("cannot un mark as npa before watch period end date {watch_period_end_date}")]
    WatchPeriodActive {
        watch_period_end_date: NaiveDate,
    },

    #[error("invalid date: {message}")]
    InvalidDate {
        message: String,
    },

    #[error("operation not allowed for loan in status {status:?}: {message}")]
    InvalidLoanStatus {
        status: LoanStatus,
        message: String,
    },

    #[error("validation failed: {message}")]
    Rejected {
        message: String,
    },

    // ordering
    #[error("{document} dated {date} exists for loan {loan}, cancel it first")]
    FutureEntryExists {
        loan: LoanId,
        document: String,
        date: NaiveDate,
    },

    // configuration
    #[error("loan product {product} is missing account {account}")]
    MissingAccount {
        product: String,
        account: String,
    },

    #[error("invalid configuration: {message}")]
    InvalidConfiguration {
        message: String,
    },

    // integrity
    #[error("{document} {id} not found")]
    NotFound {
        document: String,
        id: Uuid,
    },

    #[error("{document} {id} is in state {current}, expected {expected}")]
    InvalidState {
        document: String,
        id: Uuid,
        current: String,
        expected: String,
    },

    #[error("calculation error: {message}")]
    CalculationError {
        message: String,
    },
}

impl ServicingError {
    /// classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServicingError::InvalidAmount { .. }
            | ServicingError::LoanAmountExceedsMaximum { .. }
            | ServicingError::SanctionedLimitExceeded { .. }
            | ServicingError::DisbursalExceedsPermitted { .. }
            | ServicingError::LimitExceeded { .. }
            | ServicingError::WaiverExceedsOverdue { .. }
            | ServicingError::OutstandingOnClosure { .. }
            | ServicingError::WriteOffMismatch { .. }
            | ServicingError::WatchPeriodActive { .. }
            | ServicingError::InvalidDate { .. }
            | ServicingError::InvalidLoanStatus { .. }
            | ServicingError::Rejected { .. } => ErrorKind::Validation,
            ServicingError::FutureEntryExists { .. } => ErrorKind::Ordering,
            ServicingError::MissingAccount { .. } | ServicingError::InvalidConfiguration { .. } => {
                ErrorKind::Configuration
            }
            ServicingError::NotFound { .. }
            | ServicingError::InvalidState { .. }
            | ServicingError::CalculationError { .. } => ErrorKind::Integrity,
        }
    }

    pub(crate) fn rejected(message: impl Into<String>) -> Self {
        ServicingError::Rejected {
            message: message.into(),
        }
    }

    pub(crate) fn not_found(document: &str, id: Uuid) -> Self {
        ServicingError::NotFound {
            document: document.to_string(),
            id,
        }
    }

    pub(crate) fn missing_account(product: &str, account: &str) -> Self {
        ServicingError::MissingAccount {
            product: product.to_string(),
            account: account.to_string(),
        }
    }
}

impl From<serde_json::Error> for ServicingError {
    fn from(err: serde_json::Error) -> Self {
        ServicingError::InvalidConfiguration {
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServicingError>;
