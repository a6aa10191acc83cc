pub mod audit;
pub mod classification;
pub mod config;
pub mod decimal;
pub mod demand;
pub mod errors;
pub mod events;
pub mod interest;
pub mod ledger;
pub mod lifecycle;
pub mod payments;
pub mod records;
pub mod servicer;
pub mod state;
pub mod store;
pub mod types;

// re-export key types
pub use classification::ClassificationEngine;
pub use config::{AccountRole, Catalog, CompanyPolicy, LoanPartner, LoanProduct};
pub use decimal::{Money, Rate};
pub use demand::DemandGenerator;
pub use errors::{ErrorKind, Result, ServicingError};
pub use events::{Event, EventStore};
pub use interest::{AccrualEngine, DayCountConvention, PenaltyEngine};
pub use ledger::{GlEntry, GlPair, Ledger};
pub use lifecycle::{
    ClosureController, DisbursementProcessor, DisbursementRequest, FreezeController, LoanOriginator,
    RestructureController, WriteOffController,
};
pub use payments::{
    calculate_amounts, PayableAmounts, RepaymentProcessor, RepaymentRequest, ScheduleBuilder, ScheduleTerms,
    SuspenseMover, WaterfallAllocator,
};
pub use records::{Demand, Disbursement, InterestAccrual, Repayment, RepaymentSchedule, Restructure, RestructureRequest};
pub use servicer::{BatchReport, LoanServicer};
pub use state::{Loan, LoanApplication, LoanTerms};
pub use store::LoanBook;
pub use types::{
    Applicant, DemandFilter, DemandType, LoanId, LoanStatus, RepaymentMethod, RepaymentType, RestructureStatus,
    RestructureType, ScheduleStatus, ScheduleType, Treatment,
};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
