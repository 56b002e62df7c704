//! # Data Models
//!
//! Row-level types shared by the stores and engines: task state enums,
//! the durable task row, outcome events and their persisted forms, error
//! aggregation rows, and harvest bookkeeping.

pub mod error_report;
pub mod harvested_record;
pub mod outcome;
pub mod states;
pub mod task;

pub use error_report::{ErrorDetail, ErrorKindCount, ErrorReport};
pub use harvested_record::{
    CategorizationParameters, CategorizationResult, Category, HarvestedRecord,
};
pub use outcome::{OutcomeEvent, RecordAssignment, RecordOutcome};
pub use states::{RecordState, TaskState};
pub use task::{NewTask, TaskDefinition, TaskInfo};
