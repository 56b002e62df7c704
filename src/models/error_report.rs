//! # Error Report Models
//!
//! Aggregated error rows: one [`ErrorKindCount`] per distinct
//! (task, message) pair with a stable uuid, plus bounded
//! [`ErrorDetail`] samples kept for diagnostics.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One distinct error message within a task, with its occurrence count
///
/// The message is stored denormalized so the dispatcher can rebuild its
/// message → uuid cache after a restart without touching detail rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorKindCount {
    pub task_id: i64,
    pub error_id: Uuid,
    pub message: String,
    pub occurrences: i64,
}

/// One sampled occurrence of an error kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub task_id: i64,
    pub error_id: Uuid,
    /// Position within the kind's sample list, starting at 1
    pub occurrence: i64,
    pub record_id: String,
    pub additional_info: String,
}

/// One error kind expanded with its sampled occurrences, as served by the
/// reporting facade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub error_id: Uuid,
    pub message: String,
    pub occurrences: i64,
    pub samples: Vec<ErrorDetail>,
}
