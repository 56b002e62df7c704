//! # Outcome Models
//!
//! Per-record outcome events as emitted by upstream workers, and the
//! durable rows the store keeps for them. Events are ephemeral; the
//! assignment row pins each record to its `resource_num` exactly once,
//! and the outcome row is the bucketed report payload.

use super::states::RecordState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One record's processing result, reported once per record by upstream
/// workers (redeliveries possible, deduplicated by the dispatcher)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeEvent {
    pub task_id: i64,
    pub record_id: String,
    pub state: RecordState,
    /// Record was skipped on purpose (e.g. filtered out before processing)
    pub ignored: bool,
    /// Record was removed rather than produced (depublication, tombstoning)
    pub deleted: bool,
    pub info: String,
    pub additional_info: Option<serde_json::Value>,
    pub error_message: Option<String>,
    /// Identifier of the produced resource, when processing yields one
    pub result_resource: Option<String>,
}

impl OutcomeEvent {
    pub fn success(task_id: i64, record_id: impl Into<String>) -> Self {
        Self {
            task_id,
            record_id: record_id.into(),
            state: RecordState::Success,
            ignored: false,
            deleted: false,
            info: String::new(),
            additional_info: None,
            error_message: None,
            result_resource: None,
        }
    }

    pub fn failure(
        task_id: i64,
        record_id: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            task_id,
            record_id: record_id.into(),
            state: RecordState::Error,
            ignored: false,
            deleted: false,
            info: String::new(),
            additional_info: None,
            error_message: Some(error_message.into()),
            result_resource: None,
        }
    }

    pub fn mark_ignored(mut self) -> Self {
        self.ignored = true;
        self
    }

    pub fn mark_deleted(mut self) -> Self {
        self.deleted = true;
        self
    }

    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = info.into();
        self
    }

    pub fn with_additional_info(mut self, value: serde_json::Value) -> Self {
        self.additional_info = Some(value);
        self
    }

    pub fn with_result_resource(mut self, resource: impl Into<String>) -> Self {
        self.result_resource = Some(resource.into());
        self
    }

    /// Whether this event takes the error counting path
    pub fn is_error(&self) -> bool {
        self.state == RecordState::Error
    }
}

/// Durable outcome row, keyed by (task_id, bucket, resource_num)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordOutcome {
    pub task_id: i64,
    pub bucket: i32,
    pub resource_num: i64,
    pub record_id: String,
    pub state: RecordState,
    pub info: String,
    pub additional_info: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub result_resource: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Durable (task_id, record_id) → resource_num assignment, the
/// conditional-insert idempotency row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordAssignment {
    pub task_id: i64,
    pub record_id: String,
    pub resource_num: i64,
    pub state: RecordState,
}
