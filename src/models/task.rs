//! # Task Model
//!
//! Durable per-task state for the progress-tracking engine.
//!
//! ## Overview
//!
//! A `TaskInfo` row is created at submission and then mutated only by the
//! outcome dispatcher (counters, terminal transition) and the lifecycle
//! scheduler (post-processing transitions). The five counter columns are
//! mutually exclusive per outcome event and always sum to the number of
//! events consumed so far.
//!
//! ## Database Schema
//!
//! Maps to the `curator_tasks` table:
//! - `task_id`: Primary key (BIGINT), assigned by the submitting layer
//! - `topology`: Pipeline name, also used for report access checks
//! - `owner_id`: Instance id recorded for advisory post-processing ownership
//! - `definition`: JSONB serialized [`TaskDefinition`]
//! - counter columns, free-text `info`, and sent/started/finished/updated
//!   timestamps

use super::states::TaskState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable task row tracked to completion by the dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_id: i64,
    pub topology: String,
    /// Instance that owns this task's post-processing (advisory, not a lease)
    pub owner_id: String,
    pub state: TaskState,
    /// Set once at submission or by a later counting pass; may be inaccurate
    pub expected_records_count: Option<i64>,
    pub processed_records_count: i64,
    pub ignored_records_count: i64,
    pub deleted_records_count: i64,
    pub processed_errors_count: i64,
    pub deleted_errors_count: i64,
    /// Free-text status line shown in progress reports
    pub info: String,
    pub definition: TaskDefinition,
    pub sent_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Stamped on every counter flush; read by the stalled-task watchdog
    pub updated_at: DateTime<Utc>,
}

impl TaskInfo {
    /// Outcome events consumed so far. The two error counters are subsets
    /// of their primary buckets and do not add to the total.
    pub fn counter_total(&self) -> i64 {
        self.processed_records_count + self.ignored_records_count + self.deleted_records_count
    }

    /// Whether the task enters the post-processing phase after its last
    /// expected outcome instead of finishing directly
    pub fn needs_post_processing(&self) -> bool {
        self.definition.needs_post_processing
    }
}

/// Submission-time task shape, before any outcome has been consumed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub task_id: i64,
    pub topology: String,
    pub owner_id: String,
    pub expected_records_count: Option<i64>,
    pub definition: TaskDefinition,
    /// Defaults to now when not provided by the submitting layer
    pub sent_at: Option<DateTime<Utc>>,
}

impl NewTask {
    pub fn into_task_info(self) -> TaskInfo {
        let now = Utc::now();
        TaskInfo {
            task_id: self.task_id,
            topology: self.topology,
            owner_id: self.owner_id,
            state: TaskState::Queued,
            expected_records_count: self.expected_records_count,
            processed_records_count: 0,
            ignored_records_count: 0,
            deleted_records_count: 0,
            processed_errors_count: 0,
            deleted_errors_count: 0,
            info: String::new(),
            definition: self.definition,
            sent_at: self.sent_at.unwrap_or(now),
            // Registration is where this engine picks the task up, so the
            // start timestamp is stamped here.
            started_at: Some(now),
            finished_at: None,
            updated_at: now,
        }
    }
}

/// Serialized task parameters, reconstructed by post-processing jobs
///
/// Stored as JSONB on the task row. The `sent_at` timestamp on the row
/// (not here) doubles as the harvest cutoff date for cleanup jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TaskDefinition {
    #[serde(default)]
    pub needs_post_processing: bool,
    #[serde(default)]
    pub dataset_id: Option<String>,
    /// Record-list depublication targets; empty means whole-dataset mode
    #[serde(default)]
    pub record_ids: Vec<String>,
    #[serde(default)]
    pub depublication_reason: Option<String>,
}

impl TaskDefinition {
    pub fn for_dataset_depublication(dataset_id: impl Into<String>) -> Self {
        Self {
            needs_post_processing: true,
            dataset_id: Some(dataset_id.into()),
            record_ids: Vec::new(),
            depublication_reason: None,
        }
    }

    pub fn for_record_depublication(
        dataset_id: impl Into<String>,
        record_ids: Vec<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            needs_post_processing: true,
            dataset_id: Some(dataset_id.into()),
            record_ids,
            depublication_reason: Some(reason.into()),
        }
    }

    pub fn for_harvest_cleanup(dataset_id: impl Into<String>) -> Self {
        Self {
            needs_post_processing: true,
            dataset_id: Some(dataset_id.into()),
            record_ids: Vec::new(),
            depublication_reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_total() {
        let mut task = NewTask {
            task_id: 1,
            topology: "harvest".to_string(),
            owner_id: "instance-a".to_string(),
            expected_records_count: Some(10),
            definition: TaskDefinition::default(),
            sent_at: None,
        }
        .into_task_info();

        assert_eq!(task.counter_total(), 0);

        task.processed_records_count = 3;
        task.processed_errors_count = 1;
        task.deleted_records_count = 2;
        assert_eq!(task.counter_total(), 5);
    }

    #[test]
    fn test_definition_round_trip() {
        let definition = TaskDefinition::for_record_depublication(
            "ds-9",
            vec!["r1".to_string(), "r2".to_string()],
            "rights expired",
        );
        let json = serde_json::to_value(&definition).unwrap();
        let parsed: TaskDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, definition);
        assert!(parsed.needs_post_processing);
        assert_eq!(parsed.record_ids.len(), 2);
    }

    #[test]
    fn test_definition_defaults_from_sparse_json() {
        let parsed: TaskDefinition = serde_json::from_str("{}").unwrap();
        assert!(!parsed.needs_post_processing);
        assert!(parsed.dataset_id.is_none());
        assert!(parsed.record_ids.is_empty());
    }
}
