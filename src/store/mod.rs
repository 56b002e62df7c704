//! # Progress Store
//!
//! Durable storage seams for task metadata, per-record outcomes, error
//! aggregation, and harvest bookkeeping.
//!
//! ## Overview
//!
//! The dispatcher and orchestrator never talk to a database directly; they
//! hold [`StoreHandles`] with `Arc<dyn Trait>` handles injected at startup.
//! Two implementations ship here: [`postgres::PgCuratorStore`] for
//! production and [`memory::MemoryCuratorStore`] for tests and embedders.
//!
//! ## Atomic outcome commits
//!
//! One outcome event produces one [`OutcomeWriteSet`], committed atomically:
//! the conditional assignment insert (idempotency guard), the bucketed
//! outcome row, the task-row counter flush, an optional terminal transition,
//! and optional error rows. A redelivered event conflicts on the assignment
//! row and rolls the whole set back, reported as [`CommitResult::Duplicate`].
//!
//! ## Bucketed paging
//!
//! Outcome rows are grouped into fixed buckets of [`OUTCOME_BUCKET_SIZE`]
//! (`bucket = resource_num / OUTCOME_BUCKET_SIZE`) to bound partition size;
//! range reads may span several buckets and are reassembled in order.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use crate::error::{CuratorError, Result};
use crate::models::{
    ErrorDetail, ErrorKindCount, HarvestedRecord, RecordAssignment, RecordOutcome, TaskInfo,
    TaskState,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

/// Fixed outcome-row bucket width
pub const OUTCOME_BUCKET_SIZE: i64 = 10_000;

/// Bucket key for a resource number
pub fn bucket_for(resource_num: i64) -> i32 {
    (resource_num / OUTCOME_BUCKET_SIZE) as i32
}

/// Everything one outcome event writes, committed as a single atomic batch
#[derive(Debug, Clone)]
pub struct OutcomeWriteSet {
    /// Conditional insert; a conflict means the event is a redelivery
    pub assignment: RecordAssignment,
    pub outcome: RecordOutcome,
    /// Absolute new counter values for the task row
    pub counters: TaskCounters,
    /// Terminal or hand-off transition, with its status info
    pub new_state: Option<(TaskState, String)>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<ErrorWrite>,
}

/// Absolute counter values flushed to the task row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskCounters {
    pub processed_records: i64,
    pub ignored_records: i64,
    pub deleted_records: i64,
    pub processed_errors: i64,
    pub deleted_errors: i64,
}

impl TaskCounters {
    /// Events consumed so far. The error counters are subsets of their
    /// primary buckets, so only the three primaries add up.
    pub fn total(&self) -> i64 {
        self.processed_records + self.ignored_records + self.deleted_records
    }

    pub fn from_task(task: &TaskInfo) -> Self {
        Self {
            processed_records: task.processed_records_count,
            ignored_records: task.ignored_records_count,
            deleted_records: task.deleted_records_count,
            processed_errors: task.processed_errors_count,
            deleted_errors: task.deleted_errors_count,
        }
    }
}

/// Error rows accompanying an error outcome
#[derive(Debug, Clone)]
pub struct ErrorWrite {
    /// Candidate uuid for a first occurrence; the store returns the
    /// canonical uuid if the (task, message) pair already has one
    pub error_id: Uuid,
    pub message: String,
    /// Sample to keep, already vetted against the configured cap
    pub detail: Option<ErrorDetailWrite>,
}

#[derive(Debug, Clone)]
pub struct ErrorDetailWrite {
    pub record_id: String,
    pub additional_info: String,
}

/// Result of committing an [`OutcomeWriteSet`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitResult {
    /// Write-set applied; carries the canonical error uuid when the event
    /// had an error row
    Applied { canonical_error_id: Option<Uuid> },
    /// Assignment row already existed; nothing was written
    Duplicate,
}

/// Task metadata persistence
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a freshly submitted task row; re-registration of an existing
    /// task id leaves the stored row untouched
    async fn insert_task(&self, task: &TaskInfo) -> Result<()>;

    /// Fetch a task row; absence is `Ok(None)`, never an error
    async fn get_task(&self, task_id: i64) -> Result<Option<TaskInfo>>;

    /// Record the expected record count once a counting pass knows it
    async fn set_expected_count(&self, task_id: i64, expected: i64) -> Result<()>;

    /// Transition task state and stamp status info; terminal states also
    /// stamp the finish timestamp
    async fn update_state(&self, task_id: i64, state: TaskState, info: &str) -> Result<()>;

    /// All tasks currently in any of the given states
    async fn list_in_states(&self, states: &[TaskState]) -> Result<Vec<TaskInfo>>;
}

/// Per-record outcome persistence with atomic write-set commits
#[async_trait]
pub trait OutcomeStore: Send + Sync {
    /// Apply one write-set atomically; see [`CommitResult`]
    async fn commit_outcome(&self, write_set: &OutcomeWriteSet) -> Result<CommitResult>;

    /// Look up the resource-number assignment for a record, if any
    async fn find_assignment(
        &self,
        task_id: i64,
        record_id: &str,
    ) -> Result<Option<RecordAssignment>>;

    /// Highest assigned resource number, recovered by walking buckets from
    /// zero upward until an empty bucket; 0 when no outcome exists
    async fn latest_resource_num(&self, task_id: i64) -> Result<i64>;

    /// Outcomes with `from_num <= resource_num <= to_num`, ordered,
    /// reassembled across bucket boundaries
    async fn page_outcomes(
        &self,
        task_id: i64,
        from_num: i64,
        to_num: i64,
    ) -> Result<Vec<RecordOutcome>>;
}

/// Aggregated error-row reads (writes go through the outcome commit)
#[async_trait]
pub trait ErrorStore: Send + Sync {
    /// All distinct error kinds for a task, messages included
    async fn error_counters(&self, task_id: i64) -> Result<Vec<ErrorKindCount>>;

    /// Stored samples for one error kind, oldest first, at most `limit`
    async fn error_details(
        &self,
        task_id: i64,
        error_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ErrorDetail>>;
}

/// Harvest bookkeeping persistence
#[async_trait]
pub trait HarvestStore: Send + Sync {
    async fn find_record(
        &self,
        dataset_id: &str,
        record_local_id: &str,
    ) -> Result<Option<HarvestedRecord>>;

    /// First-sighting insert
    async fn insert_record(&self, record: &HarvestedRecord) -> Result<()>;

    /// Targeted update of the latest-harvest pair only
    async fn update_latest_harvest(
        &self,
        dataset_id: &str,
        record_local_id: &str,
        harvest_date: DateTime<Utc>,
        md5: Uuid,
    ) -> Result<()>;

    /// Ingestion-side update once the preview environment holds the record
    async fn update_preview_env(
        &self,
        dataset_id: &str,
        record_local_id: &str,
        harvest_date: DateTime<Utc>,
        md5: Uuid,
    ) -> Result<()>;

    /// Ingestion-side update once the publish environment holds the record
    async fn update_published_env(
        &self,
        dataset_id: &str,
        record_local_id: &str,
        harvest_date: DateTime<Utc>,
        md5: Uuid,
    ) -> Result<()>;

    /// Null out the publish pair after a record leaves the publish
    /// environment, so the next harvest of the same content reindexes it.
    /// No-op for an unknown record
    async fn clear_published_env(&self, dataset_id: &str, record_local_id: &str) -> Result<()>;

    /// Keyset page of a dataset's records ordered by record id, starting
    /// strictly after `after_record` when given
    async fn dataset_records(
        &self,
        dataset_id: &str,
        after_record: Option<&str>,
        limit: i64,
    ) -> Result<Vec<HarvestedRecord>>;
}

/// Dependency-injected store handles passed into each component at startup
#[derive(Clone)]
pub struct StoreHandles {
    pub tasks: Arc<dyn TaskStore>,
    pub outcomes: Arc<dyn OutcomeStore>,
    pub errors: Arc<dyn ErrorStore>,
    pub harvest: Arc<dyn HarvestStore>,
}

impl StoreHandles {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        outcomes: Arc<dyn OutcomeStore>,
        errors: Arc<dyn ErrorStore>,
        harvest: Arc<dyn HarvestStore>,
    ) -> Self {
        Self {
            tasks,
            outcomes,
            errors,
            harvest,
        }
    }

    /// Build all handles from one store implementing every trait
    pub fn from_shared<S>(store: Arc<S>) -> Self
    where
        S: TaskStore + OutcomeStore + ErrorStore + HarvestStore + 'static,
    {
        Self {
            tasks: store.clone(),
            outcomes: store.clone(),
            errors: store.clone(),
            harvest: store,
        }
    }
}

/// Retry a store operation with bounded exponential backoff.
///
/// Only retryable failures (see [`CuratorError::is_retryable`]) are retried;
/// the delay doubles per attempt starting from `base_delay`. The last error
/// is returned unchanged once attempts are exhausted.
pub async fn with_retry<T, F, Fut>(
    operation_name: &str,
    attempts: u32,
    base_delay: Duration,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() && attempt + 1 < attempts.max(1) => {
                let delay = base_delay * (1u32 << attempt.min(16));
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Store operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

/// Map a transient unavailability message into the retryable error class
pub(crate) fn store_unavailable(message: impl Into<String>) -> CuratorError {
    CuratorError::Database {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_bucket_boundaries() {
        assert_eq!(bucket_for(1), 0);
        assert_eq!(bucket_for(9_999), 0);
        assert_eq!(bucket_for(10_000), 1);
        assert_eq!(bucket_for(19_999), 1);
        assert_eq!(bucket_for(20_000), 2);
    }

    #[test]
    fn test_counter_total_ignores_error_subsets() {
        let counters = TaskCounters {
            processed_records: 3,
            ignored_records: 1,
            deleted_records: 2,
            processed_errors: 1,
            deleted_errors: 1,
        };
        assert_eq!(counters.total(), 6);
    }

    #[tokio::test]
    async fn test_with_retry_recovers_from_transient_failure() {
        let calls = AtomicU32::new(0);
        let result = with_retry("test_op", 3, Duration::from_millis(1), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(store_unavailable("flaky"))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_gives_up_after_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<i64> = with_retry("test_op", 2, Duration::from_millis(1), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(store_unavailable("down"))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_with_retry_does_not_retry_permanent_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry("test_op", 5, Duration::from_millis(1), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CuratorError::TaskAccess {
                task_id: 1,
                topology: "harvest".to_string(),
            })
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
