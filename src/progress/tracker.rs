//! # Progress Tracker
//!
//! The outcome dispatcher. One instance serves all tasks; per-task progress
//! caches live in a concurrent map and are hydrated lazily from the store.
//!
//! ## Key Features
//!
//! - **Crash recovery**: a cache miss rebuilds counters from the task row,
//!   the highest assigned resource number from the bucketed outcome rows,
//!   and the error-kind cache from one scan of the per-kind counters
//! - **Idempotent consumption**: redelivered events conflict on the
//!   assignment row inside the store commit and change nothing
//! - **Retry**: commits retry transient store failures with backoff before
//!   the error is surfaced to the delivering runtime
//!
//! The upstream runtime partitions events by task id, so two events for one
//! task are never in flight at once; the caches here rely on that.

use crate::config::ProgressConfig;
use crate::error::{CuratorError, Result};
use crate::models::{NewTask, OutcomeEvent, TaskInfo, TaskState};
use crate::progress::decision::{error_message_for, plan_outcome, PlanContext};
use crate::progress::errors::ErrorAggregator;
use crate::store::{with_retry, CommitResult, StoreHandles, TaskCounters};
use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, info, instrument, warn};

/// What happened to one delivered event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDisposition {
    /// Committed; `last_expected` marks the task's final expected event
    Applied { last_expected: bool },
    /// Redelivery of an already committed event; nothing was written
    Duplicate,
}

#[derive(Debug, Clone)]
struct ProgressCache {
    state: TaskState,
    needs_post_processing: bool,
    expected_records: Option<i64>,
    counters: TaskCounters,
    /// Highest resource number assigned so far
    assigned: i64,
    errors: ErrorAggregator,
}

/// Consumes outcome events and maintains task progress
pub struct ProgressTracker {
    stores: StoreHandles,
    config: ProgressConfig,
    cache: DashMap<i64, ProgressCache>,
}

impl ProgressTracker {
    pub fn new(stores: StoreHandles, config: ProgressConfig) -> Self {
        Self {
            stores,
            config,
            cache: DashMap::new(),
        }
    }

    /// Create the task row for a fresh submission. Registering an id twice
    /// keeps the stored row, so a redelivered submission cannot reset
    /// progress.
    pub async fn register_task(&self, new_task: NewTask) -> Result<TaskInfo> {
        let task = new_task.into_task_info();
        self.stores.tasks.insert_task(&task).await?;
        info!(
            task_id = task.task_id,
            topology = %task.topology,
            expected_records = ?task.expected_records_count,
            "Registered task"
        );
        Ok(task)
    }

    /// Record the expected record count once a counting pass knows it
    pub async fn set_expected_count(&self, task_id: i64, expected: i64) -> Result<()> {
        self.stores
            .tasks
            .set_expected_count(task_id, expected)
            .await?;
        if let Some(mut cached) = self.cache.get_mut(&task_id) {
            cached.expected_records = Some(expected);
        }
        Ok(())
    }

    /// Consume one outcome event end to end: plan, commit, update the cache
    #[instrument(skip(self, event), fields(task_id = event.task_id, record_id = %event.record_id))]
    pub async fn handle_event(&self, event: OutcomeEvent) -> Result<EventDisposition> {
        let mut cached = self.cached_or_hydrated(event.task_id).await?;

        let message = event.is_error().then(|| error_message_for(&event));
        let ctx = PlanContext {
            task_state: cached.state,
            needs_post_processing: cached.needs_post_processing,
            expected_records: cached.expected_records,
            counters: cached.counters,
            next_resource_num: cached.assigned + 1,
            error_id: message
                .as_deref()
                .and_then(|msg| cached.errors.candidate_id(msg)),
            keep_error_detail: message
                .as_deref()
                .map(|msg| {
                    cached
                        .errors
                        .has_sample_room(msg, self.config.error_detail_sample_cap)
                })
                .unwrap_or(false),
            now: Utc::now(),
        };
        let plan = plan_outcome(&ctx, &event);
        if plan.anomalous {
            warn!("Ignored flag on an error outcome; counted as processing error");
        }

        let outcomes = &self.stores.outcomes;
        let write_set = &plan.write_set;
        let committed = with_retry(
            "commit_outcome",
            self.config.retry_attempts,
            self.config.retry_base_delay(),
            || async move { outcomes.commit_outcome(write_set).await },
        )
        .await?;

        match committed {
            CommitResult::Duplicate => {
                // Also reached when a commit landed but its ack was lost and
                // the retry conflicted. The cache may then be behind the
                // store, so evict and let the next event rehydrate.
                debug!("Duplicate outcome delivery; already committed");
                self.cache.remove(&event.task_id);
                Ok(EventDisposition::Duplicate)
            }
            CommitResult::Applied { canonical_error_id } => {
                cached.counters = plan.write_set.counters;
                cached.assigned = plan.write_set.assignment.resource_num;
                if let (Some(message), Some(canonical)) = (&message, canonical_error_id) {
                    cached.errors.record_committed(message, canonical);
                }
                if let Some((state, _)) = &plan.write_set.new_state {
                    cached.state = *state;
                }

                if plan.last_expected {
                    info!(
                        consumed = cached.counters.total(),
                        errors = cached.counters.processed_errors + cached.counters.deleted_errors,
                        new_state = %cached.state,
                        "Task consumed its last expected record"
                    );
                    self.cache.remove(&event.task_id);
                } else {
                    self.cache.insert(event.task_id, cached);
                }
                Ok(EventDisposition::Applied {
                    last_expected: plan.last_expected,
                })
            }
        }
    }

    /// Drop a task: terminal state, cache evicted. Safe to call for a task
    /// this tracker has never seen.
    #[instrument(skip(self, info))]
    pub async fn drop_task(&self, task_id: i64, info: &str) -> Result<()> {
        self.stores
            .tasks
            .update_state(task_id, TaskState::Dropped, info)
            .await?;
        self.cache.remove(&task_id);
        info!(task_id, "Task dropped");
        Ok(())
    }

    async fn cached_or_hydrated(&self, task_id: i64) -> Result<ProgressCache> {
        if let Some(entry) = self.cache.get(&task_id) {
            return Ok(entry.clone());
        }
        let cached = self.hydrate(task_id).await?;
        self.cache.insert(task_id, cached.clone());
        Ok(cached)
    }

    /// Rebuild the per-task cache from persisted state after a restart or
    /// first contact
    #[instrument(skip(self))]
    async fn hydrate(&self, task_id: i64) -> Result<ProgressCache> {
        let task = self
            .stores
            .tasks
            .get_task(task_id)
            .await?
            .ok_or(CuratorError::UnknownTask { task_id })?;
        let counters = TaskCounters::from_task(&task);
        let consumed = counters.total();

        let (assigned, errors) = if consumed == 0 {
            (0, ErrorAggregator::new())
        } else {
            let assigned = self.stores.outcomes.latest_resource_num(task_id).await?;
            if assigned != consumed {
                warn!(
                    assigned,
                    consumed,
                    "Outcome rows disagree with task counters; numbering follows the rows"
                );
            }
            let kinds = self.stores.errors.error_counters(task_id).await?;
            (assigned, ErrorAggregator::from_counters(&kinds))
        };

        debug!(
            consumed,
            assigned,
            distinct_error_kinds = errors.distinct_kinds(),
            "Hydrated progress cache"
        );
        Ok(ProgressCache {
            state: task.state,
            needs_post_processing: task.needs_post_processing(),
            expected_records: task.expected_records_count,
            counters,
            assigned,
            errors,
        })
    }
}
