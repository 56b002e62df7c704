//! # Depublication
//!
//! Removes records from the publish environment, either a whole dataset at
//! once or an explicit record list. The mode is read from the task
//! definition: an empty record list means whole-dataset depublication.
//!
//! Whole-dataset mode triggers a bulk removal on the index and then polls
//! the remaining count until it reaches zero, refreshing the task's status
//! info on every poll so progress stays visible. Record-list mode walks the
//! list, tombstones and removes each record, and reports one deleted
//! outcome per record through the dispatcher, so the task's counters and
//! error aggregation stay authoritative for depublication too.

use super::index::IndexClient;
use super::{PostProcessOutcome, PostProcessor};
use crate::cancellation::CancellationProbe;
use crate::config::PostProcessingConfig;
use crate::error::{CuratorError, Result};
use crate::models::{OutcomeEvent, TaskInfo, TaskState};
use crate::progress::{EventDisposition, ProgressTracker};
use crate::store::StoreHandles;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Topology whose tasks this job handles
pub const DEPUBLICATION_TOPOLOGY: &str = "depublication";

const DATASET_DEPUBLISHED_INFO: &str = "Dataset was depublished.";

/// Post-processing job for depublication tasks
pub struct DepublicationProcessor {
    stores: StoreHandles,
    index: Arc<dyn IndexClient>,
    tracker: Arc<ProgressTracker>,
    probe: Arc<CancellationProbe>,
    config: PostProcessingConfig,
}

impl DepublicationProcessor {
    pub fn new(
        stores: StoreHandles,
        index: Arc<dyn IndexClient>,
        tracker: Arc<ProgressTracker>,
        probe: Arc<CancellationProbe>,
        config: PostProcessingConfig,
    ) -> Self {
        Self {
            stores,
            index,
            tracker,
            probe,
            config,
        }
    }

    /// Whole-dataset mode: trigger bulk removal, then poll the index until
    /// the dataset is empty or the overall timeout passes.
    #[instrument(skip(self, task), fields(task_id = task.task_id))]
    async fn depublish_dataset(
        &self,
        task: &TaskInfo,
        dataset_id: &str,
    ) -> Result<PostProcessOutcome> {
        let task_id = task.task_id;
        let expected = self.index.count_records(dataset_id, None).await?;
        if expected <= 0 {
            return Ok(PostProcessOutcome::aborted(format!(
                "No records found in the index for dataset {dataset_id}"
            )));
        }
        self.stores.tasks.set_expected_count(task_id, expected).await?;
        info!(dataset_id, expected, "Starting dataset depublication");

        if self.probe.has_dropped_status(task_id).await? {
            return Ok(PostProcessOutcome::Killed);
        }
        let scheduled = self.index.remove_all(dataset_id, None).await?;
        debug!(dataset_id, scheduled, "Bulk removal triggered");

        // Removal completes asynchronously on the index side; only a count
        // of zero confirms it.
        let deadline = Instant::now() + self.config.depublication_timeout();
        loop {
            if self.probe.has_dropped_status(task_id).await? {
                return Ok(PostProcessOutcome::Killed);
            }
            let remaining = self.index.count_records(dataset_id, None).await?;
            if remaining == 0 {
                return Ok(PostProcessOutcome::completed(DATASET_DEPUBLISHED_INFO));
            }
            self.stores
                .tasks
                .update_state(
                    task_id,
                    TaskState::PostProcessing,
                    &format!("Depublishing dataset; {remaining} of {expected} records remain"),
                )
                .await?;
            if Instant::now() >= deadline {
                return Ok(PostProcessOutcome::aborted(format!(
                    "Depublication timed out with {remaining} of {expected} records remaining"
                )));
            }
            tokio::time::sleep(self.config.depublication_poll_interval()).await;
        }
    }

    /// Record-list mode: tombstone and remove each record, reporting one
    /// deleted outcome per record. A failed record is reported as a deleted
    /// error and the rest of the list still runs.
    #[instrument(skip(self, task), fields(task_id = task.task_id))]
    async fn depublish_records(
        &self,
        task: &TaskInfo,
        dataset_id: &str,
    ) -> Result<PostProcessOutcome> {
        let task_id = task.task_id;
        let reason = task
            .definition
            .depublication_reason
            .as_deref()
            .unwrap_or("Record depublished");
        let mut removed = 0usize;
        let mut failed = 0usize;
        let mut skipped = 0usize;

        for record_id in &task.definition.record_ids {
            if self.probe.has_dropped_status(task_id).await? {
                warn!(record_id = %record_id, "Drop request observed; stopping record depublication");
                return Ok(PostProcessOutcome::Killed);
            }
            // A settled record means this is a re-run after a crash.
            if self
                .stores
                .outcomes
                .find_assignment(task_id, record_id)
                .await?
                .is_some()
            {
                debug!(record_id = %record_id, "Record already settled; skipping");
                skipped += 1;
                continue;
            }

            match self.remove_record(dataset_id, record_id, reason).await {
                Ok(()) => {
                    removed += 1;
                    let event = OutcomeEvent::success(task_id, record_id.clone())
                        .mark_deleted()
                        .with_info("Record depublished");
                    self.report(event).await?;
                }
                Err(error) => {
                    failed += 1;
                    warn!(record_id = %record_id, error = %error, "Record depublication failed");
                    let event =
                        OutcomeEvent::failure(task_id, record_id.clone(), error.to_string())
                            .mark_deleted();
                    self.report(event).await?;
                }
            }
        }

        info!(removed, failed, skipped, "Record depublication finished");
        Ok(PostProcessOutcome::completed(format!(
            "Depublished {removed} records, {failed} failed, {skipped} already settled"
        )))
    }

    async fn remove_record(&self, dataset_id: &str, record_id: &str, reason: &str) -> Result<()> {
        // A tombstone may already exist from a run that crashed between the
        // tombstone write and the removal.
        let tombstoned = self.index.get_tombstone(record_id).await?
            || self.index.index_tombstone(record_id, reason).await?;
        if !tombstoned {
            return Err(CuratorError::Index {
                operation: "index_tombstone".to_string(),
                message: format!("index refused a tombstone for record {record_id}"),
            });
        }
        if !self.index.remove(record_id).await? {
            return Err(CuratorError::Index {
                operation: "remove".to_string(),
                message: format!("index held no record {record_id}"),
            });
        }
        // The record left the publish environment, so the next harvest of
        // the same content must be treated as new again.
        self.stores
            .harvest
            .clear_published_env(dataset_id, record_id)
            .await?;
        Ok(())
    }

    async fn report(&self, event: OutcomeEvent) -> Result<()> {
        if self.tracker.handle_event(event).await? == EventDisposition::Duplicate {
            debug!("Outcome was already committed by an earlier run");
        }
        Ok(())
    }
}

#[async_trait]
impl PostProcessor for DepublicationProcessor {
    fn name(&self) -> &'static str {
        "depublication"
    }

    fn handles(&self, task: &TaskInfo) -> bool {
        task.topology == DEPUBLICATION_TOPOLOGY
    }

    async fn execute(&self, task: &TaskInfo) -> Result<PostProcessOutcome> {
        let Some(dataset_id) = task.definition.dataset_id.clone() else {
            return Ok(PostProcessOutcome::aborted(
                "Task definition carries no dataset id",
            ));
        };
        if task.definition.record_ids.is_empty() {
            self.depublish_dataset(task, &dataset_id).await
        } else {
            self.depublish_records(task, &dataset_id).await
        }
    }
}
