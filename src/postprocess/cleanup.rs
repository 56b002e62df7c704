//! # Post-Harvest Cleanup
//!
//! After an incremental harvest finishes, records that the source stopped
//! serving are still present in the index. This job walks the dataset's
//! harvest bookkeeping in keyset pages and depublishes every record whose
//! latest-harvest date predates the task's submission: such a record was
//! not seen by this harvest and is stale.
//!
//! The bookkeeping rows themselves are kept (with their environment columns
//! cleared) so a later reappearance of the record is still recognized.
//! Outcomes are reported through the dispatcher, which makes re-runs after
//! a crash cheap: already settled records are skipped via their assignment
//! rows.

use super::index::IndexClient;
use super::{PostProcessOutcome, PostProcessor};
use crate::cancellation::CancellationProbe;
use crate::config::PostProcessingConfig;
use crate::error::{CuratorError, Result};
use crate::models::{HarvestedRecord, OutcomeEvent, TaskInfo};
use crate::progress::{EventDisposition, ProgressTracker};
use crate::store::StoreHandles;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Topology whose tasks this job handles
pub const HARVEST_TOPOLOGY: &str = "harvest";

const TOMBSTONE_REASON: &str = "Removed as stale after an incremental harvest";

/// Post-processing job removing stale records after an incremental harvest
pub struct HarvestCleanupProcessor {
    stores: StoreHandles,
    index: Arc<dyn IndexClient>,
    tracker: Arc<ProgressTracker>,
    probe: Arc<CancellationProbe>,
    config: PostProcessingConfig,
}

impl HarvestCleanupProcessor {
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

    #[instrument(skip(self, task), fields(task_id = task.task_id))]
    async fn clean_dataset(&self, task: &TaskInfo, dataset_id: &str) -> Result<PostProcessOutcome> {
        let task_id = task.task_id;
        // Everything harvested by this task carries a later date; older
        // records were not served by the source anymore.
        let cutoff = task.sent_at;
        let page_size = i64::from(self.config.cleanup_page_size);

        let mut cleaned = 0usize;
        let mut failed = 0usize;
        let mut skipped = 0usize;
        let mut after: Option<String> = None;

        loop {
            let page = self
                .stores
                .harvest
                .dataset_records(dataset_id, after.as_deref(), page_size)
                .await?;
            if page.is_empty() {
                break;
            }
            after = page.last().map(|record| record.record_local_id.clone());

            for record in page {
                if self.probe.has_dropped_status(task_id).await? {
                    warn!("Drop request observed; stopping cleanup");
                    return Ok(PostProcessOutcome::Killed);
                }
                if record.latest_harvest_date >= cutoff {
                    continue;
                }
                if record.preview_harvest_date.is_none() && record.published_harvest_date.is_none()
                {
                    // Never reached any environment, nothing to depublish.
                    debug!(record_id = %record.record_local_id, "Stale record was never indexed");
                    continue;
                }
                if self
                    .stores
                    .outcomes
                    .find_assignment(task_id, &record.record_local_id)
                    .await?
                    .is_some()
                {
                    debug!(record_id = %record.record_local_id, "Record already settled; skipping");
                    skipped += 1;
                    continue;
                }

                match self.remove_stale(&record).await {
                    Ok(()) => {
                        cleaned += 1;
                        let event = OutcomeEvent::success(task_id, record.record_local_id.clone())
                            .mark_deleted()
                            .with_info("Removed as stale");
                        self.report(event).await?;
                    }
                    Err(error) => {
                        failed += 1;
                        warn!(
                            record_id = %record.record_local_id,
                            error = %error,
                            "Stale record removal failed"
                        );
                        let event = OutcomeEvent::failure(
                            task_id,
                            record.record_local_id.clone(),
                            error.to_string(),
                        )
                        .mark_deleted();
                        self.report(event).await?;
                    }
                }
            }
        }

        info!(cleaned, failed, skipped, "Post-harvest cleanup finished");
        Ok(PostProcessOutcome::completed(format!(
            "Removed {cleaned} stale records, {failed} failed, {skipped} already settled"
        )))
    }

    async fn remove_stale(&self, record: &HarvestedRecord) -> Result<()> {
        let record_id = &record.record_local_id;
        let tombstoned = self.index.get_tombstone(record_id).await?
            || self.index.index_tombstone(record_id, TOMBSTONE_REASON).await?;
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
        self.stores
            .harvest
            .clear_published_env(&record.dataset_id, record_id)
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
impl PostProcessor for HarvestCleanupProcessor {
    fn name(&self) -> &'static str {
        "harvest_cleanup"
    }

    fn handles(&self, task: &TaskInfo) -> bool {
        task.topology == HARVEST_TOPOLOGY
    }

    async fn execute(&self, task: &TaskInfo) -> Result<PostProcessOutcome> {
        let Some(dataset_id) = task.definition.dataset_id.clone() else {
            return Ok(PostProcessOutcome::aborted(
                "Task definition carries no dataset id",
            ));
        };
        self.clean_dataset(task, &dataset_id).await
    }
}
