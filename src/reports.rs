//! # Progress Reports
//!
//! Read-side facade over the stores: task progress snapshots, outcome
//! pages, and error reports, plus the drop entry point. Every call names
//! the topology the caller believes the task belongs to; a missing task and
//! a topology mismatch are indistinguishable in the reply, so callers
//! cannot probe for foreign task ids.

use crate::error::{CuratorError, Result};
use crate::models::{ErrorReport, RecordOutcome, TaskInfo};
use crate::progress::ProgressTracker;
use crate::store::StoreHandles;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Topology-scoped report queries and the drop entry point
pub struct ReportService {
    stores: StoreHandles,
    tracker: Arc<ProgressTracker>,
}

impl ReportService {
    pub fn new(stores: StoreHandles, tracker: Arc<ProgressTracker>) -> Self {
        Self { stores, tracker }
    }

    /// Current progress snapshot: state, counters, info, timestamps.
    /// Valid at any point in the task's life, not only after completion
    pub async fn task_progress(&self, topology: &str, task_id: i64) -> Result<TaskInfo> {
        self.authorized_task(topology, task_id).await
    }

    /// Outcomes with `from_num <= resource_num <= to_num`, in order,
    /// reassembled across storage buckets
    pub async fn outcome_page(
        &self,
        topology: &str,
        task_id: i64,
        from_num: i64,
        to_num: i64,
    ) -> Result<Vec<RecordOutcome>> {
        self.authorized_task(topology, task_id).await?;
        self.stores.outcomes.page_outcomes(task_id, from_num, to_num).await
    }

    /// All error kinds of a task with up to `sample_limit` stored samples
    /// each; a limit of zero returns the counts alone
    #[instrument(skip(self))]
    pub async fn general_error_report(
        &self,
        topology: &str,
        task_id: i64,
        sample_limit: i64,
    ) -> Result<Vec<ErrorReport>> {
        self.authorized_task(topology, task_id).await?;
        let kinds = self.stores.errors.error_counters(task_id).await?;
        let mut reports = Vec::with_capacity(kinds.len());
        for kind in kinds {
            let samples = if sample_limit > 0 {
                self.stores
                    .errors
                    .error_details(task_id, kind.error_id, sample_limit)
                    .await?
            } else {
                Vec::new()
            };
            reports.push(ErrorReport {
                error_id: kind.error_id,
                message: kind.message,
                occurrences: kind.occurrences,
                samples,
            });
        }
        Ok(reports)
    }

    /// One error kind by its uuid, with up to `sample_limit` samples
    pub async fn specific_error_report(
        &self,
        topology: &str,
        task_id: i64,
        error_id: Uuid,
        sample_limit: i64,
    ) -> Result<ErrorReport> {
        self.authorized_task(topology, task_id).await?;
        let kind = self
            .stores
            .errors
            .error_counters(task_id)
            .await?
            .into_iter()
            .find(|kind| kind.error_id == error_id)
            .ok_or(CuratorError::UnknownErrorType { task_id, error_id })?;
        let samples = self
            .stores
            .errors
            .error_details(task_id, error_id, sample_limit)
            .await?;
        Ok(ErrorReport {
            error_id: kind.error_id,
            message: kind.message,
            occurrences: kind.occurrences,
            samples,
        })
    }

    /// Request a drop: the task moves to its terminal dropped state and
    /// running work observes it through the kill flag
    pub async fn drop_task(&self, topology: &str, task_id: i64, info: &str) -> Result<()> {
        self.authorized_task(topology, task_id).await?;
        self.tracker.drop_task(task_id, info).await
    }

    async fn authorized_task(&self, topology: &str, task_id: i64) -> Result<TaskInfo> {
        match self.stores.tasks.get_task(task_id).await? {
            Some(task) if task.topology == topology => Ok(task),
            _ => Err(CuratorError::TaskAccess {
                task_id,
                topology: topology.to_string(),
            }),
        }
    }
}
