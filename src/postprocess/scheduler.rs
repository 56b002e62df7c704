//! # Post-Processing Scheduler
//!
//! Periodically claims tasks waiting for post-processing and runs the
//! matching job. This is the only component that writes post-processing
//! lifecycle transitions; jobs themselves just report how their run ended.
//!
//! Ownership is advisory: every task records the instance that submitted it
//! and each scheduler only touches its own tasks. There is no lease or
//! takeover, so tasks of a dead instance wait until it returns (the
//! stalled-task watchdog flags them in the meantime).

use super::{PostProcessOutcome, PostProcessor};
use crate::config::PostProcessingConfig;
use crate::error::Result;
use crate::models::{TaskInfo, TaskState};
use crate::store::TaskStore;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// States picked up by the scan. `PostProcessing` is included so jobs
/// interrupted by a crash are resumed.
const SCANNED_STATES: &[TaskState] = &[TaskState::ReadyForPostProcessing, TaskState::PostProcessing];

/// What one scan did, returned for logging and tests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Tasks owned by this instance that the scan picked up
    pub claimed: usize,
    pub completed: Vec<i64>,
    pub aborted: Vec<i64>,
    pub killed: Vec<i64>,
    /// Tasks left in place after a transient failure
    pub retrying: Vec<i64>,
}

/// Scans for tasks awaiting post-processing and drives their jobs
pub struct PostProcessingScheduler {
    tasks: Arc<dyn TaskStore>,
    processors: Vec<Arc<dyn PostProcessor>>,
    owner_id: String,
    config: PostProcessingConfig,
}

impl PostProcessingScheduler {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        processors: Vec<Arc<dyn PostProcessor>>,
        owner_id: impl Into<String>,
        config: PostProcessingConfig,
    ) -> Self {
        Self {
            tasks,
            processors,
            owner_id: owner_id.into(),
            config,
        }
    }

    /// Scan and process forever. Scan failures are logged and the loop
    /// continues with the next interval.
    pub async fn run(&self) {
        info!(
            owner_id = %self.owner_id,
            interval_seconds = self.config.scan_interval_seconds,
            "Starting post-processing scheduler"
        );
        loop {
            match self.scan_once().await {
                Ok(summary) if summary.claimed > 0 => {
                    info!(
                        claimed = summary.claimed,
                        completed = summary.completed.len(),
                        aborted = summary.aborted.len(),
                        retrying = summary.retrying.len(),
                        "Post-processing scan finished"
                    );
                }
                Ok(_) => debug!("No tasks waiting for post-processing"),
                Err(scan_error) => error!(error = %scan_error, "Post-processing scan failed"),
            }
            tokio::time::sleep(self.config.scan_interval()).await;
        }
    }

    /// One scan pass over the waiting tasks
    #[instrument(skip(self), fields(owner_id = %self.owner_id))]
    pub async fn scan_once(&self) -> Result<ScanSummary> {
        let mut summary = ScanSummary::default();
        for mut task in self.tasks.list_in_states(SCANNED_STATES).await? {
            if task.owner_id != self.owner_id {
                debug!(
                    task_id = task.task_id,
                    owner_id = %task.owner_id,
                    "Task belongs to another instance; skipping"
                );
                continue;
            }
            summary.claimed += 1;
            let task_id = task.task_id;
            match self.process_task(&mut task).await {
                Ok(PostProcessOutcome::Completed { .. }) => summary.completed.push(task_id),
                Ok(PostProcessOutcome::Aborted { .. }) => summary.aborted.push(task_id),
                Ok(PostProcessOutcome::Killed) => summary.killed.push(task_id),
                Err(job_error) => {
                    warn!(
                        task_id,
                        error = %job_error,
                        "Post-processing failed; task stays for the next scan"
                    );
                    summary.retrying.push(task_id);
                }
            }
        }
        Ok(summary)
    }

    async fn process_task(&self, task: &mut TaskInfo) -> Result<PostProcessOutcome> {
        let task_id = task.task_id;
        let Some(processor) = self.processors.iter().find(|p| p.handles(task)) else {
            // Nobody else will ever pick this task up, so leaving it queued
            // would strand it silently.
            let reason = format!("No post-processing job for topology '{}'", task.topology);
            error!(task_id, topology = %task.topology, "{reason}");
            self.tasks
                .update_state(task_id, TaskState::Dropped, &reason)
                .await?;
            return Ok(PostProcessOutcome::aborted(reason));
        };

        if task.state == TaskState::ReadyForPostProcessing {
            self.tasks
                .update_state(task_id, TaskState::PostProcessing, "Post-processing started")
                .await?;
            task.state = TaskState::PostProcessing;
        }

        info!(task_id, job = processor.name(), "Running post-processing job");
        let outcome = processor.execute(task).await?;
        match &outcome {
            PostProcessOutcome::Completed { info } => {
                self.tasks
                    .update_state(task_id, TaskState::Processed, info)
                    .await?;
                info!(task_id, "Post-processing finished");
            }
            PostProcessOutcome::Killed => {
                // The drop request already wrote the terminal row.
                info!(task_id, "Task was dropped while its job ran");
            }
            PostProcessOutcome::Aborted { reason } => {
                warn!(task_id, reason = %reason, "Post-processing aborted");
                self.tasks
                    .update_state(task_id, TaskState::Dropped, reason)
                    .await?;
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewTask, TaskDefinition};
    use crate::store::memory::MemoryCuratorStore;

    struct ScriptedProcessor {
        topology: &'static str,
        outcome: PostProcessOutcome,
    }

    #[async_trait]
    impl PostProcessor for ScriptedProcessor {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn handles(&self, task: &TaskInfo) -> bool {
            task.topology == self.topology
        }

        async fn execute(&self, _task: &TaskInfo) -> Result<PostProcessOutcome> {
            Ok(self.outcome.clone())
        }
    }

    async fn seed_ready_task(store: &MemoryCuratorStore, task_id: i64, topology: &str, owner: &str) {
        let task = NewTask {
            task_id,
            topology: topology.to_string(),
            owner_id: owner.to_string(),
            expected_records_count: None,
            definition: TaskDefinition {
                needs_post_processing: true,
                ..TaskDefinition::default()
            },
            sent_at: None,
        }
        .into_task_info();
        store.insert_task(&task).await.unwrap();
        store
            .update_state(task_id, TaskState::ReadyForPostProcessing, "stage finished")
            .await
            .unwrap();
    }

    fn scheduler_with(
        store: Arc<MemoryCuratorStore>,
        processors: Vec<Arc<dyn PostProcessor>>,
        owner: &str,
    ) -> PostProcessingScheduler {
        PostProcessingScheduler::new(store, processors, owner, PostProcessingConfig::default())
    }

    #[tokio::test]
    async fn test_completed_job_marks_task_processed() {
        let store = Arc::new(MemoryCuratorStore::new());
        seed_ready_task(&store, 1, "harvest", "instance-a").await;

        let processor: Arc<dyn PostProcessor> = Arc::new(ScriptedProcessor {
            topology: "harvest",
            outcome: PostProcessOutcome::completed("cleanup done"),
        });
        let scheduler = scheduler_with(store.clone(), vec![processor], "instance-a");

        let summary = scheduler.scan_once().await.unwrap();
        assert_eq!(summary.claimed, 1);
        assert_eq!(summary.completed, vec![1]);

        let task = store.get_task(1).await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Processed);
        assert_eq!(task.info, "cleanup done");
        assert!(task.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_other_instances_tasks_are_left_alone() {
        let store = Arc::new(MemoryCuratorStore::new());
        seed_ready_task(&store, 1, "harvest", "instance-b").await;

        let processor: Arc<dyn PostProcessor> = Arc::new(ScriptedProcessor {
            topology: "harvest",
            outcome: PostProcessOutcome::completed("cleanup done"),
        });
        let scheduler = scheduler_with(store.clone(), vec![processor], "instance-a");

        let summary = scheduler.scan_once().await.unwrap();
        assert_eq!(summary.claimed, 0);

        let task = store.get_task(1).await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::ReadyForPostProcessing);
    }

    #[tokio::test]
    async fn test_unknown_topology_is_dropped_with_reason() {
        let store = Arc::new(MemoryCuratorStore::new());
        seed_ready_task(&store, 1, "mystery", "instance-a").await;

        let scheduler = scheduler_with(store.clone(), Vec::new(), "instance-a");
        let summary = scheduler.scan_once().await.unwrap();
        assert_eq!(summary.aborted, vec![1]);

        let task = store.get_task(1).await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Dropped);
        assert!(task.info.contains("mystery"));
    }

    #[tokio::test]
    async fn test_transient_failure_leaves_task_for_next_scan() {
        struct FailingProcessor;

        #[async_trait]
        impl PostProcessor for FailingProcessor {
            fn name(&self) -> &'static str {
                "failing"
            }

            fn handles(&self, _task: &TaskInfo) -> bool {
                true
            }

            async fn execute(&self, _task: &TaskInfo) -> Result<PostProcessOutcome> {
                Err(crate::error::CuratorError::Database {
                    message: "index unreachable".to_string(),
                })
            }
        }

        let store = Arc::new(MemoryCuratorStore::new());
        seed_ready_task(&store, 1, "harvest", "instance-a").await;

        let scheduler = scheduler_with(store.clone(), vec![Arc::new(FailingProcessor)], "instance-a");
        let summary = scheduler.scan_once().await.unwrap();
        assert_eq!(summary.retrying, vec![1]);

        // Claimed but not finished: the next scan resumes it.
        let task = store.get_task(1).await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::PostProcessing);

        let summary = scheduler.scan_once().await.unwrap();
        assert_eq!(summary.claimed, 1);
    }
}
