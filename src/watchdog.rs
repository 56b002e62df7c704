//! # Stalled-Task Watchdog
//!
//! The expected record count on a task is advisory: when it is wrong, or
//! when the instance owning a task's post-processing is gone, the task
//! never reaches a terminal state on its own. This scan flags active tasks
//! whose progress timestamp has not moved for longer than the stall
//! threshold. It only alarms; deciding whether to drop such a task is left
//! to an operator, because the usual cause is a count mismatch on an
//! otherwise healthy task.

use crate::config::WatchdogConfig;
use crate::error::Result;
use crate::models::TaskState;
use crate::store::{TaskCounters, TaskStore};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

/// Non-terminal states whose tasks are expected to keep making progress
const ACTIVE_STATES: &[TaskState] = &[
    TaskState::Queued,
    TaskState::ReadyForPostProcessing,
    TaskState::PostProcessing,
];

/// One flagged task, returned for operational tooling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalledTask {
    pub task_id: i64,
    pub topology: String,
    pub state: TaskState,
    /// Outcome events consumed so far
    pub consumed: i64,
    pub expected_records: Option<i64>,
    /// Time since the last progress write
    pub stalled_for: Duration,
}

/// Periodic scan for tasks that stopped making progress
pub struct StalledTaskWatchdog {
    tasks: Arc<dyn TaskStore>,
    config: WatchdogConfig,
}

impl StalledTaskWatchdog {
    pub fn new(tasks: Arc<dyn TaskStore>, config: WatchdogConfig) -> Self {
        Self { tasks, config }
    }

    /// Scan forever on the configured interval
    pub async fn run(&self) {
        debug!(
            interval_seconds = self.config.scan_interval_seconds,
            threshold_seconds = self.config.stall_threshold_seconds,
            "Starting stalled-task watchdog"
        );
        loop {
            if let Err(scan_error) = self.scan_once().await {
                error!(error = %scan_error, "Watchdog scan failed");
            }
            tokio::time::sleep(self.config.scan_interval()).await;
        }
    }

    /// One scan pass; every stalled task is logged and returned
    #[instrument(skip(self))]
    pub async fn scan_once(&self) -> Result<Vec<StalledTask>> {
        let threshold = self.config.stall_threshold();
        let now = Utc::now();
        let mut stalled = Vec::new();

        for task in self.tasks.list_in_states(ACTIVE_STATES).await? {
            let idle = (now - task.updated_at).to_std().unwrap_or_default();
            if idle < threshold {
                continue;
            }
            let consumed = TaskCounters::from_task(&task).total();
            warn!(
                task_id = task.task_id,
                topology = %task.topology,
                state = %task.state,
                consumed,
                expected_records = ?task.expected_records_count,
                idle_seconds = idle.as_secs(),
                "Task progress has stalled; the expected count may be wrong or the owning instance is gone"
            );
            stalled.push(StalledTask {
                task_id: task.task_id,
                topology: task.topology,
                state: task.state,
                consumed,
                expected_records: task.expected_records_count,
                stalled_for: idle,
            });
        }
        Ok(stalled)
    }
}
