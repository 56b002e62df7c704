//! # Post-Processing
//!
//! Task lifecycle work that runs after the record-streaming phase: dataset
//! and record depublication, and stale-record cleanup after an incremental
//! harvest.
//!
//! ## Overview
//!
//! The [`scheduler::PostProcessingScheduler`] periodically scans for tasks
//! in `ReadyForPostProcessing` or `PostProcessing` owned by this instance,
//! picks the matching [`PostProcessor`] by topology, and runs it. Jobs never
//! write terminal task states themselves; they report a
//! [`PostProcessOutcome`] and the scheduler performs the transition. That
//! keeps finalization in one place and makes every job safe to re-run after
//! a crash mid-flight.
//!
//! ## Failure model
//!
//! - `Err(_)` from a job is treated as transient; the task stays in place
//!   and the next scan retries it, with no retry bound
//! - [`PostProcessOutcome::Aborted`] is permanent; the scheduler drops the
//!   task with the reason as its status info
//! - [`PostProcessOutcome::Killed`] means a drop request arrived while the
//!   job ran; the task row already carries the drop, so the scheduler
//!   leaves it untouched

pub mod cleanup;
pub mod depublication;
pub mod index;
pub mod scheduler;

pub use cleanup::HarvestCleanupProcessor;
pub use depublication::DepublicationProcessor;
pub use index::IndexClient;
pub use scheduler::{PostProcessingScheduler, ScanSummary};

use crate::error::Result;
use crate::models::TaskInfo;
use async_trait::async_trait;

/// How one post-processing run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostProcessOutcome {
    /// Job finished; the scheduler marks the task processed with this info
    Completed { info: String },
    /// A drop request interrupted the job; the task row stays as the drop
    /// left it
    Killed,
    /// Permanent failure; the scheduler drops the task with this reason
    Aborted { reason: String },
}

impl PostProcessOutcome {
    pub fn completed(info: impl Into<String>) -> Self {
        Self::Completed { info: info.into() }
    }

    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }
}

/// One topology's post-processing job
#[async_trait]
pub trait PostProcessor: Send + Sync {
    /// Job name used in logs
    fn name(&self) -> &'static str;

    /// Whether this job handles the given task
    fn handles(&self, task: &TaskInfo) -> bool;

    /// Run the job to completion. Implementations check the kill flag at
    /// every record or poll boundary and return [`PostProcessOutcome::Killed`]
    /// promptly once a drop request is visible
    async fn execute(&self, task: &TaskInfo) -> Result<PostProcessOutcome>;
}
