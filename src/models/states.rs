use serde::{Deserialize, Serialize};
use std::fmt;

/// Task lifecycle states
///
/// `Queued` tasks receive outcome events; the post-processing pair is owned
/// by the lifecycle scheduler; `Processed` and `Dropped` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Submitted and consuming per-record outcome events
    Queued,
    /// All records consumed, waiting for the post-processing scheduler
    ReadyForPostProcessing,
    /// Post-processing job currently running
    PostProcessing,
    /// Finished successfully
    Processed,
    /// Killed by request, timed out, or failed irrecoverably
    Dropped,
}

impl TaskState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Processed | Self::Dropped)
    }

    /// Check if this state belongs to the post-processing phase
    pub fn in_post_processing_phase(&self) -> bool {
        matches!(self, Self::ReadyForPostProcessing | Self::PostProcessing)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::ReadyForPostProcessing => write!(f, "ready_for_post_processing"),
            Self::PostProcessing => write!(f, "post_processing"),
            Self::Processed => write!(f, "processed"),
            Self::Dropped => write!(f, "dropped"),
        }
    }
}

impl std::str::FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "ready_for_post_processing" => Ok(Self::ReadyForPostProcessing),
            "post_processing" => Ok(Self::PostProcessing),
            "processed" => Ok(Self::Processed),
            "dropped" => Ok(Self::Dropped),
            _ => Err(format!("Invalid task state: {s}")),
        }
    }
}

impl Default for TaskState {
    fn default() -> Self {
        Self::Queued
    }
}

/// Per-record result states carried by outcome events and assignment rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    /// Assigned but not yet reported
    Queued,
    /// Processed without error
    Success,
    /// Processing reported an error
    Error,
}

impl RecordState {
    /// Check if a record's processing has been reported (duplicate deliveries
    /// for settled records are discarded)
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for RecordState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid record state: {s}")),
        }
    }
}

impl Default for RecordState {
    fn default() -> Self {
        Self::Queued
    }
}
