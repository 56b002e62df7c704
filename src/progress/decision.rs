//! Pure write-set planning for one outcome event.
//!
//! A single decision function turns the dispatcher's cached view of a task
//! plus the incoming event into everything that must be persisted for it:
//! the assignment row, the outcome row, the new counter values, the optional
//! finish or hand-off transition, and the optional error rows. Keeping every
//! branch here, away from any I/O, leaves the persistence path a straight
//! commit of whatever was planned.

use crate::models::{OutcomeEvent, RecordAssignment, RecordOutcome, TaskState};
use crate::progress::counters::{apply_event, EventFlags};
use crate::store::{bucket_for, ErrorDetailWrite, ErrorWrite, OutcomeWriteSet, TaskCounters};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Status line stored when a task finishes without a post-processing phase
pub const INFO_COMPLETELY_PROCESSED: &str = "Completely processed";
/// Status line stored when the last record hands the task to post-processing
pub const INFO_READY_FOR_POST_PROCESSING: &str =
    "Ready for post processing after topology stage is finished";

/// Dispatcher-side view of the task, captured before the event is applied
#[derive(Debug, Clone)]
pub struct PlanContext {
    pub task_state: TaskState,
    pub needs_post_processing: bool,
    pub expected_records: Option<i64>,
    /// Counter values before this event
    pub counters: TaskCounters,
    /// Resource number this event will occupy
    pub next_resource_num: i64,
    /// Cached uuid for the event's error message, if the kind is known
    pub error_id: Option<Uuid>,
    /// Whether the per-kind sample cap still has room for a detail row
    pub keep_error_detail: bool,
    pub now: DateTime<Utc>,
}

/// Everything the dispatcher must persist and do for one event
#[derive(Debug, Clone)]
pub struct OutcomePlan {
    pub write_set: OutcomeWriteSet,
    /// The event completes the expected record count
    pub last_expected: bool,
    /// The event carried the ignored flag together with an error
    pub anomalous: bool,
}

pub fn plan_outcome(ctx: &PlanContext, event: &OutcomeEvent) -> OutcomePlan {
    // Evaluated against the counters as they stood before this event, so
    // exactly one event can match the expected count.
    let last_expected = ctx
        .expected_records
        .map(|expected| ctx.counters.total() + 1 == expected)
        .unwrap_or(false);

    let update = apply_event(ctx.counters, EventFlags::from_event(event));

    let resource_num = ctx.next_resource_num;
    let assignment = RecordAssignment {
        task_id: event.task_id,
        record_id: event.record_id.clone(),
        resource_num,
        state: event.state,
    };
    let outcome = RecordOutcome {
        task_id: event.task_id,
        bucket: bucket_for(resource_num),
        resource_num,
        record_id: event.record_id.clone(),
        state: event.state,
        info: event.info.clone(),
        additional_info: event.additional_info.clone(),
        error_message: event.error_message.clone(),
        result_resource: event.result_resource.clone(),
        recorded_at: ctx.now,
    };

    // Only the dispatch phase finishes tasks. Once a task is handed to
    // post-processing the orchestrator owns the terminal transition, so late
    // events seen in that window change counters only.
    let (new_state, finished_at) = if last_expected && ctx.task_state == TaskState::Queued {
        if ctx.needs_post_processing {
            (
                Some((
                    TaskState::ReadyForPostProcessing,
                    INFO_READY_FOR_POST_PROCESSING.to_string(),
                )),
                None,
            )
        } else {
            (
                Some((TaskState::Processed, INFO_COMPLETELY_PROCESSED.to_string())),
                Some(ctx.now),
            )
        }
    } else {
        (None, None)
    };

    let error = event.is_error().then(|| ErrorWrite {
        error_id: ctx.error_id.unwrap_or_else(Uuid::new_v4),
        message: error_message_for(event),
        detail: ctx.keep_error_detail.then(|| ErrorDetailWrite {
            record_id: event.record_id.clone(),
            additional_info: event
                .additional_info
                .as_ref()
                .map(|value| value.to_string())
                .unwrap_or_default(),
        }),
    });

    OutcomePlan {
        write_set: OutcomeWriteSet {
            assignment,
            outcome,
            counters: update.counters,
            new_state,
            finished_at,
            error,
        },
        last_expected,
        anomalous: update.anomalous,
    }
}

/// Error kinds are keyed by message; events without an explicit message fall
/// back to their status info line
pub fn error_message_for(event: &OutcomeEvent) -> String {
    event
        .error_message
        .as_deref()
        .filter(|message| !message.is_empty())
        .unwrap_or(&event.info)
        .to_string()
}
