//! Counter bucket selection for one outcome event.
//!
//! Every event lands in exactly one primary bucket (processed, ignored, or
//! deleted); error events additionally count into the error bucket of their
//! branch. The error buckets are subsets, so progress totals sum only the
//! three primaries.

use crate::models::OutcomeEvent;
use crate::store::TaskCounters;

/// The flags that select an event's counter bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventFlags {
    pub ignored: bool,
    pub deleted: bool,
    pub is_error: bool,
}

impl EventFlags {
    pub fn from_event(event: &OutcomeEvent) -> Self {
        Self {
            ignored: event.ignored,
            deleted: event.deleted,
            is_error: event.is_error(),
        }
    }
}

/// Counters after one event, plus whether the flag combination was abnormal
#[derive(Debug, Clone, Copy)]
pub struct CounterUpdate {
    pub counters: TaskCounters,
    /// An ignored record must not also carry an error; such events are
    /// counted as processing errors and flagged for logging
    pub anomalous: bool,
}

/// Deletion takes precedence over the ignore marking; an ignored error is
/// counted as a processing error.
pub fn apply_event(counters: TaskCounters, flags: EventFlags) -> CounterUpdate {
    let mut next = counters;
    let mut anomalous = false;
    if flags.deleted {
        next.deleted_records += 1;
        if flags.is_error {
            next.deleted_errors += 1;
        }
    } else if flags.ignored && !flags.is_error {
        next.ignored_records += 1;
    } else {
        anomalous = flags.ignored;
        next.processed_records += 1;
        if flags.is_error {
            next.processed_errors += 1;
        }
    }
    CounterUpdate {
        counters: next,
        anomalous,
    }
}
