//! Proptest strategies for counter flags and outcome event streams.

use curator_core::models::OutcomeEvent;
use curator_core::progress::EventFlags;
use proptest::prelude::*;

pub fn event_flags_strategy() -> impl Strategy<Value = EventFlags> {
    (any::<bool>(), any::<bool>(), any::<bool>()).prop_map(|(ignored, deleted, is_error)| {
        EventFlags {
            ignored,
            deleted,
            is_error,
        }
    })
}

pub fn event_flags_sequence_strategy() -> impl Strategy<Value = Vec<EventFlags>> {
    prop::collection::vec(event_flags_strategy(), 0..64)
}

/// Outcome events for one task with distinct record ids and a small error
/// message alphabet, so aggregation has kinds to merge
pub fn outcome_event_sequence_strategy(task_id: i64) -> impl Strategy<Value = Vec<OutcomeEvent>> {
    prop::collection::vec(
        (any::<bool>(), any::<bool>(), prop::option::of(0..3u8)),
        1..40,
    )
    .prop_map(move |shapes| {
        shapes
            .into_iter()
            .enumerate()
            .map(|(position, (ignored, deleted, error_kind))| {
                let record_id = format!("rec-{position}");
                let mut event = match error_kind {
                    Some(kind) => {
                        OutcomeEvent::failure(task_id, record_id, format!("error kind {kind}"))
                    }
                    None => OutcomeEvent::success(task_id, record_id),
                };
                if ignored {
                    event = event.mark_ignored();
                }
                if deleted {
                    event = event.mark_deleted();
                }
                event
            })
            .collect()
    })
}
