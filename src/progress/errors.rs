//! Per-task error aggregation cache.
//!
//! Error kinds are keyed by their message text and identified by a uuid.
//! The uuid a fresh message gets is only a candidate until a commit confirms
//! it: another writer may have created the kind first, in which case the
//! store returns the uuid already on the row and the cache adopts it.

use crate::models::ErrorKindCount;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
struct KindEntry {
    error_id: Uuid,
    occurrences: i64,
}

/// Message-to-uuid cache with per-kind occurrence counts
#[derive(Debug, Clone, Default)]
pub struct ErrorAggregator {
    kinds: HashMap<String, KindEntry>,
}

impl ErrorAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from the persisted per-kind counters after a restart
    pub fn from_counters(kinds: &[ErrorKindCount]) -> Self {
        let kinds = kinds
            .iter()
            .map(|kind| {
                (
                    kind.message.clone(),
                    KindEntry {
                        error_id: kind.error_id,
                        occurrences: kind.occurrences,
                    },
                )
            })
            .collect();
        Self { kinds }
    }

    /// Known uuid for a message, if one has been committed or rehydrated
    pub fn candidate_id(&self, message: &str) -> Option<Uuid> {
        self.kinds.get(message).map(|entry| entry.error_id)
    }

    pub fn occurrences(&self, message: &str) -> i64 {
        self.kinds
            .get(message)
            .map(|entry| entry.occurrences)
            .unwrap_or(0)
    }

    /// Whether the next occurrence of a message still fits under the
    /// per-kind diagnostic sample cap
    pub fn has_sample_room(&self, message: &str, cap: u32) -> bool {
        self.occurrences(message) < i64::from(cap)
    }

    /// Adopt the canonical uuid a commit returned and count the occurrence
    pub fn record_committed(&mut self, message: &str, canonical_id: Uuid) {
        let entry = self
            .kinds
            .entry(message.to_string())
            .or_insert(KindEntry {
                error_id: canonical_id,
                occurrences: 0,
            });
        entry.error_id = canonical_id;
        entry.occurrences += 1;
    }

    pub fn distinct_kinds(&self) -> usize {
        self.kinds.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_message_has_no_id_and_zero_count() {
        let aggregator = ErrorAggregator::new();
        assert!(aggregator.candidate_id("nope").is_none());
        assert_eq!(aggregator.occurrences("nope"), 0);
        assert!(aggregator.has_sample_room("nope", 1));
    }

    #[test]
    fn test_record_committed_adopts_canonical_id() {
        let mut aggregator = ErrorAggregator::new();
        let canonical = Uuid::new_v4();
        aggregator.record_committed("conversion failed", canonical);
        aggregator.record_committed("conversion failed", canonical);

        assert_eq!(aggregator.candidate_id("conversion failed"), Some(canonical));
        assert_eq!(aggregator.occurrences("conversion failed"), 2);
        assert_eq!(aggregator.distinct_kinds(), 1);
    }

    #[test]
    fn test_sample_room_closes_at_cap() {
        let mut aggregator = ErrorAggregator::new();
        let id = Uuid::new_v4();
        aggregator.record_committed("x", id);
        aggregator.record_committed("x", id);
        assert!(aggregator.has_sample_room("x", 3));
        aggregator.record_committed("x", id);
        assert!(!aggregator.has_sample_room("x", 3));
    }

    #[test]
    fn test_rehydrates_from_persisted_counters() {
        let id = Uuid::new_v4();
        let kinds = vec![ErrorKindCount {
            task_id: 7,
            error_id: id,
            message: "timeout".to_string(),
            occurrences: 41,
        }];
        let aggregator = ErrorAggregator::from_counters(&kinds);
        assert_eq!(aggregator.candidate_id("timeout"), Some(id));
        assert_eq!(aggregator.occurrences("timeout"), 41);
        assert!(!aggregator.has_sample_room("timeout", 40));
    }
}
