//! Scripted in-process stand-in for the external search index.
//!
//! Records every call and answers `count_records` from a pre-loaded
//! script, so tests can drive the depublication poll loop through
//! arbitrary convergence shapes. A kill switch can flip a task to
//! `Dropped` right after a chosen record is removed, simulating an
//! operator dropping the task while a job is mid-list.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use curator_core::error::Result;
use curator_core::models::TaskState;
use curator_core::postprocess::IndexClient;
use curator_core::store::memory::MemoryCuratorStore;
use curator_core::store::TaskStore;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

pub struct MockIndexClient {
    state: Mutex<MockIndexState>,
}

#[derive(Default)]
struct MockIndexState {
    /// Successive `count_records` answers; the last entry repeats forever
    count_script: VecDeque<i64>,
    count_calls: usize,
    removed: Vec<String>,
    tombstones: Vec<(String, String)>,
    remove_all_datasets: Vec<String>,
    failing_removals: HashSet<String>,
    kill_after_remove: Option<KillSwitch>,
}

struct KillSwitch {
    store: Arc<MemoryCuratorStore>,
    task_id: i64,
    after_record: String,
}

impl MockIndexClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockIndexState::default()),
        }
    }

    /// Load the `count_records` answer script; an empty script answers 0
    pub fn script_counts(&self, counts: &[i64]) {
        self.state.lock().count_script = counts.iter().copied().collect();
    }

    /// Make `remove` answer `false` for this record, as if the index
    /// held no such record
    pub fn fail_removal_of(&self, record_id: &str) {
        self.state.lock().failing_removals.insert(record_id.to_string());
    }

    /// Arm a one-shot task drop fired right after `after_record` is removed
    pub fn kill_task_after_removal(
        &self,
        store: Arc<MemoryCuratorStore>,
        task_id: i64,
        after_record: &str,
    ) {
        self.state.lock().kill_after_remove = Some(KillSwitch {
            store,
            task_id,
            after_record: after_record.to_string(),
        });
    }

    pub fn removed_records(&self) -> Vec<String> {
        self.state.lock().removed.clone()
    }

    pub fn tombstoned_records(&self) -> Vec<(String, String)> {
        self.state.lock().tombstones.clone()
    }

    pub fn remove_all_datasets(&self) -> Vec<String> {
        self.state.lock().remove_all_datasets.clone()
    }

    pub fn count_calls(&self) -> usize {
        self.state.lock().count_calls
    }
}

impl Default for MockIndexClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IndexClient for MockIndexClient {
    async fn count_records(
        &self,
        _dataset_id: &str,
        _cutoff: Option<DateTime<Utc>>,
    ) -> Result<i64> {
        let mut state = self.state.lock();
        state.count_calls += 1;
        let value = if state.count_script.len() > 1 {
            state.count_script.pop_front().unwrap_or(0)
        } else {
            state.count_script.front().copied().unwrap_or(0)
        };
        Ok(value)
    }

    async fn remove_all(&self, dataset_id: &str, _cutoff: Option<DateTime<Utc>>) -> Result<i64> {
        let mut state = self.state.lock();
        state.remove_all_datasets.push(dataset_id.to_string());
        Ok(state.count_script.front().copied().unwrap_or(0))
    }

    async fn remove(&self, record_id: &str) -> Result<bool> {
        // The kill switch writes through an async store call, so it must
        // fire after the lock guard is gone
        let armed = {
            let mut state = self.state.lock();
            if state.failing_removals.contains(record_id) {
                return Ok(false);
            }
            state.removed.push(record_id.to_string());
            let fire = state
                .kill_after_remove
                .as_ref()
                .is_some_and(|switch| switch.after_record == record_id);
            if fire {
                state.kill_after_remove.take()
            } else {
                None
            }
        };
        if let Some(switch) = armed {
            switch
                .store
                .update_state(switch.task_id, TaskState::Dropped, "Dropped by request")
                .await?;
        }
        Ok(true)
    }

    async fn index_tombstone(&self, record_id: &str, reason: &str) -> Result<bool> {
        self.state
            .lock()
            .tombstones
            .push((record_id.to_string(), reason.to_string()));
        Ok(true)
    }

    async fn get_tombstone(&self, record_id: &str) -> Result<bool> {
        let state = self.state.lock();
        Ok(state.tombstones.iter().any(|(id, _)| id == record_id))
    }
}
