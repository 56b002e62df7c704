//! Shared fixtures for the integration test suite: in-process stores,
//! trackers with test-friendly configuration, and task builders.

#![allow(dead_code)] // Not every test binary uses every fixture

pub mod mock_index;
pub mod strategies;

pub use mock_index::MockIndexClient;

use chrono::{DateTime, Utc};
use curator_core::config::{CancellationConfig, PostProcessingConfig, ProgressConfig};
use curator_core::harvest::content_fingerprint;
use curator_core::models::{
    HarvestedRecord, NewTask, RecordAssignment, RecordOutcome, RecordState, TaskDefinition,
};
use curator_core::progress::ProgressTracker;
use curator_core::store::memory::MemoryCuratorStore;
use curator_core::store::{bucket_for, OutcomeStore, OutcomeWriteSet, StoreHandles, TaskCounters};
use std::sync::Arc;

/// Owner id used for every task the tests submit
pub const TEST_OWNER: &str = "curator-test";

/// Fresh in-process store plus handles for every seam
pub fn test_stores() -> (Arc<MemoryCuratorStore>, StoreHandles) {
    let store = Arc::new(MemoryCuratorStore::new());
    let handles = StoreHandles::from_shared(store.clone());
    (store, handles)
}

/// Tracker over the given store with default progress configuration
pub fn test_tracker(store: Arc<MemoryCuratorStore>) -> Arc<ProgressTracker> {
    tracker_with_config(store, ProgressConfig::default())
}

pub fn tracker_with_config(
    store: Arc<MemoryCuratorStore>,
    config: ProgressConfig,
) -> Arc<ProgressTracker> {
    Arc::new(ProgressTracker::new(StoreHandles::from_shared(store), config))
}

/// Post-processing configuration with intervals short enough for tests
pub fn fast_postprocess_config() -> PostProcessingConfig {
    PostProcessingConfig {
        scan_interval_seconds: 1,
        depublication_poll_interval_ms: 1,
        depublication_timeout_seconds: 30,
        cleanup_page_size: 2,
    }
}

/// Kill-flag probe configuration that always reads the live task state
pub fn uncached_cancellation_config() -> CancellationConfig {
    CancellationConfig { kill_flag_ttl_ms: 0 }
}

/// Plain record-streaming task without post-processing
pub fn streaming_task(task_id: i64, expected: i64) -> NewTask {
    NewTask {
        task_id,
        topology: "harvest".to_string(),
        owner_id: TEST_OWNER.to_string(),
        expected_records_count: Some(expected),
        definition: TaskDefinition::default(),
        sent_at: None,
    }
}

/// Harvest task that hands off to stale-record cleanup when done
pub fn harvest_task(
    task_id: i64,
    dataset_id: &str,
    expected: Option<i64>,
    sent_at: Option<DateTime<Utc>>,
) -> NewTask {
    NewTask {
        task_id,
        topology: "harvest".to_string(),
        owner_id: TEST_OWNER.to_string(),
        expected_records_count: expected,
        definition: TaskDefinition::for_harvest_cleanup(dataset_id),
        sent_at,
    }
}

/// Whole-dataset depublication task (empty record list)
pub fn dataset_depublication_task(task_id: i64, dataset_id: &str) -> NewTask {
    NewTask {
        task_id,
        topology: "depublication".to_string(),
        owner_id: TEST_OWNER.to_string(),
        expected_records_count: None,
        definition: TaskDefinition::for_dataset_depublication(dataset_id),
        sent_at: None,
    }
}

/// Record-list depublication task; expected count matches the list
pub fn record_depublication_task(task_id: i64, dataset_id: &str, record_ids: &[&str]) -> NewTask {
    NewTask {
        task_id,
        topology: "depublication".to_string(),
        owner_id: TEST_OWNER.to_string(),
        expected_records_count: Some(record_ids.len() as i64),
        definition: TaskDefinition::for_record_depublication(
            dataset_id,
            record_ids.iter().map(|id| (*id).to_string()).collect(),
            "rights expired",
        ),
        sent_at: None,
    }
}

/// Harvest bookkeeping row as a first sighting, fingerprinted from the
/// record id
pub fn harvested_record(
    dataset_id: &str,
    record_local_id: &str,
    harvested_at: DateTime<Utc>,
) -> HarvestedRecord {
    HarvestedRecord {
        dataset_id: dataset_id.to_string(),
        record_local_id: record_local_id.to_string(),
        latest_harvest_date: harvested_at,
        latest_harvest_md5: content_fingerprint(record_local_id.as_bytes()),
        preview_harvest_date: None,
        preview_harvest_md5: None,
        published_harvest_date: None,
        published_harvest_md5: None,
    }
}

/// Commit a bare success outcome at a chosen resource number, bypassing
/// the dispatcher; used to shape bucket layouts directly
pub async fn commit_synthetic_outcome(store: &MemoryCuratorStore, task_id: i64, resource_num: i64) {
    let record_id = format!("rec-{resource_num}");
    let write_set = OutcomeWriteSet {
        assignment: RecordAssignment {
            task_id,
            record_id: record_id.clone(),
            resource_num,
            state: RecordState::Success,
        },
        outcome: RecordOutcome {
            task_id,
            bucket: bucket_for(resource_num),
            resource_num,
            record_id,
            state: RecordState::Success,
            info: String::new(),
            additional_info: None,
            error_message: None,
            result_resource: None,
            recorded_at: Utc::now(),
        },
        counters: TaskCounters {
            processed_records: resource_num,
            ..TaskCounters::default()
        },
        new_state: None,
        finished_at: None,
        error: None,
    };
    store
        .commit_outcome(&write_set)
        .await
        .expect("synthetic outcome commit failed");
}
