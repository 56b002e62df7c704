//! # In-Process Store
//!
//! A `parking_lot`-locked implementation of every store trait with the same
//! commit atomicity and bucket semantics as the PostgreSQL store. Used by
//! the test suite and by embedders that do not need durability.

use super::{
    bucket_for, store_unavailable, CommitResult, ErrorStore, HarvestStore, OutcomeStore,
    OutcomeWriteSet, TaskStore,
};
use crate::error::Result;
use crate::models::{
    ErrorDetail, ErrorKindCount, HarvestedRecord, RecordAssignment, RecordOutcome, TaskInfo,
    TaskState,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound::{Excluded, Included};
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    tasks: HashMap<i64, TaskInfo>,
    assignments: HashMap<(i64, String), RecordAssignment>,
    outcomes: BTreeMap<(i64, i32, i64), RecordOutcome>,
    error_kinds: HashMap<i64, Vec<ErrorKindCount>>,
    error_details: HashMap<(i64, Uuid), Vec<ErrorDetail>>,
    harvested: BTreeMap<(String, String), HarvestedRecord>,
}

/// In-process store; one lock serializes commits, matching the per-task
/// single-consumer model
#[derive(Default)]
pub struct MemoryCuratorStore {
    inner: Mutex<Inner>,
}

impl MemoryCuratorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryCuratorStore {
    async fn insert_task(&self, task: &TaskInfo) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.tasks.entry(task.task_id).or_insert_with(|| task.clone());
        Ok(())
    }

    async fn get_task(&self, task_id: i64) -> Result<Option<TaskInfo>> {
        let inner = self.inner.lock();
        Ok(inner.tasks.get(&task_id).cloned())
    }

    async fn set_expected_count(&self, task_id: i64, expected: i64) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(task) = inner.tasks.get_mut(&task_id) {
            task.expected_records_count = Some(expected);
            task.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn update_state(&self, task_id: i64, state: TaskState, info: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(task) = inner.tasks.get_mut(&task_id) {
            let now = Utc::now();
            task.state = state;
            task.info = info.to_string();
            task.updated_at = now;
            if state.is_terminal() {
                task.finished_at = Some(now);
            }
        }
        Ok(())
    }

    async fn list_in_states(&self, states: &[TaskState]) -> Result<Vec<TaskInfo>> {
        let inner = self.inner.lock();
        let mut tasks: Vec<TaskInfo> = inner
            .tasks
            .values()
            .filter(|task| states.contains(&task.state))
            .cloned()
            .collect();
        tasks.sort_by_key(|task| task.task_id);
        Ok(tasks)
    }
}

#[async_trait]
impl OutcomeStore for MemoryCuratorStore {
    async fn commit_outcome(&self, write_set: &OutcomeWriteSet) -> Result<CommitResult> {
        let mut inner = self.inner.lock();
        let task_id = write_set.assignment.task_id;
        let assignment_key = (task_id, write_set.assignment.record_id.clone());

        if inner.assignments.contains_key(&assignment_key) {
            return Ok(CommitResult::Duplicate);
        }

        if !inner.tasks.contains_key(&task_id) {
            return Err(store_unavailable(format!(
                "no task row for commit, task_id={task_id}"
            )));
        }

        inner
            .assignments
            .insert(assignment_key, write_set.assignment.clone());

        let outcome = write_set.outcome.clone();
        inner
            .outcomes
            .insert((task_id, outcome.bucket, outcome.resource_num), outcome);

        let mut canonical_error_id = None;
        if let Some(error) = &write_set.error {
            let kinds = inner.error_kinds.entry(task_id).or_default();
            let canonical = match kinds.iter_mut().find(|kind| kind.message == error.message) {
                Some(existing) => {
                    existing.occurrences += 1;
                    existing.error_id
                }
                None => {
                    kinds.push(ErrorKindCount {
                        task_id,
                        error_id: error.error_id,
                        message: error.message.clone(),
                        occurrences: 1,
                    });
                    error.error_id
                }
            };
            canonical_error_id = Some(canonical);

            if let Some(detail) = &error.detail {
                let details = inner.error_details.entry((task_id, canonical)).or_default();
                let occurrence = details.len() as i64 + 1;
                details.push(ErrorDetail {
                    task_id,
                    error_id: canonical,
                    occurrence,
                    record_id: detail.record_id.clone(),
                    additional_info: detail.additional_info.clone(),
                });
            }
        }

        let task = inner
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| store_unavailable("task row vanished mid-commit"))?;
        task.processed_records_count = write_set.counters.processed_records;
        task.ignored_records_count = write_set.counters.ignored_records;
        task.deleted_records_count = write_set.counters.deleted_records;
        task.processed_errors_count = write_set.counters.processed_errors;
        task.deleted_errors_count = write_set.counters.deleted_errors;
        task.updated_at = Utc::now();
        if let Some((state, info)) = &write_set.new_state {
            task.state = *state;
            task.info = info.clone();
        }
        if let Some(finished_at) = write_set.finished_at {
            task.finished_at = Some(finished_at);
        }

        Ok(CommitResult::Applied { canonical_error_id })
    }

    async fn find_assignment(
        &self,
        task_id: i64,
        record_id: &str,
    ) -> Result<Option<RecordAssignment>> {
        let inner = self.inner.lock();
        Ok(inner
            .assignments
            .get(&(task_id, record_id.to_string()))
            .cloned())
    }

    async fn latest_resource_num(&self, task_id: i64) -> Result<i64> {
        let inner = self.inner.lock();
        let mut latest = 0;
        let mut bucket = 0;
        loop {
            let max_in_bucket = inner
                .outcomes
                .range((task_id, bucket, i64::MIN)..=(task_id, bucket, i64::MAX))
                .map(|((_, _, resource_num), _)| *resource_num)
                .max();
            match max_in_bucket {
                Some(resource_num) => {
                    latest = resource_num;
                    bucket += 1;
                }
                None => break,
            }
        }
        Ok(latest)
    }

    async fn page_outcomes(
        &self,
        task_id: i64,
        from_num: i64,
        to_num: i64,
    ) -> Result<Vec<RecordOutcome>> {
        if from_num > to_num {
            return Ok(Vec::new());
        }
        let inner = self.inner.lock();
        let from_bucket = bucket_for(from_num);
        let to_bucket = bucket_for(to_num);
        Ok(inner
            .outcomes
            .range((task_id, from_bucket, from_num)..=(task_id, to_bucket, to_num))
            .map(|(_, outcome)| outcome.clone())
            .collect())
    }
}

#[async_trait]
impl ErrorStore for MemoryCuratorStore {
    async fn error_counters(&self, task_id: i64) -> Result<Vec<ErrorKindCount>> {
        let inner = self.inner.lock();
        Ok(inner.error_kinds.get(&task_id).cloned().unwrap_or_default())
    }

    async fn error_details(
        &self,
        task_id: i64,
        error_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ErrorDetail>> {
        let inner = self.inner.lock();
        Ok(inner
            .error_details
            .get(&(task_id, error_id))
            .map(|details| {
                details
                    .iter()
                    .take(limit.max(0) as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl HarvestStore for MemoryCuratorStore {
    async fn find_record(
        &self,
        dataset_id: &str,
        record_local_id: &str,
    ) -> Result<Option<HarvestedRecord>> {
        let inner = self.inner.lock();
        Ok(inner
            .harvested
            .get(&(dataset_id.to_string(), record_local_id.to_string()))
            .cloned())
    }

    async fn insert_record(&self, record: &HarvestedRecord) -> Result<()> {
        let mut inner = self.inner.lock();
        let key = (record.dataset_id.clone(), record.record_local_id.clone());
        match inner.harvested.get_mut(&key) {
            // An existing row only gets a fresher latest pair; the
            // environment columns stay as the ingestion confirmations
            // left them.
            Some(existing) => {
                existing.latest_harvest_date = record.latest_harvest_date;
                existing.latest_harvest_md5 = record.latest_harvest_md5;
            }
            None => {
                inner.harvested.insert(key, record.clone());
            }
        }
        Ok(())
    }

    async fn update_latest_harvest(
        &self,
        dataset_id: &str,
        record_local_id: &str,
        harvest_date: DateTime<Utc>,
        md5: Uuid,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(record) = inner
            .harvested
            .get_mut(&(dataset_id.to_string(), record_local_id.to_string()))
        {
            record.latest_harvest_date = harvest_date;
            record.latest_harvest_md5 = md5;
        }
        Ok(())
    }

    async fn update_preview_env(
        &self,
        dataset_id: &str,
        record_local_id: &str,
        harvest_date: DateTime<Utc>,
        md5: Uuid,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(record) = inner
            .harvested
            .get_mut(&(dataset_id.to_string(), record_local_id.to_string()))
        {
            record.preview_harvest_date = Some(harvest_date);
            record.preview_harvest_md5 = Some(md5);
        }
        Ok(())
    }

    async fn update_published_env(
        &self,
        dataset_id: &str,
        record_local_id: &str,
        harvest_date: DateTime<Utc>,
        md5: Uuid,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(record) = inner
            .harvested
            .get_mut(&(dataset_id.to_string(), record_local_id.to_string()))
        {
            record.published_harvest_date = Some(harvest_date);
            record.published_harvest_md5 = Some(md5);
        }
        Ok(())
    }

    async fn clear_published_env(&self, dataset_id: &str, record_local_id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(record) = inner
            .harvested
            .get_mut(&(dataset_id.to_string(), record_local_id.to_string()))
        {
            record.published_harvest_date = None;
            record.published_harvest_md5 = None;
        }
        Ok(())
    }

    async fn dataset_records(
        &self,
        dataset_id: &str,
        after_record: Option<&str>,
        limit: i64,
    ) -> Result<Vec<HarvestedRecord>> {
        let inner = self.inner.lock();
        let start = match after_record {
            Some(after) => Excluded((dataset_id.to_string(), after.to_string())),
            None => Included((dataset_id.to_string(), String::new())),
        };
        Ok(inner
            .harvested
            .range((start, std::ops::Bound::Unbounded))
            .take_while(|((dataset, _), _)| dataset == dataset_id)
            .take(limit.max(0) as usize)
            .map(|(_, record)| record.clone())
            .collect())
    }
}
