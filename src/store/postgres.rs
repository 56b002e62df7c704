//! # PostgreSQL Store
//!
//! Production implementation of the store traits on top of `sqlx`.
//!
//! ## Overview
//!
//! All queries run at runtime against the schema in `migrations/`; rows come
//! back through plain `FromRow` structs and are converted into domain models
//! afterwards, so state strings and definition JSON are validated in one
//! place. Outcome commits run in a single transaction with the conditional
//! assignment insert first; a conflict there rolls everything back and
//! surfaces as [`CommitResult::Duplicate`].
//!
//! ## Database Schema
//!
//! - `curator_tasks`: one row per task, counters denormalized
//! - `curator_record_assignments`: `(task_id, record_id)` idempotency guard
//! - `curator_record_outcomes`: bucketed per-record results
//! - `curator_error_types` / `curator_error_details`: aggregated errors
//! - `curator_harvested_records`: incremental-harvest bookkeeping

use super::{
    bucket_for, CommitResult, ErrorStore, HarvestStore, OutcomeStore, OutcomeWriteSet, TaskStore,
};
use crate::config::DatabaseConfig;
use crate::error::{CuratorError, Result};
use crate::models::{
    ErrorDetail, ErrorKindCount, HarvestedRecord, RecordAssignment, RecordOutcome, RecordState,
    TaskDefinition, TaskInfo, TaskState,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use tracing::instrument;
use uuid::Uuid;

/// PostgreSQL-backed store; cheap to clone, shares the pool
#[derive(Clone)]
pub struct PgCuratorStore {
    pool: PgPool,
}

impl PgCuratorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build a pool from configuration and wrap it
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&config.url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Run the embedded migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| CuratorError::Database {
                message: format!("Migration failed: {e}"),
            })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(Debug, FromRow)]
struct TaskRow {
    task_id: i64,
    topology: String,
    owner_id: String,
    state: String,
    expected_records_count: Option<i64>,
    processed_records_count: i64,
    ignored_records_count: i64,
    deleted_records_count: i64,
    processed_errors_count: i64,
    deleted_errors_count: i64,
    info: String,
    definition: serde_json::Value,
    sent_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl TaskRow {
    fn into_task_info(self) -> Result<TaskInfo> {
        let state: TaskState = self
            .state
            .parse()
            .map_err(|message| CuratorError::Database { message })?;
        let definition: TaskDefinition = serde_json::from_value(self.definition)?;
        Ok(TaskInfo {
            task_id: self.task_id,
            topology: self.topology,
            owner_id: self.owner_id,
            state,
            expected_records_count: self.expected_records_count,
            processed_records_count: self.processed_records_count,
            ignored_records_count: self.ignored_records_count,
            deleted_records_count: self.deleted_records_count,
            processed_errors_count: self.processed_errors_count,
            deleted_errors_count: self.deleted_errors_count,
            info: self.info,
            definition,
            sent_at: self.sent_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            updated_at: self.updated_at,
        })
    }
}

const TASK_COLUMNS: &str = "task_id, topology, owner_id, state, expected_records_count, \
     processed_records_count, ignored_records_count, deleted_records_count, \
     processed_errors_count, deleted_errors_count, info, definition, \
     sent_at, started_at, finished_at, updated_at";

#[derive(Debug, FromRow)]
struct OutcomeRow {
    task_id: i64,
    bucket: i32,
    resource_num: i64,
    record_id: String,
    state: String,
    info: String,
    additional_info: Option<serde_json::Value>,
    error_message: Option<String>,
    result_resource: Option<String>,
    recorded_at: DateTime<Utc>,
}

impl OutcomeRow {
    fn into_outcome(self) -> Result<RecordOutcome> {
        let state: RecordState = self
            .state
            .parse()
            .map_err(|message| CuratorError::Database { message })?;
        Ok(RecordOutcome {
            task_id: self.task_id,
            bucket: self.bucket,
            resource_num: self.resource_num,
            record_id: self.record_id,
            state,
            info: self.info,
            additional_info: self.additional_info,
            error_message: self.error_message,
            result_resource: self.result_resource,
            recorded_at: self.recorded_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct AssignmentRow {
    task_id: i64,
    record_id: String,
    resource_num: i64,
    state: String,
}

impl AssignmentRow {
    fn into_assignment(self) -> Result<RecordAssignment> {
        let state: RecordState = self
            .state
            .parse()
            .map_err(|message| CuratorError::Database { message })?;
        Ok(RecordAssignment {
            task_id: self.task_id,
            record_id: self.record_id,
            resource_num: self.resource_num,
            state,
        })
    }
}

#[derive(Debug, FromRow)]
struct HarvestedRecordRow {
    dataset_id: String,
    record_local_id: String,
    latest_harvest_date: DateTime<Utc>,
    latest_harvest_md5: Uuid,
    preview_harvest_date: Option<DateTime<Utc>>,
    preview_harvest_md5: Option<Uuid>,
    published_harvest_date: Option<DateTime<Utc>>,
    published_harvest_md5: Option<Uuid>,
}

impl From<HarvestedRecordRow> for HarvestedRecord {
    fn from(row: HarvestedRecordRow) -> Self {
        HarvestedRecord {
            dataset_id: row.dataset_id,
            record_local_id: row.record_local_id,
            latest_harvest_date: row.latest_harvest_date,
            latest_harvest_md5: row.latest_harvest_md5,
            preview_harvest_date: row.preview_harvest_date,
            preview_harvest_md5: row.preview_harvest_md5,
            published_harvest_date: row.published_harvest_date,
            published_harvest_md5: row.published_harvest_md5,
        }
    }
}

#[async_trait]
impl TaskStore for PgCuratorStore {
    async fn insert_task(&self, task: &TaskInfo) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO curator_tasks (
                task_id, topology, owner_id, state, expected_records_count,
                processed_records_count, ignored_records_count, deleted_records_count,
                processed_errors_count, deleted_errors_count,
                info, definition, sent_at, started_at, finished_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (task_id) DO NOTHING
            "#,
        )
        .bind(task.task_id)
        .bind(&task.topology)
        .bind(&task.owner_id)
        .bind(task.state.to_string())
        .bind(task.expected_records_count)
        .bind(task.processed_records_count)
        .bind(task.ignored_records_count)
        .bind(task.deleted_records_count)
        .bind(task.processed_errors_count)
        .bind(task.deleted_errors_count)
        .bind(&task.info)
        .bind(serde_json::to_value(&task.definition)?)
        .bind(task.sent_at)
        .bind(task.started_at)
        .bind(task.finished_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_task(&self, task_id: i64) -> Result<Option<TaskInfo>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM curator_tasks WHERE task_id = $1"
        ))
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TaskRow::into_task_info).transpose()
    }

    async fn set_expected_count(&self, task_id: i64, expected: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE curator_tasks
            SET expected_records_count = $2, updated_at = NOW()
            WHERE task_id = $1
            "#,
        )
        .bind(task_id)
        .bind(expected)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_state(&self, task_id: i64, state: TaskState, info: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE curator_tasks
            SET state = $2,
                info = $3,
                finished_at = CASE WHEN $4 THEN NOW() ELSE finished_at END,
                updated_at = NOW()
            WHERE task_id = $1
            "#,
        )
        .bind(task_id)
        .bind(state.to_string())
        .bind(info)
        .bind(state.is_terminal())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_in_states(&self, states: &[TaskState]) -> Result<Vec<TaskInfo>> {
        let state_names: Vec<String> = states.iter().map(|state| state.to_string()).collect();
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM curator_tasks WHERE state = ANY($1) ORDER BY task_id"
        ))
        .bind(&state_names)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TaskRow::into_task_info).collect()
    }
}

#[async_trait]
impl OutcomeStore for PgCuratorStore {
    #[instrument(skip(self, write_set), fields(task_id = write_set.assignment.task_id))]
    async fn commit_outcome(&self, write_set: &OutcomeWriteSet) -> Result<CommitResult> {
        let task_id = write_set.assignment.task_id;
        let mut tx = self.pool.begin().await?;

        // Idempotency guard first: a redelivered event conflicts here and the
        // whole write-set is abandoned.
        let inserted = sqlx::query(
            r#"
            INSERT INTO curator_record_assignments (task_id, record_id, resource_num, state)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (task_id, record_id) DO NOTHING
            "#,
        )
        .bind(task_id)
        .bind(&write_set.assignment.record_id)
        .bind(write_set.assignment.resource_num)
        .bind(write_set.assignment.state.to_string())
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(CommitResult::Duplicate);
        }

        sqlx::query(
            r#"
            INSERT INTO curator_record_outcomes (
                task_id, bucket, resource_num, record_id, state,
                info, additional_info, error_message, result_resource, recorded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(task_id)
        .bind(write_set.outcome.bucket)
        .bind(write_set.outcome.resource_num)
        .bind(&write_set.outcome.record_id)
        .bind(write_set.outcome.state.to_string())
        .bind(&write_set.outcome.info)
        .bind(&write_set.outcome.additional_info)
        .bind(&write_set.outcome.error_message)
        .bind(&write_set.outcome.result_resource)
        .bind(write_set.outcome.recorded_at)
        .execute(&mut *tx)
        .await?;

        let mut canonical_error_id = None;
        if let Some(error) = &write_set.error {
            // First writer of a message wins the uuid; later events with the
            // same message collapse onto it.
            let canonical: Uuid = sqlx::query_scalar(
                r#"
                INSERT INTO curator_error_types (task_id, error_id, message, occurrence_count)
                VALUES ($1, $2, $3, 1)
                ON CONFLICT (task_id, message) DO UPDATE
                    SET occurrence_count = curator_error_types.occurrence_count + 1
                RETURNING error_id
                "#,
            )
            .bind(task_id)
            .bind(error.error_id)
            .bind(&error.message)
            .fetch_one(&mut *tx)
            .await?;

            if let Some(detail) = &error.detail {
                sqlx::query(
                    r#"
                    INSERT INTO curator_error_details (
                        task_id, error_id, occurrence, record_id, additional_info
                    )
                    VALUES (
                        $1, $2,
                        (SELECT COALESCE(MAX(occurrence), 0) + 1
                         FROM curator_error_details
                         WHERE task_id = $1 AND error_id = $2),
                        $3, $4
                    )
                    "#,
                )
                .bind(task_id)
                .bind(canonical)
                .bind(&detail.record_id)
                .bind(&detail.additional_info)
                .execute(&mut *tx)
                .await?;
            }
            canonical_error_id = Some(canonical);
        }

        let (new_state, new_info) = match &write_set.new_state {
            Some((state, info)) => (Some(state.to_string()), Some(info.clone())),
            None => (None, None),
        };
        sqlx::query(
            r#"
            UPDATE curator_tasks
            SET processed_records_count = $2,
                ignored_records_count = $3,
                deleted_records_count = $4,
                processed_errors_count = $5,
                deleted_errors_count = $6,
                state = COALESCE($7, state),
                info = COALESCE($8, info),
                finished_at = COALESCE($9, finished_at),
                updated_at = NOW()
            WHERE task_id = $1
            "#,
        )
        .bind(task_id)
        .bind(write_set.counters.processed_records)
        .bind(write_set.counters.ignored_records)
        .bind(write_set.counters.deleted_records)
        .bind(write_set.counters.processed_errors)
        .bind(write_set.counters.deleted_errors)
        .bind(new_state)
        .bind(new_info)
        .bind(write_set.finished_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(CommitResult::Applied { canonical_error_id })
    }

    async fn find_assignment(
        &self,
        task_id: i64,
        record_id: &str,
    ) -> Result<Option<RecordAssignment>> {
        let row = sqlx::query_as::<_, AssignmentRow>(
            r#"
            SELECT task_id, record_id, resource_num, state
            FROM curator_record_assignments
            WHERE task_id = $1 AND record_id = $2
            "#,
        )
        .bind(task_id)
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(AssignmentRow::into_assignment).transpose()
    }

    #[instrument(skip(self))]
    async fn latest_resource_num(&self, task_id: i64) -> Result<i64> {
        // Walk buckets from zero until the first empty one; the previous
        // bucket's max is the latest assigned number.
        let mut latest = 0;
        let mut bucket = 0;
        loop {
            let max_in_bucket: Option<i64> = sqlx::query_scalar(
                r#"
                SELECT MAX(resource_num)
                FROM curator_record_outcomes
                WHERE task_id = $1 AND bucket = $2
                "#,
            )
            .bind(task_id)
            .bind(bucket)
            .fetch_one(&self.pool)
            .await?;
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
        let rows = sqlx::query_as::<_, OutcomeRow>(
            r#"
            SELECT task_id, bucket, resource_num, record_id, state,
                   info, additional_info, error_message, result_resource, recorded_at
            FROM curator_record_outcomes
            WHERE task_id = $1
              AND bucket BETWEEN $2 AND $3
              AND resource_num BETWEEN $4 AND $5
            ORDER BY resource_num
            "#,
        )
        .bind(task_id)
        .bind(bucket_for(from_num))
        .bind(bucket_for(to_num))
        .bind(from_num)
        .bind(to_num)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(OutcomeRow::into_outcome).collect()
    }
}

#[async_trait]
impl ErrorStore for PgCuratorStore {
    async fn error_counters(&self, task_id: i64) -> Result<Vec<ErrorKindCount>> {
        let rows = sqlx::query_as::<_, ErrorKindRow>(
            r#"
            SELECT task_id, error_id, message, occurrence_count
            FROM curator_error_types
            WHERE task_id = $1
            ORDER BY message
            "#,
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ErrorKindRow::into_count).collect())
    }

    async fn error_details(
        &self,
        task_id: i64,
        error_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ErrorDetail>> {
        let rows = sqlx::query_as::<_, ErrorDetailRow>(
            r#"
            SELECT task_id, error_id, occurrence, record_id, additional_info
            FROM curator_error_details
            WHERE task_id = $1 AND error_id = $2
            ORDER BY occurrence
            LIMIT $3
            "#,
        )
        .bind(task_id)
        .bind(error_id)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ErrorDetailRow::into_detail).collect())
    }
}

#[derive(Debug, FromRow)]
struct ErrorKindRow {
    task_id: i64,
    error_id: Uuid,
    message: String,
    occurrence_count: i64,
}

impl ErrorKindRow {
    fn into_count(self) -> ErrorKindCount {
        ErrorKindCount {
            task_id: self.task_id,
            error_id: self.error_id,
            message: self.message,
            occurrences: self.occurrence_count,
        }
    }
}

#[derive(Debug, FromRow)]
struct ErrorDetailRow {
    task_id: i64,
    error_id: Uuid,
    occurrence: i64,
    record_id: String,
    additional_info: String,
}

impl ErrorDetailRow {
    fn into_detail(self) -> ErrorDetail {
        ErrorDetail {
            task_id: self.task_id,
            error_id: self.error_id,
            occurrence: self.occurrence,
            record_id: self.record_id,
            additional_info: self.additional_info,
        }
    }
}

#[async_trait]
impl HarvestStore for PgCuratorStore {
    async fn find_record(
        &self,
        dataset_id: &str,
        record_local_id: &str,
    ) -> Result<Option<HarvestedRecord>> {
        let row = sqlx::query_as::<_, HarvestedRecordRow>(
            r#"
            SELECT dataset_id, record_local_id,
                   latest_harvest_date, latest_harvest_md5,
                   preview_harvest_date, preview_harvest_md5,
                   published_harvest_date, published_harvest_md5
            FROM curator_harvested_records
            WHERE dataset_id = $1 AND record_local_id = $2
            "#,
        )
        .bind(dataset_id)
        .bind(record_local_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(HarvestedRecord::from))
    }

    async fn insert_record(&self, record: &HarvestedRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO curator_harvested_records (
                dataset_id, record_local_id,
                latest_harvest_date, latest_harvest_md5,
                preview_harvest_date, preview_harvest_md5,
                published_harvest_date, published_harvest_md5
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (dataset_id, record_local_id) DO UPDATE
                SET latest_harvest_date = EXCLUDED.latest_harvest_date,
                    latest_harvest_md5 = EXCLUDED.latest_harvest_md5
            "#,
        )
        .bind(&record.dataset_id)
        .bind(&record.record_local_id)
        .bind(record.latest_harvest_date)
        .bind(record.latest_harvest_md5)
        .bind(record.preview_harvest_date)
        .bind(record.preview_harvest_md5)
        .bind(record.published_harvest_date)
        .bind(record.published_harvest_md5)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_latest_harvest(
        &self,
        dataset_id: &str,
        record_local_id: &str,
        harvest_date: DateTime<Utc>,
        md5: Uuid,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE curator_harvested_records
            SET latest_harvest_date = $3, latest_harvest_md5 = $4
            WHERE dataset_id = $1 AND record_local_id = $2
            "#,
        )
        .bind(dataset_id)
        .bind(record_local_id)
        .bind(harvest_date)
        .bind(md5)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_preview_env(
        &self,
        dataset_id: &str,
        record_local_id: &str,
        harvest_date: DateTime<Utc>,
        md5: Uuid,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE curator_harvested_records
            SET preview_harvest_date = $3, preview_harvest_md5 = $4
            WHERE dataset_id = $1 AND record_local_id = $2
            "#,
        )
        .bind(dataset_id)
        .bind(record_local_id)
        .bind(harvest_date)
        .bind(md5)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_published_env(
        &self,
        dataset_id: &str,
        record_local_id: &str,
        harvest_date: DateTime<Utc>,
        md5: Uuid,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE curator_harvested_records
            SET published_harvest_date = $3, published_harvest_md5 = $4
            WHERE dataset_id = $1 AND record_local_id = $2
            "#,
        )
        .bind(dataset_id)
        .bind(record_local_id)
        .bind(harvest_date)
        .bind(md5)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_published_env(&self, dataset_id: &str, record_local_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE curator_harvested_records
            SET published_harvest_date = NULL, published_harvest_md5 = NULL
            WHERE dataset_id = $1 AND record_local_id = $2
            "#,
        )
        .bind(dataset_id)
        .bind(record_local_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn dataset_records(
        &self,
        dataset_id: &str,
        after_record: Option<&str>,
        limit: i64,
    ) -> Result<Vec<HarvestedRecord>> {
        let rows = sqlx::query_as::<_, HarvestedRecordRow>(
            r#"
            SELECT dataset_id, record_local_id,
                   latest_harvest_date, latest_harvest_md5,
                   preview_harvest_date, preview_harvest_md5,
                   published_harvest_date, published_harvest_md5
            FROM curator_harvested_records
            WHERE dataset_id = $1
              AND ($2::text IS NULL OR record_local_id > $2)
            ORDER BY record_local_id
            LIMIT $3
            "#,
        )
        .bind(dataset_id)
        .bind(after_record)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(HarvestedRecord::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_row_conversion_rejects_bad_state() {
        let row = TaskRow {
            task_id: 1,
            topology: "harvest".to_string(),
            owner_id: "instance-a".to_string(),
            state: "limbo".to_string(),
            expected_records_count: None,
            processed_records_count: 0,
            ignored_records_count: 0,
            deleted_records_count: 0,
            processed_errors_count: 0,
            deleted_errors_count: 0,
            info: String::new(),
            definition: serde_json::json!({}),
            sent_at: Utc::now(),
            started_at: None,
            finished_at: None,
            updated_at: Utc::now(),
        };
        assert!(row.into_task_info().is_err());
    }

    #[test]
    fn test_task_row_conversion_defaults_definition_fields() {
        let row = TaskRow {
            task_id: 1,
            topology: "harvest".to_string(),
            owner_id: "instance-a".to_string(),
            state: "queued".to_string(),
            expected_records_count: Some(10),
            processed_records_count: 3,
            ignored_records_count: 1,
            deleted_records_count: 0,
            processed_errors_count: 2,
            deleted_errors_count: 0,
            info: String::new(),
            definition: serde_json::json!({"needs_post_processing": true}),
            sent_at: Utc::now(),
            started_at: None,
            finished_at: None,
            updated_at: Utc::now(),
        };
        let task = row.into_task_info().unwrap();
        assert_eq!(task.state, TaskState::Queued);
        assert!(task.definition.needs_post_processing);
        assert!(task.definition.record_ids.is_empty());
    }
}
