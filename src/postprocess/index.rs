//! # Index Client
//!
//! Seam to the external search index that serves the preview and publish
//! environments. Post-processing jobs depublish through this trait; the
//! concrete client (Solr, an HTTP facade, a test double) is injected at
//! startup the same way the store handles are.
//!
//! Removal is asynchronous on the index side: [`IndexClient::remove_all`]
//! only triggers deletion, and callers observe completion by polling
//! [`IndexClient::count_records`] until it reaches zero.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// External index operations used by depublication and cleanup jobs
#[async_trait]
pub trait IndexClient: Send + Sync {
    /// Number of indexed records for a dataset. With a cutoff, only records
    /// last indexed strictly before it are counted
    async fn count_records(
        &self,
        dataset_id: &str,
        cutoff: Option<DateTime<Utc>>,
    ) -> Result<i64>;

    /// Trigger removal of a dataset's records, optionally restricted to
    /// those last indexed strictly before the cutoff. Returns the number of
    /// records scheduled for removal; actual deletion completes later
    async fn remove_all(&self, dataset_id: &str, cutoff: Option<DateTime<Utc>>) -> Result<i64>;

    /// Remove one record; `false` when the index held no such record
    async fn remove(&self, record_id: &str) -> Result<bool>;

    /// Replace a record with a tombstone documenting why it was removed;
    /// `false` when the record could not be tombstoned
    async fn index_tombstone(&self, record_id: &str, reason: &str) -> Result<bool>;

    /// Whether the index already holds a tombstone for the record. Lets a
    /// re-run skip the tombstone write for records settled before a crash
    async fn get_tombstone(&self, record_id: &str) -> Result<bool>;
}
