//! # Harvested Record Model
//!
//! Per-record harvest bookkeeping used by the categorization engine.
//!
//! ## Overview
//!
//! One row per (dataset, record). The `latest_*` pair always reflects the
//! most recent harvest attempt. The `preview_*` and `published_*` pairs are
//! written by the respective target environment's ingestion step once the
//! record has actually landed there; until then they stay empty, which the
//! categorization engine treats as "content differs". Content hashes are
//! 128-bit MD5 digests carried as [`Uuid`] values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Harvest bookkeeping row, keyed by (dataset_id, record_local_id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestedRecord {
    pub dataset_id: String,
    pub record_local_id: String,
    pub latest_harvest_date: DateTime<Utc>,
    pub latest_harvest_md5: Uuid,
    pub preview_harvest_date: Option<DateTime<Utc>>,
    pub preview_harvest_md5: Option<Uuid>,
    pub published_harvest_date: Option<DateTime<Utc>>,
    pub published_harvest_md5: Option<Uuid>,
}

impl HarvestedRecord {
    /// First-sighting row with only the latest pair populated
    pub fn first_sighting(params: &CategorizationParameters) -> Self {
        Self {
            dataset_id: params.dataset_id.clone(),
            record_local_id: params.record_local_id.clone(),
            latest_harvest_date: params.harvest_date,
            latest_harvest_md5: params.record_md5,
            preview_harvest_date: None,
            preview_harvest_md5: None,
            published_harvest_date: None,
            published_harvest_md5: None,
        }
    }
}

/// Input to one categorization decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorizationParameters {
    pub dataset_id: String,
    pub record_local_id: String,
    /// Content hash computed over the raw record bytes by the harvesting layer
    pub record_md5: Uuid,
    pub harvest_date: DateTime<Utc>,
    /// Full (non-incremental) harvest: deduplication does not apply
    pub full_harvest: bool,
}

/// The two possible categorization verdicts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    EligibleForProcessing,
    AlreadyProcessed,
}

/// Verdict plus the inputs and the pre-decision record snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorizationResult {
    pub category: Category,
    pub parameters: CategorizationParameters,
    /// Row as read before the decision; `None` on first sighting
    pub previous_record: Option<HarvestedRecord>,
}

impl CategorizationResult {
    pub fn is_eligible(&self) -> bool {
        self.category == Category::EligibleForProcessing
    }
}
