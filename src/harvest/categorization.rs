//! # Harvest Categorization
//!
//! Decides per harvested record whether its content warrants reprocessing.
//!
//! ## Overview
//!
//! A record must be reprocessed when it has never reached one of the two
//! target environments with this exact content, or when the harvest is a
//! full (non-incremental) run where deduplication does not apply. Preview
//! and publish ingestion run on independent schedules and can lag each
//! other, which is why this is a three-way fingerprint comparison and not a
//! two-state cache.
//!
//! Whatever the decision, the stored latest-harvest fields are moved to the
//! current values first, so the baseline always reflects the most recent
//! harvest attempt.

use crate::error::Result;
use crate::models::{CategorizationParameters, CategorizationResult, Category, HarvestedRecord};
use crate::store::HarvestStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Content fingerprint for dedup comparisons, an md5-derived uuid of the
/// record body
pub fn content_fingerprint(content: &[u8]) -> Uuid {
    Uuid::new_v3(&Uuid::NAMESPACE_OID, content)
}

/// Incremental-harvest deduplication decisions over the harvest store
pub struct CategorizationEngine {
    harvest: Arc<dyn HarvestStore>,
}

impl CategorizationEngine {
    pub fn new(harvest: Arc<dyn HarvestStore>) -> Self {
        Self { harvest }
    }

    #[instrument(
        skip(self, parameters),
        fields(
            dataset_id = %parameters.dataset_id,
            record_id = %parameters.record_local_id,
            full_harvest = parameters.full_harvest,
        )
    )]
    pub async fn categorize(
        &self,
        parameters: CategorizationParameters,
    ) -> Result<CategorizationResult> {
        let existing = self
            .harvest
            .find_record(&parameters.dataset_id, &parameters.record_local_id)
            .await?;

        let Some(previous) = existing else {
            let record = HarvestedRecord::first_sighting(&parameters);
            self.harvest.insert_record(&record).await?;
            debug!("First sighting; eligible for processing");
            return Ok(CategorizationResult {
                category: Category::EligibleForProcessing,
                parameters,
                previous_record: None,
            });
        };

        self.harvest
            .update_latest_harvest(
                &parameters.dataset_id,
                &parameters.record_local_id,
                parameters.harvest_date,
                parameters.record_md5,
            )
            .await?;

        let category = if parameters.full_harvest
            || differs(parameters.record_md5, previous.preview_harvest_md5)
            || differs(parameters.record_md5, previous.published_harvest_md5)
        {
            Category::EligibleForProcessing
        } else {
            Category::AlreadyProcessed
        };
        debug!(category = ?category, "Categorized harvested record");
        Ok(CategorizationResult {
            category,
            parameters,
            previous_record: Some(previous),
        })
    }

    /// Ingestion-side confirmation that the preview environment now holds
    /// the record with this content
    pub async fn confirm_preview_ingestion(
        &self,
        dataset_id: &str,
        record_local_id: &str,
        harvest_date: DateTime<Utc>,
        md5: Uuid,
    ) -> Result<()> {
        self.harvest
            .update_preview_env(dataset_id, record_local_id, harvest_date, md5)
            .await
    }

    /// Ingestion-side confirmation for the publish environment
    pub async fn confirm_published_ingestion(
        &self,
        dataset_id: &str,
        record_local_id: &str,
        harvest_date: DateTime<Utc>,
        md5: Uuid,
    ) -> Result<()> {
        self.harvest
            .update_published_env(dataset_id, record_local_id, harvest_date, md5)
            .await
    }
}

/// An environment that has never seen the record counts as different
fn differs(current: Uuid, stored: Option<Uuid>) -> bool {
    stored.map(|md5| md5 != current).unwrap_or(true)
}
