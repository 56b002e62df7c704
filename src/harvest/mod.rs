//! # Incremental Harvest
//!
//! Deduplication for repeated harvests of the same dataset: each record's
//! content fingerprint is compared against what the preview and publish
//! environments last ingested, and only changed records are marked eligible
//! for reprocessing.

pub mod categorization;

pub use categorization::{content_fingerprint, CategorizationEngine};
