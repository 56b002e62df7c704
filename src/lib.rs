#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Curator Core
//!
//! Core engine of a data-curation platform: per-task progress tracking over
//! record streams, incremental-harvest deduplication, and the post-processing
//! lifecycle (depublication and stale-record cleanup).
//!
//! ## Overview
//!
//! Upstream pipelines process millions of records per task and report one
//! outcome event per record. This crate consumes those events idempotently,
//! keeps the per-task counters and error aggregates authoritative in
//! PostgreSQL, decides when a task is complete, and runs the follow-up jobs
//! that depublish or clean up records once the streaming phase is done.
//!
//! ## Architecture
//!
//! Everything durable sits behind the store traits in [`store`]; components
//! receive `Arc<dyn Trait>` handles at startup and never open connections
//! themselves. One outcome event maps to one atomic write-set commit, with a
//! conditional assignment insert as the idempotency guard, so redelivered
//! events change nothing. Post-processing jobs report how their run ended
//! and the scheduler alone writes lifecycle transitions.
//!
//! ## Key Features
//!
//! - **Idempotent progress tracking**: five mutually exclusive counter
//!   buckets per task, exact under redelivery and process restarts
//! - **Error aggregation**: errors deduplicated by message with a stable
//!   uuid per kind and a capped list of diagnostic samples
//! - **Harvest deduplication**: content fingerprints decide which records
//!   of an incremental harvest actually need reprocessing
//! - **Lifecycle post-processing**: dataset and record depublication plus
//!   post-harvest cleanup, resumable after a crash
//! - **Operational visibility**: topology-scoped progress and error
//!   reports, and a watchdog for tasks that stopped moving
//!
//! ## Module Organization
//!
//! - [`models`] - Task, outcome, error, and harvest-bookkeeping types
//! - [`store`] - Store traits, atomic write-sets, PostgreSQL and in-process
//!   implementations
//! - [`progress`] - The outcome dispatcher: counters, planning, caches
//! - [`harvest`] - Incremental-harvest categorization
//! - [`postprocess`] - Post-processing jobs and their scheduler
//! - [`reports`] - Read-side progress and error reports
//! - [`cancellation`] - TTL-cached kill-flag probe
//! - [`watchdog`] - Stalled-task scan
//! - [`config`] - Layered configuration
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust
//! use curator_core::config::CuratorConfig;
//! use curator_core::models::{NewTask, OutcomeEvent, TaskDefinition, TaskState};
//! use curator_core::progress::ProgressTracker;
//! use curator_core::store::memory::MemoryCuratorStore;
//! use curator_core::store::StoreHandles;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let config = CuratorConfig::default();
//! let stores = StoreHandles::from_shared(Arc::new(MemoryCuratorStore::new()));
//! let tracker = ProgressTracker::new(stores, config.progress.clone());
//!
//! let task = tracker
//!     .register_task(NewTask {
//!         task_id: 1,
//!         topology: "harvest".to_string(),
//!         owner_id: config.application_id.clone(),
//!         expected_records_count: Some(1),
//!         definition: TaskDefinition::default(),
//!         sent_at: None,
//!     })
//!     .await
//!     .unwrap();
//! assert_eq!(task.state, TaskState::Queued);
//!
//! // The only expected record finishes the task.
//! let disposition = tracker
//!     .handle_event(OutcomeEvent::success(task.task_id, "record-1"))
//!     .await
//!     .unwrap();
//! assert!(matches!(
//!     disposition,
//!     curator_core::progress::EventDisposition::Applied { last_expected: true }
//! ));
//! # });
//! ```
//!
//! ## Testing
//!
//! The in-process store carries the full commit semantics, so the whole
//! engine is testable without a database:
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # All tests
//! ```

pub mod cancellation;
pub mod config;
pub mod error;
pub mod harvest;
pub mod logging;
pub mod models;
pub mod postprocess;
pub mod progress;
pub mod reports;
pub mod store;
pub mod watchdog;

pub use cancellation::CancellationProbe;
pub use config::CuratorConfig;
pub use error::{CuratorError, Result};
pub use harvest::CategorizationEngine;
pub use models::{NewTask, OutcomeEvent, TaskDefinition, TaskInfo, TaskState};
pub use postprocess::{
    DepublicationProcessor, HarvestCleanupProcessor, IndexClient, PostProcessOutcome,
    PostProcessingScheduler, PostProcessor,
};
pub use progress::{EventDisposition, ProgressTracker};
pub use reports::ReportService;
pub use store::{StoreHandles, OUTCOME_BUCKET_SIZE};
pub use watchdog::StalledTaskWatchdog;
