//! # Progress Tracking
//!
//! Consumes per-record outcome events and maintains task progress: the five
//! counter buckets, per-kind error aggregation, and the hand-off or finish
//! transition once the last expected record lands.
//!
//! ## Key Components
//!
//! - [`counters`]: the counter bucket selection applied to every event
//! - [`decision`]: pure planning of the full persistence write-set
//! - [`errors`]: the per-task message-to-uuid aggregation cache
//! - [`tracker`]: the dispatcher tying cache, planning, and commits together
//!
//! The upstream runtime delivers events for one task in order to a single
//! consumer, so per-task caches never need cross-event locking; redeliveries
//! are possible and are absorbed by the store's conditional commit.

pub mod counters;
pub mod decision;
pub mod errors;
pub mod tracker;

pub use counters::{apply_event, CounterUpdate, EventFlags};
pub use decision::{plan_outcome, OutcomePlan, PlanContext};
pub use errors::ErrorAggregator;
pub use tracker::{EventDisposition, ProgressTracker};
