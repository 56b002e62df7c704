//! # Cancellation Probe
//!
//! Long-running jobs check between units of work whether their task has been
//! dropped. The answer comes from the task row, cached with a short TTL so a
//! tight polling loop does not hammer the store; a dropped verdict is cached
//! permanently since the state is terminal.

use crate::config::CancellationConfig;
use crate::error::Result;
use crate::models::TaskState;
use crate::store::TaskStore;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Clone, Copy)]
struct CachedFlag {
    dropped: bool,
    fetched_at: Instant,
}

/// TTL-cached kill-flag lookups against the task store
pub struct CancellationProbe {
    tasks: Arc<dyn TaskStore>,
    ttl: Duration,
    cache: DashMap<i64, CachedFlag>,
}

impl CancellationProbe {
    pub fn new(tasks: Arc<dyn TaskStore>, config: &CancellationConfig) -> Self {
        Self {
            tasks,
            ttl: config.kill_flag_ttl(),
            cache: DashMap::new(),
        }
    }

    /// Whether the task has been dropped. A task with no row counts as
    /// dropped: there is nothing left to work for.
    pub async fn has_dropped_status(&self, task_id: i64) -> Result<bool> {
        if let Some(cached) = self.cache.get(&task_id) {
            if cached.dropped || cached.fetched_at.elapsed() < self.ttl {
                return Ok(cached.dropped);
            }
        }

        let dropped = match self.tasks.get_task(task_id).await? {
            Some(task) => task.state == TaskState::Dropped,
            None => {
                warn!(task_id, "Kill-flag lookup for an unknown task; treating as dropped");
                true
            }
        };
        self.cache.insert(
            task_id,
            CachedFlag {
                dropped,
                fetched_at: Instant::now(),
            },
        );
        Ok(dropped)
    }
}
