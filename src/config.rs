//! # Configuration
//!
//! Layered configuration for the curation core: built-in defaults, an
//! optional TOML file, then `CURATOR__`-prefixed environment variables
//! (double underscore separates nesting levels, e.g.
//! `CURATOR__DATABASE__URL`).

use crate::error::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration for all curation-core components
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CuratorConfig {
    /// Identifier of this process instance, recorded as task owner
    pub application_id: String,
    pub database: DatabaseConfig,
    pub progress: ProgressConfig,
    pub post_processing: PostProcessingConfig,
    pub watchdog: WatchdogConfig,
    pub cancellation: CancellationConfig,
}

/// Database connection configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
}

impl DatabaseConfig {
    /// Get connection acquire timeout as Duration
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }
}

/// Progress-tracking configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProgressConfig {
    /// Maximum stored diagnostic samples per distinct error message
    pub error_detail_sample_cap: u32,
    /// Store write retries before giving up
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
}

impl ProgressConfig {
    /// Get base retry delay as Duration
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

/// Post-processing scheduler and depublication configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PostProcessingConfig {
    pub scan_interval_seconds: u64,
    pub depublication_poll_interval_ms: u64,
    pub depublication_timeout_seconds: u64,
    /// Page size for walking a dataset's harvested records
    pub cleanup_page_size: u32,
}

impl PostProcessingConfig {
    /// Get scan interval as Duration
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_seconds)
    }

    /// Get depublication poll interval as Duration
    pub fn depublication_poll_interval(&self) -> Duration {
        Duration::from_millis(self.depublication_poll_interval_ms)
    }

    /// Get depublication overall timeout as Duration
    pub fn depublication_timeout(&self) -> Duration {
        Duration::from_secs(self.depublication_timeout_seconds)
    }
}

/// Stalled-task watchdog configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatchdogConfig {
    pub scan_interval_seconds: u64,
    /// How long a task's progress may stay unchanged before it is flagged
    pub stall_threshold_seconds: u64,
}

impl WatchdogConfig {
    /// Get scan interval as Duration
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_seconds)
    }

    /// Get stall threshold as Duration
    pub fn stall_threshold(&self) -> Duration {
        Duration::from_secs(self.stall_threshold_seconds)
    }
}

/// Kill-flag probe configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CancellationConfig {
    /// How long a non-dropped verdict may be served from cache
    pub kill_flag_ttl_ms: u64,
}

impl CancellationConfig {
    /// Get kill-flag cache TTL as Duration
    pub fn kill_flag_ttl(&self) -> Duration {
        Duration::from_millis(self.kill_flag_ttl_ms)
    }
}

impl Default for CuratorConfig {
    fn default() -> Self {
        Self {
            application_id: "curator-default".to_string(),
            database: DatabaseConfig::default(),
            progress: ProgressConfig::default(),
            post_processing: PostProcessingConfig::default(),
            watchdog: WatchdogConfig::default(),
            cancellation: CancellationConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/curator_development".to_string(),
            max_connections: 10,
            acquire_timeout_seconds: 30,
        }
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            error_detail_sample_cap: 100,
            retry_attempts: 3,
            retry_base_delay_ms: 100,
        }
    }
}

impl Default for PostProcessingConfig {
    fn default() -> Self {
        Self {
            scan_interval_seconds: 30,
            depublication_poll_interval_ms: 5000,
            depublication_timeout_seconds: 1800,
            cleanup_page_size: 1000,
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            scan_interval_seconds: 300,
            stall_threshold_seconds: 3600,
        }
    }
}

impl Default for CancellationConfig {
    fn default() -> Self {
        Self {
            kill_flag_ttl_ms: 5000,
        }
    }
}

impl CuratorConfig {
    /// Load configuration from defaults, `curator.toml` if present,
    /// and `CURATOR__` environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_layered(None)
    }

    /// Load configuration with an explicit file path instead of the
    /// default `curator.toml` lookup.
    pub fn load_from(path: &Path) -> Result<Self> {
        Self::load_layered(Some(path))
    }

    fn load_layered(path: Option<&Path>) -> Result<Self> {
        let defaults = Config::try_from(&CuratorConfig::default())?;
        let mut builder = Config::builder().add_source(defaults);

        builder = match path {
            Some(p) => builder.add_source(File::from(p)),
            None => builder.add_source(File::with_name("curator").required(false)),
        };

        let settings = builder
            .add_source(Environment::with_prefix("CURATOR").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
