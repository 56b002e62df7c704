//! # Structured Logging Module
//!
//! Environment-aware tracing initialization for embedders. Dispatcher and
//! orchestrator internals emit structured events; this module only wires up
//! the subscriber.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific defaults.
///
/// `RUST_LOG` takes precedence; otherwise the level is derived from the
/// deployment environment name. Safe to call more than once, and tolerant
/// of a subscriber already installed by the embedding process.
pub fn init_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let default_level = get_log_level(&environment);
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_level.clone()));

        let json_output = std::env::var("CURATOR_LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let layer = if json_output {
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(false)
                .json()
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .boxed()
        };

        let subscriber = tracing_subscriber::registry().with(layer.with_filter(filter));

        // Another subscriber may already be set by the host process.
        if subscriber.try_init().is_ok() {
            tracing::info!(
                environment = %environment,
                level = %default_level,
                "Structured logging initialized"
            );
        }
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("CURATOR_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get default log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        "test" => "debug".to_string(),
        "development" => "debug".to_string(),
        _ => "debug".to_string(),
    }
}
