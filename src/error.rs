//! # Error Types
//!
//! Crate-wide error handling using thiserror for structured error types
//! instead of `Box<dyn Error>` patterns. All public APIs return
//! [`Result<T>`] with [`CuratorError`].

use thiserror::Error;

/// Crate-wide error type for the curation core
#[derive(Error, Debug)]
pub enum CuratorError {
    #[error("Database error: {message}")]
    Database { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Task {task_id} does not exist or access is denied for topology '{topology}'")]
    TaskAccess { task_id: i64, topology: String },

    #[error("Task {task_id} is not registered")]
    UnknownTask { task_id: i64 },

    #[error("Invalid definition for task {task_id}: {reason}")]
    InvalidDefinition { task_id: i64, reason: String },

    #[error("Index operation '{operation}' failed: {message}")]
    Index { operation: String, message: String },

    #[error("Post-processing failed for task {task_id}: {message}")]
    PostProcessing { task_id: i64, message: String },

    #[error("Unknown error type {error_id} for task {task_id}")]
    UnknownErrorType { task_id: i64, error_id: uuid::Uuid },
}

impl CuratorError {
    /// Whether retrying the failed operation can reasonably succeed.
    ///
    /// Only store-level failures are retryable; everything else reflects
    /// bad input or a decision already made.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database { .. })
    }
}

impl From<sqlx::Error> for CuratorError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CuratorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for CuratorError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration {
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CuratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_access_message() {
        let err = CuratorError::TaskAccess {
            task_id: 42,
            topology: "depublication".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Task 42 does not exist or access is denied for topology 'depublication'"
        );
    }

    #[test]
    fn test_retryable_classification() {
        let db = CuratorError::Database {
            message: "connection refused".to_string(),
        };
        assert!(db.is_retryable());

        let access = CuratorError::TaskAccess {
            task_id: 1,
            topology: "harvest".to_string(),
        };
        assert!(!access.is_retryable());
    }
}
