//! Error taxonomy for analytics requests.
//!
//! Every error is scoped to a single invocation; none of them is fatal to the
//! process.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyticsError {
    /// Telemetry rows failed validation under the reject policy
    #[error("Invalid telemetry: row {row} - {reason}")]
    Validation { row: usize, reason: String },

    /// Too little data for the requested computation
    #[error("Insufficient data for {computation}: {reason}")]
    InsufficientData { computation: String, reason: String },

    /// Request or engine configuration rejected before computation
    #[error("Invalid configuration: {field} - {reason}")]
    Configuration { field: String, reason: String },

    /// Concurrent writer advanced the battery history first
    #[error("History conflict for {battery_id}: expected version {expected}, found {actual}")]
    Conflict {
        battery_id: String,
        expected: u64,
        actual: u64,
    },

    /// Storage backend failure
    #[error("Storage error: {0}")]
    Storage(#[source] anyhow::Error),

    /// A computation task did not complete
    #[error("Computation task failed: {0}")]
    Task(String),
}

impl AnalyticsError {
    pub fn validation(row: usize, reason: impl Into<String>) -> Self {
        Self::Validation {
            row,
            reason: reason.into(),
        }
    }

    pub fn insufficient_data(computation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InsufficientData {
            computation: computation.into(),
            reason: reason.into(),
        }
    }

    pub fn configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn storage(err: impl Into<anyhow::Error>) -> Self {
        Self::Storage(err.into())
    }

    /// Get error category for logging and response mapping
    pub fn category(&self) -> &'static str {
        match self {
            AnalyticsError::Validation { .. } => "validation",
            AnalyticsError::InsufficientData { .. } => "insufficient_data",
            AnalyticsError::Configuration { .. } => "configuration",
            AnalyticsError::Conflict { .. } => "conflict",
            AnalyticsError::Storage(_) => "storage",
            AnalyticsError::Task(_) => "task",
        }
    }
}

impl From<tokio::task::JoinError> for AnalyticsError {
    fn from(err: tokio::task::JoinError) -> Self {
        AnalyticsError::Task(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = AnalyticsError::configuration("contamination", "must lie in (0, 1), got 1.5");
        assert_eq!(err.category(), "configuration");
        assert_eq!(
            err.to_string(),
            "Invalid configuration: contamination - must lie in (0, 1), got 1.5"
        );
    }

    #[test]
    fn test_storage_keeps_source() {
        let err = AnalyticsError::storage(anyhow::anyhow!("disk full"));
        assert_eq!(err.category(), "storage");
        assert_eq!(err.to_string(), "Storage error: disk full");
    }
}
