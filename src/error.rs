//! Error types for crosscheck.
//!
//! All errors are strongly typed using thiserror. Per-engine problems
//! (unparseable payloads, corrupted cache entries) never reach this
//! taxonomy: they degrade to fewer findings or a cache miss. Only
//! pipeline-wide failures are surfaced to the caller.

use thiserror::Error;

/// Configuration errors detected while building or validating a
/// [`CorrelationConfig`](crate::config::CorrelationConfig).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Threshold '{name}' = {value} is out of range [0.0, 1.0]")]
    ThresholdOutOfRange {
        name: &'static str,
        value: f64,
    },

    #[error("Expertise weight {value} for engine '{engine}' is out of range [0.0, 1.0]")]
    WeightOutOfRange {
        engine: String,
        value: f64,
    },

    #[error("Similarity weights must not all be zero")]
    ZeroSimilarityWeights,

    #[error("Field '{field}' must be greater than zero")]
    MustBePositive {
        field: &'static str,
    },

    #[error("Unknown resolution strategy '{name}'")]
    UnknownStrategy {
        name: String,
    },

    #[error("Invalid threshold ordering: {reason}")]
    InvalidOrdering {
        reason: String,
    },
}

/// Execution errors raised while computing or awaiting a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("Correlation timed out during {stage} after {elapsed_ms}ms")]
    ComputationTimeout {
        stage: &'static str,
        elapsed_ms: u64,
    },

    #[error("Correlation worker failed: {message}")]
    WorkerFailure {
        message: String,
    },

    #[error("Worker queue is full (capacity {capacity})")]
    QueueFull {
        capacity: usize,
    },

    #[error("Worker pool disconnected")]
    Disconnected,
}

/// Top-level error type for crosscheck.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CorrelateError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),
}

impl CorrelateError {
    pub(crate) fn timeout(stage: &'static str, elapsed: std::time::Duration) -> Self {
        Self::Execution(ExecutionError::ComputationTimeout {
            stage,
            elapsed_ms: elapsed.as_millis().min(u128::from(u64::MAX)) as u64,
        })
    }

    pub(crate) fn worker(message: impl Into<String>) -> Self {
        Self::Execution(ExecutionError::WorkerFailure {
            message: message.into(),
        })
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns true if the pipeline or the caller's wait ran out of time.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Execution(ExecutionError::ComputationTimeout { .. })
        )
    }

    /// Returns true if the worker itself failed.
    #[must_use]
    pub const fn is_worker_failure(&self) -> bool {
        matches!(self, Self::Execution(ExecutionError::WorkerFailure { .. }))
    }

    /// Returns true if calling again may succeed.
    ///
    /// The runtime never retries on its own.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Config(_) => false,
            Self::Execution(e) => matches!(
                e,
                ExecutionError::ComputationTimeout { .. } | ExecutionError::QueueFull { .. }
            ),
        }
    }
}

/// Result type alias for crosscheck operations.
pub type CorrelateResult<T> = Result<T, CorrelateError>;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_threshold_error_message() {
        let err = ConfigError::ThresholdOutOfRange {
            name: "similarity_threshold",
            value: 1.5,
        };
        let msg = format!("{err}");
        assert!(msg.contains("similarity_threshold"));
        assert!(msg.contains("1.5"));
    }

    #[test]
    fn test_timeout_reports_stage_and_millis() {
        let err = CorrelateError::timeout("correlation", Duration::from_millis(12));
        assert!(err.is_timeout());
        let msg = format!("{err}");
        assert!(msg.contains("correlation"));
        assert!(msg.contains("12ms"));
    }

    #[test]
    fn test_worker_failure_not_retryable() {
        let err = CorrelateError::worker("boom");
        assert!(err.is_worker_failure());
        assert!(!err.is_retryable());
        assert!(format!("{err}").contains("boom"));
    }

    #[test]
    fn test_retryable_classification() {
        let config: CorrelateError = ConfigError::ZeroSimilarityWeights.into();
        assert!(config.is_config());
        assert!(!config.is_retryable());

        let full: CorrelateError = ExecutionError::QueueFull { capacity: 4 }.into();
        assert!(full.is_retryable());

        let gone: CorrelateError = ExecutionError::Disconnected.into();
        assert!(!gone.is_retryable());
    }
}
