//! Error types for the detection cascade.

use std::time::Duration;

/// Failure of a single detector invocation or construction.
#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("Detector unavailable: {0}")]
    Unavailable(String),

    #[error("Detector timed out after {0:?}")]
    Timeout(Duration),

    #[error("Detector execution failed: {0}")]
    Execution(String),

    #[error("Detector task aborted: {0}")]
    Panicked(String),

    #[error("Malformed detector output: {0}")]
    Output(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// OSINT enrichment failures. Always swallowed by the aggregator.
#[derive(Debug, thiserror::Error)]
pub enum EnrichmentError {
    #[error("OSINT provider timed out after {0:?}")]
    Timeout(Duration),

    #[error("OSINT provider failed: {0}")]
    Provider(String),

    #[error("Malformed OSINT response: {0}")]
    Response(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Failures that prevent the cascade from producing a scored verdict.
#[derive(Debug, thiserror::Error)]
pub enum CascadeError {
    #[error("Analysis exceeded deadline of {0:?}")]
    Deadline(Duration),

    #[error("Fused score is not finite: {0}")]
    NonFiniteScore(f64),
}
