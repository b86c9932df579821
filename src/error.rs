//! Error types for Cohort Signals

use thiserror::Error;

/// Errors that can occur while building or querying a cohort
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("Failed to parse event payload: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Cohort is empty: {0}")]
    EmptyCohort(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Churn labels are degenerate: {0}")]
    DegenerateLabels(String),

    #[error("Feature matrix error: {0}")]
    MatrixError(String),

    #[error("Model training failed: {0}")]
    TrainingError(String),

    #[error("Encoding error: {0}")]
    EncodingError(String),
}
