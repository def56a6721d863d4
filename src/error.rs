//! Error types for Vitals Board

use thiserror::Error;

/// Errors that can occur while ingesting, serving or displaying snapshots
#[derive(Debug, Error)]
pub enum VitalsError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid ingestion batch: {0}")]
    Validation(#[from] ValidationError),

    #[error("Live channel error: {0}")]
    Channel(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Validation errors for ingestion batches
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("attribute {index} has an empty attributeType")]
    EmptyAttributeType { index: usize },

    #[error("measurement {index} has an empty measurementType")]
    EmptyMeasurementType { index: usize },
}
