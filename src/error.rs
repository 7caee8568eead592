//! Error types for CPET Flux

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur while ingesting or comparing CPET sessions.
///
/// Per-row decode problems are not represented here: decoders recover from
/// them locally and report them through [`crate::types::SkippedRecord`].
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("No decoder found for file: {file}. Supported formats: {supported}")]
    NoMatchingFormat { file: String, supported: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown comparison metric: {0}")]
    UnknownMetric(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Subject not found: {0}")]
    SubjectNotFound(Uuid),

    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Storage error: {0}")]
    Store(String),
}
