//! Error types for the sounding ingestion crate.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during ingestion.
#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Failed to read file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Unreadable source: {0}")]
    UnreadableSource(String),

    #[error("Missing cardinality field {0}: cannot determine number of samples")]
    MissingCardinality(String),

    #[error("Displacement sanity check failed: {violations} jumps over {threshold_m} m")]
    DisplacementSanity { violations: usize, threshold_m: f64 },

    #[error("Invalid ascent: {0}")]
    Validation(String),

    #[error("Failed to persist {path}: {reason}")]
    Persistence { path: PathBuf, reason: String },

    #[error("Lock {path} held by pid {pid}, gave up after {waited:?}")]
    LockContention {
        path: PathBuf,
        pid: i32,
        waited: Duration,
    },

    #[error("Unknown file type: {0}")]
    UnknownFileType(String),

    #[error("Invalid archive: {0}")]
    Archive(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl IngestionError {
    /// Wrap an I/O failure during an atomic write with the destination path.
    pub fn persistence(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::Persistence {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}

/// Result type for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestionError>;
