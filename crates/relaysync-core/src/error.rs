//! Error types for replication operations.

use std::path::{Path, PathBuf};

use crate::store::StoreError;

/// Errors raised by the exporter, importer and snapshot bootstrap.
///
/// None of these ever reach the local write path: the exporter logs and
/// swallows its failures, and the importer contains them per file.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed JSON in {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unroutable file name: {0}")]
    MalformedFileName(String),

    #[error("No adapter registered for entity type: {0}")]
    UnknownEntityType(String),

    #[error("Invalid record for {entity_type}: {message}")]
    InvalidRecord {
        entity_type: String,
        message: String,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl SyncError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Json {
            context: context.into(),
            source,
        }
    }

    pub fn invalid_record(entity_type: &str, message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            entity_type: entity_type.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
