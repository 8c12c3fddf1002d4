//! Error types for the snapshot engine

use schemasnap_catalog::FetchError;
use schemasnap_core::ObjectType;
use std::path::PathBuf;

/// Errors raised while persisting cache or index state
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialize error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors surfaced by change detection and the consult/update protocol
///
/// Only catalog failures are meant to fail a run; everything else degrades to
/// "redo more work".
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Catalog query for {object_type} failed: {source}")]
    Catalog {
        object_type: ObjectType,
        #[source]
        source: FetchError,
    },

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Operation cancelled")]
    Cancelled,
}

impl SnapshotError {
    /// Whether this error came from a cancellation request
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Cache(CacheError::Cancelled))
    }
}
