//! Atomic JSON persistence shared by the object cache and the object index

use crate::error::CacheError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// Version written into every persisted file; other versions are discarded
pub const FORMAT_VERSION: u32 = 1;

/// Result of a flush request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// State was written to disk
    Written,

    /// Nothing changed since the last flush
    Skipped,

    /// Writing failed; the state stays dirty and is retried on the next flush
    Failed,
}

impl FlushOutcome {
    /// Combine the outcomes of flushing several files
    pub fn merge(self, other: FlushOutcome) -> FlushOutcome {
        match (self, other) {
            (Self::Failed, _) | (_, Self::Failed) => Self::Failed,
            (Self::Written, _) | (_, Self::Written) => Self::Written,
            _ => Self::Skipped,
        }
    }
}

/// Read and deserialize a JSON file
///
/// Returns `Ok(None)` when the file does not exist and `Err(reason)` when it
/// exists but cannot be read or parsed.
pub(crate) async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, String> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.to_string()),
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| e.to_string())
}

/// Temporary sibling used while writing `path`
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Serialize `value` and atomically replace `path` with it
///
/// The bytes go to a temporary sibling which is renamed over the target only
/// once fully written, so a reader never observes a partial file. On
/// cancellation or failure the temporary file is removed and the target is
/// left untouched.
pub(crate) async fn write_json_atomic<T: Serialize>(
    path: &Path,
    value: &T,
    cancel: &CancellationToken,
) -> Result<(), CacheError> {
    if cancel.is_cancelled() {
        return Err(CacheError::Cancelled);
    }

    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = temp_path(path);

    let write = async {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        Ok::<(), std::io::Error>(())
    };

    let written = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CacheError::Cancelled),
        result = write => result.map_err(|e| CacheError::io(&tmp, e)),
    };

    let renamed = match written {
        Ok(()) if cancel.is_cancelled() => Err(CacheError::Cancelled),
        Ok(()) => tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| CacheError::io(path, e)),
        Err(e) => Err(e),
    };

    if renamed.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
    }

    renamed
}

/// Delete a file, treating "not found" as success
pub(crate) async fn remove_file(path: &Path) -> Result<(), CacheError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CacheError::io(path, e)),
    }
}
