//! Storage error types.

use std::path::Path;

use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

/// Errors from credential persistence.
///
/// Callers in the reconnect path treat these as degraded mode, never fatal:
/// a session can run uncached, it just re-authenticates more often.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("store unreachable at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode credential document for '{account}': {source}")]
    Encode {
        account: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}
