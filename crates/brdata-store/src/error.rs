//! Local cache errors.

use crate::codec::CodecError;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("`{0}` is not a valid cache entry name")]
    InvalidName(String),

    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cache index {path} is corrupt: {message}")]
    CorruptIndex { path: String, message: String },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("cache lock busy: {lock_path}")]
    LockBusy { lock_path: String },

    #[error("failed to acquire cache lock {lock_path}: {source}")]
    LockIo {
        lock_path: String,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }

    pub(crate) fn lock_io(lock_path: &Path, source: std::io::Error) -> Self {
        Self::LockIo {
            lock_path: lock_path.display().to_string(),
            source,
        }
    }
}
