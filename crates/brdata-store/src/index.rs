//! The shared cache index: `dataset_name -> CacheEntry`.

use crate::atomic::write_atomic;
use crate::codec::CacheFormat;
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const CACHE_INDEX_FILE: &str = "index.json";
pub const CACHE_INDEX_SCHEMA: u32 = 1;

/// Metadata for one cached payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub dataset_name: String,
    pub cached_at: DateTime<Utc>,
    pub format: CacheFormat,
    /// Payload file name, relative to the cache root.
    pub location: String,
    pub size_bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheIndex {
    pub schema: u32,
    #[serde(default)]
    pub entries: BTreeMap<String, CacheEntry>,
}

impl Default for CacheIndex {
    fn default() -> Self {
        Self {
            schema: CACHE_INDEX_SCHEMA,
            entries: BTreeMap::new(),
        }
    }
}

impl CacheIndex {
    /// Load the index at `path`; a missing file is an empty index.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(StoreError::io(path, err)),
        };

        let index: Self =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::CorruptIndex {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        if index.schema != CACHE_INDEX_SCHEMA {
            return Err(StoreError::CorruptIndex {
                path: path.display().to_string(),
                message: format!(
                    "unsupported schema {} (expected {CACHE_INDEX_SCHEMA})",
                    index.schema
                ),
            });
        }
        Ok(index)
    }

    /// Persist atomically. Callers hold the index lock.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(self).map_err(|e| StoreError::CorruptIndex {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        write_atomic(path, &bytes).map_err(|e| StoreError::io(path, e))
    }

    pub fn get(&self, name: &str) -> Option<&CacheEntry> {
        self.entries.get(name)
    }
}
