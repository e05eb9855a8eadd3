//! # brdata-store
//!
//! The two persistent tiers behind dataset resolution.
//!
//! This crate provides:
//! - `LocalCacheStore` (one payload file per dataset + a shared `index.json`)
//! - payload codecs (`json`, `jsonl`) with substrate validation
//! - lock-scoped, temp-then-rename writes so readers never see half a payload
//! - `ArtifactStore` (remote, read-only precomputed artifacts) with HTTP and
//!   directory-mirror implementations
//!
//! Fallback policy is not decided here; that lives in `brdata-engine`.
//!
//! ## Cache layout
//!
//! ```text
//! <root>/index.json        dataset_name -> {cachedAt, format, sha256, ...}
//! <root>/index.json.lock   advisory lock held while mutating
//! <root>/<name>.json       payload (or <name>.jsonl)
//! ```

pub mod atomic;
pub mod codec;
pub mod error;
pub mod index;
pub mod local;
pub mod lock;
pub mod remote;

pub use atomic::write_atomic;
pub use codec::{CacheFormat, CodecError, decode_payload, encode_payload};
pub use error::StoreError;
pub use index::{CACHE_INDEX_FILE, CACHE_INDEX_SCHEMA, CacheEntry, CacheIndex};
pub use local::{CacheInventoryRow, ClearScope, LocalCacheStore};
pub use lock::{LockGuard, LockPolicy, lock_path};
pub use remote::{ArtifactStore, DirectoryArtifactStore, HttpArtifactStore, RemoteError};
