//! Filesystem-backed dataset cache.
//!
//! Mutations (`put`, `clear`) run under the index lock: the payload file is
//! replaced atomically, then the index is rewritten atomically, then the
//! lock is released. Reads take no lock; they see either the previous or the
//! next index, and an entry whose payload digest no longer matches is read
//! as a miss.

use crate::atomic::write_atomic;
use crate::codec::{CacheFormat, decode_payload, encode_payload};
use crate::error::StoreError;
use crate::index::{CACHE_INDEX_FILE, CacheEntry, CacheIndex};
use crate::lock::{LockGuard, LockPolicy};
use brdata_core::DatasetPayload;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

/// Which entries `clear` removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClearScope {
    All,
    Names(Vec<String>),
}

/// One row of `LocalCacheStore::list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheInventoryRow {
    pub name: String,
    pub format: CacheFormat,
    pub size_bytes: u64,
    pub cached_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct LocalCacheStore {
    root: PathBuf,
    lock_policy: LockPolicy,
}

impl LocalCacheStore {
    /// Open (creating if needed) a cache rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StoreError::io(&root, e))?;
        Ok(Self {
            root,
            lock_policy: LockPolicy::default(),
        })
    }

    pub fn with_lock_policy(mut self, policy: LockPolicy) -> Self {
        self.lock_policy = policy;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(CACHE_INDEX_FILE)
    }

    /// Store `payload` for `name`, stamped with the current time.
    pub fn put(
        &self,
        name: &str,
        payload: &DatasetPayload,
        format: CacheFormat,
    ) -> Result<CacheEntry, StoreError> {
        self.put_at(name, payload, format, Utc::now())
    }

    /// Store `payload` for `name` with an explicit write timestamp.
    pub fn put_at(
        &self,
        name: &str,
        payload: &DatasetPayload,
        format: CacheFormat,
        now: DateTime<Utc>,
    ) -> Result<CacheEntry, StoreError> {
        validate_name(name)?;
        let bytes = encode_payload(payload, format)?;
        let location = format!("{name}.{}", format.extension());

        let index_path = self.index_path();
        let _guard = LockGuard::acquire(&index_path, self.lock_policy)?;

        let payload_path = self.root.join(&location);
        write_atomic(&payload_path, &bytes).map_err(|e| StoreError::io(&payload_path, e))?;

        let mut index = CacheIndex::load(&index_path)?;
        let entry = CacheEntry {
            dataset_name: name.to_string(),
            cached_at: now,
            format,
            location,
            size_bytes: bytes.len() as u64,
            sha256: sha256_hex(&bytes),
        };
        if let Some(previous) = index.entries.insert(name.to_string(), entry.clone())
            && previous.location != entry.location
        {
            self.remove_payload_file(&previous.location);
        }
        index.save(&index_path)?;

        tracing::debug!(
            dataset = %name,
            format = %format,
            bytes = entry.size_bytes,
            "cached dataset payload"
        );
        Ok(entry)
    }

    /// Load the cached payload for `name`. `Ok(None)` is a miss.
    ///
    /// Entries whose file is gone, whose digest does not match, or that fail
    /// to decode are logged and reported as misses.
    pub fn get(&self, name: &str) -> Result<Option<DatasetPayload>, StoreError> {
        let Some(entry) = self.entry(name)? else {
            return Ok(None);
        };

        let path = self.root.join(&entry.location);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    dataset = %name,
                    path = %path.display(),
                    "cache entry has no payload file"
                );
                return Ok(None);
            }
            Err(err) => return Err(StoreError::io(&path, err)),
        };

        if sha256_hex(&bytes) != entry.sha256 {
            tracing::warn!(
                dataset = %name,
                path = %path.display(),
                "cache payload digest mismatch; ignoring entry"
            );
            return Ok(None);
        }

        match decode_payload(&bytes, entry.format) {
            Ok(payload) => Ok(Some(payload)),
            Err(err) => {
                tracing::warn!(
                    dataset = %name,
                    error = %err,
                    "cache payload failed to decode; ignoring entry"
                );
                Ok(None)
            }
        }
    }

    pub fn entry(&self, name: &str) -> Result<Option<CacheEntry>, StoreError> {
        let index = CacheIndex::load(&self.index_path())?;
        Ok(index.get(name).cloned())
    }

    /// Time since `name` was written, or `None` when not cached.
    pub fn age(&self, name: &str, now: DateTime<Utc>) -> Result<Option<Duration>, StoreError> {
        Ok(self
            .entry(name)?
            .map(|entry| (now - entry.cached_at).max(Duration::zero())))
    }

    /// Whether `name` is missing or older than `threshold`.
    ///
    /// A `None` threshold never expires (manually updated datasets).
    pub fn is_stale(
        &self,
        name: &str,
        threshold: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        match self.age(name, now)? {
            None => Ok(true),
            Some(age) => Ok(threshold.is_some_and(|limit| age > limit)),
        }
    }

    /// Remove entries and their payload files. Returns the names removed.
    pub fn clear(&self, scope: &ClearScope) -> Result<Vec<String>, StoreError> {
        let index_path = self.index_path();
        let _guard = LockGuard::acquire(&index_path, self.lock_policy)?;
        let mut index = match (CacheIndex::load(&index_path), scope) {
            (Err(StoreError::CorruptIndex { message, .. }), ClearScope::All) => {
                tracing::warn!(
                    path = %index_path.display(),
                    error = %message,
                    "cache index is corrupt; removing payload files and resetting it"
                );
                return self.reset(&index_path);
            }
            (loaded, _) => loaded?,
        };

        let targets: Vec<String> = match scope {
            ClearScope::All => index.entries.keys().cloned().collect(),
            ClearScope::Names(names) => names
                .iter()
                .filter(|name| index.entries.contains_key(name.as_str()))
                .cloned()
                .collect(),
        };

        for name in &targets {
            if let Some(entry) = index.entries.remove(name) {
                self.remove_payload_file(&entry.location);
            }
        }
        if !targets.is_empty() {
            index.save(&index_path)?;
        }
        Ok(targets)
    }

    /// Inventory of cached entries, sorted by name.
    pub fn list(&self) -> Result<Vec<CacheInventoryRow>, StoreError> {
        let index = CacheIndex::load(&self.index_path())?;
        Ok(index
            .entries
            .values()
            .map(|entry| CacheInventoryRow {
                name: entry.dataset_name.clone(),
                format: entry.format,
                size_bytes: entry.size_bytes,
                cached_at: entry.cached_at,
            })
            .collect())
    }

    /// Remove every payload file in the root and write an empty index.
    fn reset(&self, index_path: &Path) -> Result<Vec<String>, StoreError> {
        let entries = fs::read_dir(&self.root).map_err(|e| StoreError::io(&self.root, e))?;
        let mut removed = Vec::new();
        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            if path == index_path || !is_payload_file(&path) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            removed.push(stem.to_string());
            if let Some(location) = path.file_name().and_then(|name| name.to_str()) {
                self.remove_payload_file(location);
            }
        }
        removed.sort();
        removed.dedup();
        CacheIndex::default().save(index_path)?;
        Ok(removed)
    }

    fn remove_payload_file(&self, location: &str) {
        let path = self.root.join(location);
        if let Err(err) = fs::remove_file(&path)
            && err.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to remove cached payload"
            );
        }
    }
}

fn is_payload_file(path: &Path) -> bool {
    path.is_file()
        && path.extension().and_then(|ext| ext.to_str()).is_some_and(|ext| {
            ext == CacheFormat::Json.extension() || ext == CacheFormat::Jsonl.extension()
        })
}

fn validate_name(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && Some(name) != CACHE_INDEX_FILE.strip_suffix(".json")
        && name != CACHE_INDEX_FILE
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atomic::is_tmp_path;
    use brdata_core::Table;
    use chrono::TimeZone;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::time::{SystemTime, UNIX_EPOCH};

    struct TempDirGuard {
        path: PathBuf,
    }

    impl TempDirGuard {
        fn new(prefix: &str) -> Self {
            let unique = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock should be after unix epoch")
                .as_nanos();
            let path = std::env::temp_dir().join(format!(
                "brdata-cache-{prefix}-{}-{unique}",
                std::process::id()
            ));
            Self { path }
        }
    }

    impl Drop for TempDirGuard {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0)
            .single()
            .expect("fixed time")
    }

    fn payload() -> DatasetPayload {
        let mut tables = BTreeMap::new();
        tables.insert(
            "sbpe".to_string(),
            Table::new(
                vec!["date".to_string(), "value".to_string()],
                vec![vec![json!("2025-12-01"), json!(12.5)]],
            )
            .expect("table"),
        );
        DatasetPayload::Multi(tables)
    }

    #[test]
    fn put_then_get_returns_payload_and_indexes_entry() {
        let dir = TempDirGuard::new("put-get");
        let store = LocalCacheStore::open(&dir.path).expect("open cache");

        let entry = store
            .put_at("abecip", &payload(), CacheFormat::Jsonl, t0())
            .expect("put");
        assert_eq!(entry.location, "abecip.jsonl");
        assert_eq!(entry.cached_at, t0());

        assert_eq!(store.get("abecip").expect("get"), Some(payload()));
        assert_eq!(store.get("cbic").expect("get miss"), None);

        let listing = store.list().expect("list");
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].name, "abecip");
        assert_eq!(listing[0].format, CacheFormat::Jsonl);

        let leftovers: Vec<_> = fs::read_dir(&dir.path)
            .expect("read dir")
            .filter_map(Result::ok)
            .filter(|e| {
                is_tmp_path(&e.path()) || e.path().extension().is_some_and(|x| x == "lock")
            })
            .collect();
        assert!(leftovers.is_empty(), "unexpected files: {leftovers:?}");
    }

    #[test]
    fn changing_format_replaces_old_payload_file() {
        let dir = TempDirGuard::new("format-change");
        let store = LocalCacheStore::open(&dir.path).expect("open cache");

        store
            .put_at("abecip", &payload(), CacheFormat::Jsonl, t0())
            .expect("put jsonl");
        store
            .put_at("abecip", &payload(), CacheFormat::Json, t0())
            .expect("put json");

        assert!(!dir.path.join("abecip.jsonl").exists());
        assert!(dir.path.join("abecip.json").exists());
        assert_eq!(store.get("abecip").expect("get"), Some(payload()));
    }

    #[test]
    fn staleness_uses_strict_threshold() {
        let dir = TempDirGuard::new("stale");
        let store = LocalCacheStore::open(&dir.path).expect("open cache");
        store
            .put_at("abecip", &payload(), CacheFormat::Json, t0())
            .expect("put");

        let threshold = Some(Duration::days(14));
        assert!(!store.is_stale("abecip", threshold, t0()).expect("fresh"));
        assert!(
            !store
                .is_stale("abecip", threshold, t0() + Duration::days(14))
                .expect("at threshold")
        );
        assert!(
            store
                .is_stale("abecip", threshold, t0() + Duration::days(14) + Duration::seconds(1))
                .expect("past threshold")
        );
        assert!(!store.is_stale("abecip", None, t0() + Duration::days(3650)).expect("manual"));
        assert!(store.is_stale("cbic", threshold, t0()).expect("missing is stale"));

        assert_eq!(
            store.age("abecip", t0() + Duration::hours(5)).expect("age"),
            Some(Duration::hours(5))
        );
        assert_eq!(
            store.age("abecip", t0() - Duration::hours(1)).expect("clock skew"),
            Some(Duration::zero())
        );
    }

    #[test]
    fn tampered_payload_reads_as_miss() {
        let dir = TempDirGuard::new("tamper");
        let store = LocalCacheStore::open(&dir.path).expect("open cache");
        store
            .put_at("abecip", &payload(), CacheFormat::Json, t0())
            .expect("put");

        fs::write(dir.path.join("abecip.json"), b"{\"kind\":\"single\"").expect("tamper");
        assert_eq!(store.get("abecip").expect("get"), None);

        fs::remove_file(dir.path.join("abecip.json")).expect("remove payload");
        assert_eq!(store.get("abecip").expect("get"), None);
    }

    #[test]
    fn clear_named_and_all() {
        let dir = TempDirGuard::new("clear");
        let store = LocalCacheStore::open(&dir.path).expect("open cache");
        for name in ["abecip", "cbic", "secovi"] {
            store
                .put_at(name, &payload(), CacheFormat::Json, t0())
                .expect("put");
        }

        let removed = store
            .clear(&ClearScope::Names(vec![
                "cbic".to_string(),
                "not_cached".to_string(),
            ]))
            .expect("clear named");
        assert_eq!(removed, vec!["cbic"]);
        assert!(!dir.path.join("cbic.json").exists());
        assert_eq!(store.get("cbic").expect("get"), None);

        let removed = store.clear(&ClearScope::All).expect("clear all");
        assert_eq!(removed, vec!["abecip", "secovi"]);
        assert!(store.list().expect("list").is_empty());
    }

    #[test]
    fn put_fails_fast_when_lock_is_held() {
        let dir = TempDirGuard::new("locked");
        let store = LocalCacheStore::open(&dir.path)
            .expect("open cache")
            .with_lock_policy(LockPolicy::NO_WAIT);
        let _held =
            LockGuard::acquire(&store.index_path(), LockPolicy::NO_WAIT).expect("hold lock");

        match store.put_at("abecip", &payload(), CacheFormat::Json, t0()) {
            Err(StoreError::LockBusy { .. }) => {}
            other => panic!("expected lock busy, got {other:?}"),
        }
        assert_eq!(store.get("abecip").expect("get"), None);
    }

    #[test]
    fn rejects_path_like_names() {
        let dir = TempDirGuard::new("names");
        let store = LocalCacheStore::open(&dir.path).expect("open cache");
        for name in ["", "../escape", "a/b", ".hidden", "index", "index.json"] {
            match store.put_at(name, &payload(), CacheFormat::Json, t0()) {
                Err(StoreError::InvalidName(_)) => {}
                other => panic!("expected invalid name for {name:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn clear_all_recovers_from_corrupt_index() {
        let dir = TempDirGuard::new("corrupt-index");
        let store = LocalCacheStore::open(&dir.path).expect("open cache");
        store
            .put_at("abecip", &payload(), CacheFormat::Jsonl, t0())
            .expect("put abecip");
        store
            .put_at("rppi", &payload(), CacheFormat::Json, t0())
            .expect("put rppi");
        fs::write(store.index_path(), b"{garbage").expect("corrupt index");

        assert!(matches!(
            store.clear(&ClearScope::Names(vec!["abecip".to_string()])),
            Err(StoreError::CorruptIndex { .. })
        ));

        let removed = store.clear(&ClearScope::All).expect("clear all");
        assert_eq!(removed, vec!["abecip".to_string(), "rppi".to_string()]);
        assert!(!dir.path.join("abecip.jsonl").exists());
        assert!(!dir.path.join("rppi.json").exists());
        assert!(store.list().expect("list").is_empty());

        store
            .put_at("abecip", &payload(), CacheFormat::Json, t0())
            .expect("put after reset");
        assert_eq!(store.get("abecip").expect("get"), Some(payload()));
    }
}
