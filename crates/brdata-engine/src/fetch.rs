//! Fetch dispatch: one typed binding per dataset, called through one
//! signature.
//!
//! Bindings own their retries (`RetryPolicy` is offered as a helper); the
//! dispatcher calls each binding exactly once, checks the payload shape
//! against the registry, and writes the result through to the local cache.

use brdata_core::{DatasetDescriptor, DatasetPayload, DateRange, ResolvedTable, declared_shape};
use brdata_store::{CacheFormat, LocalCacheStore, decode_payload};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Everything a binding is told about one fetch.
#[derive(Debug, Clone)]
pub struct FetchRequest<'a> {
    pub descriptor: &'a DatasetDescriptor,
    pub table: &'a ResolvedTable,
    pub date_range: DateRange,
    pub quiet: bool,
    pub max_retries: u32,
}

/// Structured cause of a failed fetch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchErrorKind {
    #[error("no fetch binding registered for `{binding}`")]
    Unbound { binding: String },

    #[error("network error: {message}")]
    Network { message: String },

    #[error("timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("malformed source document: {message}")]
    MalformedSource { message: String },

    #[error("validation failed: {message}")]
    Validation { message: String },
}

impl FetchErrorKind {
    /// Whether another attempt could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("fetching `{dataset}` failed: {kind}")]
pub struct FetchError {
    pub dataset: String,
    pub kind: FetchErrorKind,
}

impl FetchError {
    pub fn new(dataset: impl Into<String>, kind: FetchErrorKind) -> Self {
        Self {
            dataset: dataset.into(),
            kind,
        }
    }
}

/// A per-dataset fetch implementation.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, request: &FetchRequest<'_>) -> Result<DatasetPayload, FetchError>;
}

/// Bindings registered at startup, keyed by `fetch_binding`.
#[derive(Clone, Default)]
pub struct FetcherSet {
    bindings: BTreeMap<String, Arc<dyn Fetcher>>,
}

impl FetcherSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `fetcher` under `binding`, replacing any previous one.
    pub fn register(&mut self, binding: impl Into<String>, fetcher: Arc<dyn Fetcher>) {
        self.bindings.insert(binding.into(), fetcher);
    }

    pub fn with(mut self, binding: impl Into<String>, fetcher: Arc<dyn Fetcher>) -> Self {
        self.register(binding, fetcher);
        self
    }

    pub fn get(&self, binding: &str) -> Option<&Arc<dyn Fetcher>> {
        self.bindings.get(binding)
    }

    pub fn contains(&self, binding: &str) -> bool {
        self.bindings.contains_key(binding)
    }

    pub fn bindings(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl fmt::Debug for FetcherSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.bindings.keys()).finish()
    }
}

/// Calls bindings and writes their payloads through to the local cache.
///
/// Bindings may narrow their output to the request's date range, so only
/// unbounded requests are written through.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    fetchers: FetcherSet,
    cache: LocalCacheStore,
    format: CacheFormat,
}

impl Dispatcher {
    pub fn new(fetchers: FetcherSet, cache: LocalCacheStore, format: CacheFormat) -> Self {
        Self {
            fetchers,
            cache,
            format,
        }
    }

    pub fn fetchers(&self) -> &FetcherSet {
        &self.fetchers
    }

    pub(crate) fn set_format(&mut self, format: CacheFormat) {
        self.format = format;
    }

    pub fn dispatch(&self, request: &FetchRequest<'_>) -> Result<DatasetPayload, FetchError> {
        self.dispatch_at(request, Utc::now())
    }

    /// Dispatch with an explicit write-through timestamp.
    pub fn dispatch_at(
        &self,
        request: &FetchRequest<'_>,
        now: DateTime<Utc>,
    ) -> Result<DatasetPayload, FetchError> {
        let descriptor = request.descriptor;
        let binding = descriptor.fetch_binding.as_str();
        let fetcher = self.fetchers.get(binding).ok_or_else(|| {
            FetchError::new(
                &descriptor.name,
                FetchErrorKind::Unbound {
                    binding: binding.to_string(),
                },
            )
        })?;

        tracing::debug!(dataset = %descriptor.name, binding = %binding, "dispatching fetch");
        let payload = fetcher.fetch(request)?;

        let expected = declared_shape(descriptor);
        if payload.shape() != expected {
            return Err(FetchError::new(
                &descriptor.name,
                FetchErrorKind::Validation {
                    message: format!(
                        "binding `{binding}` returned a {} payload, registry declares {expected}",
                        payload.shape()
                    ),
                },
            ));
        }

        if !request.date_range.is_unbounded() {
            tracing::debug!(
                dataset = %descriptor.name,
                "date-restricted fetch; skipping cache write-through"
            );
        } else if let Err(err) = self.cache.put_at(&descriptor.name, &payload, self.format, now) {
            tracing::warn!(
                dataset = %descriptor.name,
                error = %err,
                "could not write fetched payload to local cache"
            );
        }
        Ok(payload)
    }
}

/// Linear-backoff retry loop for bindings.
///
/// Only transient kinds (`Network`, `Timeout`) are retried. Attempt `n`
/// (1-based) waits `base_delay × n` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn run<T>(
        &self,
        dataset: &str,
        mut op: impl FnMut(u32) -> Result<T, FetchErrorKind>,
    ) -> Result<T, FetchError> {
        let mut attempt = 0;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(kind) if kind.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let wait = self.base_delay * attempt;
                    tracing::debug!(
                        dataset = %dataset,
                        attempt,
                        ?wait,
                        error = %kind,
                        "retrying fetch"
                    );
                    thread::sleep(wait);
                }
                Err(kind) => return Err(FetchError::new(dataset, kind)),
            }
        }
    }
}

/// Binding that reads already-normalized source dumps from a directory,
/// one `<fetch_binding>.json` document per binding.
#[derive(Debug, Clone)]
pub struct DirectoryFetcher {
    root: PathBuf,
    retry_delay: Duration,
}

impl DirectoryFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            retry_delay: Duration::from_millis(200),
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_path(&self, binding: &str) -> PathBuf {
        self.root.join(format!("{binding}.json"))
    }
}

impl Fetcher for DirectoryFetcher {
    fn fetch(&self, request: &FetchRequest<'_>) -> Result<DatasetPayload, FetchError> {
        let path = self.document_path(&request.descriptor.fetch_binding);
        let policy = RetryPolicy::new(request.max_retries, self.retry_delay);

        let bytes = policy.run(&request.descriptor.name, |_| {
            std::fs::read(&path).map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => FetchErrorKind::MalformedSource {
                    message: format!("{}: source document not found", path.display()),
                },
                _ => FetchErrorKind::Network {
                    message: format!("{}: {e}", path.display()),
                },
            })
        })?;

        decode_payload(&bytes, CacheFormat::Json).map_err(|e| {
            FetchError::new(
                &request.descriptor.name,
                FetchErrorKind::MalformedSource {
                    message: format!("{}: {e}", path.display()),
                },
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brdata_core::{Registry, Table};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
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
                "brdata-fetch-{prefix}-{}-{unique}",
                std::process::id()
            ));
            std::fs::create_dir_all(&path).expect("temp dir should be created");
            Self { path }
        }
    }

    impl Drop for TempDirGuard {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }

    fn single() -> DatasetPayload {
        DatasetPayload::Single(
            Table::new(
                vec!["date".to_string(), "close".to_string()],
                vec![vec![json!("2025-01-02"), json!(12.5)]],
            )
            .expect("table"),
        )
    }

    struct Fixed(DatasetPayload);

    impl Fetcher for Fixed {
        fn fetch(&self, _request: &FetchRequest<'_>) -> Result<DatasetPayload, FetchError> {
            Ok(self.0.clone())
        }
    }

    fn request<'a>(
        descriptor: &'a DatasetDescriptor,
        table: &'a ResolvedTable,
    ) -> FetchRequest<'a> {
        FetchRequest {
            descriptor,
            table,
            date_range: DateRange::default(),
            quiet: true,
            max_retries: 2,
        }
    }

    #[test]
    fn retry_policy_retries_only_transient_kinds() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(2, Duration::ZERO);
        let value = policy
            .run("b3_stocks", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                if attempt < 2 {
                    Err(FetchErrorKind::Timeout {
                        after: Duration::from_secs(1),
                    })
                } else {
                    Ok(attempt)
                }
            })
            .expect("third attempt succeeds");
        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        calls.store(0, Ordering::SeqCst);
        let err = policy
            .run::<()>("b3_stocks", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(FetchErrorKind::MalformedSource {
                    message: "bad header".to_string(),
                })
            })
            .expect_err("malformed is not retried");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.dataset, "b3_stocks");
    }

    #[test]
    fn dispatch_writes_through_and_checks_shape() {
        let tmp = TempDirGuard::new("dispatch");
        let registry = Registry::builtin().expect("builtin registry");
        let cache = LocalCacheStore::open(tmp.path.join("cache")).expect("cache");
        let b3 = registry.get("b3_stocks").expect("b3_stocks");
        let abecip = registry.get("abecip").expect("abecip");

        let fetchers = FetcherSet::new()
            .with(b3.fetch_binding.clone(), Arc::new(Fixed(single())))
            .with(abecip.fetch_binding.clone(), Arc::new(Fixed(single())));
        let dispatcher = Dispatcher::new(fetchers, cache.clone(), CacheFormat::Jsonl);

        let table = ResolvedTable::NotApplicable;
        let payload = dispatcher.dispatch(&request(b3, &table)).expect("fetch");
        assert_eq!(payload, single());
        assert_eq!(cache.get("b3_stocks").expect("get"), Some(single()));

        let sbpe = ResolvedTable::Table {
            key: "sbpe".to_string(),
            is_default: true,
        };
        let err = dispatcher
            .dispatch(&request(abecip, &sbpe))
            .expect_err("single payload for multi dataset");
        assert!(matches!(err.kind, FetchErrorKind::Validation { .. }));
        assert_eq!(cache.entry("abecip").expect("entry"), None);
    }

    #[test]
    fn dispatch_reports_unbound_binding() {
        let tmp = TempDirGuard::new("unbound");
        let registry = Registry::builtin().expect("builtin registry");
        let cache = LocalCacheStore::open(&tmp.path).expect("cache");
        let dispatcher = Dispatcher::new(FetcherSet::new(), cache, CacheFormat::Json);
        let b3 = registry.get("b3_stocks").expect("b3_stocks");

        let err = dispatcher
            .dispatch(&request(b3, &ResolvedTable::NotApplicable))
            .expect_err("no bindings");
        assert_eq!(
            err.kind,
            FetchErrorKind::Unbound {
                binding: b3.fetch_binding.clone()
            }
        );
    }

    #[test]
    fn directory_fetcher_reads_binding_document() {
        let tmp = TempDirGuard::new("directory");
        let registry = Registry::builtin().expect("builtin registry");
        let b3 = registry.get("b3_stocks").expect("b3_stocks");
        let fetcher = DirectoryFetcher::new(&tmp.path).with_retry_delay(Duration::ZERO);
        let table = ResolvedTable::NotApplicable;

        let err = fetcher.fetch(&request(b3, &table)).expect_err("no document");
        assert!(matches!(err.kind, FetchErrorKind::MalformedSource { .. }));

        let path = tmp.path.join(format!("{}.json", b3.fetch_binding));
        std::fs::write(&path, b"{\"kind\":").expect("write broken");
        let err = fetcher.fetch(&request(b3, &table)).expect_err("broken document");
        assert!(matches!(err.kind, FetchErrorKind::MalformedSource { .. }));

        std::fs::write(&path, serde_json::to_vec(&single()).expect("json")).expect("write");
        assert_eq!(fetcher.fetch(&request(b3, &table)).expect("fetch"), single());
    }

    #[test]
    fn directory_fetcher_does_not_retry_missing_documents() {
        let tmp = TempDirGuard::new("missing");
        let registry = Registry::builtin().expect("builtin registry");
        let b3 = registry.get("b3_stocks").expect("b3_stocks");
        let fetcher = DirectoryFetcher::new(&tmp.path).with_retry_delay(Duration::from_secs(30));
        let table = ResolvedTable::NotApplicable;
        let mut req = request(b3, &table);
        req.max_retries = 3;

        let started = std::time::Instant::now();
        let err = fetcher.fetch(&req).expect_err("no document");
        assert!(started.elapsed() < Duration::from_secs(5));
        match err.kind {
            FetchErrorKind::MalformedSource { message } => {
                assert!(message.contains("source document not found"));
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }
}
