//! The resolution engine: registry lookup, table pre-flight, tier walk,
//! extraction, date filtering, provenance.

use crate::config::ConfigError;
use crate::envelope::{AttemptOutcome, EnvelopeInfo, EnvelopeMetadata, ResultEnvelope, TierAttempt};
use crate::fetch::{Dispatcher, FetchError, FetcherSet};
use crate::source::{
    FreshSource, Freshness, LocalCacheSource, RemoteSource, Source, SourceContext, TierFailure,
};
use brdata_core::{
    CoreError, DATE_COLUMN, DatasetDescriptor, DatasetFilter, DateRange, Registry, RegistryError,
    UpdateFrequency, declared_shape, extract, resolve_requested, table_note,
};
use brdata_store::{
    ArtifactStore, CacheFormat, ClearScope, LocalCacheStore, RemoteError, StoreError,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Which tiers a request may use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    /// Local cache, then remote store, then a fresh fetch.
    #[default]
    Auto,
    /// Local cache only.
    Cache,
    /// Remote artifact store only.
    Github,
    /// Fresh fetch only.
    Fresh,
}

impl SourceMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Cache => "cache",
            Self::Github => "github",
            Self::Fresh => "fresh",
        }
    }
}

impl Display for SourceMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cache" => Ok(Self::Cache),
            "github" => Ok(Self::Github),
            "fresh" => Ok(Self::Fresh),
            other => Err(format!(
                "unknown source `{other}` (expected auto, cache, github, or fresh)"
            )),
        }
    }
}

/// Outcome of a miss in the single-tier `Cache` and `Github` modes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissPolicy {
    #[default]
    ReturnNull,
    Error,
}

impl MissPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReturnNull => "return_null",
            Self::Error => "error",
        }
    }
}

impl Display for MissPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MissPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "return_null" | "null" => Ok(Self::ReturnNull),
            "error" => Ok(Self::Error),
            other => Err(format!(
                "unknown miss policy `{other}` (expected return_null or error)"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GetDataset {
    pub name: String,
    pub table: Option<String>,
    pub source: SourceMode,
    pub date_start: Option<NaiveDate>,
    pub date_end: Option<NaiveDate>,
    /// Overrides the default staleness threshold.
    pub max_age: Option<Duration>,
    pub miss_policy: MissPolicy,
    pub quiet: bool,
    pub now: DateTime<Utc>,
}

impl GetDataset {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            source: SourceMode::Auto,
            date_start: None,
            date_end: None,
            max_age: None,
            miss_policy: MissPolicy::default(),
            quiet: false,
            now: Utc::now(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("cache miss for `{dataset}`: tier `{tier}` has no usable entry")]
    CacheMiss { dataset: String, tier: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("all sources failed for `{dataset}`: {}", render_failures(.failures))]
    AllSourcesFailed {
        dataset: String,
        failures: Vec<TierFailure>,
    },

    #[error("no remote artifact store configured (set remote_url or remote_dir)")]
    RemoteNotConfigured,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

fn render_failures(failures: &[TierFailure]) -> String {
    failures
        .iter()
        .map(|failure| format!("{}: {failure}", failure.tier()))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Row of `Engine::list_datasets`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetSummary {
    pub name: String,
    pub title: String,
    pub source: String,
    pub geography: String,
    pub categories: Vec<String>,
    pub update_frequency: UpdateFrequency,
    pub tables: Vec<String>,
    pub default_table: Option<String>,
}

impl From<&DatasetDescriptor> for DatasetSummary {
    fn from(descriptor: &DatasetDescriptor) -> Self {
        Self {
            name: descriptor.name.clone(),
            title: descriptor.title.clone(),
            source: descriptor.source.clone(),
            geography: descriptor.geography.clone(),
            categories: descriptor.categories.clone(),
            update_frequency: descriptor.update_frequency,
            tables: descriptor.table_keys(),
            default_table: descriptor.default_table().map(|t| t.key.clone()),
        }
    }
}

/// Cache state of one registry dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatusRow {
    pub name: String,
    pub update_frequency: UpdateFrequency,
    pub cached: bool,
    pub format: Option<CacheFormat>,
    pub cached_at: Option<DateTime<Utc>>,
    #[serde(rename = "ageSeconds", serialize_with = "serialize_seconds")]
    pub age: Option<Duration>,
    /// `None` never goes stale.
    #[serde(rename = "thresholdSeconds", serialize_with = "serialize_seconds")]
    pub threshold: Option<Duration>,
    pub stale: bool,
}

impl CacheStatusRow {
    fn build(
        descriptor: &DatasetDescriptor,
        cached: Option<(CacheFormat, DateTime<Utc>)>,
        now: DateTime<Utc>,
    ) -> Self {
        let threshold = descriptor.update_frequency.stale_threshold();
        let age = cached.map(|(_, cached_at)| (now - cached_at).max(Duration::zero()));
        let stale = match age {
            None => true,
            Some(age) => threshold.is_some_and(|limit| age > limit),
        };
        Self {
            name: descriptor.name.clone(),
            update_frequency: descriptor.update_frequency,
            cached: cached.is_some(),
            format: cached.map(|(format, _)| format),
            cached_at: cached.map(|(_, cached_at)| cached_at),
            age,
            threshold,
            stale,
        }
    }
}

fn serialize_seconds<S: Serializer>(
    value: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(duration) => serializer.serialize_some(&duration.num_seconds()),
        None => serializer.serialize_none(),
    }
}

/// Full descriptor plus its cache state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetInfo {
    pub descriptor: DatasetDescriptor,
    pub cache: CacheStatusRow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFailure {
    pub name: String,
    pub reason: String,
}

/// Outcome of `Engine::update_cache_from_remote`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReport {
    pub updated: Vec<String>,
    pub failed: Vec<UpdateFailure>,
}

/// Registry-driven, multi-tier dataset access.
#[derive(Clone)]
pub struct Engine {
    registry: Arc<Registry>,
    cache: LocalCacheStore,
    remote: Option<Arc<dyn ArtifactStore>>,
    dispatcher: Dispatcher,
    cache_format: CacheFormat,
    max_retries: u32,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("datasets", &self.registry.len())
            .field("cache", &self.cache.root())
            .field("remote", &self.remote.as_ref().map(|remote| remote.describe()))
            .field("fetchers", self.dispatcher.fetchers())
            .field("cache_format", &self.cache_format)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl Engine {
    pub fn new(registry: Arc<Registry>, cache: LocalCacheStore, fetchers: FetcherSet) -> Self {
        let cache_format = CacheFormat::default();
        let dispatcher = Dispatcher::new(fetchers, cache.clone(), cache_format);
        Self {
            registry,
            cache,
            remote: None,
            dispatcher,
            cache_format,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn ArtifactStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Format used for every write-through.
    pub fn with_cache_format(mut self, format: CacheFormat) -> Self {
        self.cache_format = format;
        self.dispatcher.set_format(format);
        self
    }

    /// Retry budget handed to fetch bindings.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn cache(&self) -> &LocalCacheStore {
        &self.cache
    }

    pub fn remote(&self) -> Option<&dyn ArtifactStore> {
        self.remote.as_deref()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn list_datasets(&self, filter: &DatasetFilter) -> Vec<DatasetSummary> {
        self.registry
            .list(filter)
            .into_iter()
            .map(DatasetSummary::from)
            .collect()
    }

    pub fn get_dataset_info(
        &self,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<DatasetInfo, EngineError> {
        let descriptor = self.registry.lookup(name)?;
        let cached = self
            .cache
            .entry(name)?
            .map(|entry| (entry.format, entry.cached_at));
        Ok(DatasetInfo {
            descriptor: descriptor.clone(),
            cache: CacheStatusRow::build(descriptor, cached, now),
        })
    }

    /// Resolve one dataset request.
    ///
    /// `Ok(None)` only happens in `Cache`/`Github` mode with
    /// `MissPolicy::ReturnNull`.
    pub fn get_dataset(&self, request: GetDataset) -> Result<Option<ResultEnvelope>, EngineError> {
        let descriptor = self.registry.lookup(&request.name)?;
        let resolved = resolve_requested(descriptor, request.table.as_deref())?;
        let date_range = DateRange::new(request.date_start, request.date_end);

        let ctx = SourceContext {
            descriptor,
            table: &resolved,
            date_range,
            max_age: request.max_age,
            quiet: request.quiet,
            max_retries: self.max_retries,
            now: request.now,
        };

        let mut attempts = Vec::new();
        let mut failures = Vec::new();
        let mut served = None;
        for source in self.sources(request.source) {
            let tier = source.tier();
            tracing::debug!(dataset = %descriptor.name, tier = %tier, "trying tier");
            match source.resolve(&ctx) {
                Ok(payload) => {
                    attempts.push(TierAttempt {
                        tier,
                        outcome: AttemptOutcome::Hit,
                        detail: None,
                    });
                    served = Some((tier, payload));
                    break;
                }
                Err(failure) => {
                    tracing::debug!(
                        dataset = %descriptor.name,
                        tier = %tier,
                        reason = %failure,
                        "tier did not serve request"
                    );
                    attempts.push(TierAttempt {
                        tier,
                        outcome: failure.outcome(),
                        detail: Some(failure.to_string()),
                    });
                    failures.push(failure);
                }
            }
        }

        let Some((tier, payload)) = served else {
            return self.exhausted(&request, failures);
        };

        let table = extract(descriptor, payload, &resolved)?;
        let table = if table.column_index(DATE_COLUMN).is_some() {
            table
                .filter_date_range(DATE_COLUMN, &date_range)
                .map_err(CoreError::from)?
        } else {
            if !date_range.is_unbounded() {
                tracing::debug!(
                    dataset = %descriptor.name,
                    "result has no `{DATE_COLUMN}` column; date range not applied"
                );
            }
            table
        };

        let note = table_note(descriptor, &resolved);
        if let Some(note) = &note {
            if request.quiet {
                tracing::debug!("{note}");
            } else {
                tracing::info!("{note}");
            }
        }
        tracing::info!(
            dataset = %descriptor.name,
            source = %tier,
            rows = table.len(),
            "served dataset"
        );

        Ok(Some(ResultEnvelope {
            table,
            metadata: EnvelopeMetadata {
                source: tier,
                fetched_at: request.now,
                info: EnvelopeInfo {
                    dataset: descriptor.name.clone(),
                    resolved_table: resolved.key().map(str::to_string),
                    is_default_table: resolved.is_default(),
                    attempts,
                    note,
                },
            },
        }))
    }

    fn sources(&self, mode: SourceMode) -> Vec<Box<dyn Source + '_>> {
        match mode {
            SourceMode::Auto => vec![
                self.local_source(Freshness::Default),
                self.remote_source(),
                self.fresh_source(),
            ],
            SourceMode::Cache => vec![self.local_source(Freshness::ExplicitOnly)],
            SourceMode::Github => vec![self.remote_source()],
            SourceMode::Fresh => vec![self.fresh_source()],
        }
    }

    fn local_source(&self, freshness: Freshness) -> Box<dyn Source + '_> {
        Box::new(LocalCacheSource::new(&self.cache, freshness))
    }

    fn remote_source(&self) -> Box<dyn Source + '_> {
        Box::new(RemoteSource::new(
            self.remote.as_deref(),
            &self.cache,
            self.cache_format,
        ))
    }

    fn fresh_source(&self) -> Box<dyn Source + '_> {
        Box::new(FreshSource::new(&self.dispatcher))
    }

    fn exhausted(
        &self,
        request: &GetDataset,
        mut failures: Vec<TierFailure>,
    ) -> Result<Option<ResultEnvelope>, EngineError> {
        let dataset = request.name.clone();
        if request.source == SourceMode::Auto || failures.len() != 1 {
            return Err(EngineError::AllSourcesFailed { dataset, failures });
        }

        let failure = failures.remove(0);
        if failure.is_miss() {
            return match request.miss_policy {
                MissPolicy::ReturnNull => {
                    tracing::info!(
                        dataset = %dataset,
                        source = %request.source,
                        reason = %failure,
                        "no data available from requested source"
                    );
                    Ok(None)
                }
                MissPolicy::Error => Err(EngineError::CacheMiss {
                    dataset,
                    tier: request.source.as_str().to_string(),
                }),
            };
        }

        Err(match failure {
            TierFailure::Store(err) => err.into(),
            TierFailure::Remote(err) => err.into(),
            TierFailure::Fetch(err) => err.into(),
            TierFailure::CacheMiss | TierFailure::CacheStale { .. } => EngineError::CacheMiss {
                dataset,
                tier: request.source.as_str().to_string(),
            },
        })
    }

    /// Cache state of every registry dataset, in registry order.
    pub fn check_cache_status(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<CacheStatusRow>, EngineError> {
        let inventory = self.cache.list()?;
        Ok(self
            .registry
            .iter()
            .map(|descriptor| {
                let cached = inventory
                    .iter()
                    .find(|row| row.name == descriptor.name)
                    .map(|row| (row.format, row.cached_at));
                CacheStatusRow::build(descriptor, cached, now)
            })
            .collect())
    }

    /// Remove cached entries. Named datasets must exist in the registry.
    pub fn clear_cache(&self, scope: &ClearScope) -> Result<Vec<String>, EngineError> {
        if let ClearScope::Names(names) = scope {
            for name in names {
                self.registry.lookup(name)?;
            }
        }
        let removed = self.cache.clear(scope)?;
        tracing::info!(removed = removed.len(), "cleared local cache entries");
        Ok(removed)
    }

    /// Pull artifacts from the remote store into the local cache.
    ///
    /// `None` updates every registry dataset. Per-dataset failures are
    /// collected in the report; unknown names fail the whole call up front.
    pub fn update_cache_from_remote(
        &self,
        names: Option<&[String]>,
        now: DateTime<Utc>,
    ) -> Result<UpdateReport, EngineError> {
        let remote = self
            .remote
            .as_deref()
            .ok_or(EngineError::RemoteNotConfigured)?;
        let targets: Vec<&DatasetDescriptor> = match names {
            None => self.registry.iter().collect(),
            Some(names) => names
                .iter()
                .map(|name| self.registry.lookup(name))
                .collect::<Result<_, _>>()?,
        };

        let mut report = UpdateReport::default();
        for descriptor in targets {
            let name = descriptor.name.clone();
            let outcome = remote
                .fetch(&name)
                .map_err(|err| err.to_string())
                .and_then(|payload| {
                    let expected = declared_shape(descriptor);
                    if payload.shape() == expected {
                        Ok(payload)
                    } else {
                        Err(format!(
                            "expected a {expected} payload, got {}",
                            payload.shape()
                        ))
                    }
                })
                .and_then(|payload| {
                    self.cache
                        .put_at(&name, &payload, self.cache_format, now)
                        .map_err(|err| err.to_string())
                });

            match outcome {
                Ok(_) => {
                    tracing::info!(dataset = %name, remote = %remote.describe(), "updated from remote");
                    report.updated.push(name);
                }
                Err(reason) => {
                    tracing::warn!(dataset = %name, reason = %reason, "remote update failed");
                    report.failed.push(UpdateFailure { name, reason });
                }
            }
        }
        Ok(report)
    }

    pub fn list_remote(&self) -> Result<Vec<String>, EngineError> {
        let remote = self
            .remote
            .as_deref()
            .ok_or(EngineError::RemoteNotConfigured)?;
        Ok(remote.list_available()?)
    }
}
