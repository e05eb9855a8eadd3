//! Ordered source strategies.
//!
//! Each tier implements `Source`; the engine walks a list of them and stops
//! at the first success. A failed tier reports a `TierFailure`, which is
//! what `AllSourcesFailed` aggregates.

use crate::envelope::AttemptOutcome;
use crate::fetch::{Dispatcher, FetchError, FetchRequest};
use brdata_core::{DatasetDescriptor, DatasetPayload, DateRange, ResolvedTable, declared_shape};
use brdata_store::{ArtifactStore, CacheFormat, LocalCacheStore, RemoteError, StoreError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Backing tier that satisfied (or failed) a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    LocalCache,
    RemoteStore,
    Fresh,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LocalCache => "local_cache",
            Self::RemoteStore => "remote_store",
            Self::Fresh => "fresh",
        }
    }
}

impl Display for Tier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why one tier did not produce a payload.
#[derive(Debug, thiserror::Error)]
pub enum TierFailure {
    #[error("no cached entry")]
    CacheMiss,

    #[error(
        "cached entry is stale (age {}s exceeds {}s)",
        .age.num_seconds(),
        .threshold.num_seconds()
    )]
    CacheStale { age: Duration, threshold: Duration },

    #[error("{0}")]
    Store(StoreError),

    #[error("{0}")]
    Remote(RemoteError),

    #[error("{0}")]
    Fetch(FetchError),
}

impl TierFailure {
    pub fn tier(&self) -> Tier {
        match self {
            Self::CacheMiss | Self::CacheStale { .. } | Self::Store(_) => Tier::LocalCache,
            Self::Remote(_) => Tier::RemoteStore,
            Self::Fetch(_) => Tier::Fresh,
        }
    }

    /// A definitive "not here" answer, as opposed to a failure.
    pub fn is_miss(&self) -> bool {
        match self {
            Self::CacheMiss | Self::CacheStale { .. } => true,
            Self::Remote(err) => err.is_miss(),
            Self::Store(_) | Self::Fetch(_) => false,
        }
    }

    pub(crate) fn outcome(&self) -> AttemptOutcome {
        match self {
            Self::CacheStale { .. } => AttemptOutcome::Stale,
            failure if failure.is_miss() => AttemptOutcome::Miss,
            _ => AttemptOutcome::Failed,
        }
    }
}

/// Per-call inputs shared by every tier.
#[derive(Debug, Clone)]
pub struct SourceContext<'a> {
    pub descriptor: &'a DatasetDescriptor,
    pub table: &'a ResolvedTable,
    pub date_range: DateRange,
    /// Caller override of the staleness threshold.
    pub max_age: Option<Duration>,
    pub quiet: bool,
    pub max_retries: u32,
    pub now: DateTime<Utc>,
}

pub trait Source {
    fn tier(&self) -> Tier;

    fn resolve(&self, ctx: &SourceContext<'_>) -> Result<DatasetPayload, TierFailure>;
}

/// Which staleness threshold the local cache tier enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// `max_age`, else twice the dataset's update frequency.
    Default,
    /// Only a caller-supplied `max_age`.
    ExplicitOnly,
}

pub struct LocalCacheSource<'a> {
    cache: &'a LocalCacheStore,
    freshness: Freshness,
}

impl<'a> LocalCacheSource<'a> {
    pub fn new(cache: &'a LocalCacheStore, freshness: Freshness) -> Self {
        Self { cache, freshness }
    }

    fn threshold(&self, ctx: &SourceContext<'_>) -> Option<Duration> {
        match self.freshness {
            Freshness::Default => ctx
                .max_age
                .or_else(|| ctx.descriptor.update_frequency.stale_threshold()),
            Freshness::ExplicitOnly => ctx.max_age,
        }
    }
}

impl Source for LocalCacheSource<'_> {
    fn tier(&self) -> Tier {
        Tier::LocalCache
    }

    fn resolve(&self, ctx: &SourceContext<'_>) -> Result<DatasetPayload, TierFailure> {
        let name = ctx.descriptor.name.as_str();
        let age = self
            .cache
            .age(name, ctx.now)
            .map_err(TierFailure::Store)?
            .ok_or(TierFailure::CacheMiss)?;
        if let Some(threshold) = self.threshold(ctx)
            && age > threshold
        {
            return Err(TierFailure::CacheStale { age, threshold });
        }

        let payload = self
            .cache
            .get(name)
            .map_err(TierFailure::Store)?
            .ok_or(TierFailure::CacheMiss)?;

        let expected = declared_shape(ctx.descriptor);
        if payload.shape() != expected {
            tracing::warn!(
                dataset = %name,
                expected = %expected,
                actual = %payload.shape(),
                "cached payload has the wrong shape; treating as a miss"
            );
            return Err(TierFailure::CacheMiss);
        }
        Ok(payload)
    }
}

/// Remote artifacts, written through to the local cache on success.
pub struct RemoteSource<'a> {
    remote: Option<&'a dyn ArtifactStore>,
    cache: &'a LocalCacheStore,
    format: CacheFormat,
}

impl<'a> RemoteSource<'a> {
    pub fn new(
        remote: Option<&'a dyn ArtifactStore>,
        cache: &'a LocalCacheStore,
        format: CacheFormat,
    ) -> Self {
        Self {
            remote,
            cache,
            format,
        }
    }
}

impl Source for RemoteSource<'_> {
    fn tier(&self) -> Tier {
        Tier::RemoteStore
    }

    fn resolve(&self, ctx: &SourceContext<'_>) -> Result<DatasetPayload, TierFailure> {
        let name = ctx.descriptor.name.as_str();
        let remote = self.remote.ok_or_else(|| {
            TierFailure::Remote(RemoteError::Unavailable {
                reason: "no remote artifact store configured".to_string(),
            })
        })?;

        let payload = remote.fetch(name).map_err(TierFailure::Remote)?;
        let expected = declared_shape(ctx.descriptor);
        if payload.shape() != expected {
            return Err(TierFailure::Remote(RemoteError::Malformed {
                name: name.to_string(),
                reason: format!("expected a {expected} payload, got {}", payload.shape()),
            }));
        }

        if let Err(err) = self.cache.put_at(name, &payload, self.format, ctx.now) {
            tracing::warn!(
                dataset = %name,
                error = %err,
                "could not write remote artifact to local cache"
            );
        }
        Ok(payload)
    }
}

/// A fresh fetch through the dispatcher (which writes through itself).
pub struct FreshSource<'a> {
    dispatcher: &'a Dispatcher,
}

impl<'a> FreshSource<'a> {
    pub fn new(dispatcher: &'a Dispatcher) -> Self {
        Self { dispatcher }
    }
}

impl Source for FreshSource<'_> {
    fn tier(&self) -> Tier {
        Tier::Fresh
    }

    fn resolve(&self, ctx: &SourceContext<'_>) -> Result<DatasetPayload, TierFailure> {
        let request = FetchRequest {
            descriptor: ctx.descriptor,
            table: ctx.table,
            date_range: ctx.date_range,
            quiet: ctx.quiet,
            max_retries: ctx.max_retries,
        };
        self.dispatcher
            .dispatch_at(&request, ctx.now)
            .map_err(TierFailure::Fetch)
    }
}
