//! # brdata-engine
//!
//! Registry-driven, multi-tier dataset resolution.
//!
//! `Engine::get_dataset` validates the request against the registry, then
//! walks an ordered list of `Source` strategies:
//!
//! ```text
//! auto:   local cache (fresh enough) → remote artifacts → fresh fetch
//! cache:  local cache
//! github: remote artifacts
//! fresh:  fresh fetch
//! ```
//!
//! Remote hits and fresh fetches are written through to the local cache.
//! The served payload is filtered to the resolved table and date range and
//! wrapped in a `ResultEnvelope` naming the tier that served it.

pub mod config;
pub mod engine;
pub mod envelope;
pub mod fetch;
pub mod source;

pub use config::{ConfigError, EngineConfig, default_cache_dir, default_config_path};
pub use engine::{
    CacheStatusRow, DEFAULT_MAX_RETRIES, DatasetInfo, DatasetSummary, Engine, EngineError,
    GetDataset, MissPolicy, SourceMode, UpdateFailure, UpdateReport,
};
pub use envelope::{AttemptOutcome, EnvelopeInfo, EnvelopeMetadata, ResultEnvelope, TierAttempt};
pub use fetch::{
    Dispatcher, DirectoryFetcher, FetchError, FetchErrorKind, FetchRequest, Fetcher, FetcherSet,
    RetryPolicy,
};
pub use source::{Source, SourceContext, Tier, TierFailure};
