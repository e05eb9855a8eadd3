//! Engine configuration, read from TOML.
//!
//! ```toml
//! cache_dir = "/var/cache/brdata"
//! remote_url = "https://example.org/brdata/artifacts"
//! source_dir = "/srv/brdata/sources"
//! max_retries = 3
//! cache_format = "jsonl"
//! miss_policy = "error"
//! timeout_secs = 30
//! ```
//!
//! Every field is optional. The CLI layers flags and `BRDATA_*`
//! environment variables over whatever the file sets.

use crate::engine::{DEFAULT_MAX_RETRIES, Engine, EngineError, MissPolicy};
use crate::fetch::{DirectoryFetcher, Fetcher, FetcherSet};
use brdata_core::Registry;
use brdata_store::{
    ArtifactStore, CacheFormat, DirectoryArtifactStore, HttpArtifactStore, LocalCacheStore,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const CONFIG_FILE: &str = "config.toml";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
const APP_DIR: &str = "brdata";
const REMOTE_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub cache_dir: PathBuf,
    /// Base URL of the remote artifact store.
    pub remote_url: Option<String>,
    /// Local mirror of the remote artifact store; exclusive with `remote_url`.
    pub remote_dir: Option<PathBuf>,
    /// Directory of source dumps served by `DirectoryFetcher`.
    pub source_dir: Option<PathBuf>,
    /// Registry TOML replacing the built-in catalog.
    pub registry_path: Option<PathBuf>,
    pub max_retries: u32,
    pub cache_format: CacheFormat,
    pub miss_policy: MissPolicy,
    pub timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            remote_url: None,
            remote_dir: None,
            source_dir: None,
            registry_path: None,
            max_retries: DEFAULT_MAX_RETRIES,
            cache_format: CacheFormat::default(),
            miss_policy: MissPolicy::default(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// `<platform cache dir>/brdata`, or a temp-dir fallback.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
}

/// `<platform config dir>/brdata/config.toml`, when the platform has one.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Self::parse(text, "<inline>")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text, &path.display().to_string())
    }

    /// Load `explicit` if given (it must exist), else the default config
    /// file if present, else defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match default_config_path() {
            Some(path) if path.is_file() => {
                tracing::debug!(path = %path.display(), "loading config");
                Self::load(path)
            }
            _ => Ok(Self::default()),
        }
    }

    fn parse(text: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.remote_url.is_some() && self.remote_dir.is_some() {
            return Err(ConfigError::Invalid(
                "remote_url and remote_dir are mutually exclusive".to_string(),
            ));
        }
        if let Some(url) = &self.remote_url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            return Err(ConfigError::Invalid(format!(
                "remote_url `{url}` must start with http:// or https://"
            )));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn registry(&self) -> Result<Registry, EngineError> {
        match &self.registry_path {
            Some(path) => Ok(Registry::load(path)?),
            None => Ok(Registry::builtin()?),
        }
    }

    fn remote(&self) -> Result<Option<Arc<dyn ArtifactStore>>, EngineError> {
        if let Some(dir) = &self.remote_dir {
            return Ok(Some(Arc::new(DirectoryArtifactStore::new(dir))));
        }
        let Some(url) = &self.remote_url else {
            return Ok(None);
        };
        let store = HttpArtifactStore::new(url.clone(), self.timeout())?
            .with_retries(self.max_retries, REMOTE_RETRY_DELAY);
        Ok(Some(Arc::new(store)))
    }

    /// Assemble an engine.
    ///
    /// Bindings in `fetchers` win; when `source_dir` is set, every registry
    /// binding still unbound is served by one shared `DirectoryFetcher`.
    pub fn build(&self, mut fetchers: FetcherSet) -> Result<Engine, EngineError> {
        self.validate()?;
        let registry = self.registry()?;

        if let Some(dir) = &self.source_dir {
            let directory: Arc<dyn Fetcher> = Arc::new(DirectoryFetcher::new(dir));
            for descriptor in registry.iter() {
                if !fetchers.contains(&descriptor.fetch_binding) {
                    fetchers.register(descriptor.fetch_binding.clone(), Arc::clone(&directory));
                }
            }
        }

        let cache = LocalCacheStore::open(&self.cache_dir)?;
        let mut engine = Engine::new(Arc::new(registry), cache, fetchers)
            .with_cache_format(self.cache_format)
            .with_max_retries(self.max_retries);
        if let Some(remote) = self.remote()? {
            tracing::debug!(remote = %remote.describe(), "using remote artifact store");
            engine = engine.with_remote(remote);
        }
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = EngineConfig::from_toml_str("").expect("empty config");
        assert_eq!(config, EngineConfig::default());
        assert!(config.cache_dir.ends_with(APP_DIR));
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
    }

    #[test]
    fn config_reads_every_field() {
        let config = EngineConfig::from_toml_str(
            r#"
cache_dir = "/tmp/brdata-cache"
remote_url = "https://artifacts.invalid/brdata"
source_dir = "/tmp/brdata-sources"
registry_path = "/tmp/registry.toml"
max_retries = 5
cache_format = "jsonl"
miss_policy = "error"
timeout_secs = 10
"#,
        )
        .expect("config");
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/brdata-cache"));
        assert_eq!(config.cache_format, CacheFormat::Jsonl);
        assert_eq!(config.miss_policy, MissPolicy::Error);
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert_eq!(config.max_retries, 5);
    }

    #[test]
    fn config_rejects_conflicts_and_unknown_keys() {
        let err = EngineConfig::from_toml_str(
            "remote_url = \"https://a.invalid\"\nremote_dir = \"/tmp/mirror\"\n",
        )
        .expect_err("both remotes");
        assert!(err.to_string().contains("mutually exclusive"));

        let err = EngineConfig::from_toml_str("remote_url = \"ftp://a\"\n").expect_err("scheme");
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = EngineConfig::from_toml_str("cache_dirr = \"/tmp\"\n").expect_err("typo");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
