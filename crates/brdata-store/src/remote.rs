//! Remote artifact store: one precomputed payload per dataset, read-only.
//!
//! `Miss` (the store answered and has no such artifact) is kept apart from
//! `Unavailable` (the store could not be reached or failed), because only a
//! miss is a definitive answer.

use crate::codec::{CacheFormat, decode_payload};
use brdata_core::DatasetPayload;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

const USER_AGENT: &str = concat!("brdata/", env!("CARGO_PKG_VERSION"));
const ARTIFACT_EXTENSION: &str = "json";
const REMOTE_INDEX: &str = "index.json";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("artifact `{name}` not found in remote store")]
    Miss { name: String },

    #[error("remote store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("artifact `{name}` is malformed: {reason}")]
    Malformed { name: String, reason: String },
}

impl RemoteError {
    pub fn is_miss(&self) -> bool {
        matches!(self, Self::Miss { .. })
    }

    fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }
}

/// Read-only source of precomputed dataset artifacts.
pub trait ArtifactStore: Send + Sync {
    /// Fetch the artifact for `name`.
    fn fetch(&self, name: &str) -> Result<DatasetPayload, RemoteError>;

    /// Names of every artifact the store currently offers.
    fn list_available(&self) -> Result<Vec<String>, RemoteError>;

    /// Human-readable location, for logs.
    fn describe(&self) -> String;
}

/// Artifacts published under an HTTP base URL (`{base}/{name}.json`, with
/// `{base}/index.json` listing the names).
#[derive(Debug, Clone)]
pub struct HttpArtifactStore {
    base_url: String,
    client: reqwest::blocking::Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl HttpArtifactStore {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::unavailable(format!("http client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            max_retries: 0,
            retry_delay: Duration::from_secs(1),
        })
    }

    /// Retry transient failures (transport errors, 5xx, 429) up to
    /// `max_retries` times, waiting `delay × attempt` in between.
    pub fn with_retries(mut self, max_retries: u32, delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = delay;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn artifact_url(&self, name: &str) -> String {
        format!("{}/{name}.{ARTIFACT_EXTENSION}", self.base_url)
    }

    fn get_bytes(&self, url: &str, name: &str) -> Result<Vec<u8>, RemoteError> {
        let mut last_error = String::new();
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let wait = self.retry_delay * attempt;
                tracing::debug!(url = %url, attempt, ?wait, "retrying remote request");
                thread::sleep(wait);
            }

            let response = match self.client.get(url).send() {
                Ok(response) => response,
                Err(err) => {
                    last_error = if err.is_timeout() {
                        format!("timed out requesting {url}")
                    } else {
                        format!("request to {url} failed: {err}")
                    };
                    continue;
                }
            };

            let status = response.status();
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(RemoteError::Miss {
                    name: name.to_string(),
                });
            }
            if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                last_error = format!("{url} returned HTTP {}", status.as_u16());
                continue;
            }
            if !status.is_success() {
                return Err(RemoteError::unavailable(format!(
                    "{url} returned HTTP {}",
                    status.as_u16()
                )));
            }

            return response
                .bytes()
                .map(|bytes| bytes.to_vec())
                .map_err(|e| RemoteError::unavailable(format!("reading {url}: {e}")));
        }

        Err(RemoteError::unavailable(last_error))
    }
}

impl ArtifactStore for HttpArtifactStore {
    fn fetch(&self, name: &str) -> Result<DatasetPayload, RemoteError> {
        let url = self.artifact_url(name);
        let bytes = self.get_bytes(&url, name)?;
        decode_payload(&bytes, CacheFormat::Json).map_err(|e| RemoteError::Malformed {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }

    fn list_available(&self) -> Result<Vec<String>, RemoteError> {
        let url = format!("{}/{REMOTE_INDEX}", self.base_url);
        let bytes = self.get_bytes(&url, REMOTE_INDEX).map_err(|err| match err {
            RemoteError::Miss { .. } => {
                RemoteError::unavailable(format!("{url} is missing; cannot list artifacts"))
            }
            other => other,
        })?;
        let mut names: Vec<String> =
            serde_json::from_slice(&bytes).map_err(|e| RemoteError::Malformed {
                name: REMOTE_INDEX.to_string(),
                reason: e.to_string(),
            })?;
        names.sort();
        names.dedup();
        Ok(names)
    }

    fn describe(&self) -> String {
        self.base_url.clone()
    }
}

/// Artifacts mirrored into a local directory as `{name}.json`.
#[derive(Debug, Clone)]
pub struct DirectoryArtifactStore {
    root: PathBuf,
}

impl DirectoryArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_root(&self) -> Result<(), RemoteError> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(RemoteError::unavailable(format!(
                "artifact directory {} does not exist",
                self.root.display()
            )))
        }
    }
}

impl ArtifactStore for DirectoryArtifactStore {
    fn fetch(&self, name: &str) -> Result<DatasetPayload, RemoteError> {
        self.ensure_root()?;
        let path = self.root.join(format!("{name}.{ARTIFACT_EXTENSION}"));
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(RemoteError::Miss {
                    name: name.to_string(),
                });
            }
            Err(err) => {
                return Err(RemoteError::unavailable(format!(
                    "{}: {err}",
                    path.display()
                )));
            }
        };
        decode_payload(&bytes, CacheFormat::Json).map_err(|e| RemoteError::Malformed {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }

    fn list_available(&self) -> Result<Vec<String>, RemoteError> {
        self.ensure_root()?;
        let entries = fs::read_dir(&self.root)
            .map_err(|e| RemoteError::unavailable(format!("{}: {e}", self.root.display())))?;

        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == ARTIFACT_EXTENSION))
            .filter(|path| path.file_name().is_some_and(|f| f != REMOTE_INDEX))
            .filter_map(|path| {
                path.file_stem()
                    .and_then(|stem| stem.to_str())
                    .map(ToOwned::to_owned)
            })
            .collect();
        names.sort();
        Ok(names)
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}
