//! Dataset registry: the immutable catalog every request is checked against.
//!
//! The registry is parsed once from a TOML resource and never mutated.
//! Reloading means building a new `Registry` and handing it to whoever
//! needs it.

use crate::error::CoreError;
use chrono::Duration;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;

pub const REGISTRY_SCHEMA: u32 = 1;

const BUILTIN_REGISTRY: &str = include_str!("../registry/datasets.toml");
const NAME_PATTERN: &str = r"^[a-z][a-z0-9_]*$";

/// How often the upstream source publishes new data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateFrequency {
    Weekly,
    Monthly,
    Manual,
}

impl UpdateFrequency {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Manual => "manual",
        }
    }

    /// Nominal publication period. `Manual` datasets have none.
    pub fn period(self) -> Option<Duration> {
        match self {
            Self::Weekly => Some(Duration::days(7)),
            Self::Monthly => Some(Duration::days(30)),
            Self::Manual => None,
        }
    }

    /// Default cache staleness threshold: twice the publication period.
    pub fn stale_threshold(self) -> Option<Duration> {
        self.period().map(|period| period * 2)
    }
}

impl Display for UpdateFrequency {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdateFrequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "manual" => Ok(Self::Manual),
            other => Err(format!(
                "unknown update frequency `{other}` (expected weekly, monthly, or manual)"
            )),
        }
    }
}

/// One sub-table of a multi-table dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, rename = "default")]
    pub is_default: bool,
}

/// Registry entry for one dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    pub name: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Publishing organization.
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub geography: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default, rename = "table")]
    pub tables: Vec<TableDescriptor>,
    pub update_frequency: UpdateFrequency,
    pub fetch_binding: String,
}

impl DatasetDescriptor {
    pub fn is_multi_table(&self) -> bool {
        !self.tables.is_empty()
    }

    pub fn default_table(&self) -> Option<&TableDescriptor> {
        self.tables.iter().find(|t| t.is_default)
    }

    pub fn table(&self, key: &str) -> Option<&TableDescriptor> {
        self.tables.iter().find(|t| t.key == key)
    }

    /// Table keys in registry order.
    pub fn table_keys(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.key.clone()).collect()
    }
}

/// Free-form attribute filter for `Registry::list`.
///
/// Each set field must appear (case-insensitive substring) in the matching
/// descriptor attribute. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetFilter {
    pub source: Option<String>,
    pub geography: Option<String>,
    pub category: Option<String>,
}

impl DatasetFilter {
    pub fn matches(&self, descriptor: &DatasetDescriptor) -> bool {
        fn contains(haystack: &str, needle: &str) -> bool {
            haystack.to_lowercase().contains(&needle.to_lowercase())
        }

        self.source
            .as_deref()
            .is_none_or(|s| contains(&descriptor.source, s))
            && self
                .geography
                .as_deref()
                .is_none_or(|g| contains(&descriptor.geography, g))
            && self
                .category
                .as_deref()
                .is_none_or(|c| descriptor.categories.iter().any(|cat| contains(cat, c)))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("failed to read registry {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid registry toml at {path}: {source}")]
    ParseToml {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("unsupported registry schema {actual} (expected {expected})", expected = REGISTRY_SCHEMA)]
    Schema { actual: u32 },

    #[error("invalid registry: {}", .issues.join("; "))]
    Invalid { issues: Vec<String> },
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default = "default_schema")]
    schema: u32,
    #[serde(default, rename = "dataset")]
    datasets: Vec<DatasetDescriptor>,
}

fn default_schema() -> u32 {
    REGISTRY_SCHEMA
}

/// Immutable catalog of dataset descriptors.
#[derive(Debug, Clone)]
pub struct Registry {
    datasets: Vec<DatasetDescriptor>,
    index: BTreeMap<String, usize>,
}

impl Registry {
    /// Build a registry from descriptors, validating every invariant.
    ///
    /// All problems are collected before failing so one load reports the
    /// whole set.
    pub fn from_descriptors(datasets: Vec<DatasetDescriptor>) -> Result<Self, RegistryError> {
        let issues = validate(&datasets);
        if !issues.is_empty() {
            return Err(RegistryError::Invalid { issues });
        }

        let index = datasets
            .iter()
            .enumerate()
            .map(|(i, d)| (d.name.clone(), i))
            .collect();
        Ok(Self { datasets, index })
    }

    pub fn from_toml_str(text: &str) -> Result<Self, RegistryError> {
        Self::parse(text, "<inline>")
    }

    /// Load a registry resource from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| RegistryError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text, &path.display().to_string())
    }

    /// The catalog compiled into the crate.
    pub fn builtin() -> Result<Self, RegistryError> {
        Self::parse(BUILTIN_REGISTRY, "<builtin>")
    }

    fn parse(text: &str, origin: &str) -> Result<Self, RegistryError> {
        let file: RegistryFile =
            toml::from_str(text).map_err(|source| RegistryError::ParseToml {
                path: origin.to_string(),
                source,
            })?;
        if file.schema != REGISTRY_SCHEMA {
            return Err(RegistryError::Schema {
                actual: file.schema,
            });
        }
        Self::from_descriptors(file.datasets)
    }

    /// Lookup one dataset by exact name.
    pub fn lookup(&self, name: &str) -> Result<&DatasetDescriptor, CoreError> {
        self.get(name).ok_or_else(|| CoreError::DatasetNotFound {
            name: name.to_string(),
            valid: self.names(),
        })
    }

    pub fn get(&self, name: &str) -> Option<&DatasetDescriptor> {
        self.index.get(name).map(|&i| &self.datasets[i])
    }

    /// Descriptors matching `filter`, in registry order.
    pub fn list(&self, filter: &DatasetFilter) -> Vec<&DatasetDescriptor> {
        self.datasets.iter().filter(|d| filter.matches(d)).collect()
    }

    /// All dataset names in registry order.
    pub fn names(&self) -> Vec<String> {
        self.datasets.iter().map(|d| d.name.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DatasetDescriptor> {
        self.datasets.iter()
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(NAME_PATTERN).expect("dataset name pattern is valid"))
}

fn validate(datasets: &[DatasetDescriptor]) -> Vec<String> {
    let mut issues = Vec::new();
    let mut seen = BTreeSet::new();

    for dataset in datasets {
        let name = &dataset.name;
        if !name_pattern().is_match(name) {
            issues.push(format!("dataset name `{name}` must match {NAME_PATTERN}"));
        }
        if !seen.insert(name.as_str()) {
            issues.push(format!("dataset `{name}` is registered more than once"));
        }
        if dataset.fetch_binding.trim().is_empty() {
            issues.push(format!("dataset `{name}` has an empty fetch_binding"));
        }

        if dataset.tables.is_empty() {
            continue;
        }
        let mut keys = BTreeSet::new();
        for table in &dataset.tables {
            if table.key.trim().is_empty() {
                issues.push(format!("dataset `{name}` has a table with an empty key"));
            }
            if !keys.insert(table.key.as_str()) {
                issues.push(format!("dataset `{name}` repeats table `{}`", table.key));
            }
        }
        let defaults = dataset.tables.iter().filter(|t| t.is_default).count();
        if defaults != 1 {
            issues.push(format!(
                "dataset `{name}` must mark exactly one default table (found {defaults})"
            ));
        }
    }

    issues
}
