//! Table resolution around the storage tiers.
//!
//! `resolve_requested` runs before any I/O so an invalid request fails
//! without touching disk or network. `extract` runs after whichever tier
//! produced a payload, so cached and freshly fetched payloads are filtered
//! the same way.

use crate::error::CoreError;
use crate::registry::DatasetDescriptor;
use crate::table::{DatasetPayload, PayloadShape, Table};
use serde::{Deserialize, Serialize};

/// Outcome of validating a requested table against the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolvedTable {
    /// Single-table dataset; no sub-table applies.
    NotApplicable,
    Table { key: String, is_default: bool },
}

impl ResolvedTable {
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::NotApplicable => None,
            Self::Table { key, .. } => Some(key),
        }
    }

    pub fn is_default(&self) -> bool {
        matches!(self, Self::Table { is_default: true, .. })
    }
}

/// Validate `requested` against `descriptor` and pick the table to serve.
pub fn resolve_requested(
    descriptor: &DatasetDescriptor,
    requested: Option<&str>,
) -> Result<ResolvedTable, CoreError> {
    if !descriptor.is_multi_table() {
        if let Some(requested) = requested {
            tracing::warn!(
                dataset = %descriptor.name,
                table = %requested,
                "dataset has a single table; ignoring requested table"
            );
        }
        return Ok(ResolvedTable::NotApplicable);
    }

    let default_key = descriptor
        .default_table()
        .map(|t| t.key.as_str())
        .ok_or_else(|| CoreError::NoDefaultTable {
            dataset: descriptor.name.clone(),
            valid: descriptor.table_keys(),
        })?;

    match requested {
        None => Ok(ResolvedTable::Table {
            key: default_key.to_string(),
            is_default: true,
        }),
        Some(key) if descriptor.table(key).is_some() => Ok(ResolvedTable::Table {
            key: key.to_string(),
            is_default: key == default_key,
        }),
        Some(key) => Err(CoreError::TableNotFound {
            dataset: descriptor.name.clone(),
            requested: key.to_string(),
            valid: descriptor.table_keys(),
        }),
    }
}

/// Pull the resolved table out of a payload.
///
/// A `Multi` payload missing the expected key is reported as
/// `TableNotFound` listing the keys the payload actually carries: the fetch
/// implementation dropped a table it is registered to provide.
pub fn extract(
    descriptor: &DatasetDescriptor,
    payload: DatasetPayload,
    resolved: &ResolvedTable,
) -> Result<Table, CoreError> {
    match (payload, resolved) {
        (DatasetPayload::Single(table), ResolvedTable::NotApplicable) => Ok(table),
        (DatasetPayload::Multi(mut tables), ResolvedTable::Table { key, .. }) => {
            tables.remove(key).ok_or_else(|| CoreError::TableNotFound {
                dataset: descriptor.name.clone(),
                requested: key.clone(),
                valid: tables.keys().cloned().collect(),
            })
        }
        (payload, resolved) => Err(CoreError::PayloadShape {
            dataset: descriptor.name.clone(),
            expected: expected_shape(resolved),
            actual: payload.shape(),
        }),
    }
}

/// Payload shape the registry declares for `descriptor`.
pub fn declared_shape(descriptor: &DatasetDescriptor) -> PayloadShape {
    if descriptor.is_multi_table() {
        PayloadShape::Multi
    } else {
        PayloadShape::Single
    }
}

fn expected_shape(resolved: &ResolvedTable) -> PayloadShape {
    match resolved {
        ResolvedTable::NotApplicable => PayloadShape::Single,
        ResolvedTable::Table { .. } => PayloadShape::Multi,
    }
}

/// Informational note for a multi-table result, naming the served table and
/// every table the dataset offers.
pub fn table_note(descriptor: &DatasetDescriptor, resolved: &ResolvedTable) -> Option<String> {
    let key = resolved.key()?;
    let suffix = if resolved.is_default() { " (default)" } else { "" };
    Some(format!(
        "Retrieved table '{key}'{suffix} from '{}'. Available tables: {}",
        descriptor.name,
        descriptor.table_keys().join(", ")
    ))
}
