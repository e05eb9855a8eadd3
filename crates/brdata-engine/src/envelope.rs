//! Result envelope: the served table plus provenance.

use crate::source::Tier;
use brdata_core::Table;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// What happened when one tier was tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Hit,
    Miss,
    Stale,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierAttempt {
    pub tier: Tier,
    pub outcome: AttemptOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeInfo {
    pub dataset: String,
    pub resolved_table: Option<String>,
    pub is_default_table: bool,
    /// Every tier tried, in order, ending with the one that served the data.
    pub attempts: Vec<TierAttempt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMetadata {
    pub source: Tier,
    pub fetched_at: DateTime<Utc>,
    pub info: EnvelopeInfo,
}

/// A successful `get_dataset` result. Built per call, never cached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultEnvelope {
    pub table: Table,
    pub metadata: EnvelopeMetadata,
}

impl ResultEnvelope {
    pub fn source(&self) -> Tier {
        self.metadata.source
    }

    pub fn note(&self) -> Option<&str> {
        self.metadata.info.note.as_deref()
    }
}
