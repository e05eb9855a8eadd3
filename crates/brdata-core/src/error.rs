//! User-facing errors for dataset and table resolution.

use crate::table::{PayloadShape, TableError};

/// Errors raised while resolving a dataset request against the registry.
///
/// Every variant a caller can trigger by mistake carries the valid set of
/// names so the message is actionable on its own.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    /// The requested dataset is not in the registry.
    #[error("dataset `{name}` not found; available datasets: {}", .valid.join(", "))]
    DatasetNotFound { name: String, valid: Vec<String> },

    /// The requested table is not part of the dataset.
    #[error(
        "table `{requested}` not found in dataset `{dataset}`; available tables: {}",
        .valid.join(", ")
    )]
    TableNotFound {
        dataset: String,
        requested: String,
        valid: Vec<String>,
    },

    /// A multi-table dataset was registered without a default table.
    #[error("dataset `{dataset}` has tables but none is marked default; available tables: {}", .valid.join(", "))]
    NoDefaultTable { dataset: String, valid: Vec<String> },

    /// A payload did not have the shape the registry declares.
    #[error("dataset `{dataset}` expected a {expected} payload, got {actual}")]
    PayloadShape {
        dataset: String,
        expected: PayloadShape,
        actual: PayloadShape,
    },

    #[error(transparent)]
    Table(#[from] TableError),
}

impl CoreError {
    /// Valid alternatives a caller can pick from, when the error has any.
    pub fn suggestions(&self) -> &[String] {
        match self {
            Self::DatasetNotFound { valid, .. }
            | Self::TableNotFound { valid, .. }
            | Self::NoDefaultTable { valid, .. } => valid,
            Self::PayloadShape { .. } | Self::Table(_) => &[],
        }
    }
}
