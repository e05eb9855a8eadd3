//! # brdata-core
//!
//! Leaf crate for dataset access: what datasets exist, what shape their
//! payloads take, and which sub-table a request resolves to.
//!
//! This crate provides:
//! - `Registry` (immutable catalog of `DatasetDescriptor`s, parsed from TOML)
//! - `Table` and `DatasetPayload` (the `Single`/`Multi` payload variant)
//! - Table resolution (`resolve_requested` before I/O, `extract` after it)
//! - `CoreError`, the user-facing half of the error taxonomy
//!
//! Storage tiers live in `brdata-store`; orchestration lives in
//! `brdata-engine`.
//!
//! ## Request path
//!
//! ```text
//! Registry::lookup(name)          ← DatasetNotFound lists valid names
//!     │
//! resolve_requested(desc, table)  ← TableNotFound lists valid tables
//!     │
//! (tiers: cache / remote / fetch)
//!     │
//! extract(desc, payload, table)   ← same filter for every tier
//! ```

pub mod error;
pub mod registry;
pub mod resolve;
pub mod table;

pub use error::CoreError;
pub use registry::{
    DatasetDescriptor, DatasetFilter, REGISTRY_SCHEMA, Registry, RegistryError, TableDescriptor,
    UpdateFrequency,
};
pub use resolve::{ResolvedTable, declared_shape, extract, resolve_requested, table_note};
pub use table::{DATE_COLUMN, DatasetPayload, DateRange, PayloadShape, Table, TableError};
