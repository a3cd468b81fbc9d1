//! The entity hierarchy: the system's source of truth.
//!
//! - [`models`]: entities, file records, statuses
//! - [`graph`]: the in-memory [`Hierarchy`] and its reference-edge bookkeeping
//! - [`persist`]: the on-disk [`HierarchyStore`]
//! - [`lookup`]: first-match name search over a persisted document

pub mod graph;
pub mod lookup;
pub mod models;
pub mod persist;

pub use graph::Hierarchy;
pub use lookup::find;
pub use models::{
    content_hash, Entity, EntityId, EntityKind, EntityStatus, FileRecord, Identity, Span,
    StaleReason,
};
pub use persist::{
    DeletedItem, EntityRecord, FileMeta, HierarchyStore, MetaInfo, HIERARCHY_FILE, META_FILE,
    SCHEMA_VERSION,
};
