//! Data models for the entity hierarchy.
//!
//! This module defines the core data structures used for:
//! - Documentable entities and their identity
//! - Per-file bookkeeping
//! - Generation status and staleness reasons

use std::collections::BTreeSet;
use std::fmt;

use blake3::Hasher;
use serde::{Deserialize, Serialize};

/// Stable entity identifier. Persists for as long as the entity's identity does.
pub type EntityId = String;

/// Generate a fresh entity identifier.
#[must_use]
pub fn new_entity_id() -> EntityId {
    uuid::Uuid::new_v4().to_string()
}

/// Compute the blake3 hash of a source span.
#[must_use]
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize().to_hex().to_string()
}

/// Kind of documentable entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Module,
    Class,
    Function,
    Method,
}

impl EntityKind {
    /// Lowercase name used in logs and persisted records.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Module => "module",
            Self::Class => "class",
            Self::Function => "function",
            Self::Method => "method",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generation state of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    /// Documentation is missing or out of date and waits for a job.
    Pending,
    /// A generation job is running.
    InProgress,
    /// Documentation reflects the current source.
    Done,
    /// Generation exhausted its retries during the last run.
    Failed,
}

impl EntityStatus {
    /// Whether the status ends a run for this entity.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Why an entity's documentation is considered stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleReason {
    /// Never generated.
    NotGenerated,
    /// The entity's own source changed.
    CodeChanged,
    /// Something the entity references changed, vanished, or was re-linked.
    DependencyChanged,
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotGenerated => "not generated",
            Self::CodeChanged => "code changed",
            Self::DependencyChanged => "dependency changed",
        })
    }
}

/// Byte and line extent of an entity in its file. Lines are 1-based, inclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start_byte: usize,
    pub end_byte: usize,
    pub start_line: usize,
    pub end_line: usize,
}

/// Identity of an entity within its file.
pub type Identity<'a> = (EntityKind, &'a str);

/// A documentable code entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub name: String,
    pub qualified_path: String,
    pub file_path: String,
    pub parent: Option<EntityId>,
    pub span: Span,
    pub content_hash: String,
    pub code: String,
    pub(super) docs: Vec<String>,
    pub(super) outgoing_refs: BTreeSet<EntityId>,
    pub(super) incoming_refs: BTreeSet<EntityId>,
    pub(super) status: EntityStatus,
    pub(super) stale_reason: Option<StaleReason>,
}

impl Entity {
    /// Create a never-documented entity with a fresh id.
    #[must_use]
    pub fn new(
        kind: EntityKind,
        name: impl Into<String>,
        qualified_path: impl Into<String>,
        file_path: impl Into<String>,
        span: Span,
        code: impl Into<String>,
    ) -> Self {
        let code = code.into();
        Self {
            id: new_entity_id(),
            kind,
            name: name.into(),
            qualified_path: qualified_path.into(),
            file_path: file_path.into(),
            parent: None,
            span,
            content_hash: content_hash(code.as_bytes()),
            code,
            docs: Vec::new(),
            outgoing_refs: BTreeSet::new(),
            incoming_refs: BTreeSet::new(),
            status: EntityStatus::Pending,
            stale_reason: Some(StaleReason::NotGenerated),
        }
    }

    /// Rebuild an entity from persisted parts.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub(super) fn restore(
        id: EntityId,
        kind: EntityKind,
        name: String,
        qualified_path: String,
        file_path: String,
        parent: Option<EntityId>,
        span: Span,
        content_hash: String,
        code: String,
        docs: Vec<String>,
        outgoing_refs: BTreeSet<EntityId>,
        incoming_refs: BTreeSet<EntityId>,
        status: EntityStatus,
        stale_reason: Option<StaleReason>,
    ) -> Self {
        Self {
            id,
            kind,
            name,
            qualified_path,
            file_path,
            parent,
            span,
            content_hash,
            code,
            docs,
            outgoing_refs,
            incoming_refs,
            status,
            stale_reason,
        }
    }

    /// Identity used to match the entity across scans.
    #[must_use]
    pub fn identity(&self) -> Identity<'_> {
        (self.kind, &self.qualified_path)
    }

    /// Latest documentation revision, if any.
    #[must_use]
    pub fn doc_text(&self) -> Option<&str> {
        self.docs.last().map(String::as_str)
    }

    /// All stored documentation revisions, oldest first.
    #[must_use]
    pub fn doc_revisions(&self) -> &[String] {
        &self.docs
    }

    /// Entities this one references.
    #[must_use]
    pub const fn outgoing_refs(&self) -> &BTreeSet<EntityId> {
        &self.outgoing_refs
    }

    /// Entities referencing this one.
    #[must_use]
    pub const fn incoming_refs(&self) -> &BTreeSet<EntityId> {
        &self.incoming_refs
    }

    #[must_use]
    pub const fn status(&self) -> EntityStatus {
        self.status
    }

    #[must_use]
    pub const fn stale_reason(&self) -> Option<StaleReason> {
        self.stale_reason
    }

    /// Whether the stored documentation no longer reflects the source.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.status != EntityStatus::Done
    }
}

/// Per-file bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Path relative to the repository root, `/`-separated.
    pub path: String,
    /// Owned entities in document order.
    pub owned_entity_ids: Vec<EntityId>,
    /// Hash of the whole file at the last scan.
    pub last_hash: String,
    /// Run sequence at which `last_hash` was first observed.
    pub last_seen_marker: u64,
}

impl FileRecord {
    /// Create a new file record.
    #[must_use]
    pub fn new(path: impl Into<String>, last_hash: impl Into<String>, marker: u64) -> Self {
        Self {
            path: path.into(),
            owned_entity_ids: Vec::new(),
            last_hash: last_hash.into(),
            last_seen_marker: marker,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash() {
        let hash1 = content_hash(b"def foo(): pass");
        let hash2 = content_hash(b"def foo(): pass");
        let hash3 = content_hash(b"def foo(): return 1");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_new_entity_is_pending() {
        let entity = Entity::new(
            EntityKind::Function,
            "foo",
            "a.py::foo",
            "a.py",
            Span::default(),
            "def foo(): pass",
        );
        assert_eq!(entity.status(), EntityStatus::Pending);
        assert_eq!(entity.stale_reason(), Some(StaleReason::NotGenerated));
        assert!(entity.is_stale());
        assert!(entity.doc_text().is_none());
        assert_eq!(entity.content_hash, content_hash(b"def foo(): pass"));
        assert_eq!(entity.identity(), (EntityKind::Function, "a.py::foo"));
    }

    #[test]
    fn test_entity_ids_are_unique() {
        assert_ne!(new_entity_id(), new_entity_id());
    }

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_string(&EntityKind::Method).unwrap();
        assert_eq!(json, "\"method\"");
        let status: EntityStatus = serde_json::from_str("\"in_progress\"").unwrap();
        assert_eq!(status, EntityStatus::InProgress);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(EntityStatus::Done.is_terminal());
        assert!(EntityStatus::Failed.is_terminal());
        assert!(!EntityStatus::Pending.is_terminal());
        assert!(!EntityStatus::InProgress.is_terminal());
    }
}
