//! On-disk hierarchy store.
//!
//! Two pretty-printed JSON documents live in the store directory:
//! `project_hierarchy.json` (entity records keyed by file path) and
//! `meta-info.json` (run bookkeeping). Keys are emitted sorted and nothing
//! time-dependent is written, so an unchanged hierarchy saves byte-identically.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::graph::Hierarchy;
use super::models::{Entity, EntityId, EntityKind, EntityStatus, FileRecord, Span, StaleReason};
use crate::error::StoreError;
use crate::Result;

/// Entity records file name.
pub const HIERARCHY_FILE: &str = "project_hierarchy.json";

/// Run bookkeeping file name.
pub const META_FILE: &str = "meta-info.json";

/// Current persisted schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// One persisted entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntityRecord {
    pub id: EntityId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntityKind,
    pub qualified_path: String,
    pub parent: Option<EntityId>,
    pub code_start_line: usize,
    pub code_end_line: usize,
    pub start_byte: usize,
    pub end_byte: usize,
    pub hash: String,
    pub code_content: String,
    pub doc: Vec<String>,
    pub item_status: EntityStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale_reason: Option<StaleReason>,
    pub reference_who: Vec<EntityId>,
    pub who_reference_me: Vec<EntityId>,
}

impl EntityRecord {
    fn from_entity(entity: &Entity) -> Self {
        let item_status = match entity.status {
            EntityStatus::InProgress => EntityStatus::Pending,
            other => other,
        };
        Self {
            id: entity.id.clone(),
            name: entity.name.clone(),
            kind: entity.kind,
            qualified_path: entity.qualified_path.clone(),
            parent: entity.parent.clone(),
            code_start_line: entity.span.start_line,
            code_end_line: entity.span.end_line,
            start_byte: entity.span.start_byte,
            end_byte: entity.span.end_byte,
            hash: entity.content_hash.clone(),
            code_content: entity.code.clone(),
            doc: entity.docs.clone(),
            item_status,
            stale_reason: entity.stale_reason,
            reference_who: entity.outgoing_refs.iter().cloned().collect(),
            who_reference_me: entity.incoming_refs.iter().cloned().collect(),
        }
    }

    fn into_entity(self, file_path: &str) -> Entity {
        Entity::restore(
            self.id,
            self.kind,
            self.name,
            self.qualified_path,
            file_path.to_string(),
            self.parent,
            Span {
                start_byte: self.start_byte,
                end_byte: self.end_byte,
                start_line: self.code_start_line,
                end_line: self.code_end_line,
            },
            self.hash,
            self.code_content,
            self.doc,
            self.reference_who.into_iter().collect(),
            self.who_reference_me.into_iter().collect(),
            self.item_status,
            self.stale_reason,
        )
    }
}

/// Per-file bookkeeping stored in the meta document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub last_hash: String,
    pub last_seen_marker: u64,
}

/// An entity removed during the last run that observed changes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeletedItem {
    pub qualified_path: String,
    #[serde(rename = "type")]
    pub kind: EntityKind,
}

/// Run-level metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaInfo {
    pub schema_version: u32,
    /// VCS head at the end of the last complete run, or empty.
    pub doc_version: String,
    /// Set while a run has stale entities left to generate.
    pub in_generation_process: bool,
    /// Advances once per run that observed a change.
    pub run_sequence: u64,
    pub files: BTreeMap<String, FileMeta>,
    pub deleted_items_from_older_meta: Vec<DeletedItem>,
}

impl Default for MetaInfo {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            doc_version: String::new(),
            in_generation_process: false,
            run_sequence: 0,
            files: BTreeMap::new(),
            deleted_items_from_older_meta: Vec::new(),
        }
    }
}

/// Build the persisted document: file path to entity records in document order.
#[must_use]
pub fn to_document(hierarchy: &Hierarchy) -> BTreeMap<String, Vec<EntityRecord>> {
    hierarchy
        .files()
        .map(|record| {
            let entities = hierarchy
                .file_entities(&record.path)
                .map(EntityRecord::from_entity)
                .collect();
            (record.path.clone(), entities)
        })
        .collect()
}

/// Reader and writer for a hierarchy store directory.
#[derive(Debug, Clone)]
pub struct HierarchyStore {
    dir: PathBuf,
}

impl HierarchyStore {
    /// Create a store handle for `dir`. Nothing is touched until load or save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn hierarchy_file(&self) -> PathBuf {
        self.dir.join(HIERARCHY_FILE)
    }

    #[must_use]
    pub fn meta_file(&self) -> PathBuf {
        self.dir.join(META_FILE)
    }

    /// Whether a previous run left a store behind.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.hierarchy_file().is_file() || self.meta_file().is_file()
    }

    /// Load the hierarchy and its metadata.
    ///
    /// A store that was never written loads as an empty hierarchy.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if either document is unreadable, written by
    /// another schema version, or inconsistent (dangling ids, asymmetric
    /// edges, files listed in only one document).
    pub fn load(&self) -> Result<(Hierarchy, MetaInfo)> {
        let hierarchy_path = self.hierarchy_file();
        let meta_path = self.meta_file();
        let text = read_optional(&hierarchy_path)?;
        let meta_text = read_optional(&meta_path)?;

        let (text, meta_text) = match (text, meta_text) {
            (None, None) => return Ok((Hierarchy::new(), MetaInfo::default())),
            (Some(_), None) => {
                return Err(self.corrupted(format!("{META_FILE} is missing")).into());
            }
            (None, Some(_)) => {
                return Err(self.corrupted(format!("{HIERARCHY_FILE} is missing")).into());
            }
            (Some(text), Some(meta_text)) => (text, meta_text),
        };

        let meta: MetaInfo = serde_json::from_str(&meta_text)
            .map_err(|e| self.corrupted(format!("{META_FILE}: {e}")))?;
        if meta.schema_version != SCHEMA_VERSION {
            return Err(StoreError::SchemaMismatch {
                found: meta.schema_version,
                expected: SCHEMA_VERSION,
            }
            .into());
        }

        let document: BTreeMap<String, Vec<EntityRecord>> = serde_json::from_str(&text)
            .map_err(|e| self.corrupted(format!("{HIERARCHY_FILE}: {e}")))?;

        let hierarchy = self.rebuild(document, &meta)?;
        tracing::debug!(
            dir = %self.dir.display(),
            files = hierarchy.file_count(),
            entities = hierarchy.entity_count(),
            "Loaded hierarchy"
        );
        Ok((hierarchy, meta))
    }

    fn rebuild(
        &self,
        document: BTreeMap<String, Vec<EntityRecord>>,
        meta: &MetaInfo,
    ) -> Result<Hierarchy> {
        let listed: BTreeSet<&String> = document.keys().collect();
        let tracked: BTreeSet<&String> = meta.files.keys().collect();
        if let Some(path) = listed.symmetric_difference(&tracked).next() {
            return Err(self
                .corrupted(format!("file '{path}' is listed in only one document"))
                .into());
        }

        let mut files = BTreeMap::new();
        let mut entities = HashMap::new();
        for (path, records) in document {
            let file_meta = meta
                .files
                .get(&path)
                .ok_or_else(|| self.corrupted(format!("file '{path}' has no metadata")))?;
            let mut record = FileRecord::new(
                path.clone(),
                file_meta.last_hash.clone(),
                file_meta.last_seen_marker,
            );
            for entity_record in records {
                let entity = entity_record.into_entity(&path);
                record.owned_entity_ids.push(entity.id.clone());
                if entities.insert(entity.id.clone(), entity).is_some() {
                    return Err(self.corrupted("duplicate entity id").into());
                }
            }
            files.insert(path, record);
        }

        let hierarchy = Hierarchy { files, entities };
        hierarchy
            .check_invariants()
            .map_err(|reason| self.corrupted(reason))?;
        Ok(hierarchy)
    }

    /// Persist the hierarchy and its metadata.
    ///
    /// `meta.files` is rebuilt from the hierarchy's file records.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Write`] if either document cannot be written.
    pub fn save(&self, hierarchy: &Hierarchy, meta: &MetaInfo) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| write_error(&self.dir, &e))?;

        let mut meta = meta.clone();
        meta.schema_version = SCHEMA_VERSION;
        meta.files = hierarchy
            .files()
            .map(|record| {
                (
                    record.path.clone(),
                    FileMeta {
                        last_hash: record.last_hash.clone(),
                        last_seen_marker: record.last_seen_marker,
                    },
                )
            })
            .collect();

        let hierarchy_json = render(&to_document(hierarchy))?;
        let meta_json = render(&meta)?;

        let hierarchy_path = self.hierarchy_file();
        atomic_write(&hierarchy_path, hierarchy_json.as_bytes())
            .map_err(|e| write_error(&hierarchy_path, &e))?;
        let meta_path = self.meta_file();
        atomic_write(&meta_path, meta_json.as_bytes())
            .map_err(|e| write_error(&meta_path, &e))?;

        tracing::debug!(
            dir = %self.dir.display(),
            entities = hierarchy.entity_count(),
            "Saved hierarchy"
        );
        Ok(())
    }

    /// Read the raw entity document for external queries.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupted`] if the document exists but is not JSON.
    pub fn load_document(&self) -> Result<Option<serde_json::Value>> {
        let path = self.hierarchy_file();
        let Some(text) = read_optional(&path)? else {
            return Ok(None);
        };
        let value = serde_json::from_str(&text)
            .map_err(|e| self.corrupted(format!("{HIERARCHY_FILE}: {e}")))?;
        Ok(Some(value))
    }

    fn corrupted(&self, reason: impl Into<String>) -> StoreError {
        StoreError::corrupted(self.dir.display().to_string(), reason)
    }

}

fn write_error(path: &Path, err: &io::Error) -> StoreError {
    StoreError::Write {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::corrupted(path.display().to_string(), e.to_string()).into()),
    }
}

/// Serialize through `serde_json::Value` so object keys come out sorted.
fn render<T: Serialize>(value: &T) -> Result<String> {
    let value = serde_json::to_value(value)
        .map_err(|e| crate::Error::internal(format!("failed to serialize hierarchy: {e}")))?;
    let mut text = serde_json::to_string_pretty(&value)
        .map_err(|e| crate::Error::internal(format!("failed to serialize hierarchy: {e}")))?;
    text.push('\n');
    Ok(text)
}

/// Write via a sibling temp file and rename so readers never see a partial document.
fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let temp_path = path.with_file_name(format!(
        ".{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id()
    ));
    fs::write(&temp_path, content)?;
    fs::rename(&temp_path, path)
}
