//! Change detection between a fresh scan and the stored hierarchy.
//!
//! Files are compared by whole-file hash first; within a modified file,
//! entities are matched by identity `(kind, qualified_path)` and compared by
//! content hash.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::extract::{EntityDraft, FileExtraction};
use crate::hierarchy::{Entity, EntityId, Hierarchy, Identity, StaleReason};
use crate::Result;

/// The result of scanning and extracting the whole tree.
#[derive(Debug, Clone, Default)]
pub struct ScanSnapshot {
    /// Successfully extracted files, keyed by relative path.
    pub files: BTreeMap<String, FileExtraction>,
    /// Files that could not be extracted, with the reason. Their stored
    /// records are carried over untouched.
    pub skipped: BTreeMap<String, String>,
}

impl ScanSnapshot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, extraction: FileExtraction) {
        self.files.insert(extraction.path.clone(), extraction);
    }

    pub fn skip(&mut self, path: impl Into<String>, reason: impl Into<String>) {
        self.skipped.insert(path.into(), reason.into());
    }
}

/// Entity-level classification inside one modified file.
///
/// Draft indices refer to the file's [`FileExtraction::drafts`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityChanges {
    pub new_entities: Vec<usize>,
    pub changed_entities: Vec<(usize, EntityId)>,
    pub unchanged_entities: Vec<(usize, EntityId)>,
    pub vanished_entities: Vec<EntityId>,
}

/// File-level classification of a scan against the hierarchy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub added_files: BTreeSet<String>,
    pub deleted_files: BTreeSet<String>,
    pub modified_files: BTreeMap<String, EntityChanges>,
    pub unchanged_files: BTreeSet<String>,
    /// Draft-to-entity matches for unchanged, re-extracted files.
    carried: BTreeMap<String, Vec<(usize, EntityId)>>,
}

/// What applying a [`ChangeSet`] did to the hierarchy.
#[derive(Debug, Clone, Default)]
pub struct Applied {
    pub added: Vec<EntityId>,
    pub changed: Vec<EntityId>,
    /// Removed entities, with their last stored state.
    pub vanished: Vec<Entity>,
    /// Surviving entities that referenced a removed one.
    pub orphaned_callers: BTreeSet<EntityId>,
    /// Identifiers used by every entity of every extracted file.
    pub identifiers: HashMap<EntityId, BTreeSet<String>>,
}

impl Applied {
    /// Entities whose own source is new or different.
    #[must_use]
    pub fn direct_changes(&self) -> BTreeSet<EntityId> {
        self.added.iter().chain(self.changed.iter()).cloned().collect()
    }
}

type IdentityIndex<'h> = HashMap<Identity<'h>, EntityId>;

fn identity_index<'h>(previous: &'h Hierarchy, path: &str) -> IdentityIndex<'h> {
    previous
        .file_entities(path)
        .map(|e| (e.identity(), e.id.clone()))
        .collect()
}

fn match_drafts(previous: &Hierarchy, path: &str, drafts: &[EntityDraft]) -> EntityChanges {
    let mut index = identity_index(previous, path);
    let mut changes = EntityChanges::default();

    for (i, draft) in drafts.iter().enumerate() {
        match index.remove(&(draft.kind, draft.qualified_path.as_str())) {
            Some(id) => {
                let same = previous
                    .entity(&id)
                    .is_some_and(|e| e.content_hash == draft.content_hash);
                if same {
                    changes.unchanged_entities.push((i, id));
                } else {
                    changes.changed_entities.push((i, id));
                }
            }
            None => changes.new_entities.push(i),
        }
    }

    // Document order of the stored file keeps the vanished list deterministic.
    let leftover: BTreeSet<EntityId> = index.into_values().collect();
    changes.vanished_entities = previous
        .file_entities(path)
        .filter(|e| leftover.contains(&e.id))
        .map(|e| e.id.clone())
        .collect();
    changes
}

/// Classify `snapshot` against `previous`.
#[must_use]
pub fn diff(previous: &Hierarchy, snapshot: &ScanSnapshot) -> ChangeSet {
    let mut changes = ChangeSet::default();

    for (path, extraction) in &snapshot.files {
        match previous.file(path) {
            None => {
                changes.added_files.insert(path.clone());
            }
            Some(record) => {
                let entity_changes = match_drafts(previous, path, &extraction.drafts);
                let untouched = record.last_hash == extraction.file_hash
                    && entity_changes.new_entities.is_empty()
                    && entity_changes.changed_entities.is_empty()
                    && entity_changes.vanished_entities.is_empty();
                if untouched {
                    changes.unchanged_files.insert(path.clone());
                    changes
                        .carried
                        .insert(path.clone(), entity_changes.unchanged_entities);
                } else {
                    changes.modified_files.insert(path.clone(), entity_changes);
                }
            }
        }
    }

    for record in previous.files() {
        if snapshot.files.contains_key(&record.path) {
            continue;
        }
        if snapshot.skipped.contains_key(&record.path) {
            changes.unchanged_files.insert(record.path.clone());
        } else {
            changes.deleted_files.insert(record.path.clone());
        }
    }

    changes
}

impl ChangeSet {
    /// Whether the scan observed any change at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added_files.is_empty() && self.deleted_files.is_empty() && self.modified_files.is_empty()
    }

    /// Apply the classification to `hierarchy`.
    ///
    /// New entities are inserted as pending, changed entities get their new
    /// hash and turn pending while keeping their documentation, vanished
    /// entities and deleted files are removed with every edge touching them.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the change set does not belong to
    /// `snapshot`.
    pub fn apply(
        self,
        hierarchy: &mut Hierarchy,
        snapshot: &ScanSnapshot,
        marker: u64,
    ) -> Result<Applied> {
        let mut applied = Applied::default();

        for path in &self.deleted_files {
            let removed = hierarchy.remove_file(path);
            tracing::debug!(path = %path, entities = removed.len(), "File deleted");
            applied.vanished.extend(removed);
        }

        for path in &self.added_files {
            let extraction = lookup(snapshot, path)?;
            hierarchy.set_file_state(path, &extraction.file_hash, marker);
            let mut ids: Vec<EntityId> = Vec::with_capacity(extraction.drafts.len());
            for draft in &extraction.drafts {
                let id = insert_draft(hierarchy, path, draft, &ids)?;
                applied.identifiers.insert(id.clone(), draft.identifiers.clone());
                applied.added.push(id.clone());
                ids.push(id);
            }
            tracing::debug!(path = %path, entities = ids.len(), "File added");
        }

        for (path, changes) in self.modified_files {
            let extraction = lookup(snapshot, &path)?;
            hierarchy.set_file_state(&path, &extraction.file_hash, marker);

            for id in &changes.vanished_entities {
                if let Some(removed) = hierarchy.remove_entity(id) {
                    applied.vanished.push(removed);
                }
            }

            let mut ids: Vec<Option<EntityId>> = vec![None; extraction.drafts.len()];
            for (i, id) in &changes.unchanged_entities {
                let draft = &extraction.drafts[*i];
                hierarchy.set_span(id, draft.span);
                ids[*i] = Some(id.clone());
            }
            for (i, id) in &changes.changed_entities {
                let draft = &extraction.drafts[*i];
                hierarchy.update_source(id, draft.span, draft.content_hash.clone(), draft.code.clone());
                hierarchy.mark_stale(id, StaleReason::CodeChanged);
                applied.changed.push(id.clone());
                ids[*i] = Some(id.clone());
            }

            let mut ordered: Vec<EntityId> = Vec::with_capacity(ids.len());
            for (i, draft) in extraction.drafts.iter().enumerate() {
                let id = match ids[i].clone() {
                    Some(id) => {
                        let parent = parent_id(draft, &ordered);
                        hierarchy.set_parent(&id, parent);
                        id
                    }
                    None => {
                        let id = insert_draft(hierarchy, &path, draft, &ordered)?;
                        applied.added.push(id.clone());
                        id
                    }
                };
                applied.identifiers.insert(id.clone(), draft.identifiers.clone());
                ordered.push(id);
            }
            hierarchy.set_document_order(&path, &ordered);

            tracing::debug!(
                path = %path,
                new = changes.new_entities.len(),
                changed = changes.changed_entities.len(),
                unchanged = changes.unchanged_entities.len(),
                vanished = changes.vanished_entities.len(),
                "File modified"
            );
        }

        for (path, matches) in self.carried {
            let extraction = lookup(snapshot, &path)?;
            for (i, id) in matches {
                if let Some(draft) = extraction.drafts.get(i) {
                    applied.identifiers.insert(id, draft.identifiers.clone());
                }
            }
        }

        applied.orphaned_callers = applied
            .vanished
            .iter()
            .flat_map(|e| e.incoming_refs().iter())
            .filter(|id| hierarchy.entity(id).is_some())
            .cloned()
            .collect();

        Ok(applied)
    }
}

fn lookup<'s>(snapshot: &'s ScanSnapshot, path: &str) -> Result<&'s FileExtraction> {
    snapshot
        .files
        .get(path)
        .ok_or_else(|| crate::Error::internal(format!("no extraction for '{path}'")))
}

fn parent_id(draft: &EntityDraft, ids: &[EntityId]) -> Option<EntityId> {
    draft.parent.and_then(|p| ids.get(p).cloned())
}

fn insert_draft(
    hierarchy: &mut Hierarchy,
    path: &str,
    draft: &EntityDraft,
    ids: &[EntityId],
) -> Result<EntityId> {
    let mut entity = Entity::new(
        draft.kind,
        draft.name.clone(),
        draft.qualified_path.clone(),
        path,
        draft.span,
        draft.code.clone(),
    );
    entity.content_hash.clone_from(&draft.content_hash);
    entity.parent = parent_id(draft, ids);
    let id = entity.id.clone();
    hierarchy.add_entity(entity)?;
    Ok(id)
}
