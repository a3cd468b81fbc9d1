//! In-memory hierarchy: file records, entities, and the reference graph.
//!
//! All edge mutation goes through [`Hierarchy`] so that `incoming_refs` stays
//! the exact mirror of `outgoing_refs`.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::models::{Entity, EntityId, EntityStatus, FileRecord, Span, StaleReason};
use crate::{Error, Result};

/// The entity graph plus per-file bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hierarchy {
    pub(super) files: BTreeMap<String, FileRecord>,
    pub(super) entities: HashMap<EntityId, Entity>,
}

impl Hierarchy {
    /// Create an empty hierarchy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// File records ordered by path.
    pub fn files(&self) -> impl Iterator<Item = &FileRecord> {
        self.files.values()
    }

    #[must_use]
    pub fn file(&self, path: &str) -> Option<&FileRecord> {
        self.files.get(path)
    }

    #[must_use]
    pub fn entity(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    /// All entities, in no particular order.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// Entities owned by `path`, in document order.
    pub fn file_entities<'a>(&'a self, path: &str) -> impl Iterator<Item = &'a Entity> + 'a {
        self.files
            .get(path)
            .into_iter()
            .flat_map(|record| record.owned_entity_ids.iter())
            .filter_map(|id| self.entities.get(id))
    }

    /// Ids of every entity whose documentation is not up to date.
    #[must_use]
    pub fn stale_ids(&self) -> BTreeSet<EntityId> {
        self.entities
            .values()
            .filter(|e| e.is_stale())
            .map(|e| e.id.clone())
            .collect()
    }

    /// Create or update the record for `path`, keeping its owned entities.
    pub fn set_file_state(&mut self, path: &str, last_hash: &str, marker: u64) {
        match self.files.get_mut(path) {
            Some(record) => {
                if record.last_hash != last_hash {
                    record.last_hash = last_hash.to_string();
                    record.last_seen_marker = marker;
                }
            }
            None => {
                self.files
                    .insert(path.to_string(), FileRecord::new(path, last_hash, marker));
            }
        }
    }

    /// Add a freshly discovered entity to its (existing) file record.
    ///
    /// Edges are never carried in; they are established by the resolver.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the owning file has no record.
    pub fn add_entity(&mut self, mut entity: Entity) -> Result<()> {
        let record = self.files.get_mut(&entity.file_path).ok_or_else(|| {
            Error::internal(format!(
                "entity '{}' added before its file record",
                entity.qualified_path
            ))
        })?;
        entity.outgoing_refs.clear();
        entity.incoming_refs.clear();
        record.owned_entity_ids.push(entity.id.clone());
        self.entities.insert(entity.id.clone(), entity);
        Ok(())
    }

    /// Replace the document order of a file's owned entities.
    ///
    /// Ids not owned by the file are ignored.
    pub fn set_document_order(&mut self, path: &str, order: &[EntityId]) {
        if let Some(record) = self.files.get_mut(path) {
            let owned: BTreeSet<&EntityId> = record.owned_entity_ids.iter().collect();
            let reordered: Vec<EntityId> = order
                .iter()
                .filter(|id| owned.contains(id))
                .cloned()
                .collect();
            if reordered.len() == record.owned_entity_ids.len() {
                record.owned_entity_ids = reordered;
            }
        }
    }

    /// Delete a file record together with every entity it owns.
    ///
    /// Parents never cross files, so no surviving entity points into it.
    pub fn remove_file(&mut self, path: &str) -> Vec<Entity> {
        let Some(record) = self.files.remove(path) else {
            return Vec::new();
        };
        record
            .owned_entity_ids
            .iter()
            .filter_map(|id| self.detach(id))
            .collect()
    }

    /// Delete one entity and every edge touching it.
    ///
    /// Nested entities of the same file lose their parent link.
    pub fn remove_entity(&mut self, id: &str) -> Option<Entity> {
        let removed = self.detach(id)?;
        if let Some(record) = self.files.get_mut(&removed.file_path) {
            record.owned_entity_ids.retain(|owned| owned != id);
            for sibling in &record.owned_entity_ids {
                if let Some(entity) = self.entities.get_mut(sibling) {
                    if entity.parent.as_deref() == Some(id) {
                        entity.parent = None;
                    }
                }
            }
        }
        Some(removed)
    }

    fn detach(&mut self, id: &str) -> Option<Entity> {
        let removed = self.entities.remove(id)?;
        for target in &removed.outgoing_refs {
            if let Some(callee) = self.entities.get_mut(target) {
                callee.incoming_refs.remove(id);
            }
        }
        for source in &removed.incoming_refs {
            if let Some(caller) = self.entities.get_mut(source) {
                caller.outgoing_refs.remove(id);
            }
        }
        Some(removed)
    }

    /// Replace an entity's outgoing edge set, mirroring it into `incoming_refs`.
    ///
    /// Unknown ids and self-references are dropped. Returns whether the set changed.
    pub fn set_outgoing(&mut self, id: &str, targets: BTreeSet<EntityId>) -> bool {
        let targets: BTreeSet<EntityId> = targets
            .into_iter()
            .filter(|t| t != id && self.entities.contains_key(t))
            .collect();
        let Some(entity) = self.entities.get_mut(id) else {
            return false;
        };
        if entity.outgoing_refs == targets {
            return false;
        }
        let previous = std::mem::replace(&mut entity.outgoing_refs, targets.clone());

        for gone in previous.difference(&targets) {
            if let Some(callee) = self.entities.get_mut(gone) {
                callee.incoming_refs.remove(id);
            }
        }
        for added in targets.difference(&previous) {
            if let Some(callee) = self.entities.get_mut(added) {
                callee.incoming_refs.insert(id.to_string());
            }
        }
        true
    }

    /// Record new source for an entity whose identity survived a rescan.
    pub fn update_source(&mut self, id: &str, span: Span, content_hash: String, code: String) {
        if let Some(entity) = self.entities.get_mut(id) {
            entity.span = span;
            entity.content_hash = content_hash;
            entity.code = code;
        }
    }

    pub fn set_span(&mut self, id: &str, span: Span) {
        if let Some(entity) = self.entities.get_mut(id) {
            entity.span = span;
        }
    }

    pub fn set_parent(&mut self, id: &str, parent: Option<EntityId>) {
        if let Some(entity) = self.entities.get_mut(id) {
            entity.parent = parent;
        }
    }

    /// Flag an entity as needing regeneration.
    ///
    /// An already pending entity keeps the stronger of the two reasons
    /// (`not_generated` over `code_changed` over `dependency_changed`).
    /// Returns whether the entity was up to date (or failed) before.
    pub fn mark_stale(&mut self, id: &str, reason: StaleReason) -> bool {
        let Some(entity) = self.entities.get_mut(id) else {
            return false;
        };
        let was_pending = entity.status == EntityStatus::Pending;
        entity.status = EntityStatus::Pending;
        entity.stale_reason = Some(match entity.stale_reason {
            Some(current) if was_pending && rank(current) >= rank(reason) => current,
            _ => reason,
        });
        !was_pending
    }

    /// Transition a pending entity to `in_progress`.
    pub fn mark_in_progress(&mut self, id: &str) -> bool {
        match self.entities.get_mut(id) {
            Some(entity) if entity.status == EntityStatus::Pending => {
                entity.status = EntityStatus::InProgress;
                true
            }
            _ => false,
        }
    }

    /// Store generated documentation and mark the entity `done`.
    ///
    /// Keeps at most `max_revisions` revisions, newest last.
    pub fn complete(&mut self, id: &str, text: String, max_revisions: usize) -> bool {
        let Some(entity) = self.entities.get_mut(id) else {
            return false;
        };
        if entity.status.is_terminal() {
            return false;
        }
        entity.docs.push(text);
        let keep = max_revisions.max(1);
        if entity.docs.len() > keep {
            let excess = entity.docs.len() - keep;
            entity.docs.drain(..excess);
        }
        entity.status = EntityStatus::Done;
        entity.stale_reason = None;
        true
    }

    /// Mark an entity `failed`; it keeps its previous documentation and reason.
    pub fn fail(&mut self, id: &str) -> bool {
        match self.entities.get_mut(id) {
            Some(entity) if !entity.status.is_terminal() => {
                entity.status = EntityStatus::Failed;
                true
            }
            _ => false,
        }
    }

    /// Move every `in_progress` entity back to `pending`.
    pub fn revert_in_progress(&mut self) -> usize {
        let mut reverted = 0;
        for entity in self.entities.values_mut() {
            if entity.status == EntityStatus::InProgress {
                entity.status = EntityStatus::Pending;
                reverted += 1;
            }
        }
        reverted
    }

    /// Re-queue entities that failed in an earlier run.
    pub fn requeue_failed(&mut self) -> usize {
        let mut requeued = 0;
        for entity in self.entities.values_mut() {
            if entity.status == EntityStatus::Failed {
                entity.status = EntityStatus::Pending;
                if entity.stale_reason.is_none() {
                    entity.stale_reason = Some(StaleReason::NotGenerated);
                }
                requeued += 1;
            }
        }
        requeued
    }

    /// Check structural invariants, returning the first violation found.
    ///
    /// # Errors
    ///
    /// Returns a description of the violated invariant.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        let mut owners: HashMap<&str, &str> = HashMap::new();
        for (path, record) in &self.files {
            if &record.path != path {
                return Err(format!("file record '{}' stored under '{path}'", record.path));
            }
            for id in &record.owned_entity_ids {
                let Some(entity) = self.entities.get(id) else {
                    return Err(format!("'{path}' owns unknown entity {id}"));
                };
                if &entity.file_path != path {
                    return Err(format!(
                        "entity '{}' listed under '{path}' but belongs to '{}'",
                        entity.qualified_path, entity.file_path
                    ));
                }
                if owners.insert(id.as_str(), path.as_str()).is_some() {
                    return Err(format!("entity {id} owned twice"));
                }
            }
        }

        for (id, entity) in &self.entities {
            if !owners.contains_key(id.as_str()) {
                return Err(format!("entity '{}' has no file record", entity.qualified_path));
            }
            if let Some(parent) = &entity.parent {
                if !self.entities.contains_key(parent) {
                    return Err(format!(
                        "entity '{}' has unknown parent {parent}",
                        entity.qualified_path
                    ));
                }
            }
            if entity.status == EntityStatus::Done && entity.docs.is_empty() {
                return Err(format!(
                    "entity '{}' is done without documentation",
                    entity.qualified_path
                ));
            }
            for target in &entity.outgoing_refs {
                let mirrored = self
                    .entities
                    .get(target)
                    .is_some_and(|callee| callee.incoming_refs.contains(id));
                if !mirrored {
                    return Err(format!(
                        "edge {id} -> {target} has no matching back-reference"
                    ));
                }
            }
            for source in &entity.incoming_refs {
                let mirrored = self
                    .entities
                    .get(source)
                    .is_some_and(|caller| caller.outgoing_refs.contains(id));
                if !mirrored {
                    return Err(format!(
                        "back-reference {source} -> {id} has no matching edge"
                    ));
                }
            }
        }
        Ok(())
    }
}

const fn rank(reason: StaleReason) -> u8 {
    match reason {
        StaleReason::DependencyChanged => 0,
        StaleReason::CodeChanged => 1,
        StaleReason::NotGenerated => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::models::EntityKind;

    fn entity(file: &str, name: &str) -> Entity {
        Entity::new(
            EntityKind::Function,
            name,
            format!("{file}::{name}"),
            file,
            Span::default(),
            format!("def {name}(): pass"),
        )
    }

    fn build(files: &[(&str, &[&str])]) -> (Hierarchy, HashMap<String, EntityId>) {
        let mut hierarchy = Hierarchy::new();
        let mut ids = HashMap::new();
        for (path, names) in files {
            hierarchy.set_file_state(path, "h", 1);
            for name in *names {
                let e = entity(path, name);
                ids.insert((*name).to_string(), e.id.clone());
                hierarchy.add_entity(e).unwrap();
            }
        }
        (hierarchy, ids)
    }

    fn set(ids: &[&EntityId]) -> BTreeSet<EntityId> {
        ids.iter().map(|id| (*id).clone()).collect()
    }

    #[test]
    fn test_add_entity_requires_file() {
        let mut hierarchy = Hierarchy::new();
        let err = hierarchy.add_entity(entity("a.py", "foo")).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[test]
    fn test_set_outgoing_is_symmetric() {
        let (mut h, ids) = build(&[("a.py", &["foo", "bar", "baz"])]);
        assert!(h.set_outgoing(&ids["foo"], set(&[&ids["bar"], &ids["baz"]])));
        assert!(h.entity(&ids["bar"]).unwrap().incoming_refs().contains(&ids["foo"]));
        assert!(h.entity(&ids["baz"]).unwrap().incoming_refs().contains(&ids["foo"]));

        assert!(h.set_outgoing(&ids["foo"], set(&[&ids["baz"]])));
        assert!(h.entity(&ids["bar"]).unwrap().incoming_refs().is_empty());
        assert!(h.check_invariants().is_ok());

        assert!(!h.set_outgoing(&ids["foo"], set(&[&ids["baz"]])));
    }

    #[test]
    fn test_set_outgoing_drops_unknown_and_self() {
        let (mut h, ids) = build(&[("a.py", &["foo"])]);
        let targets: BTreeSet<EntityId> =
            [ids["foo"].clone(), "missing".to_string()].into_iter().collect();
        assert!(!h.set_outgoing(&ids["foo"], targets));
        assert!(h.entity(&ids["foo"]).unwrap().outgoing_refs().is_empty());
    }

    #[test]
    fn test_remove_file_prunes_edges() {
        let (mut h, ids) = build(&[("a.py", &["foo"]), ("b.py", &["bar"])]);
        h.set_outgoing(&ids["foo"], set(&[&ids["bar"]]));
        h.set_outgoing(&ids["bar"], set(&[&ids["foo"]]));

        let removed = h.remove_file("b.py");
        assert_eq!(removed.len(), 1);
        assert!(h.file("b.py").is_none());
        let foo = h.entity(&ids["foo"]).unwrap();
        assert!(foo.outgoing_refs().is_empty());
        assert!(foo.incoming_refs().is_empty());
        assert!(h.check_invariants().is_ok());
    }

    #[test]
    fn test_remove_entity_updates_owner() {
        let (mut h, ids) = build(&[("a.py", &["foo", "bar"])]);
        h.set_outgoing(&ids["foo"], set(&[&ids["bar"]]));
        h.remove_entity(&ids["bar"]).unwrap();
        assert_eq!(h.file("a.py").unwrap().owned_entity_ids, vec![ids["foo"].clone()]);
        assert!(h.check_invariants().is_ok());
    }

    #[test]
    fn test_remove_entity_clears_child_parent_links() {
        let (mut h, ids) = build(&[("a.py", &["Widget", "draw"]), ("b.py", &["other"])]);
        h.set_parent(&ids["draw"], Some(ids["Widget"].clone()));

        h.remove_entity(&ids["Widget"]).unwrap();
        assert!(h.entity(&ids["draw"]).unwrap().parent.is_none());
        assert!(h.entity(&ids["other"]).unwrap().parent.is_none());
        assert!(h.check_invariants().is_ok());
    }

    #[test]
    fn test_remove_file_keeps_other_files_intact() {
        let (mut h, ids) = build(&[("a.py", &["Widget", "draw"]), ("b.py", &["Gadget", "run"])]);
        h.set_parent(&ids["draw"], Some(ids["Widget"].clone()));
        h.set_parent(&ids["run"], Some(ids["Gadget"].clone()));

        assert_eq!(h.remove_file("a.py").len(), 2);
        assert_eq!(h.entity(&ids["run"]).unwrap().parent.as_ref(), Some(&ids["Gadget"]));
        assert_eq!(h.entity_count(), 2);
        assert!(h.check_invariants().is_ok());
    }

    #[test]
    fn test_status_lifecycle() {
        let (mut h, ids) = build(&[("a.py", &["foo"])]);
        let id = &ids["foo"];
        assert!(h.mark_in_progress(id));
        assert!(!h.mark_in_progress(id));
        assert!(h.complete(id, "Does foo.".to_string(), 3));
        let foo = h.entity(id).unwrap();
        assert_eq!(foo.status(), EntityStatus::Done);
        assert_eq!(foo.doc_text(), Some("Does foo."));
        assert!(foo.stale_reason().is_none());

        assert!(h.mark_stale(id, StaleReason::CodeChanged));
        let foo = h.entity(id).unwrap();
        assert_eq!(foo.status(), EntityStatus::Pending);
        assert_eq!(foo.doc_text(), Some("Does foo."));
    }

    #[test]
    fn test_mark_stale_keeps_stronger_reason() {
        let (mut h, ids) = build(&[("a.py", &["foo"])]);
        let id = &ids["foo"];
        assert!(!h.mark_stale(id, StaleReason::DependencyChanged));
        assert_eq!(
            h.entity(id).unwrap().stale_reason(),
            Some(StaleReason::NotGenerated)
        );
    }

    #[test]
    fn test_doc_revisions_are_capped() {
        let (mut h, ids) = build(&[("a.py", &["foo"])]);
        let id = &ids["foo"];
        for n in 0..4 {
            h.mark_stale(id, StaleReason::CodeChanged);
            h.mark_in_progress(id);
            h.complete(id, format!("rev {n}"), 2);
        }
        let revisions = h.entity(id).unwrap().doc_revisions();
        assert_eq!(revisions, ["rev 2".to_string(), "rev 3".to_string()]);
    }

    #[test]
    fn test_revert_and_requeue() {
        let (mut h, ids) = build(&[("a.py", &["foo", "bar"])]);
        h.mark_in_progress(&ids["foo"]);
        h.mark_in_progress(&ids["bar"]);
        h.fail(&ids["bar"]);

        assert_eq!(h.revert_in_progress(), 1);
        assert_eq!(h.entity(&ids["foo"]).unwrap().status(), EntityStatus::Pending);
        assert_eq!(h.entity(&ids["bar"]).unwrap().status(), EntityStatus::Failed);

        assert_eq!(h.requeue_failed(), 1);
        assert_eq!(h.entity(&ids["bar"]).unwrap().status(), EntityStatus::Pending);
        assert_eq!(h.stale_ids().len(), 2);
    }

    #[test]
    fn test_set_file_state_tracks_marker() {
        let mut h = Hierarchy::new();
        h.set_file_state("a.py", "h1", 1);
        h.set_file_state("a.py", "h1", 2);
        assert_eq!(h.file("a.py").unwrap().last_seen_marker, 1);
        h.set_file_state("a.py", "h2", 3);
        assert_eq!(h.file("a.py").unwrap().last_seen_marker, 3);
        assert_eq!(h.file("a.py").unwrap().last_hash, "h2");
    }

    #[test]
    fn test_invariants_detect_asymmetry() {
        let (mut h, ids) = build(&[("a.py", &["foo", "bar"])]);
        h.entities
            .get_mut(&ids["foo"])
            .unwrap()
            .outgoing_refs
            .insert(ids["bar"].clone());
        assert!(h.check_invariants().unwrap_err().contains("back-reference"));
    }

    #[test]
    fn test_invariants_detect_done_without_doc() {
        let (mut h, ids) = build(&[("a.py", &["foo"])]);
        h.entities.get_mut(&ids["foo"]).unwrap().status = EntityStatus::Done;
        assert!(h.check_invariants().unwrap_err().contains("without documentation"));
    }

    #[test]
    fn test_file_entities_document_order() {
        let (mut h, ids) = build(&[("a.py", &["foo", "bar"])]);
        h.set_document_order("a.py", &[ids["bar"].clone(), ids["foo"].clone()]);
        let names: Vec<&str> = h.file_entities("a.py").map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["bar", "foo"]);
    }
}
