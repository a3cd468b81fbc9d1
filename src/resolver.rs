//! Reference resolution into hierarchy edges.
//!
//! Identifiers found inside each entity are matched by simple name against
//! the entities of the hierarchy. Resolution strategy:
//! 1. Same-file candidates (first by qualified path)
//! 2. A unique candidate anywhere in the repository
//! 3. Unresolved (dropped; external or ambiguous)

use std::collections::{BTreeSet, HashMap};

use crate::hierarchy::{Entity, EntityId, Hierarchy};

/// Name index over the entities of a hierarchy.
#[derive(Debug, Default)]
pub struct ReferenceResolver {
    /// Simple name -> candidates as (file, qualified path, id), sorted.
    name_index: HashMap<String, Vec<(String, String, EntityId)>>,
}

/// Result of a resolution pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveOutcome {
    /// Entities whose outgoing edge set changed.
    pub changed: BTreeSet<EntityId>,
    /// Total resolved edges written.
    pub edges: usize,
}

/// Last `::` or `.` separated segment of a name.
#[must_use]
pub fn simple_name(name: &str) -> &str {
    name.rsplit("::")
        .next()
        .and_then(|tail| tail.rsplit('.').next())
        .unwrap_or(name)
}

impl ReferenceResolver {
    /// Index every entity of `hierarchy` by simple name.
    #[must_use]
    pub fn from_hierarchy(hierarchy: &Hierarchy) -> Self {
        let mut name_index: HashMap<String, Vec<(String, String, EntityId)>> = HashMap::new();
        for entity in hierarchy.entities() {
            name_index.entry(entity.name.clone()).or_default().push((
                entity.file_path.clone(),
                entity.qualified_path.clone(),
                entity.id.clone(),
            ));
        }
        for candidates in name_index.values_mut() {
            candidates.sort();
        }
        Self { name_index }
    }

    /// Number of distinct indexed names.
    #[must_use]
    pub fn name_count(&self) -> usize {
        self.name_index.len()
    }

    /// Resolve one identifier used inside `source`.
    #[must_use]
    pub fn resolve(&self, identifier: &str, source: &Entity) -> Option<&EntityId> {
        let candidates = self.name_index.get(simple_name(identifier))?;
        let mut others = candidates.iter().filter(|(_, _, id)| *id != source.id);

        let same_file = others
            .clone()
            .find(|(file, _, _)| *file == source.file_path);
        if let Some((_, _, id)) = same_file {
            return Some(id);
        }

        let first = others.next()?;
        if others.next().is_some() {
            return None;
        }
        Some(&first.2)
    }

    /// Resolve every identifier set into outgoing edges.
    #[must_use]
    pub fn resolve_all(
        &self,
        hierarchy: &Hierarchy,
        identifiers: &HashMap<EntityId, BTreeSet<String>>,
    ) -> Vec<(EntityId, BTreeSet<EntityId>)> {
        let mut resolved: Vec<(EntityId, BTreeSet<EntityId>)> = identifiers
            .iter()
            .filter_map(|(id, names)| {
                let source = hierarchy.entity(id)?;
                let targets = names
                    .iter()
                    .filter_map(|name| self.resolve(name, source))
                    .cloned()
                    .collect();
                Some((id.clone(), targets))
            })
            .collect();
        resolved.sort_by(|a, b| a.0.cmp(&b.0));
        resolved
    }
}

/// Rebuild outgoing edges for every entity in `identifiers`.
///
/// Entities without an identifier set (their file was skipped this run) keep
/// their stored edges. Re-running on unchanged input reproduces the same
/// edge set.
pub fn resolve(
    hierarchy: &mut Hierarchy,
    identifiers: &HashMap<EntityId, BTreeSet<String>>,
) -> ResolveOutcome {
    let resolver = ReferenceResolver::from_hierarchy(hierarchy);
    let mut outcome = ResolveOutcome::default();

    for (id, targets) in resolver.resolve_all(hierarchy, identifiers) {
        outcome.edges += targets.len();
        if hierarchy.set_outgoing(&id, targets) {
            outcome.changed.insert(id);
        }
    }

    tracing::debug!(
        names = resolver.name_count(),
        edges = outcome.edges,
        changed = outcome.changed.len(),
        "Resolved references"
    );
    outcome
}
