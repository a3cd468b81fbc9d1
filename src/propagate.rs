//! Invalidation propagation along incoming reference edges.

use std::collections::{BTreeSet, VecDeque};

use crate::hierarchy::{EntityId, Hierarchy, StaleReason};

/// Entities made stale by a set of seeds.
///
/// Seeds are always included (if they exist). With `depth >= 1`, callers of
/// stale entities are added level by level up to `depth` hops away. The
/// visited set guards cyclic reference graphs.
#[must_use]
pub fn propagate(
    seeds: &BTreeSet<EntityId>,
    hierarchy: &Hierarchy,
    depth: usize,
) -> BTreeSet<EntityId> {
    let mut stale: BTreeSet<EntityId> = seeds
        .iter()
        .filter(|id| hierarchy.entity(id).is_some())
        .cloned()
        .collect();
    let mut frontier: VecDeque<(EntityId, usize)> =
        stale.iter().map(|id| (id.clone(), 0)).collect();

    while let Some((id, level)) = frontier.pop_front() {
        if level >= depth {
            continue;
        }
        let Some(entity) = hierarchy.entity(&id) else {
            continue;
        };
        for caller in entity.incoming_refs() {
            if stale.insert(caller.clone()) {
                frontier.push_back((caller.clone(), level + 1));
            }
        }
    }
    stale
}

/// Mark seeds and their propagated callers stale.
///
/// Seeds that are not already pending become `dependency_changed` (their
/// outgoing edges changed or a callee vanished); everything reached only by
/// propagation becomes `dependency_changed` too. Entities already pending
/// keep their stronger reason. Returns the full stale set.
pub fn invalidate(
    seeds: &BTreeSet<EntityId>,
    hierarchy: &mut Hierarchy,
    depth: usize,
) -> BTreeSet<EntityId> {
    let stale = propagate(seeds, hierarchy, depth);
    let mut newly_stale = 0usize;
    for id in &stale {
        if hierarchy.mark_stale(id, StaleReason::DependencyChanged) {
            newly_stale += 1;
        }
    }
    tracing::debug!(
        seeds = seeds.len(),
        stale = stale.len(),
        newly_stale,
        depth,
        "Propagated invalidation"
    );
    stale
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{Entity, EntityKind, EntityStatus, Span};
    use std::collections::HashMap;

    /// Builds `names` as functions in one file with `edges` as caller -> callee.
    fn graph(names: &[&str], edges: &[(&str, &str)]) -> (Hierarchy, HashMap<String, EntityId>) {
        let mut hierarchy = Hierarchy::new();
        hierarchy.set_file_state("g.py", "h", 1);
        let mut ids = HashMap::new();
        for name in names {
            let entity = Entity::new(
                EntityKind::Function,
                *name,
                format!("g.py::{name}"),
                "g.py",
                Span::default(),
                "",
            );
            ids.insert((*name).to_string(), entity.id.clone());
            hierarchy.add_entity(entity).unwrap();
        }
        for name in names {
            let targets: BTreeSet<EntityId> = edges
                .iter()
                .filter(|(from, _)| from == name)
                .map(|(_, to)| ids[*to].clone())
                .collect();
            hierarchy.set_outgoing(&ids[*name], targets);
        }
        for id in ids.values() {
            hierarchy.mark_in_progress(id);
            hierarchy.complete(id, "doc".to_string(), 3);
        }
        (hierarchy, ids)
    }

    fn names(stale: &BTreeSet<EntityId>, ids: &HashMap<String, EntityId>) -> BTreeSet<String> {
        ids.iter()
            .filter(|(_, id)| stale.contains(*id))
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn seed(ids: &HashMap<String, EntityId>, name: &str) -> BTreeSet<EntityId> {
        [ids[name].clone()].into_iter().collect()
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_depth_zero_only_seeds() {
        let (h, ids) = graph(&["a", "b"], &[("a", "b")]);
        let stale = propagate(&seed(&ids, "b"), &h, 0);
        assert_eq!(names(&stale, &ids), set(&["b"]));
    }

    #[test]
    fn test_depth_one_direct_callers() {
        let (h, ids) = graph(&["a", "b", "c", "d"], &[("a", "b"), ("b", "c"), ("d", "a")]);
        let stale = propagate(&seed(&ids, "c"), &h, 1);
        assert_eq!(names(&stale, &ids), set(&["b", "c"]));
    }

    #[test]
    fn test_transitive_depth() {
        let (h, ids) = graph(&["a", "b", "c", "d"], &[("a", "b"), ("b", "c"), ("d", "a")]);
        let stale = propagate(&seed(&ids, "c"), &h, 2);
        assert_eq!(names(&stale, &ids), set(&["a", "b", "c"]));
        let stale = propagate(&seed(&ids, "c"), &h, usize::MAX);
        assert_eq!(names(&stale, &ids), set(&["a", "b", "c", "d"]));
    }

    #[test]
    fn test_cycle_terminates() {
        let (h, ids) = graph(&["a", "b"], &[("a", "b"), ("b", "a")]);
        let stale = propagate(&seed(&ids, "a"), &h, usize::MAX);
        assert_eq!(names(&stale, &ids), set(&["a", "b"]));
    }

    #[test]
    fn test_unknown_seed_ignored() {
        let (h, _) = graph(&["a"], &[]);
        let seeds: BTreeSet<EntityId> = ["ghost".to_string()].into_iter().collect();
        assert!(propagate(&seeds, &h, 1).is_empty());
    }

    #[test]
    fn test_invalidate_marks_callers() {
        let (mut h, ids) = graph(&["a", "b", "c"], &[("a", "b")]);
        let stale = invalidate(&seed(&ids, "b"), &mut h, 1);
        assert_eq!(stale.len(), 2);

        let a = h.entity(&ids["a"]).unwrap();
        assert_eq!(a.status(), EntityStatus::Pending);
        assert_eq!(a.stale_reason(), Some(StaleReason::DependencyChanged));
        assert_eq!(a.doc_text(), Some("doc"));
        assert_eq!(h.entity(&ids["c"]).unwrap().status(), EntityStatus::Done);
    }
}
