//! Dependency order over stale entities.
//!
//! Stale entities form a directed graph (caller -> callee) restricted to
//! edges between stale entities. Strongly connected components collapse into
//! dispatch units; a unit may start once every unit it depends on has
//! finished.

use std::collections::{BTreeSet, HashMap};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::hierarchy::{EntityId, Hierarchy};

/// A set of entities generated together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchUnit {
    pub index: usize,
    /// Members in a fixed order (qualified path, then id).
    pub members: Vec<EntityId>,
    /// Units holding callees of this unit's members.
    pub depends_on: BTreeSet<usize>,
    /// Units holding callers of this unit's members.
    pub dependents: BTreeSet<usize>,
}

impl DispatchUnit {
    /// Whether the unit is a reference cycle.
    #[must_use]
    pub fn is_cycle(&self) -> bool {
        self.members.len() > 1
    }
}

/// Dispatch units in a valid generation order.
#[derive(Debug, Clone, Default)]
pub struct DispatchPlan {
    units: Vec<DispatchUnit>,
    unit_of: HashMap<EntityId, usize>,
}

impl DispatchPlan {
    /// Build the plan for `stale` entities.
    ///
    /// Ids not present in `hierarchy` are ignored. Units are numbered so that
    /// every unit comes after all units it depends on.
    #[must_use]
    pub fn build(stale: &BTreeSet<EntityId>, hierarchy: &Hierarchy) -> Self {
        let mut ordered: Vec<(&str, &EntityId)> = stale
            .iter()
            .filter_map(|id| hierarchy.entity(id).map(|e| (e.qualified_path.as_str(), id)))
            .collect();
        ordered.sort();

        let mut graph: DiGraph<EntityId, ()> = DiGraph::with_capacity(ordered.len(), 0);
        let mut node_of: HashMap<&EntityId, NodeIndex> = HashMap::with_capacity(ordered.len());
        for (_, id) in &ordered {
            node_of.insert(*id, graph.add_node((*id).clone()));
        }
        for (_, id) in &ordered {
            let Some(entity) = hierarchy.entity(id) else {
                continue;
            };
            for callee in entity.outgoing_refs() {
                if let Some(&target) = node_of.get(callee) {
                    graph.add_edge(node_of[*id], target, ());
                }
            }
        }

        // Tarjan emits a component only after every component reachable from
        // it, so callees come out before their callers.
        let components = tarjan_scc(&graph);
        let mut component_of = vec![0usize; graph.node_count()];
        for (index, component) in components.iter().enumerate() {
            for node in component {
                component_of[node.index()] = index;
            }
        }

        let position: HashMap<&EntityId, usize> = ordered
            .iter()
            .enumerate()
            .map(|(pos, (_, id))| (*id, pos))
            .collect();

        let mut units: Vec<DispatchUnit> = components
            .iter()
            .enumerate()
            .map(|(index, component)| {
                let mut members: Vec<EntityId> =
                    component.iter().map(|node| graph[*node].clone()).collect();
                members.sort_by_key(|id| position.get(id).copied().unwrap_or(usize::MAX));
                DispatchUnit {
                    index,
                    members,
                    depends_on: BTreeSet::new(),
                    dependents: BTreeSet::new(),
                }
            })
            .collect();

        for edge in graph.raw_edges() {
            let from = component_of[edge.source().index()];
            let to = component_of[edge.target().index()];
            if from != to {
                units[from].depends_on.insert(to);
                units[to].dependents.insert(from);
            }
        }

        let unit_of = units
            .iter()
            .flat_map(|unit| unit.members.iter().map(move |id| (id.clone(), unit.index)))
            .collect();

        Self { units, unit_of }
    }

    #[must_use]
    pub fn units(&self) -> &[DispatchUnit] {
        &self.units
    }

    #[must_use]
    pub fn unit(&self, index: usize) -> Option<&DispatchUnit> {
        self.units.get(index)
    }

    /// Index of the unit containing `id`.
    #[must_use]
    pub fn unit_of(&self, id: &str) -> Option<usize> {
        self.unit_of.get(id).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Number of entities across all units.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.unit_of.len()
    }

    /// Number of units that are reference cycles.
    #[must_use]
    pub fn cycle_count(&self) -> usize {
        self.units.iter().filter(|u| u.is_cycle()).count()
    }
}
