//! Dependency graph over cells.
//!
//! Edges are derived, never authored: a cell that writes binding `x` is the
//! producer of `x`, and every cell that reads `x` is a consumer with an edge
//! back to the producer. The graph enforces two invariants at update time:
//!
//! - acyclicity: an edit that would introduce a cycle is rejected with
//!   [`GraphError::CycleDetected`] and the graph is left unchanged
//! - single owner per name: two live cells may never both write the same
//!   binding ([`GraphError::BindingConflict`])
//!
//! Planning over an impact set is deterministic: topological order with ties
//! broken by [`CellId`] ordering, never by display position.

use crate::error::GraphError;
use crate::ids::CellId;
use crate::scan::Analysis;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashSet};

/// Cells that must re-execute after a change: the edited cell plus its
/// transitive dependents.
pub type ImpactSet = BTreeSet<CellId>;

/// A derived producer/consumer edge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub producer: CellId,
    pub consumer: CellId,
    pub name: String,
}

/// What `delete_cell` removed and who it left behind.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// Binding names the deleted cell produced.
    pub removed_bindings: Vec<String>,
    /// Surviving cells now reading a name no live cell produces.
    pub orphaned: Vec<CellId>,
}

/// An ordered sequence of cells to run.
///
/// For any two cells in the plan where one depends on the other, the
/// producer always precedes the consumer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    cells: Vec<CellId>,
}

impl ExecutionPlan {
    pub fn cells(&self) -> &[CellId] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CellId> {
        self.cells.iter()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct CellNode {
    reads: BTreeSet<String>,
    writes: BTreeSet<String>,
}

/// The dependency graph: per-cell read/write sets plus the producer index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    cells: BTreeMap<CellId, CellNode>,
    producers: BTreeMap<String, CellId>,
}

impl DependencyGraph {
    pub fn new() -> DependencyGraph {
        DependencyGraph::default()
    }

    /// Register a cell with no reads or writes yet. Returns false if the
    /// cell already existed. Cells are only ever created explicitly.
    pub fn insert_cell(&mut self, id: CellId) -> bool {
        match self.cells.entry(id) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(e) => {
                e.insert(CellNode::default());
                true
            }
        }
    }

    pub fn contains(&self, id: &CellId) -> bool {
        self.cells.contains_key(id)
    }

    pub fn cell_ids(&self) -> impl Iterator<Item = &CellId> {
        self.cells.keys()
    }

    /// Re-derive a cell's edges from a fresh analysis of its source.
    ///
    /// On rejection ([`GraphError::CycleDetected`] or
    /// [`GraphError::BindingConflict`]) the graph is left exactly as it was.
    /// On success returns the impact set: the edited cell plus every
    /// transitive dependent.
    pub fn apply_edit(
        &mut self,
        id: &CellId,
        analysis: Analysis,
    ) -> Result<ImpactSet, GraphError> {
        if !self.cells.contains_key(id) {
            return Err(GraphError::UnknownCell(id.clone()));
        }

        // The producer index covers every live write, so any foreign entry
        // for a claimed name is a second live owner.
        for name in &analysis.writes {
            if let Some(owner) = self.producers.get(name)
                && owner != id
            {
                return Err(GraphError::BindingConflict {
                    name: name.clone(),
                    owner: owner.clone(),
                    claimant: id.clone(),
                });
            }
        }

        // Stage the change on a copy so a cycle rejection cannot leave a
        // half-applied graph behind.
        let mut staged = self.clone();
        if let Some(node) = staged.cells.get_mut(id) {
            for name in &node.writes {
                staged.producers.remove(name);
            }
            for name in &analysis.writes {
                staged.producers.insert(name.clone(), id.clone());
            }
            node.reads = analysis.reads;
            node.writes = analysis.writes;
        }

        if let Some(path) = staged.find_cycle(id) {
            return Err(GraphError::CycleDetected { path });
        }

        *self = staged;
        Ok(self.impact_of(id))
    }

    /// Remove a cell, its produced bindings, and all incident edges.
    pub fn delete_cell(&mut self, id: &CellId) -> Result<DeleteOutcome, GraphError> {
        let node = self
            .cells
            .remove(id)
            .ok_or_else(|| GraphError::UnknownCell(id.clone()))?;

        let removed_bindings: Vec<String> = node.writes.into_iter().collect();
        for name in &removed_bindings {
            self.producers.remove(name);
        }

        let orphaned: Vec<CellId> = self
            .cells
            .iter()
            .filter(|(_, n)| removed_bindings.iter().any(|name| n.reads.contains(name)))
            .map(|(cell, _)| cell.clone())
            .collect();

        Ok(DeleteOutcome {
            removed_bindings,
            orphaned,
        })
    }

    /// The cell currently producing `name`, if any.
    pub fn producer_of(&self, name: &str) -> Option<&CellId> {
        self.producers.get(name)
    }

    pub fn reads_of(&self, id: &CellId) -> BTreeSet<String> {
        self.cells.get(id).map(|n| n.reads.clone()).unwrap_or_default()
    }

    pub fn writes_of(&self, id: &CellId) -> BTreeSet<String> {
        self.cells.get(id).map(|n| n.writes.clone()).unwrap_or_default()
    }

    /// Names the cell reads that no live cell produces.
    pub fn missing_inputs(&self, id: &CellId) -> BTreeSet<String> {
        match self.cells.get(id) {
            Some(node) => node
                .reads
                .iter()
                .filter(|name| !self.producers.contains_key(*name))
                .cloned()
                .collect(),
            None => BTreeSet::new(),
        }
    }

    /// Cells whose reads this cell directly feeds.
    pub fn dependents_of(&self, id: &CellId) -> BTreeSet<CellId> {
        let mut out = BTreeSet::new();
        if let Some(node) = self.cells.get(id) {
            for name in &node.writes {
                for (other, n) in &self.cells {
                    if other != id && n.reads.contains(name) {
                        out.insert(other.clone());
                    }
                }
            }
        }
        out
    }

    /// Producers of the names this cell reads.
    pub fn dependencies_of(&self, id: &CellId) -> BTreeSet<CellId> {
        let mut out = BTreeSet::new();
        if let Some(node) = self.cells.get(id) {
            for name in &node.reads {
                if let Some(producer) = self.producers.get(name) {
                    out.insert(producer.clone());
                }
            }
        }
        out
    }

    /// The changed cell plus all transitive dependents.
    pub fn impact_of(&self, id: &CellId) -> ImpactSet {
        let mut impact = ImpactSet::new();
        let mut to_process = vec![id.clone()];
        while let Some(current) = to_process.pop() {
            if !impact.insert(current.clone()) {
                continue;
            }
            for dependent in self.dependents_of(&current) {
                to_process.push(dependent);
            }
        }
        impact
    }

    /// Topologically order an impact set into an execution plan.
    ///
    /// Ties (cells with no ordering constraint between them) break by cell
    /// id via a min-heap, so the plan is byte-identical across repeated
    /// computations over the same graph. Leftover cells would mean a cycle
    /// survived edit-time rejection, which is an invariant violation.
    pub fn plan(&self, impact: &ImpactSet) -> Result<ExecutionPlan, GraphError> {
        let mut indegree: BTreeMap<CellId, usize> = BTreeMap::new();
        for id in impact {
            let within = self
                .dependencies_of(id)
                .into_iter()
                .filter(|dep| dep != id && impact.contains(dep))
                .count();
            indegree.insert(id.clone(), within);
        }

        let mut ready: BinaryHeap<Reverse<CellId>> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| Reverse(id.clone()))
            .collect();

        let mut ordered = Vec::with_capacity(impact.len());
        while let Some(Reverse(id)) = ready.pop() {
            for dependent in self.dependents_of(&id) {
                if let Some(d) = indegree.get_mut(&dependent) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push(Reverse(dependent));
                    }
                }
            }
            ordered.push(id);
        }

        if ordered.len() != impact.len() {
            let leftover: Vec<CellId> = impact
                .iter()
                .filter(|id| !ordered.contains(id))
                .cloned()
                .collect();
            return Err(GraphError::CycleDetected { path: leftover });
        }

        Ok(ExecutionPlan { cells: ordered })
    }

    /// All derived edges, in deterministic (consumer, name) order.
    pub fn edges(&self) -> Vec<Edge> {
        let mut out = Vec::new();
        for (consumer, node) in &self.cells {
            for name in &node.reads {
                if let Some(producer) = self.producers.get(name) {
                    out.push(Edge {
                        producer: producer.clone(),
                        consumer: consumer.clone(),
                        name: name.clone(),
                    });
                }
            }
        }
        out
    }

    /// Depth-first search for a cycle reachable from `start`, following
    /// read edges back to producers. Returns the offending path.
    fn find_cycle(&self, start: &CellId) -> Option<Vec<CellId>> {
        let mut visiting = HashSet::new();
        let mut path = Vec::new();

        if self.cycle_dfs(start, &mut visiting, &mut path) {
            Some(path)
        } else {
            None
        }
    }

    fn cycle_dfs(
        &self,
        current: &CellId,
        visiting: &mut HashSet<CellId>,
        path: &mut Vec<CellId>,
    ) -> bool {
        if visiting.contains(current) {
            path.push(current.clone());
            return true;
        }

        let deps = self.dependencies_of(current);

        visiting.insert(current.clone());
        path.push(current.clone());

        for dep in &deps {
            if self.cycle_dfs(dep, visiting, path) {
                return true;
            }
        }

        path.pop();
        visiting.remove(current);
        false
    }
}
