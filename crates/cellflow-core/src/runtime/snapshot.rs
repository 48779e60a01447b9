//! Snapshot capture for rollback.
//!
//! A snapshot is an immutable copy of {bindings, graph, cell records} tagged
//! with a monotone sequence number. One is taken before every agent batch
//! (discarded on success, restored on rejection) and whenever the embedder
//! checkpoints explicitly. History is bounded to cap memory.

use crate::runtime::bindings::{Binding, BindingStore};
use crate::runtime::cell::Cell;
use cellflow_engine::{CellId, DependencyGraph};
use std::collections::BTreeMap;

/// Point-in-time copy of the combined graph + store + cell state.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub seq: u64,
    pub graph: DependencyGraph,
    pub bindings: Vec<Binding>,
    pub cells: BTreeMap<CellId, Cell>,
}

/// Bounded snapshot history with monotone sequence numbers.
#[derive(Debug, Default)]
pub struct SnapshotManager {
    history: Vec<Snapshot>,
    next_seq: u64,
    limit: usize,
}

impl SnapshotManager {
    pub fn new(limit: usize) -> SnapshotManager {
        SnapshotManager {
            history: Vec::new(),
            next_seq: 1,
            limit: limit.max(1),
        }
    }

    /// Capture the current state. Returns the new snapshot's sequence
    /// number.
    pub fn capture(
        &mut self,
        graph: &DependencyGraph,
        store: &BindingStore,
        cells: &BTreeMap<CellId, Cell>,
    ) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.history.push(Snapshot {
            seq,
            graph: graph.clone(),
            bindings: store.export(),
            cells: cells.clone(),
        });
        while self.history.len() > self.limit {
            self.history.remove(0);
        }
        seq
    }

    pub fn latest_seq(&self) -> Option<u64> {
        self.history.last().map(|s| s.seq)
    }

    pub fn get(&self, seq: u64) -> Option<&Snapshot> {
        self.history.iter().find(|s| s.seq == seq)
    }

    /// Remove and return a snapshot for restoring. Everything captured
    /// after it is dropped too: restoring rewinds history.
    pub fn take(&mut self, seq: u64) -> Option<Snapshot> {
        let idx = self.history.iter().position(|s| s.seq == seq)?;
        self.history.truncate(idx + 1);
        self.history.pop()
    }

    /// Drop a snapshot whose batch completed successfully.
    pub fn discard(&mut self, seq: u64) {
        self.history.retain(|s| s.seq != seq);
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::bindings::Value;
    use serde_json::json;

    fn capture_n(manager: &mut SnapshotManager, n: usize) {
        let graph = DependencyGraph::new();
        let store = BindingStore::new();
        let cells = BTreeMap::new();
        for _ in 0..n {
            manager.capture(&graph, &store, &cells);
        }
    }

    #[test]
    fn test_sequence_numbers_are_monotone() {
        let mut manager = SnapshotManager::new(8);
        capture_n(&mut manager, 3);
        assert_eq!(manager.latest_seq(), Some(3));
    }

    #[test]
    fn test_history_is_bounded() {
        let mut manager = SnapshotManager::new(2);
        capture_n(&mut manager, 5);
        assert_eq!(manager.len(), 2);
        assert!(manager.get(3).is_none());
        assert!(manager.get(5).is_some());
        // Trimming never resets the counter.
        assert_eq!(manager.latest_seq(), Some(5));
    }

    #[test]
    fn test_take_rewinds_newer_snapshots() {
        let mut manager = SnapshotManager::new(8);
        let graph = DependencyGraph::new();
        let store = BindingStore::new();
        store.write(&CellId::new("a"), "x", Value::json(json!(1))).unwrap();
        let cells = BTreeMap::new();

        let seq = manager.capture(&graph, &store, &cells);
        capture_n(&mut manager, 2);

        let snap = manager.take(seq).unwrap();
        assert_eq!(snap.seq, seq);
        assert_eq!(snap.bindings.len(), 1);
        assert!(manager.is_empty());
    }

    #[test]
    fn test_discard_removes_only_that_snapshot() {
        let mut manager = SnapshotManager::new(8);
        capture_n(&mut manager, 3);
        manager.discard(2);
        assert_eq!(manager.len(), 2);
        assert!(manager.get(1).is_some());
        assert!(manager.get(3).is_some());
    }
}
