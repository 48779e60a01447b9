//! The runtime context: all live state plus the injected capabilities.
//!
//! `Runtime` is passed explicitly to nothing — it *is* the single owner.
//! The scheduler methods (`ingest`, `pump`, `delete_cell`, ...) are the only
//! mutation entry points; every other component reads through accessors.

use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};
use crate::runtime::bindings::BindingStore;
use crate::runtime::cell::{Cell, CellError, ExecStatus};
use crate::runtime::conflict::AgentBatch;
use crate::runtime::events::{EditEvent, Notification, NotificationKind};
use crate::runtime::executor::{DocumentLayer, Executor};
use crate::runtime::snapshot::{Snapshot, SnapshotManager};
use cellflow_engine::{CellId, DependencyGraph, ImpactSet};
use std::collections::{BTreeMap, VecDeque};

/// The reactive execution runtime for one document.
pub struct Runtime {
    pub(crate) graph: DependencyGraph,
    pub(crate) store: BindingStore,
    pub(crate) cells: BTreeMap<CellId, Cell>,
    pub(crate) snapshots: SnapshotManager,
    pub(crate) notifications: VecDeque<Notification>,
    /// Debounce queue of not-yet-admitted edits.
    pub(crate) pending: Vec<EditEvent>,
    /// Cells whose inputs changed since the last completed run.
    pub(crate) dirty: ImpactSet,
    pub(crate) agent_batch: Option<AgentBatch>,
    pub(crate) next_batch_seq: u64,
    pub(crate) next_ordinal: usize,
    pub(crate) config: RuntimeConfig,
    pub(crate) executor: Box<dyn Executor>,
    pub(crate) document: Box<dyn DocumentLayer>,
}

impl Runtime {
    pub fn new(
        config: RuntimeConfig,
        executor: Box<dyn Executor>,
        document: Box<dyn DocumentLayer>,
    ) -> Runtime {
        let snapshots = SnapshotManager::new(config.snapshot_history);
        Runtime {
            graph: DependencyGraph::new(),
            store: BindingStore::new(),
            cells: BTreeMap::new(),
            snapshots,
            notifications: VecDeque::new(),
            pending: Vec::new(),
            dirty: ImpactSet::new(),
            agent_batch: None,
            next_batch_seq: 1,
            next_ordinal: 0,
            config,
            executor,
            document,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// A cheap read-side handle onto the live bindings.
    pub fn bindings(&self) -> BindingStore {
        self.store.clone()
    }

    pub fn cell(&self, id: &CellId) -> Option<&Cell> {
        self.cells.get(id)
    }

    /// Cells sorted by display ordinal. Display order only; plans never
    /// consult it.
    pub fn cells_in_display_order(&self) -> Vec<&Cell> {
        let mut out: Vec<&Cell> = self.cells.values().collect();
        out.sort_by_key(|c| c.ordinal);
        out
    }

    /// Drain all queued status-change notifications.
    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        self.notifications.drain(..).collect()
    }

    pub fn latest_snapshot_seq(&self) -> Option<u64> {
        self.snapshots.latest_seq()
    }

    /// Create a cell explicitly. Returns false if it already exists.
    pub fn create_cell(&mut self, id: CellId) -> bool {
        if self.cells.contains_key(&id) {
            return false;
        }
        self.graph.insert_cell(id.clone());
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        self.cells.insert(id.clone(), Cell::new(id.clone(), ordinal));
        self.notify(id, NotificationKind::Created);
        true
    }

    /// Change a cell's display position. Never affects execution order.
    pub fn move_cell(&mut self, id: &CellId, ordinal: usize) -> Result<()> {
        let cell = self
            .cells
            .get_mut(id)
            .ok_or_else(|| RuntimeError::Graph(cellflow_engine::GraphError::UnknownCell(id.clone())))?;
        cell.ordinal = ordinal;
        Ok(())
    }

    pub(crate) fn notify(&mut self, cell: CellId, kind: NotificationKind) {
        tracing::debug!(cell = %cell, ?kind, "status change");
        self.notifications.push_back(Notification::new(cell, kind));
    }

    /// Record a status transition and emit the matching notification.
    pub(crate) fn set_status(&mut self, id: &CellId, status: ExecStatus, error: Option<CellError>) {
        let kind = match status {
            ExecStatus::Pending => None,
            ExecStatus::Running => Some(NotificationKind::Running),
            ExecStatus::Succeeded => Some(NotificationKind::Succeeded),
            ExecStatus::Failed => Some(NotificationKind::Failed),
            ExecStatus::Stale => Some(NotificationKind::Stale),
        };
        if let Some(cell) = self.cells.get_mut(id) {
            cell.status = status;
            cell.error = error;
        }
        if let Some(kind) = kind {
            self.notify(id.clone(), kind);
        }
    }

    pub(crate) fn flag_needs_review(&mut self, id: &CellId) {
        if let Some(cell) = self.cells.get_mut(id) {
            cell.needs_review = true;
        }
        self.notify(id.clone(), NotificationKind::NeedsReview);
    }

    /// Capture the current state into the bounded snapshot history.
    pub fn capture_snapshot(&mut self) -> u64 {
        self.snapshots.capture(&self.graph, &self.store, &self.cells)
    }

    /// Roll the runtime back to snapshot `seq`, dropping everything captured
    /// after it. Any open agent batch is void afterwards.
    pub fn restore(&mut self, seq: u64) -> Result<()> {
        let snapshot = self
            .snapshots
            .take(seq)
            .ok_or(RuntimeError::NothingToRestore)?;
        self.restore_snapshot(snapshot)?;
        self.dirty.clear();
        self.agent_batch = None;
        Ok(())
    }

    /// Roll back to the most recent snapshot.
    pub fn restore_latest(&mut self) -> Result<()> {
        let seq = self
            .snapshots
            .latest_seq()
            .ok_or(RuntimeError::NothingToRestore)?;
        self.restore(seq)
    }

    /// Replace live state with a snapshot. This is a critical section: no
    /// execution may start until it returns, and a queued edit referencing
    /// a cell absent from the restored state is an invariant violation, not
    /// something to guess around.
    pub(crate) fn restore_snapshot(&mut self, snapshot: Snapshot) -> Result<()> {
        for event in self.pending.iter() {
            if !snapshot.cells.contains_key(&event.cell) {
                return Err(RuntimeError::InvariantViolation(format!(
                    "queued edit references cell {} missing from snapshot {}",
                    event.cell, snapshot.seq
                )));
            }
        }

        tracing::debug!(seq = snapshot.seq, "restoring snapshot");
        self.graph = snapshot.graph;
        self.store.replace_all(snapshot.bindings);
        self.cells = snapshot.cells;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::executor::{ExecOutcome, ExecuteRequest};

    struct NoMerge;
    impl DocumentLayer for NoMerge {
        fn merge(&self, _cell: &CellId, _base: Option<&str>, ours: &str, _theirs: &str) -> String {
            ours.to_string()
        }
    }

    fn runtime() -> Runtime {
        let exec = |_req: ExecuteRequest| ExecOutcome::default();
        Runtime::new(RuntimeConfig::default(), Box::new(exec), Box::new(NoMerge))
    }

    #[test]
    fn test_create_cell_assigns_ordinals_and_notifies() {
        let mut rt = runtime();
        assert!(rt.create_cell(CellId::new("a")));
        assert!(rt.create_cell(CellId::new("b")));
        assert!(!rt.create_cell(CellId::new("a")));

        let ordinals: Vec<usize> = rt.cells_in_display_order().iter().map(|c| c.ordinal).collect();
        assert_eq!(ordinals, vec![0, 1]);

        let kinds: Vec<_> = rt.drain_notifications().into_iter().map(|n| n.kind).collect();
        assert_eq!(kinds, vec![NotificationKind::Created, NotificationKind::Created]);
    }

    #[test]
    fn test_restore_latest_rewinds_to_the_checkpoint() {
        let mut rt = runtime();
        rt.create_cell(CellId::new("a"));
        rt.capture_snapshot();
        rt.create_cell(CellId::new("b"));

        rt.restore_latest().unwrap();
        assert!(rt.cell(&CellId::new("a")).is_some());
        assert!(rt.cell(&CellId::new("b")).is_none());
        // Restoring consumes the snapshot.
        assert!(matches!(
            rt.restore_latest(),
            Err(RuntimeError::NothingToRestore)
        ));
    }

    #[test]
    fn test_move_cell_changes_display_order_only() {
        let mut rt = runtime();
        rt.create_cell(CellId::new("a"));
        rt.create_cell(CellId::new("b"));
        rt.move_cell(&CellId::new("a"), 99).unwrap();

        let ids: Vec<&str> = rt
            .cells_in_display_order()
            .iter()
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
    }
}
