//! Durable snapshot format.
//!
//! The persisted form carries cell records, live bindings, and each cell's
//! read/write analysis; the dependency graph itself is never serialized
//! because it is fully derivable from the analyses. A schema version guards
//! against loading a snapshot written by an incompatible build.

use crate::error::{Result, RuntimeError};
use crate::runtime::bindings::Binding;
use crate::runtime::cell::Cell;
use crate::runtime::state::Runtime;
use cellflow_engine::{Analysis, CellId, DependencyGraph};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const SCHEMA_VERSION: u32 = 1;

/// A self-contained, versioned snapshot suitable for writing to disk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedSnapshot {
    pub schema_version: u32,
    pub seq: u64,
    pub cells: BTreeMap<CellId, Cell>,
    pub analyses: BTreeMap<CellId, Analysis>,
    pub bindings: Vec<Binding>,
}

impl PersistedSnapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<PersistedSnapshot> {
        let snapshot: PersistedSnapshot = serde_json::from_str(json)?;
        if snapshot.schema_version != SCHEMA_VERSION {
            return Err(RuntimeError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION,
                found: snapshot.schema_version,
            });
        }
        Ok(snapshot)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<PersistedSnapshot> {
        let json = std::fs::read_to_string(path)?;
        PersistedSnapshot::from_json(&json)
    }
}

impl Runtime {
    /// Export the current state as a durable snapshot.
    pub fn export_snapshot(&mut self) -> PersistedSnapshot {
        let seq = self.capture_snapshot();
        let mut analyses = BTreeMap::new();
        for id in self.graph.cell_ids() {
            analyses.insert(
                id.clone(),
                Analysis {
                    reads: self.graph.reads_of(id),
                    writes: self.graph.writes_of(id),
                },
            );
        }
        PersistedSnapshot {
            schema_version: SCHEMA_VERSION,
            seq,
            cells: self.cells.clone(),
            analyses,
            bindings: self.store.export(),
        }
    }

    /// Replace the live state with a loaded snapshot. The graph is rebuilt
    /// from the persisted analyses; a snapshot that fails graph validation
    /// was corrupted and is rejected wholesale.
    pub fn import_snapshot(&mut self, snapshot: PersistedSnapshot) -> Result<()> {
        if snapshot.schema_version != SCHEMA_VERSION {
            return Err(RuntimeError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION,
                found: snapshot.schema_version,
            });
        }

        let mut graph = DependencyGraph::new();
        for id in snapshot.cells.keys() {
            graph.insert_cell(id.clone());
        }
        for (id, analysis) in &snapshot.analyses {
            graph
                .apply_edit(id, analysis.clone())
                .map_err(|err| RuntimeError::InvariantViolation(format!(
                    "persisted snapshot failed graph validation: {err}"
                )))?;
        }

        tracing::debug!(seq = snapshot.seq, cells = snapshot.cells.len(), "snapshot imported");
        self.graph = graph;
        self.store.replace_all(snapshot.bindings);
        self.next_ordinal = snapshot
            .cells
            .values()
            .map(|c| c.ordinal + 1)
            .max()
            .unwrap_or(0);
        self.cells = snapshot.cells;
        self.pending.clear();
        self.dirty.clear();
        self.agent_batch = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::runtime::conflict::Decision;
    use crate::runtime::events::{Author, EditEvent};
    use crate::runtime::rhai_exec::RhaiExecutor;
    use crate::runtime::executor::DocumentLayer;
    use serde_json::json;

    struct NoMerge;
    impl DocumentLayer for NoMerge {
        fn merge(&self, _cell: &CellId, _base: Option<&str>, ours: &str, _theirs: &str) -> String {
            ours.to_string()
        }
    }

    fn populated_runtime() -> Runtime {
        let mut rt = Runtime::new(
            RuntimeConfig::default(),
            Box::new(RhaiExecutor::default()),
            Box::new(NoMerge),
        );
        let a = EditEvent::new(CellId::new("a"), "let x = 2;", Author::Human, 0);
        let b = EditEvent::new(CellId::new("b"), "let y = x + 1;", Author::Human, 1);
        assert_eq!(rt.admit(a).unwrap(), Decision::Accepted);
        assert_eq!(rt.admit(b).unwrap(), Decision::Accepted);
        rt.pump(100).unwrap();
        rt
    }

    #[test]
    fn test_export_import_preserves_state() {
        let mut rt = populated_runtime();
        let exported = rt.export_snapshot();
        let json = exported.to_json().unwrap();

        let mut fresh = Runtime::new(
            RuntimeConfig::default(),
            Box::new(RhaiExecutor::default()),
            Box::new(NoMerge),
        );
        fresh
            .import_snapshot(PersistedSnapshot::from_json(&json).unwrap())
            .unwrap();

        assert_eq!(fresh.bindings().read("x").unwrap().data, json!(2));
        assert_eq!(fresh.bindings().read("y").unwrap().data, json!(3));
        assert_eq!(fresh.graph(), rt.graph());
        assert_eq!(
            fresh.cell(&CellId::new("b")).unwrap().source,
            "let y = x + 1;"
        );
    }

    #[test]
    fn test_version_mismatch_is_rejected() {
        let mut rt = populated_runtime();
        let mut exported = rt.export_snapshot();
        exported.schema_version = 99;
        let json = serde_json::to_string(&exported).unwrap();

        let err = PersistedSnapshot::from_json(&json).unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION,
                found: 99,
            }
        ));
    }

    #[test]
    fn test_imported_cells_keep_display_order() {
        let mut rt = populated_runtime();
        rt.move_cell(&CellId::new("a"), 10).unwrap();
        let exported = rt.export_snapshot();

        let mut fresh = Runtime::new(
            RuntimeConfig::default(),
            Box::new(RhaiExecutor::default()),
            Box::new(NoMerge),
        );
        fresh.import_snapshot(exported).unwrap();

        let ids: Vec<&str> = fresh
            .cells_in_display_order()
            .iter()
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
        // New cells land after everything restored.
        assert_eq!(fresh.cells_in_display_order().last().unwrap().ordinal, 10);
    }
}
