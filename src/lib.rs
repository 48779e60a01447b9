//! cellflow - reactive execution runtime over a cell dependency graph.
//!
//! Facade crate re-exporting the two workspace members:
//! [`cellflow_engine`] (binding scan, dependency graph, execution planning)
//! and [`cellflow_core`] (runtime state, scheduling, snapshots, conflict
//! resolution, the Rhai reference executor).

pub use cellflow_core::{
    Author, Binding, BindingStore, CancelToken, Cell, CellError, CellRunResult, Decision,
    DocumentLayer, EditEvent, ExecOutcome, ExecStatus, ExecuteRequest, Executor, Notification,
    NotificationKind, PersistedSnapshot, PumpOutcome, Result, RhaiExecutor, RollbackReport,
    Runtime, RuntimeConfig, RuntimeError, Snapshot, Value,
};
pub use cellflow_engine::{
    Analysis, CellId, DependencyGraph, Edge, ExecutionPlan, GraphError, ImpactSet, analyze,
};
