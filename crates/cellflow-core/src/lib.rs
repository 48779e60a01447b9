//! cellflow-core - reactive execution runtime over a cell dependency graph.
//!
//! The [`runtime::Runtime`] is the explicitly-owned context holding the
//! dependency graph, binding store, cell records, snapshot history and the
//! injected executor/document capabilities. All mutation goes through its
//! scheduler entry points; everything else reads through accessors.

pub mod config;
pub mod error;
pub mod runtime;

pub use cellflow_engine::{Analysis, CellId, ExecutionPlan, GraphError, ImpactSet, analyze};
pub use config::RuntimeConfig;
pub use error::{Result, RuntimeError};
pub use runtime::{
    Author, Binding, BindingStore, CancelToken, Cell, CellError, CellRunResult, Decision,
    DocumentLayer, EditEvent, ExecOutcome, ExecStatus, ExecuteRequest, Executor, Notification,
    NotificationKind, PersistedSnapshot, PumpOutcome, RhaiExecutor, RollbackReport, Runtime,
    Snapshot, Value,
};
