//! Runtime state and scheduling (executor-agnostic).

mod bindings;
mod cell;
mod conflict;
mod events;
mod executor;
mod persist;
mod rhai_exec;
mod scheduler;
mod snapshot;
mod state;

pub use bindings::{Binding, BindingStore, Value};
pub use cell::{Cell, CellError, ExecStatus};
pub use conflict::{Decision, RollbackReport};
pub use events::{Author, EditEvent, Notification, NotificationKind};
pub use executor::{CancelToken, DocumentLayer, ExecOutcome, ExecuteRequest, Executor};
pub use persist::{PersistedSnapshot, SCHEMA_VERSION};
pub use rhai_exec::RhaiExecutor;
pub use scheduler::{CellRunResult, PumpOutcome};
pub use snapshot::{Snapshot, SnapshotManager};
pub use state::Runtime;
