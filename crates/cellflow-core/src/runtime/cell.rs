//! Cell records: source, display ordinal, execution status, last output.

use crate::runtime::bindings::Value;
use cellflow_engine::CellId;
use serde::{Deserialize, Serialize};

/// Execution status of a cell.
///
/// Lifecycle: `Pending -> Running -> {Succeeded, Failed}`; any cell drops to
/// `Stale` when an ancestor changes or fails, and goes back to `Pending`
/// once scheduled again. The needs-review flag is an overlay, not a status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Stale,
}

/// Per-cell error taxonomy. Recorded on the cell and surfaced through the
/// notification queue; nothing is silently swallowed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum CellError {
    Cycle { path: Vec<CellId> },
    BindingConflict { name: String, owner: CellId },
    MissingDependency { name: String },
    BlockedByUpstreamFailure { upstream: CellId },
    Executor { message: String },
}

/// An addressable unit of source + output state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub id: CellId,
    /// Display order only. Never consulted for execution order.
    pub ordinal: usize,
    pub source: String,
    pub status: ExecStatus,
    pub error: Option<CellError>,
    /// Set when concurrent same-cell edits were merged and the author
    /// should look at the result.
    pub needs_review: bool,
    /// Last value the cell evaluated to, if any.
    pub output: Option<Value>,
}

impl Cell {
    pub fn new(id: CellId, ordinal: usize) -> Cell {
        Cell {
            id,
            ordinal,
            source: String::new(),
            status: ExecStatus::Pending,
            error: None,
            needs_review: false,
            output: None,
        }
    }
}
