//! Injected capabilities: the computation executor and the document layer.
//!
//! Both are external collaborators. The runtime never evaluates code or
//! merges text itself; it hands those jobs to whatever implementations the
//! embedder supplies.

use crate::runtime::bindings::Value;
use cellflow_engine::CellId;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative cancellation signal for an in-flight run. The scheduler
/// flips it when a run is superseded; a cancelled run's outputs are never
/// applied to the binding store.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One cell execution: source plus the resolved input bindings.
#[derive(Clone, Debug)]
pub struct ExecuteRequest {
    pub cell: CellId,
    pub source: String,
    pub inputs: BTreeMap<String, Value>,
    pub cancel: CancelToken,
}

/// What an execution produced. `outputs` carries every binding the cell
/// defined; `value` is the cell's own evaluation result for display.
#[derive(Clone, Debug, Default)]
pub struct ExecOutcome {
    pub outputs: BTreeMap<String, Value>,
    pub value: Option<Value>,
    pub error: Option<String>,
}

impl ExecOutcome {
    pub fn failure(message: impl Into<String>) -> ExecOutcome {
        ExecOutcome {
            error: Some(message.into()),
            ..ExecOutcome::default()
        }
    }
}

/// The pluggable computation executor. Must be pure with respect to the
/// runtime's own state: it only sees the request and returns an outcome.
pub trait Executor: Send {
    fn execute(&mut self, request: ExecuteRequest) -> ExecOutcome;
}

/// Closures are executors; tests and small embedders lean on this.
impl<F> Executor for F
where
    F: FnMut(ExecuteRequest) -> ExecOutcome + Send,
{
    fn execute(&mut self, request: ExecuteRequest) -> ExecOutcome {
        self(request)
    }
}

/// The external document layer's conflict-free text merge. The runtime
/// never re-implements character-level merging; same-cell concurrent edits
/// are handed here wholesale.
pub trait DocumentLayer: Send {
    /// Merge two concurrent revisions of a cell's source. `base` is the
    /// cell's source before either edit, when known.
    fn merge(&self, cell: &CellId, base: Option<&str>, ours: &str, theirs: &str) -> String;
}
