//! Error types for the graph layer.

use crate::ids::CellId;
use thiserror::Error;

/// Errors raised while updating or planning over the dependency graph.
///
/// A failed graph update always leaves the graph unchanged; these errors are
/// rejections, not partial states.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("cycle detected: {}", join_path(path))]
    CycleDetected { path: Vec<CellId> },

    #[error("binding `{name}` is already produced by cell {owner} (claimed by {claimant})")]
    BindingConflict {
        name: String,
        owner: CellId,
        claimant: CellId,
    },

    #[error("unknown cell {0}")]
    UnknownCell(CellId),
}

fn join_path(path: &[CellId]) -> String {
    path.iter()
        .map(CellId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}
