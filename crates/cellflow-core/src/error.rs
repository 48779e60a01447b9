//! Error types for the runtime core.

use cellflow_engine::GraphError;
use thiserror::Error;

/// Errors that can occur while driving the runtime. Per-cell execution
/// failures are not errors at this level; they land on the cell record as
/// [`crate::runtime::CellError`].
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("graph update rejected: {0}")]
    Graph(#[from] GraphError),

    #[error("no snapshot available to restore")]
    NothingToRestore,

    #[error("snapshot schema version {found} is not supported (expected {expected})")]
    SchemaVersionMismatch { expected: u32, found: u32 },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot serialization error: {0}")]
    Persist(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
