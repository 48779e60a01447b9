//! cellflow-engine - dependency graph over executable cells.
//!
//! This crate is the graph layer of the runtime:
//!
//! - [`CellId`] - Opaque stable cell identity
//! - [`analyze`] - Light static scan of binding reads/writes in cell source
//! - [`DependencyGraph`] - Derived producer/consumer edges, cycle rejection,
//!   impact sets and deterministic execution planning
//!
//! The runtime layer (`cellflow-core`) owns statuses, values and scheduling;
//! nothing in this crate executes code.

pub mod error;
pub mod graph;
pub mod ids;
pub mod scan;

pub use error::GraphError;
pub use graph::{DeleteOutcome, DependencyGraph, Edge, ExecutionPlan, ImpactSet};
pub use ids::CellId;
pub use scan::{Analysis, analyze};
