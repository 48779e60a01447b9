//! Edit events and the outbound notification queue.

use cellflow_engine::{Analysis, CellId};
use serde::{Deserialize, Serialize};

/// Who authored an edit. Determines conflict-resolution policy: humans are
/// never auto-rolled-back, agents are.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Author {
    Human,
    Agent,
}

/// A single source change from the document layer. Consumed once, never
/// mutated; the authoritative record of why a cell's source changed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditEvent {
    pub cell: CellId,
    pub source: String,
    pub author: Author,
    /// Logical clock from the document layer's ordered edit stream. Also
    /// the unit of the debounce window.
    pub clock: u64,
    /// Explicit read/write declaration; bypasses the static scanner when
    /// present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declared: Option<Analysis>,
}

impl EditEvent {
    pub fn new(cell: CellId, source: impl Into<String>, author: Author, clock: u64) -> EditEvent {
        EditEvent {
            cell,
            source: source.into(),
            author,
            clock,
            declared: None,
        }
    }
}

/// Kinds of per-cell status change surfaced to consumers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Created,
    Running,
    Succeeded,
    Failed,
    Stale,
    NeedsReview,
    RolledBack,
}

/// A status-change record. Consumers drain these from the runtime's
/// outbound queue; the core registers no callbacks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub cell: CellId,
    pub kind: NotificationKind,
}

impl Notification {
    pub fn new(cell: CellId, kind: NotificationKind) -> Notification {
        Notification { cell, kind }
    }
}
