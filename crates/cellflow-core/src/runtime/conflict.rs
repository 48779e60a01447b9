//! Conflict resolution for edits arriving from two independent authors.
//!
//! Three rules, applied in order:
//! 1. disjoint cells: admit immediately
//! 2. same-cell concurrent edits: merged upstream by the document layer
//!    (see the scheduler's coalescing) and admitted as one edit with a
//!    needs-review overlay
//! 3. dependency-breaking agent edits: if the graph update would break a
//!    cell the agent didn't author, restore the pre-batch snapshot and hand
//!    back a structured explanation. Humans are never auto-rolled-back; a
//!    human-caused break surfaces as an ordinary failed cell.

use crate::error::{Result, RuntimeError};
use crate::runtime::cell::{CellError, ExecStatus};
use crate::runtime::events::{Author, EditEvent, NotificationKind};
use crate::runtime::state::Runtime;
use cellflow_engine::{CellId, GraphError, analyze};
use std::collections::BTreeSet;

/// An open agent batch: its ordering number and the rollback target taken
/// before the batch touched anything.
#[derive(Clone, Copy, Debug)]
pub(crate) struct AgentBatch {
    pub(crate) batch_seq: u64,
    pub(crate) snapshot_seq: u64,
}

/// How an edit was admitted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Accepted,
    Merged,
    RolledBack(RollbackReport),
}

/// Why an agent edit was reverted; reported back so the agent can retry
/// with different code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RollbackReport {
    pub broken_cell: CellId,
    pub missing_binding: String,
    pub caused_by: CellId,
    pub snapshot_seq: u64,
}

impl Runtime {
    /// Open an agent batch: captures the rollback snapshot and returns the
    /// batch sequence number. Batches are totally ordered by this number;
    /// a still-open previous batch is ended first.
    pub fn begin_agent_batch(&mut self) -> u64 {
        self.end_agent_batch();
        let batch_seq = self.next_batch_seq;
        self.next_batch_seq += 1;
        let snapshot_seq = self.capture_snapshot();
        tracing::debug!(batch_seq, snapshot_seq, "agent batch opened");
        self.agent_batch = Some(AgentBatch {
            batch_seq,
            snapshot_seq,
        });
        batch_seq
    }

    /// Close the open agent batch, if any, discarding its snapshot.
    pub fn end_agent_batch(&mut self) {
        if let Some(batch) = self.agent_batch.take() {
            self.snapshots.discard(batch.snapshot_seq);
        }
    }

    /// Admit a single edit immediately, bypassing the debounce queue.
    pub fn admit(&mut self, event: EditEvent) -> Result<Decision> {
        if !self.cells.contains_key(&event.cell) {
            if event.source.trim().is_empty() {
                return Ok(Decision::Accepted);
            }
            self.create_cell(event.cell.clone());
        }
        self.admit_edit(event, false)
    }

    pub(crate) fn admit_edit(&mut self, event: EditEvent, merged: bool) -> Result<Decision> {
        let _span =
            tracing::info_span!("admit", cell = %event.cell, author = ?event.author).entered();

        // Agent edits always have a rollback target: the open batch's
        // snapshot, or an implicit one for a lone edit.
        let (guard_seq, implicit_guard) = match (event.author, &self.agent_batch) {
            (Author::Agent, Some(batch)) => (Some(batch.snapshot_seq), false),
            (Author::Agent, None) => (Some(self.capture_snapshot()), true),
            (Author::Human, _) => (None, false),
        };

        let broken_before = self.broken_cells();

        let analysis = event
            .declared
            .clone()
            .unwrap_or_else(|| analyze(&event.source));

        let impact = match self.graph.apply_edit(&event.cell, analysis) {
            Ok(impact) => impact,
            Err(GraphError::BindingConflict {
                name,
                owner,
                claimant,
            }) => {
                if event.author == Author::Agent {
                    let report = RollbackReport {
                        broken_cell: owner,
                        missing_binding: name,
                        caused_by: claimant,
                        snapshot_seq: guard_seq.unwrap_or_default(),
                    };
                    return self.roll_back(report);
                }
                // Human: the text stands, the cell fails visibly.
                if let Some(cell) = self.cells.get_mut(&event.cell) {
                    cell.source = event.source;
                }
                self.set_status(
                    &event.cell,
                    ExecStatus::Failed,
                    Some(CellError::BindingConflict { name, owner }),
                );
                if merged {
                    self.flag_needs_review(&event.cell);
                }
                return Ok(if merged {
                    Decision::Merged
                } else {
                    Decision::Accepted
                });
            }
            Err(err) => {
                // Cycle or unknown cell: rejected at edit time, graph and
                // statuses untouched.
                if implicit_guard && let Some(seq) = guard_seq {
                    self.snapshots.discard(seq);
                }
                return Err(err.into());
            }
        };

        if let Some(cell) = self.cells.get_mut(&event.cell) {
            cell.source = event.source.clone();
            if !merged {
                cell.needs_review = false;
            }
        }
        if merged {
            self.flag_needs_review(&event.cell);
        }

        for id in &impact {
            if *id == event.cell {
                self.set_status(id, ExecStatus::Pending, None);
            } else {
                self.set_status(id, ExecStatus::Stale, None);
            }
        }

        // Rule 3: did this update newly break a cell this edit doesn't own?
        let broken_now: Vec<CellId> = self
            .broken_cells()
            .difference(&broken_before)
            .filter(|id| **id != event.cell)
            .cloned()
            .collect();

        if !broken_now.is_empty() {
            if event.author == Author::Agent {
                let broken_cell = broken_now[0].clone();
                let missing_binding = self
                    .graph
                    .missing_inputs(&broken_cell)
                    .into_iter()
                    .next()
                    .unwrap_or_default();
                let report = RollbackReport {
                    broken_cell,
                    missing_binding,
                    caused_by: event.cell,
                    snapshot_seq: guard_seq.unwrap_or_default(),
                };
                return self.roll_back(report);
            }
            // Human break: the orphaned cells re-run and fail visibly, and
            // their own readers are re-planned so they end up blocked
            // instead of quietly keeping an old value.
            for id in &broken_now {
                let downstream = self.graph.impact_of(id);
                for member in &downstream {
                    if *member != event.cell {
                        self.set_status(member, ExecStatus::Stale, None);
                    }
                }
                self.dirty.extend(downstream);
            }
        }

        self.dirty.extend(impact);
        if implicit_guard && let Some(seq) = guard_seq {
            self.snapshots.discard(seq);
        }

        Ok(if merged {
            Decision::Merged
        } else {
            Decision::Accepted
        })
    }

    fn roll_back(&mut self, report: RollbackReport) -> Result<Decision> {
        tracing::warn!(
            broken = %report.broken_cell,
            missing = %report.missing_binding,
            caused_by = %report.caused_by,
            "agent edit broke a dependent, rolling back"
        );
        let snapshot = self
            .snapshots
            .take(report.snapshot_seq)
            .ok_or(RuntimeError::NothingToRestore)?;
        self.restore_snapshot(snapshot)?;
        // The batch's accumulated work is void.
        self.dirty.clear();
        self.agent_batch = None;
        self.notify(report.caused_by.clone(), NotificationKind::RolledBack);
        Ok(Decision::RolledBack(report))
    }

    /// Cells currently reading a name no live cell produces.
    fn broken_cells(&self) -> BTreeSet<CellId> {
        self.graph
            .cell_ids()
            .filter(|id| !self.graph.missing_inputs(id).is_empty())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::runtime::bindings::Value;
    use crate::runtime::executor::{DocumentLayer, ExecOutcome, ExecuteRequest};
    use serde_json::json;

    struct KeepOurs;
    impl DocumentLayer for KeepOurs {
        fn merge(&self, _cell: &CellId, _base: Option<&str>, ours: &str, theirs: &str) -> String {
            format!("{ours}\n{theirs}")
        }
    }

    fn echo_executor(req: ExecuteRequest) -> ExecOutcome {
        let mut outcome = ExecOutcome::default();
        for name in cellflow_engine::analyze(&req.source).writes {
            outcome.outputs.insert(name, Value::json(json!(1)));
        }
        outcome
    }

    fn runtime() -> Runtime {
        Runtime::new(
            RuntimeConfig {
                debounce_ticks: 0,
                ..RuntimeConfig::default()
            },
            Box::new(echo_executor),
            Box::new(KeepOurs),
        )
    }

    fn edit(cell: &str, source: &str, author: Author, clock: u64) -> EditEvent {
        EditEvent::new(CellId::new(cell), source, author, clock)
    }

    fn seed_chain(rt: &mut Runtime) {
        rt.ingest(edit("a", "let x = 1;", Author::Human, 0));
        rt.ingest(edit("b", "let y = x + 1;", Author::Human, 1));
        rt.pump(10).unwrap();
        rt.drain_notifications();
    }

    #[test]
    fn test_agent_break_rolls_back_to_pre_batch_state() {
        let mut rt = runtime();
        seed_chain(&mut rt);

        rt.begin_agent_batch();
        let graph_before = rt.graph().clone();
        let bindings_before = rt.bindings().export();
        let cells_before: Vec<_> = rt.cells_in_display_order().iter().map(|c| (*c).clone()).collect();

        // Agent stops producing x, which b still reads.
        let decision = rt
            .admit(edit("a", "let q = 1;", Author::Agent, 20))
            .unwrap();

        let report = match decision {
            Decision::RolledBack(report) => report,
            other => panic!("expected rollback, got {other:?}"),
        };
        assert_eq!(report.broken_cell, CellId::new("b"));
        assert_eq!(report.missing_binding, "x");
        assert_eq!(report.caused_by, CellId::new("a"));

        // State is exactly the pre-batch snapshot.
        assert_eq!(rt.graph(), &graph_before);
        assert_eq!(rt.bindings().export(), bindings_before);
        let cells_after: Vec<_> = rt.cells_in_display_order().iter().map(|c| (*c).clone()).collect();
        assert_eq!(cells_after, cells_before);
        assert_eq!(rt.cell(&CellId::new("a")).unwrap().source, "let x = 1;");

        assert!(
            rt.drain_notifications()
                .iter()
                .any(|n| n.kind == NotificationKind::RolledBack)
        );
    }

    #[test]
    fn test_lone_agent_edit_rolls_back_without_explicit_batch() {
        let mut rt = runtime();
        seed_chain(&mut rt);

        let decision = rt
            .admit(edit("a", "let q = 1;", Author::Agent, 20))
            .unwrap();
        assert!(matches!(decision, Decision::RolledBack(_)));
        assert_eq!(rt.cell(&CellId::new("a")).unwrap().source, "let x = 1;");
    }

    #[test]
    fn test_human_break_is_accepted_and_fails_visibly() {
        let mut rt = runtime();
        seed_chain(&mut rt);

        let decision = rt
            .admit(edit("a", "let q = 1;", Author::Human, 20))
            .unwrap();
        assert_eq!(decision, Decision::Accepted);

        let outcome = rt.pump(30).unwrap();
        assert!(!outcome.results.is_empty());
        let b = rt.cell(&CellId::new("b")).unwrap();
        assert_eq!(b.status, ExecStatus::Failed);
        assert_eq!(
            b.error,
            Some(CellError::MissingDependency { name: "x".into() })
        );
    }

    #[test]
    fn test_agent_breaking_only_its_own_cell_is_accepted() {
        let mut rt = runtime();
        seed_chain(&mut rt);

        // The agent's own cell reads something undefined; rule 3 only
        // protects cells the edit didn't author.
        let decision = rt
            .admit(edit("c", "let w = nonexistent;", Author::Agent, 20))
            .unwrap();
        assert_eq!(decision, Decision::Accepted);

        rt.pump(30).unwrap();
        let c = rt.cell(&CellId::new("c")).unwrap();
        assert_eq!(c.status, ExecStatus::Failed);
        assert_eq!(
            c.error,
            Some(CellError::MissingDependency {
                name: "nonexistent".into()
            })
        );
    }

    #[test]
    fn test_agent_binding_conflict_rolls_back() {
        let mut rt = runtime();
        seed_chain(&mut rt);

        rt.begin_agent_batch();
        let decision = rt
            .admit(edit("c", "let x = 99;", Author::Agent, 20))
            .unwrap();
        let report = match decision {
            Decision::RolledBack(report) => report,
            other => panic!("expected rollback, got {other:?}"),
        };
        assert_eq!(report.broken_cell, CellId::new("a"));
        assert_eq!(report.missing_binding, "x");
        assert_eq!(report.caused_by, CellId::new("c"));
    }

    #[test]
    fn test_human_binding_conflict_fails_the_editing_cell() {
        let mut rt = runtime();
        seed_chain(&mut rt);

        let decision = rt
            .admit(edit("c", "let x = 99;", Author::Human, 20))
            .unwrap();
        assert_eq!(decision, Decision::Accepted);
        let c = rt.cell(&CellId::new("c")).unwrap();
        assert_eq!(c.status, ExecStatus::Failed);
        assert_eq!(
            c.error,
            Some(CellError::BindingConflict {
                name: "x".into(),
                owner: CellId::new("a"),
            })
        );
        // The original owner keeps the binding.
        assert_eq!(rt.bindings().get("x").unwrap().owner, CellId::new("a"));
    }

    #[test]
    fn test_cycle_rejection_leaves_statuses_unchanged() {
        let mut rt = runtime();
        seed_chain(&mut rt);
        let cells_before: Vec<_> = rt.cells_in_display_order().iter().map(|c| (*c).clone()).collect();

        let err = rt
            .admit(edit("a", "let x = y;", Author::Human, 20))
            .unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Graph(GraphError::CycleDetected { .. })
        ));
        let cells_after: Vec<_> = rt.cells_in_display_order().iter().map(|c| (*c).clone()).collect();
        assert_eq!(cells_after, cells_before);
    }

    #[test]
    fn test_batch_sequence_numbers_are_monotone() {
        let mut rt = runtime();
        let first = rt.begin_agent_batch();
        let second = rt.begin_agent_batch();
        assert!(second > first);
        rt.end_agent_batch();
        assert!(rt.latest_snapshot_seq().is_none());
    }
}
