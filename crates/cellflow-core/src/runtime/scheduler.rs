//! The execution scheduler: edit ingestion, debounce coalescing, and the
//! sequential plan driver.
//!
//! Single logical writer: all graph/store mutation happens inside these
//! methods. Cell computation is handed to the injected executor one cell at
//! a time in plan order; a failed cell blocks its transitive dependents
//! (they go `Stale` with `BlockedByUpstreamFailure`) while the unaffected
//! remainder of the plan always finishes.

use crate::error::Result;
use crate::runtime::bindings::Value;
use crate::runtime::cell::{CellError, ExecStatus};
use crate::runtime::conflict::Decision;
use crate::runtime::events::{Author, EditEvent};
use crate::runtime::executor::{CancelToken, ExecuteRequest};
use crate::runtime::state::Runtime;
use cellflow_engine::{CellId, ExecutionPlan, ImpactSet};
use std::collections::{BTreeMap, BTreeSet};

/// Per-cell outcome of driving a plan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CellRunResult {
    pub cell: CellId,
    pub status: ExecStatus,
    pub error: Option<CellError>,
}

/// Everything one `pump` call did: admission decisions per coalesced edit,
/// then per-cell run results.
#[derive(Debug, Default)]
pub struct PumpOutcome {
    pub decisions: Vec<(CellId, Result<Decision>)>,
    pub results: Vec<CellRunResult>,
}

impl Runtime {
    /// Accept an edit event from the document layer.
    ///
    /// Unknown cell ids create a new cell; an empty source with no prior
    /// cell is a no-op. Nothing here blocks on execution: unrelated edits
    /// queue independently and admission happens between pumps (the driver
    /// is synchronous, so a pump runs its plan to completion before the
    /// next edit can arrive). Cancellation of an in-flight run is signalled
    /// through the [`CancelToken`] handed to the executor, which owns any
    /// threading.
    pub fn ingest(&mut self, event: EditEvent) {
        if !self.cells.contains_key(&event.cell) {
            if event.source.trim().is_empty() {
                return;
            }
            self.create_cell(event.cell.clone());
        }

        self.pending.push(event);
    }

    /// Drive the runtime forward at logical time `now`: coalesce due edits
    /// (same-author drafts collapse to the newest text, mixed-author edits
    /// merge through the document layer), admit them through the conflict
    /// resolver, then plan and execute the accumulated impact.
    pub fn pump(&mut self, now: u64) -> Result<PumpOutcome> {
        let _span = tracing::info_span!("pump", now).entered();
        let mut outcome = PumpOutcome::default();

        self.pending
            .sort_by(|a, b| (a.clock, &a.cell).cmp(&(b.clock, &b.cell)));

        for event in self.coalesce_due(now) {
            let cell = event.0.cell.clone();
            let decision = self.admit_edit(event.0, event.1);
            outcome.decisions.push((cell, decision));
        }

        if !self.dirty.is_empty() {
            // Deleted cells may linger in the dirty set.
            let impact: ImpactSet = self
                .dirty
                .iter()
                .filter(|id| self.graph.contains(id))
                .cloned()
                .collect();
            self.dirty.clear();

            let plan = self.graph.plan(&impact)?;
            outcome.results = self.run_plan(&plan);
        }

        Ok(outcome)
    }

    /// Pull every due edit out of the pending queue, collapsing same-cell
    /// edits within the debounce window into one event. Successive edits by
    /// one author are keystroke collapsing: the newest text supersedes the
    /// earlier drafts. Only edits with differing authors go through the
    /// document layer's merge. Returns (event, was_merged) in deterministic
    /// (clock, cell) order.
    fn coalesce_due(&mut self, now: u64) -> Vec<(EditEvent, bool)> {
        let mut groups: BTreeMap<CellId, Vec<EditEvent>> = BTreeMap::new();
        for event in self.pending.drain(..) {
            groups.entry(event.cell.clone()).or_default().push(event);
        }

        let mut due: Vec<(EditEvent, bool)> = Vec::new();
        for (cell, mut events) in groups {
            let newest = events.last().map(|e| e.clock).unwrap_or(0);
            if newest + self.config.debounce_ticks > now {
                // Still inside the window; hold for the next pump.
                self.pending.append(&mut events);
                continue;
            }

            if events.iter().all(|e| e.author == events[0].author) {
                // One author refining their own text; the latest draft wins.
                if let Some(last) = events.pop() {
                    due.push((last, false));
                }
                continue;
            }

            // Same-cell concurrent edits: never pick one arbitrarily. The
            // document layer merges; the result is admitted as one edit.
            let base = self.cells.get(&cell).map(|c| c.source.clone());
            let mut events = events.into_iter();
            let first = match events.next() {
                Some(e) => e,
                None => continue,
            };
            let mut source = first.source;
            let mut clock = first.clock;
            let mut author = first.author;
            for next in events {
                source = self
                    .document
                    .merge(&cell, base.as_deref(), &source, &next.source);
                clock = clock.max(next.clock);
                // A merge involving any human edit must never be eligible
                // for agent auto-rollback.
                if next.author != author {
                    author = Author::Human;
                }
            }
            due.push((EditEvent::new(cell, source, author, clock), true));
        }

        due.sort_by(|a, b| (a.0.clock, &a.0.cell).cmp(&(b.0.clock, &b.0.cell)));
        due
    }

    /// Delete a cell: its bindings disappear and any surviving reader
    /// fails with `MissingDependency` instead of silently keeping the old
    /// value.
    pub fn delete_cell(&mut self, id: &CellId) -> Result<Vec<CellId>> {
        let outcome = self.graph.delete_cell(id)?;
        self.store.clear_owned(id);
        self.cells.remove(id);
        self.pending.retain(|e| e.cell != *id);
        self.dirty.remove(id);

        for orphan in &outcome.orphaned {
            let name = self
                .graph
                .missing_inputs(orphan)
                .into_iter()
                .find(|n| outcome.removed_bindings.contains(n))
                .unwrap_or_else(|| outcome.removed_bindings.join(", "));
            self.set_status(
                orphan,
                ExecStatus::Failed,
                Some(CellError::MissingDependency { name }),
            );
        }
        Ok(outcome.orphaned)
    }

    /// Run a plan sequentially, one cell at a time in plan order.
    pub(crate) fn run_plan(&mut self, plan: &ExecutionPlan) -> Vec<CellRunResult> {
        let _span = tracing::info_span!("run_plan", cells = plan.len()).entered();
        let mut results = Vec::with_capacity(plan.len());
        // Cells in this plan that failed or were blocked; plan order makes
        // transitive blocking fall out of direct-dependency checks.
        let mut failed: BTreeSet<CellId> = BTreeSet::new();

        for id in plan.iter() {
            if !self.cells.contains_key(id) {
                continue;
            }

            if let Some(upstream) = self
                .graph
                .dependencies_of(id)
                .into_iter()
                .find(|dep| failed.contains(dep))
            {
                let error = CellError::BlockedByUpstreamFailure { upstream };
                self.set_status(id, ExecStatus::Stale, Some(error.clone()));
                failed.insert(id.clone());
                results.push(CellRunResult {
                    cell: id.clone(),
                    status: ExecStatus::Stale,
                    error: Some(error),
                });
                continue;
            }

            let result = self.run_cell(id);
            if matches!(result.status, ExecStatus::Failed) {
                failed.insert(id.clone());
            }
            results.push(result);
        }

        results
    }

    fn run_cell(&mut self, id: &CellId) -> CellRunResult {
        let fail = |rt: &mut Runtime, error: CellError| {
            rt.set_status(id, ExecStatus::Failed, Some(error.clone()));
            CellRunResult {
                cell: id.clone(),
                status: ExecStatus::Failed,
                error: Some(error),
            }
        };

        // Stale values must never leak into a later read, even when this
        // run fails before reaching the executor.
        self.store.clear_owned(id);

        if let Some(name) = self.graph.missing_inputs(id).into_iter().next() {
            return fail(self, CellError::MissingDependency { name });
        }

        self.set_status(id, ExecStatus::Running, None);

        let mut inputs: BTreeMap<String, Value> = BTreeMap::new();
        for name in self.graph.reads_of(id) {
            match self.store.read(&name) {
                Some(value) => {
                    inputs.insert(name, value);
                }
                None => {
                    // A producer exists but holds no value: its run was
                    // cancelled or failed upstream of this plan.
                    return fail(self, CellError::MissingDependency { name });
                }
            }
        }

        let source = self
            .cells
            .get(id)
            .map(|c| c.source.clone())
            .unwrap_or_default();
        let token = CancelToken::new();
        let outcome = self.executor.execute(ExecuteRequest {
            cell: id.clone(),
            source,
            inputs,
            cancel: token.clone(),
        });

        if token.is_cancelled() {
            // The executor observed a supersede and bailed out; partial
            // outputs are discarded wholesale.
            tracing::debug!(cell = %id, "run cancelled, outputs discarded");
            self.set_status(id, ExecStatus::Stale, None);
            return CellRunResult {
                cell: id.clone(),
                status: ExecStatus::Stale,
                error: None,
            };
        }

        if let Some(message) = outcome.error {
            return fail(self, CellError::Executor { message });
        }

        let declared = self.graph.writes_of(id);
        for (name, value) in outcome.outputs {
            if !declared.contains(&name) {
                tracing::warn!(cell = %id, name, "undeclared output ignored");
                continue;
            }
            if let Err(error) = self.store.write(id, &name, value) {
                return fail(self, error);
            }
        }

        if let Some(cell) = self.cells.get_mut(id) {
            cell.output = outcome.value;
        }
        self.set_status(id, ExecStatus::Succeeded, None);
        CellRunResult {
            cell: id.clone(),
            status: ExecStatus::Succeeded,
            error: None,
        }
    }
}
