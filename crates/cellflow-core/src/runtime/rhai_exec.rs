//! Reference executor backed by the Rhai scripting engine.
//!
//! Inputs arrive as scope variables, every variable left in scope after
//! evaluation is offered back as an output (the scheduler keeps only the
//! declared writes), and the script's final expression becomes the cell's
//! display value. Cancellation is polled through the engine's progress
//! hook, and a hard operations budget bounds runaway scripts.

use crate::runtime::bindings::Value;
use crate::runtime::executor::{ExecOutcome, ExecuteRequest, Executor};
use rhai::{Dynamic, Engine, EvalAltResult, Scope};

pub struct RhaiExecutor {
    engine: Engine,
}

impl RhaiExecutor {
    /// `ops_budget` caps the number of engine operations per run; 0 means
    /// unlimited.
    pub fn new(ops_budget: u64) -> RhaiExecutor {
        let mut engine = Engine::new();
        engine.set_max_operations(ops_budget);
        RhaiExecutor { engine }
    }
}

impl Default for RhaiExecutor {
    fn default() -> RhaiExecutor {
        RhaiExecutor::new(crate::config::RuntimeConfig::default().executor_ops_budget)
    }
}

impl Executor for RhaiExecutor {
    fn execute(&mut self, request: ExecuteRequest) -> ExecOutcome {
        let cancel = request.cancel.clone();
        self.engine.on_progress(move |_ops| {
            if cancel.is_cancelled() {
                Some(Dynamic::UNIT)
            } else {
                None
            }
        });

        let mut scope = Scope::new();
        for (name, value) in &request.inputs {
            match rhai::serde::to_dynamic(&value.data) {
                Ok(dynamic) => {
                    scope.push_dynamic(name.clone(), dynamic);
                }
                Err(err) => {
                    return ExecOutcome::failure(format!(
                        "input {name} is not representable: {err}"
                    ));
                }
            }
        }

        let result = self
            .engine
            .eval_with_scope::<Dynamic>(&mut scope, &request.source);

        let mut outcome = ExecOutcome::default();
        match result {
            Ok(value) => {
                if !value.is_unit() {
                    outcome.value = Some(to_value(&value));
                }
                for (name, _constant, value) in scope.iter() {
                    outcome.outputs.insert(name.to_string(), to_value(&value));
                }
            }
            Err(err) => {
                if matches!(*err, EvalAltResult::ErrorTerminated(..)) {
                    // Cancelled via the progress hook; the scheduler sees the
                    // flipped token and discards the run without an error.
                } else {
                    outcome.error = Some(err.to_string());
                }
            }
        }
        outcome
    }
}

/// Dynamic values that serde can't represent (closures, external types) keep
/// their type name as the tag and a display rendering as the payload.
fn to_value(dynamic: &Dynamic) -> Value {
    match rhai::serde::from_dynamic::<serde_json::Value>(dynamic) {
        Ok(data) => Value::json(data),
        Err(_) => Value::new(
            dynamic.type_name(),
            serde_json::Value::String(dynamic.to_string()),
        ),
    }
}
