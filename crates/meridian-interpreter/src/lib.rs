#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **meridian-interpreter** – The pure workflow interpreter:
//! `applyEvent` folds a completed step into an [`ExecutionSnapshot`]; `next`
//! walks a compiled workflow's step tree to find the next step instance due
//! to run, or reports the run complete. Neither function touches disk,
//! locks, or tokens — both are plain, deterministic state transitions over
//! their arguments.

mod context;
mod error;

pub use error::InterpreterError;

use std::collections::HashSet;

use meridian_types::{ExecutionSnapshot, IterationSource, LoopFrame, StepDefinition, StepInstance};
use serde_json::Value;

/// The only event the interpreter folds: a step instance finished running.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The named step instance completed.
    StepCompleted(StepInstance),
}

/// The result of a `next` walk.
#[derive(Debug, Clone, PartialEq)]
pub struct NextResult {
    /// The snapshot to persist: `completed` may have grown (steps skipped
    /// because their `run_condition` was false are folded in automatically),
    /// and `pending` reflects the returned instance.
    pub state: ExecutionSnapshot,
    /// The step instance now due to run, if the workflow is not complete.
    pub pending: Option<StepInstance>,
    /// Whether the walk found no further work.
    pub is_complete: bool,
}

/// Fold a `StepCompleted` event into `state`. Fails unless the event names
/// exactly the instance currently `pending` — stale or mismatched
/// completions are rejected rather than silently accepted.
pub fn apply_event(
    state: &ExecutionSnapshot,
    event: &EngineEvent,
) -> Result<ExecutionSnapshot, InterpreterError> {
    let EngineEvent::StepCompleted(instance) = event;

    let pending = state.pending().ok_or_else(|| {
        InterpreterError::ApplyFailed("no step is pending in the current state".to_string())
    })?;

    if pending.instance_key() != instance.instance_key() {
        return Err(InterpreterError::ApplyFailed(format!(
            "completed instance {:?} does not match pending instance {:?}",
            instance.instance_key(),
            pending.instance_key()
        )));
    }

    let mut new_state = state.clone();
    new_state.mark_completed(instance.instance_key());
    if let ExecutionSnapshot::Running { pending, .. } = &mut new_state {
        *pending = None;
    }
    Ok(new_state)
}

/// Walk `steps` (the workflow's compiled, top-level step tree) to find the
/// next step instance due to run, given `state`'s history and `context`
/// (the caller-supplied data loop/run-condition expressions resolve
/// against). Steps whose `run_condition` evaluates false are folded into
/// `completed` as skipped, without being returned as `pending`.
pub fn next(
    steps: &[StepDefinition],
    state: &ExecutionSnapshot,
    context: &Value,
) -> Result<NextResult, InterpreterError> {
    match state {
        ExecutionSnapshot::Complete => {
            return Ok(NextResult {
                state: ExecutionSnapshot::Complete,
                pending: None,
                is_complete: true,
            });
        }
        ExecutionSnapshot::Running {
            pending: Some(pending),
            ..
        } => {
            return Ok(NextResult {
                state: state.clone(),
                pending: Some(pending.clone()),
                is_complete: false,
            });
        }
        _ => {}
    }

    let existing_completed: HashSet<String> = match state {
        ExecutionSnapshot::Running { completed, .. } => completed.iter().cloned().collect(),
        _ => HashSet::new(),
    };

    let mut skipped = Vec::new();
    let mut loop_path = Vec::new();
    let found = walk(steps, &mut loop_path, &existing_completed, &mut skipped, context)?;

    let mut new_completed: Vec<String> = existing_completed.into_iter().chain(skipped).collect();
    new_completed.sort();
    new_completed.dedup();

    match found {
        Some(instance) => Ok(NextResult {
            state: ExecutionSnapshot::Running {
                completed: new_completed,
                loop_stack: instance.loop_path.clone(),
                pending: Some(instance.clone()),
            },
            pending: Some(instance),
            is_complete: false,
        }),
        None => Ok(NextResult {
            state: ExecutionSnapshot::Complete,
            pending: None,
            is_complete: true,
        }),
    }
}

fn walk(
    steps: &[StepDefinition],
    loop_path: &mut Vec<LoopFrame>,
    completed: &HashSet<String>,
    skipped: &mut Vec<String>,
    context: &Value,
) -> Result<Option<StepInstance>, InterpreterError> {
    for step in steps {
        if let Some(found) = handle_step(step, loop_path, completed, skipped, context)? {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

fn handle_step(
    step: &StepDefinition,
    loop_path: &mut Vec<LoopFrame>,
    completed: &HashSet<String>,
    skipped: &mut Vec<String>,
    context: &Value,
) -> Result<Option<StepInstance>, InterpreterError> {
    match &step.loop_config {
        Some(loop_config) => {
            if let Some(condition) = &step.run_condition {
                if !context::evaluate(condition, context, loop_path) {
                    return Ok(None);
                }
            }
            let count = resolve_iteration_count(&loop_config.iteration_source, context)?;
            for iteration in 0..count {
                for (body_index, body_step) in loop_config.body.iter().enumerate() {
                    loop_path.push(LoopFrame {
                        loop_id: loop_config.loop_id.clone(),
                        iteration,
                        body_index,
                    });
                    let found = handle_step(body_step, loop_path, completed, skipped, context)?;
                    loop_path.pop();
                    if let Some(instance) = found {
                        return Ok(Some(instance));
                    }
                }
            }
            Ok(None)
        }
        None => {
            let instance = StepInstance {
                step_id: step.step_id.clone(),
                loop_path: loop_path.clone(),
            };
            let key = instance.instance_key();
            if completed.contains(&key) || skipped.contains(&key) {
                return Ok(None);
            }
            let satisfied = match &step.run_condition {
                Some(condition) => context::evaluate(condition, context, loop_path),
                None => true,
            };
            if satisfied {
                Ok(Some(instance))
            } else {
                skipped.push(key);
                Ok(None)
            }
        }
    }
}

fn resolve_iteration_count(
    source: &IterationSource,
    context: &Value,
) -> Result<u64, InterpreterError> {
    match source {
        IterationSource::FixedCount { count } => Ok(*count),
        IterationSource::Items { items } => Ok(items.len() as u64),
        IterationSource::RuntimeExpression { path } => {
            let value = context::resolve_path(context, path).ok_or_else(|| {
                InterpreterError::NextFailed(format!(
                    "runtimeExpression path {path:?} not found in context"
                ))
            })?;
            let items = value.as_array().ok_or_else(|| {
                InterpreterError::NextFailed(format!(
                    "runtimeExpression path {path:?} did not resolve to an array"
                ))
            })?;
            Ok(items.len() as u64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_types::{LoopConfig, RunCondition};
    use serde_json::json;

    fn step(id: &str) -> StepDefinition {
        StepDefinition {
            step_id: id.into(),
            title: id.into(),
            prompt: format!("do {id}"),
            require_confirmation: None,
            run_condition: None,
            loop_config: None,
        }
    }

    #[test]
    fn next_on_init_returns_the_first_step() {
        let steps = vec![step("s1"), step("s2")];
        let result = next(&steps, &ExecutionSnapshot::Init, &json!({})).unwrap();
        assert!(!result.is_complete);
        assert_eq!(result.pending.unwrap().step_id, "s1");
    }

    #[test]
    fn next_is_idempotent_while_a_step_is_already_pending() {
        let steps = vec![step("s1")];
        let first = next(&steps, &ExecutionSnapshot::Init, &json!({})).unwrap();
        let second = next(&steps, &first.state, &json!({})).unwrap();
        assert_eq!(first.pending, second.pending);
    }

    #[test]
    fn apply_event_then_next_advances_to_the_following_step() {
        let steps = vec![step("s1"), step("s2")];
        let first = next(&steps, &ExecutionSnapshot::Init, &json!({})).unwrap();
        let pending = first.pending.clone().unwrap();
        let advanced = apply_event(&first.state, &EngineEvent::StepCompleted(pending)).unwrap();
        let second = next(&steps, &advanced, &json!({})).unwrap();
        assert_eq!(second.pending.unwrap().step_id, "s2");
    }

    #[test]
    fn next_reports_complete_once_all_steps_are_done() {
        let steps = vec![step("s1")];
        let first = next(&steps, &ExecutionSnapshot::Init, &json!({})).unwrap();
        let pending = first.pending.clone().unwrap();
        let advanced = apply_event(&first.state, &EngineEvent::StepCompleted(pending)).unwrap();
        let done = next(&steps, &advanced, &json!({})).unwrap();
        assert!(done.is_complete);
        assert!(done.pending.is_none());
        assert_eq!(done.state, ExecutionSnapshot::Complete);
    }

    #[test]
    fn apply_event_rejects_a_mismatched_instance() {
        let steps = vec![step("s1"), step("s2")];
        let first = next(&steps, &ExecutionSnapshot::Init, &json!({})).unwrap();
        let wrong = StepInstance {
            step_id: "s2".into(),
            loop_path: vec![],
        };
        assert!(matches!(
            apply_event(&first.state, &EngineEvent::StepCompleted(wrong)),
            Err(InterpreterError::ApplyFailed(_))
        ));
    }

    #[test]
    fn steps_with_a_false_run_condition_are_skipped_automatically() {
        let mut gated = step("s1");
        gated.run_condition = Some(RunCondition::Exists {
            path: "never".into(),
        });
        let steps = vec![gated, step("s2")];
        let result = next(&steps, &ExecutionSnapshot::Init, &json!({})).unwrap();
        assert_eq!(result.pending.unwrap().step_id, "s2");
        match result.state {
            ExecutionSnapshot::Running { completed, .. } => {
                assert!(completed.contains(&"s1".to_string()));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn fixed_count_loop_expands_into_one_instance_per_iteration() {
        let mut looped = step("loop_step");
        looped.loop_config = Some(LoopConfig {
            loop_id: "loop1".into(),
            body: vec![step("inner")],
            iteration_source: IterationSource::FixedCount { count: 2 },
        });
        let steps = vec![looped];

        let first = next(&steps, &ExecutionSnapshot::Init, &json!({})).unwrap();
        let first_pending = first.pending.clone().unwrap();
        assert_eq!(first_pending.step_id, "inner");
        assert_eq!(first_pending.loop_path[0].iteration, 0);

        let advanced = apply_event(&first.state, &EngineEvent::StepCompleted(first_pending)).unwrap();
        let second = next(&steps, &advanced, &json!({})).unwrap();
        let second_pending = second.pending.unwrap();
        assert_eq!(second_pending.loop_path[0].iteration, 1);

        let advanced2 =
            apply_event(&second.state, &EngineEvent::StepCompleted(second_pending)).unwrap();
        let done = next(&steps, &advanced2, &json!({})).unwrap();
        assert!(done.is_complete);
    }

    #[test]
    fn runtime_expression_loop_counts_a_context_array() {
        let mut looped = step("loop_step");
        looped.loop_config = Some(LoopConfig {
            loop_id: "items_loop".into(),
            body: vec![step("inner")],
            iteration_source: IterationSource::RuntimeExpression {
                path: "items".into(),
            },
        });
        let steps = vec![looped];
        let context = json!({"items": ["a", "b", "c"]});

        let mut state = ExecutionSnapshot::Init;
        let mut count = 0;
        loop {
            let result = next(&steps, &state, &context).unwrap();
            if result.is_complete {
                break;
            }
            let pending = result.pending.clone().unwrap();
            state = apply_event(&result.state, &EngineEvent::StepCompleted(pending)).unwrap();
            count += 1;
        }
        assert_eq!(count, 3);
    }

    #[test]
    fn runtime_expression_loop_fails_when_the_context_path_is_missing() {
        let mut looped = step("loop_step");
        looped.loop_config = Some(LoopConfig {
            loop_id: "items_loop".into(),
            body: vec![step("inner")],
            iteration_source: IterationSource::RuntimeExpression {
                path: "missing".into(),
            },
        });
        let steps = vec![looped];
        assert!(matches!(
            next(&steps, &ExecutionSnapshot::Init, &json!({})),
            Err(InterpreterError::NextFailed(_))
        ));
    }

    #[test]
    fn a_gated_loop_is_skipped_entirely_when_its_own_condition_is_false() {
        let mut looped = step("loop_step");
        looped.run_condition = Some(RunCondition::Exists {
            path: "never".into(),
        });
        looped.loop_config = Some(LoopConfig {
            loop_id: "loop1".into(),
            body: vec![step("inner")],
            iteration_source: IterationSource::FixedCount { count: 5 },
        });
        let steps = vec![looped, step("after")];
        let result = next(&steps, &ExecutionSnapshot::Init, &json!({})).unwrap();
        assert_eq!(result.pending.unwrap().step_id, "after");
    }

    #[test]
    fn nested_loops_produce_a_two_frame_loop_path() {
        let inner_loop_step = {
            let mut s = step("inner");
            s.loop_config = Some(LoopConfig {
                loop_id: "inner_loop".into(),
                body: vec![step("leaf")],
                iteration_source: IterationSource::FixedCount { count: 2 },
            });
            s
        };
        let mut outer = step("outer");
        outer.loop_config = Some(LoopConfig {
            loop_id: "outer_loop".into(),
            body: vec![inner_loop_step],
            iteration_source: IterationSource::FixedCount { count: 2 },
        });
        let steps = vec![outer];

        let result = next(&steps, &ExecutionSnapshot::Init, &json!({})).unwrap();
        let pending = result.pending.unwrap();
        assert_eq!(pending.step_id, "leaf");
        assert_eq!(pending.loop_path.len(), 2);
        assert_eq!(pending.loop_path[0].loop_id, "outer_loop");
        assert_eq!(pending.loop_path[1].loop_id, "inner_loop");
    }

    proptest::proptest! {
        #[test]
        fn next_never_panics_on_an_items_loop_of_arbitrary_size(n in 0usize..20) {
            let items: Vec<Value> = (0..n).map(Value::from).collect();
            let mut looped = step("loop_step");
            looped.loop_config = Some(LoopConfig {
                loop_id: "loop1".into(),
                body: vec![step("inner")],
                iteration_source: IterationSource::Items { items },
            });
            let steps = vec![looped];
            let _ = next(&steps, &ExecutionSnapshot::Init, &json!({}));
        }
    }
}
