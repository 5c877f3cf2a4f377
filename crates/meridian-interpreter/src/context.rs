//! Run-condition evaluation against external `context` plus the active loop
//! stack.

use meridian_types::{LoopFrame, RunCondition};
use serde_json::{Map, Value};

/// Build the effective evaluation context: the caller-supplied `context`
/// with a synthetic `loop` object layered in, keyed by loop id, giving each
/// active frame's `iteration`/`bodyIndex`. A `run_condition` referencing
/// `loop.<loopId>.iteration` sees the frame it is nested under.
pub fn effective_context(context: &Value, loop_path: &[LoopFrame]) -> Value {
    let mut root = match context {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };

    let mut loop_vars = Map::new();
    for frame in loop_path {
        let mut entry = Map::new();
        entry.insert("iteration".to_string(), Value::from(frame.iteration));
        entry.insert("bodyIndex".to_string(), Value::from(frame.body_index as u64));
        loop_vars.insert(frame.loop_id.clone(), Value::Object(entry));
    }
    root.insert("loop".to_string(), Value::Object(loop_vars));

    Value::Object(root)
}

/// Navigate a dotted path (`a.b.c`) through nested objects; numeric
/// segments index into arrays. Returns `None` on any missing segment or
/// type mismatch — callers treat that as "absent", not an error, except
/// where a condition specifically requires the value to exist.
pub fn resolve_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    if path.is_empty() {
        return Some(current);
    }
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(arr) => arr.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Evaluate a `run_condition` against `context` and the active loop stack.
pub fn evaluate(condition: &RunCondition, context: &Value, loop_path: &[LoopFrame]) -> bool {
    let effective = effective_context(context, loop_path);
    evaluate_against(condition, &effective)
}

fn evaluate_against(condition: &RunCondition, effective: &Value) -> bool {
    match condition {
        RunCondition::Always => true,
        RunCondition::Exists { path } => resolve_path(effective, path).is_some(),
        RunCondition::Equals { path, value } => {
            resolve_path(effective, path) == Some(value)
        }
        RunCondition::Not(inner) => !evaluate_against(inner, effective),
        RunCondition::And(conditions) => conditions.iter().all(|c| evaluate_against(c, effective)),
        RunCondition::Or(conditions) => conditions.iter().any(|c| evaluate_against(c, effective)),
    }
}
