//! Workflow definitions as supplied by the external workflow-definition
//! provider (out of scope for this core). These types are the input the
//! pinned-workflow store compiles into a content-addressed, immutable
//! snapshot.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MeridianError;
use crate::ids::is_delimiter_safe;

/// A workflow as authored by a user or loaded from a registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    /// Delimiter-safe workflow id, unique within the provider.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Author-assigned version string, opaque to this core.
    pub version: String,
    /// The workflow's top-level step sequence.
    pub steps: Vec<StepDefinition>,
}

/// One step in a workflow's top-level sequence, or in a loop body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDefinition {
    /// Delimiter-safe step id, unique within its nesting level.
    pub step_id: String,
    /// Display title.
    pub title: String,
    /// The text shown to the caller while this step is pending.
    pub prompt: String,
    /// Whether the caller must confirm before advancing past this step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_confirmation: Option<bool>,
    /// Condition gating whether this step runs at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_condition: Option<RunCondition>,
    /// If present, this step is a loop wrapping its own body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_config: Option<LoopConfig>,
}

/// A loop wrapping an ordered body of steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopConfig {
    /// Delimiter-safe loop id, unique within its nesting level.
    pub loop_id: String,
    /// The steps executed on each iteration.
    pub body: Vec<StepDefinition>,
    /// How many iterations to run, and over what.
    pub iteration_source: IterationSource,
}

/// How many times a loop body executes, and over what.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IterationSource {
    /// Execute the body exactly `count` times.
    FixedCount { count: u64 },
    /// Execute the body once per item in a literal list.
    Items { items: Vec<Value> },
    /// Execute the body once per item in a list found at `context[path]`
    /// when the workflow runs; resolved by the interpreter against `context`.
    RuntimeExpression { path: String },
}

/// A small boolean AST evaluated by the interpreter against `context` plus
/// the current loop variables. Kept deliberately minimal: this core does not
/// ship a general expression language, only enough to gate step execution.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunCondition {
    /// Always true.
    Always,
    /// True iff `context[path] == value`.
    Equals { path: String, value: Value },
    /// True iff `context[path]` exists.
    Exists { path: String },
    /// Negation.
    Not(Box<RunCondition>),
    /// True iff all of the sub-conditions are true.
    And(Vec<RunCondition>),
    /// True iff any of the sub-conditions is true.
    Or(Vec<RunCondition>),
}

impl WorkflowDefinition {
    /// Structural validation independent of the compiled/pinned form:
    /// non-empty step list, delimiter-safe ids at every nesting level.
    pub fn validate(&self) -> Result<(), MeridianError> {
        if self.steps.is_empty() {
            return Err(MeridianError::PreconditionFailed(
                "workflow has no steps".into(),
            ));
        }
        for step in &self.steps {
            step.validate()?;
        }
        Ok(())
    }
}

impl StepDefinition {
    fn validate(&self) -> Result<(), MeridianError> {
        if !is_delimiter_safe(&self.step_id) {
            return Err(MeridianError::PreconditionFailed(format!(
                "stepId {:?} is not delimiter-safe",
                self.step_id
            )));
        }
        if let Some(loop_config) = &self.loop_config {
            if !is_delimiter_safe(&loop_config.loop_id) {
                return Err(MeridianError::PreconditionFailed(format!(
                    "loopId {:?} is not delimiter-safe",
                    loop_config.loop_id
                )));
            }
            if loop_config.body.is_empty() {
                return Err(MeridianError::PreconditionFailed(format!(
                    "loop {:?} has an empty body",
                    loop_config.loop_id
                )));
            }
            for body_step in &loop_config.body {
                body_step.validate()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn validate_rejects_empty_workflow() {
        let wf = WorkflowDefinition {
            id: "demo".into(),
            name: "demo".into(),
            version: "1".into(),
            steps: vec![],
        };
        assert!(wf.validate().is_err());
    }

    #[test]
    fn validate_rejects_unsafe_step_id() {
        let wf = WorkflowDefinition {
            id: "demo".into(),
            name: "demo".into(),
            version: "1".into(),
            steps: vec![step("s1/bad")],
        };
        assert!(wf.validate().is_err());
    }

    #[test]
    fn validate_accepts_well_formed_loop() {
        let mut s1 = step("s1");
        s1.loop_config = Some(LoopConfig {
            loop_id: "loop1".into(),
            body: vec![step("inner")],
            iteration_source: IterationSource::FixedCount { count: 3 },
        });
        let wf = WorkflowDefinition {
            id: "demo".into(),
            name: "demo".into(),
            version: "1".into(),
            steps: vec![s1],
        };
        assert!(wf.validate().is_ok());
    }
}
