//! Execution snapshots and the compiled, pinned-workflow form.

use serde::{Deserialize, Serialize};

use crate::ids::WorkflowHash;
use crate::workflow::WorkflowDefinition;

/// A position inside a loop: which loop, which iteration, and the index into
/// the loop body that iteration was at.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopFrame {
    /// The loop construct this frame belongs to.
    pub loop_id: String,
    /// Which iteration of the loop this frame is at, starting at 0.
    pub iteration: u64,
    /// Index into the loop body the iteration was at.
    pub body_index: usize,
}

/// A step plus the stack of loop frames it is nested under, uniquely
/// identifying one instantiation of a step within a run.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepInstance {
    /// The step definition this is an instance of.
    pub step_id: String,
    /// The stack of loop frames this instance is nested under, outermost first.
    pub loop_path: Vec<LoopFrame>,
}

impl StepInstance {
    /// Canonical sort/dedupe key: `stepId` followed by the loop path,
    /// e.g. `s1` or `s1@loop1:2:0`.
    pub fn instance_key(&self) -> String {
        let mut key = self.step_id.clone();
        for frame in &self.loop_path {
            key.push_str(&format!("@{}:{}:{}", frame.loop_id, frame.iteration, frame.body_index));
        }
        key
    }
}

/// The engine's execution state, content-addressed when persisted.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ExecutionSnapshot {
    /// No step has run yet.
    Init,
    /// Mid-run: `completed` is a canonical-sorted, deduplicated set of
    /// instance keys; `pending` is the step instance awaiting an advance.
    Running {
        completed: Vec<String>,
        loop_stack: Vec<LoopFrame>,
        pending: Option<StepInstance>,
    },
    /// The run has exhausted the workflow.
    Complete,
}

impl ExecutionSnapshot {
    /// Insert an instance key into `completed`, keeping it sorted and unique.
    /// No-op outside the `Running` variant.
    pub fn mark_completed(&mut self, key: String) {
        if let Self::Running { completed, .. } = self {
            if let Err(pos) = completed.binary_search(&key) {
                completed.insert(pos, key);
            }
        }
    }

    /// The step instance currently pending, if any.
    pub fn pending(&self) -> Option<&StepInstance> {
        match self {
            Self::Running { pending, .. } => pending.as_ref(),
            _ => None,
        }
    }

    /// Whether the run has completed.
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

/// Schema-versioned envelope persisted by the snapshot store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotFile {
    /// Schema version; always `1` today.
    pub v: u32,
    /// Fixed discriminator, `"execution_snapshot"`.
    pub kind: String,
    /// The wrapped snapshot.
    pub engine_payload: ExecutionSnapshot,
}

impl SnapshotFile {
    /// Wrap an [`ExecutionSnapshot`] in its `v:1` envelope.
    pub fn wrap(engine_payload: ExecutionSnapshot) -> Self {
        Self {
            v: 1,
            kind: "execution_snapshot".to_string(),
            engine_payload,
        }
    }
}

/// The source this pinned workflow was compiled from; a closed set —
/// `sourceKind = "v1_pinned"` is the only value the core ever produces —
/// other values may appear only if replayed from an external exporter, and
/// are rejected by [`PinnedWorkflowFile::validate`].
pub const SOURCE_KIND_V1_PINNED: &str = "v1_pinned";

/// Content-addressed, immutable compiled form of a [`WorkflowDefinition`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinnedWorkflowFile {
    /// Schema version; always `1` today.
    pub schema_version: u32,
    /// Always [`SOURCE_KIND_V1_PINNED`] for files this core produces.
    pub source_kind: String,
    /// The workflow id this pin was compiled from.
    pub workflow_id: String,
    /// The compiled workflow definition.
    pub definition: WorkflowDefinition,
}

impl PinnedWorkflowFile {
    /// Compile a `WorkflowDefinition` into its pinned form. The workflow hash
    /// is computed by the caller (it needs the canonical-JSON codec) and
    /// carried alongside, not inside, this struct.
    pub fn compile(definition: WorkflowDefinition) -> Self {
        Self {
            schema_version: 1,
            source_kind: SOURCE_KIND_V1_PINNED.to_string(),
            workflow_id: definition.id.clone(),
            definition,
        }
    }
}

/// A pinned workflow plus the hash it was stored under, as handed back by
/// the pinned-workflow store.
#[derive(Debug, Clone)]
pub struct PinnedWorkflow {
    /// The content address this pinned file is stored under.
    pub hash: WorkflowHash,
    /// The pinned workflow file itself.
    pub file: PinnedWorkflowFile,
}

impl PinnedWorkflow {
    /// Look up step metadata by id; title/prompt fall back to sensible
    /// defaults when the step carries none (shape-checked, never assumed).
    pub fn step_metadata(&self, step_id: &str) -> Option<StepMetadata> {
        fn find<'a>(steps: &'a [crate::workflow::StepDefinition], step_id: &str) -> Option<&'a crate::workflow::StepDefinition> {
            for step in steps {
                if step.step_id == step_id {
                    return Some(step);
                }
                if let Some(loop_config) = &step.loop_config {
                    if let Some(found) = find(&loop_config.body, step_id) {
                        return Some(found);
                    }
                }
            }
            None
        }
        find(&self.file.definition.steps, step_id).map(|step| StepMetadata {
            step_id: step.step_id.clone(),
            title: if step.title.is_empty() {
                step.step_id.clone()
            } else {
                step.title.clone()
            },
            prompt: if step.prompt.is_empty() {
                format!("Pending step: {}", step.step_id)
            } else {
                step.prompt.clone()
            },
            require_confirmation: step.require_confirmation.unwrap_or(false),
        })
    }
}

/// Step metadata surfaced to the caller alongside a `pending` cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepMetadata {
    /// The step this metadata describes.
    pub step_id: String,
    /// Display title, defaulted to the step id when empty.
    pub title: String,
    /// Prompt text, defaulted to a placeholder when empty.
    pub prompt: String,
    /// Whether the caller must confirm before advancing past this step.
    pub require_confirmation: bool,
}
