//! The workflow-definition provider collaborator: out of this core's scope
//! per its data model, but the orchestrator needs some implementation to
//! resolve a `workflowId` into a [`WorkflowDefinition`]. This module gives a
//! thin trait plus a local-file-backed implementation good enough for the
//! demo CLI and integration tests.

use std::fs;
use std::path::{Path, PathBuf};

use meridian_types::{MeridianError, Result, WorkflowDefinition};
use tracing::debug;

/// Resolves a workflow id to its definition. Implementations may back onto
/// local files, a bundled registry, or a remote service — the orchestrator
/// only ever calls `get_workflow_by_id`.
pub trait WorkflowProvider {
    /// Look up `workflow_id`, returning `Ok(None)` if no such workflow
    /// exists (the orchestrator maps that to `NOT_FOUND`).
    fn get_workflow_by_id(&self, workflow_id: &str) -> Result<Option<WorkflowDefinition>>;
}

/// Loads workflow definitions from `<data_dir>/workflows/<id>.json`.
#[derive(Debug, Clone)]
pub struct LocalFileWorkflowProvider {
    workflows_dir: PathBuf,
}

impl LocalFileWorkflowProvider {
    /// Root the provider at `<data_dir>/workflows`.
    pub fn at(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            workflows_dir: data_dir.into().join("workflows"),
        }
    }
}

impl WorkflowProvider for LocalFileWorkflowProvider {
    fn get_workflow_by_id(&self, workflow_id: &str) -> Result<Option<WorkflowDefinition>> {
        let path = self.workflows_dir.join(format!("{workflow_id}.json"));
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(MeridianError::InternalError(MeridianError::scrub_home(
                    &e.to_string(),
                )))
            }
        };
        let definition: WorkflowDefinition = serde_json::from_slice(&bytes).map_err(|e| {
            MeridianError::PreconditionFailed(format!(
                "workflow {workflow_id} is not well-formed: {e}"
            ))
        })?;
        debug!(workflow_id, path = %path.display(), "loaded workflow definition");
        Ok(Some(definition))
    }
}

/// Write a definition to `<data_dir>/workflows/<id>.json`, for tests and the
/// CLI's `seed` helper. Not used by the core read path.
pub fn write_workflow_file(data_dir: &Path, definition: &WorkflowDefinition) -> Result<()> {
    let dir = data_dir.join("workflows");
    fs::create_dir_all(&dir)
        .map_err(|e| MeridianError::InternalError(MeridianError::scrub_home(&e.to_string())))?;
    let path = dir.join(format!("{}.json", definition.id));
    let bytes = serde_json::to_vec_pretty(definition)
        .map_err(|e| MeridianError::InternalError(e.to_string()))?;
    fs::write(&path, bytes)
        .map_err(|e| MeridianError::InternalError(MeridianError::scrub_home(&e.to_string())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_types::StepDefinition;

    fn sample_definition() -> WorkflowDefinition {
        WorkflowDefinition {
            id: "demo".into(),
            name: "Demo".into(),
            version: "1".into(),
            steps: vec![StepDefinition {
                step_id: "s1".into(),
                title: "S1".into(),
                prompt: "do s1".into(),
                require_confirmation: None,
                run_condition: None,
                loop_config: None,
            }],
        }
    }

    #[test]
    fn missing_workflow_resolves_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalFileWorkflowProvider::at(dir.path());
        assert!(provider.get_workflow_by_id("nope").unwrap().is_none());
    }

    #[test]
    fn written_workflow_round_trips_through_the_provider() {
        let dir = tempfile::tempdir().unwrap();
        write_workflow_file(dir.path(), &sample_definition()).unwrap();
        let provider = LocalFileWorkflowProvider::at(dir.path());
        let loaded = provider.get_workflow_by_id("demo").unwrap().unwrap();
        assert_eq!(loaded, sample_definition());
    }
}
