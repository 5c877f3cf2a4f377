//! Content-addressed, immutable pinned-workflow store.

use std::path::PathBuf;

use meridian_canon::canonicalize_serializable;
use meridian_types::{PinnedWorkflow, PinnedWorkflowFile, WorkflowDefinition, WorkflowHash};

use crate::content::{ContentStore, StoreError};

/// Stores compiled [`WorkflowDefinition`]s, content-addressed by the SHA-256
/// of their canonical bytes. A workflow once pinned is immutable: the same
/// definition always compiles to the same hash, and a hash always resolves
/// to the same bytes for the lifetime of the data directory.
#[derive(Clone)]
pub struct WorkflowStore {
    inner: ContentStore,
}

impl WorkflowStore {
    /// Root the store at `<data_dir>/pinned-workflows`.
    pub fn at(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            inner: ContentStore::at(PathBuf::from(data_dir.into()).join("pinned-workflows")),
        }
    }

    /// Compile and persist `definition`, returning the [`WorkflowHash`] it is
    /// now reachable under. Pinning the same definition twice yields the
    /// same hash.
    pub fn pin(&self, definition: WorkflowDefinition) -> Result<WorkflowHash, StoreError> {
        let file = PinnedWorkflowFile::compile(definition);
        let bytes = canonicalize_serializable(&file)
            .map_err(|e| StoreError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())))?;
        let digest = self.inner.put(&bytes)?;
        Ok(WorkflowHash::from_digest(digest))
    }

    /// Load the pinned workflow stored under `hash`, or `Ok(None)` if absent.
    pub fn get(&self, hash: &WorkflowHash) -> Result<Option<PinnedWorkflow>, StoreError> {
        let Some(bytes) = self.inner.get(hash.digest())? else {
            return Ok(None);
        };
        let file: PinnedWorkflowFile = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())))?;
        Ok(Some(PinnedWorkflow {
            hash: hash.clone(),
            file,
        }))
    }

    /// Whether `hash` is already pinned, without deserializing it.
    pub fn contains(&self, hash: &WorkflowHash) -> bool {
        self.inner.contains(hash.digest())
    }
}
