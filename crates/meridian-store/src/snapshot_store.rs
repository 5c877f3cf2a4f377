//! Content-addressed execution-snapshot store.

use std::path::PathBuf;

use meridian_canon::canonicalize_serializable;
use meridian_types::{ExecutionSnapshot, SnapshotFile, SnapshotRef};

use crate::content::{ContentStore, StoreError};

/// Stores and retrieves [`ExecutionSnapshot`]s, content-addressed by the
/// SHA-256 of their canonical bytes. Immutable: puts are idempotent, and
/// nothing in this crate ever deletes a snapshot.
#[derive(Clone)]
pub struct SnapshotStore {
    inner: ContentStore,
}

impl SnapshotStore {
    /// Root the store at `<data_dir>/snapshots`.
    pub fn at(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            inner: ContentStore::at(PathBuf::from(data_dir.into()).join("snapshots")),
        }
    }

    /// Persist `snapshot`, returning the [`SnapshotRef`] it is now reachable
    /// under.
    pub fn put(&self, snapshot: &ExecutionSnapshot) -> Result<SnapshotRef, StoreError> {
        let file = SnapshotFile::wrap(snapshot.clone());
        let bytes = canonicalize_serializable(&file)
            .map_err(|e| StoreError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())))?;
        let digest = self.inner.put(&bytes)?;
        Ok(SnapshotRef::parse(format!("snap_{}", digest.hex()))
            .expect("hex digest is always delimiter-safe"))
    }

    /// Load the snapshot stored under `snapshot_ref`, or `Ok(None)` if
    /// absent.
    pub fn get(&self, snapshot_ref: &SnapshotRef) -> Result<Option<ExecutionSnapshot>, StoreError> {
        let digest = digest_from_ref(snapshot_ref);
        let Some(bytes) = self.inner.get(&digest)? else {
            return Ok(None);
        };
        let file: SnapshotFile = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())))?;
        Ok(Some(file.engine_payload))
    }

    /// Whether `snapshot_ref` exists in the store, without deserializing it.
    pub fn contains(&self, snapshot_ref: &SnapshotRef) -> bool {
        self.inner.contains(&digest_from_ref(snapshot_ref))
    }
}

fn digest_from_ref(snapshot_ref: &SnapshotRef) -> meridian_types::Sha256Digest {
    let hex = snapshot_ref.as_str().strip_prefix("snap_").unwrap_or(snapshot_ref.as_str());
    meridian_types::Sha256Digest::from_hex(hex)
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_types::{LoopFrame, StepInstance};

    #[test]
    fn put_then_get_round_trips_running_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::at(dir.path());
        let snapshot = ExecutionSnapshot::Running {
            completed: vec!["s0".into()],
            loop_stack: vec![LoopFrame {
                loop_id: "loop1".into(),
                iteration: 0,
                body_index: 0,
            }],
            pending: Some(StepInstance {
                step_id: "s1".into(),
                loop_path: vec![],
            }),
        };
        let reference = store.put(&snapshot).unwrap();
        let loaded = store.get(&reference).unwrap().unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn missing_snapshot_ref_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::at(dir.path());
        let reference = SnapshotRef::parse(format!("snap_{}", "a".repeat(64))).unwrap();
        assert!(store.get(&reference).unwrap().is_none());
    }

    #[test]
    fn put_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::at(dir.path());
        let a = store.put(&ExecutionSnapshot::Init).unwrap();
        let b = store.put(&ExecutionSnapshot::Init).unwrap();
        assert_eq!(a.as_str(), b.as_str());
    }
}
