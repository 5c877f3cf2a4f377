//! Generic content-addressed key/value store on the local filesystem.
//!
//! Both the execution-snapshot store and the pinned-workflow store are thin,
//! typed wrappers over this primitive: write canonical bytes to a temp file,
//! fsync, rename into place under `<root>/<hash-hex>`; `get` returns
//! `Ok(None)` for a missing key rather than an error.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use meridian_crypto::sha256;
use meridian_types::{Sha256Digest, STORE_MAX_FILE_BYTES};
use thiserror::Error;
use tracing::debug;

/// Errors the content store can raise.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The payload exceeds the configured file size ceiling.
    #[error("payload of {actual} bytes exceeds the {limit} byte ceiling")]
    TooLarge {
        /// The payload's actual size in bytes.
        actual: u64,
        /// The configured ceiling it exceeded.
        limit: u64,
    },
    /// Underlying filesystem operation failed.
    #[error("store io error: {0}")]
    Io(#[from] io::Error),
}

/// A content-addressed store rooted at a single directory.
#[derive(Clone)]
pub struct ContentStore {
    root: PathBuf,
    max_file_bytes: u64,
}

impl ContentStore {
    /// Point a store at `root`, without touching the filesystem yet.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_file_bytes: STORE_MAX_FILE_BYTES,
        }
    }

    /// Override the default 1 MiB file size ceiling.
    pub fn with_max_file_bytes(mut self, max_file_bytes: u64) -> Self {
        self.max_file_bytes = max_file_bytes;
        self
    }

    /// Write `bytes` under its SHA-256 digest and return that digest.
    /// Idempotent: writing the same bytes twice produces the same file and
    /// succeeds both times.
    pub fn put(&self, bytes: &[u8]) -> Result<Sha256Digest, StoreError> {
        if bytes.len() as u64 > self.max_file_bytes {
            return Err(StoreError::TooLarge {
                actual: bytes.len() as u64,
                limit: self.max_file_bytes,
            });
        }

        let digest = sha256(bytes);
        let dest = self.path_for(&digest);

        if dest.exists() {
            debug!(hash = %digest, "content store put is a no-op, already present");
            return Ok(digest);
        }

        fs::create_dir_all(&self.root)?;
        let tmp_path = self.root.join(format!(".tmp-{}-{}", std::process::id(), digest.hex()));
        {
            let file = File::create(&tmp_path)?;
            use io::Write;
            let mut file = file;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &dest)?;

        if let Ok(dir) = File::open(&self.root) {
            let _ = dir.sync_all();
        }

        Ok(digest)
    }

    /// Read the bytes stored under `digest`, or `Ok(None)` if absent.
    pub fn get(&self, digest: &Sha256Digest) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(digest);
        match fs::read(&path) {
            Ok(bytes) => {
                if bytes.len() as u64 > self.max_file_bytes {
                    return Err(StoreError::TooLarge {
                        actual: bytes.len() as u64,
                        limit: self.max_file_bytes,
                    });
                }
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether a value is present under `digest`, without reading it.
    pub fn contains(&self, digest: &Sha256Digest) -> bool {
        self.path_for(digest).exists()
    }

    fn path_for(&self, digest: &Sha256Digest) -> PathBuf {
        self.root.join(digest.hex())
    }
}

/// Build the on-disk path a digest would occupy, for test assertions and
/// external tooling (e.g. a salvage-export tool) without going through
/// [`ContentStore::get`].
pub fn path_for_digest(root: &Path, digest: &Sha256Digest) -> PathBuf {
    root.join(digest.hex())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::at(dir.path());
        let digest = store.put(b"hello world").unwrap();
        let back = store.get(&digest).unwrap().unwrap();
        assert_eq!(back, b"hello world");
    }

    #[test]
    fn get_missing_returns_none_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::at(dir.path());
        let digest = Sha256Digest::from_hex("0".repeat(64));
        assert!(store.get(&digest).unwrap().is_none());
    }

    #[test]
    fn put_is_idempotent_for_identical_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::at(dir.path());
        let a = store.put(b"same").unwrap();
        let b = store.put(b"same").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn put_rejects_payloads_over_the_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::at(dir.path()).with_max_file_bytes(4);
        let err = store.put(b"too-large-payload").unwrap_err();
        assert!(matches!(err, StoreError::TooLarge { .. }));
    }
}
