#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **meridian-crypto** – Hashing, HMAC, and signing-key primitives.

/// SHA-256 + HMAC-SHA-256 primitives.
pub mod hash;
/// Persisted signing key with atomic create-or-load.
pub mod keyring;

pub use hash::{constant_time_eq, hmac_sign, hmac_verify, sha256};
pub use keyring::{Keyring, KeyringError};
