//! Typed opaque identifiers.
//!
//! Every id in the system is a branded string of the form `<prefix>_<hex>`.
//! The brands are distinct Rust types so a `NodeId` can never be passed where
//! a `RunId` is expected, even though both are strings under the hood.

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Characters allowed in the entropy segment of an id, and in any
/// caller-supplied identifier that must remain delimiter-safe (step ids,
/// workflow ids, loop ids).
pub fn is_delimiter_safe(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

macro_rules! opaque_id {
    ($name:ident, $prefix:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// The fixed prefix branding this id type on the wire.
            pub const PREFIX: &'static str = $prefix;

            /// Mint a fresh id from 16 bytes of cryptographically-strong entropy.
            pub fn new() -> Self {
                let mut bytes = [0u8; 16];
                rand::thread_rng().fill_bytes(&mut bytes);
                let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
                Self(format!("{}_{}", $prefix, hex))
            }

            /// Wrap an already-serialized id, validating its character set.
            pub fn parse(raw: impl Into<String>) -> Result<Self, crate::error::MeridianError> {
                let raw = raw.into();
                if !is_delimiter_safe(&raw) {
                    return Err(crate::error::MeridianError::validation(
                        "context_invalid_shape",
                        format!("{} is not delimiter-safe", stringify!($name)),
                    ));
                }
                Ok(Self(raw))
            }

            /// Borrow the underlying string representation.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

opaque_id!(SessionId, "sess", "Identifies a durable session.");
opaque_id!(RunId, "run", "Identifies one run attempt within a session.");
opaque_id!(NodeId, "node", "Identifies a position in a run's DAG.");
opaque_id!(AttemptId, "att", "Identifies a single advance intent.");
opaque_id!(EventId, "evt", "Identifies one committed domain event.");
opaque_id!(OutputId, "out", "Identifies a node output record.");
opaque_id!(
    SnapshotRef,
    "snap",
    "Content-addressed reference to an execution snapshot."
);

/// A SHA-256 digest, branded as `sha256:<hex>`.
///
/// Unlike the other opaque ids this one is derived, not minted — it is always
/// the output of [`meridian_crypto`](../meridian_crypto/index.html)'s hashing
/// primitive, but lives here so the data model (`WorkflowHash`, snapshot
/// pinning) can reference it without a dependency on the crypto crate.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sha256Digest(String);

impl Sha256Digest {
    /// Brand raw hex digest bytes (64 lowercase hex chars) as a digest value.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(format!("sha256:{}", hex.into()))
    }

    /// The full branded string, e.g. `sha256:abcd…`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The bare hex portion, suitable for use as a filesystem-safe filename.
    pub fn hex(&self) -> &str {
        self.0.strip_prefix("sha256:").unwrap_or(&self.0)
    }
}

impl fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A pinned-workflow content hash; structurally a [`Sha256Digest`] but a
/// distinct type so it cannot be confused with an execution snapshot hash.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowHash(Sha256Digest);

impl WorkflowHash {
    /// Wrap a digest as a workflow hash.
    pub fn from_digest(digest: Sha256Digest) -> Self {
        Self(digest)
    }

    /// Borrow the inner digest.
    pub fn digest(&self) -> &Sha256Digest {
        &self.0
    }

    /// The bare hex portion, used as the pinned-workflow store filename.
    pub fn hex(&self) -> &str {
        self.0.hex()
    }
}

impl fmt::Display for WorkflowHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
