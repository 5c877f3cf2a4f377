//! The closed error taxonomy shared across every crate in the workspace.
//!
//! Each layer maps its internal error union onto [`MeridianError`] by
//! exhaustive match at its public boundary; nothing above `meridian-types`
//! should construct an ad-hoc error string that doesn't fit one of these
//! variants.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sub-kind recorded in `details` for `VALIDATION_ERROR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationKind {
    ContextInvalidShape,
    ContextUnsupportedValue,
    ContextNonFiniteNumber,
    ContextCircularReference,
    ContextTooDeep,
    ContextNotCanonicalJson,
    ContextBudgetExceeded,
}

impl ValidationKind {
    /// The wire `snake_case` name used in the error's `details` payload.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ContextInvalidShape => "context_invalid_shape",
            Self::ContextUnsupportedValue => "context_unsupported_value",
            Self::ContextNonFiniteNumber => "context_non_finite_number",
            Self::ContextCircularReference => "context_circular_reference",
            Self::ContextTooDeep => "context_too_deep",
            Self::ContextNotCanonicalJson => "context_not_canonical_json",
            Self::ContextBudgetExceeded => "context_budget_exceeded",
        }
    }
}

/// Retry hint attached to retryable errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryHint {
    /// Suggested backoff before the caller retries.
    pub after_ms: u64,
}

/// The closed error enum returned at every crate boundary in the workspace.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code")]
pub enum MeridianError {
    // ---- Token errors -------------------------------------------------
    #[error("token is not in a recognized envelope format")]
    TokenInvalidFormat,
    #[error("token carries an unsupported tokenVersion")]
    TokenUnsupportedVersion,
    #[error("token signature does not verify")]
    TokenBadSignature,
    #[error("tokens reference different session/run/node scopes")]
    TokenScopeMismatch,
    #[error("token workflowHash does not match recorded run")]
    TokenWorkflowHashMismatch,
    #[error("token references a node absent from the session log")]
    TokenUnknownNode,
    #[error("session is locked by another writer")]
    TokenSessionLocked { retry: RetryHint },

    // ---- Validation -----------------------------------------------------
    #[error("validation failed: {kind:?}: {message}")]
    ValidationError {
        kind: ValidationKind,
        message: String,
        /// JSON pointer-ish path to the offending value, when applicable.
        path: Option<String>,
    },

    // ---- Precondition ---------------------------------------------------
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("not found: {0}")]
    NotFound(String),

    // ---- Session health ---------------------------------------------------
    #[error("session is not healthy: {location} integrity check failed: {reason}")]
    SessionNotHealthy { location: String, reason: String },

    // ---- Internal ---------------------------------------------------------
    #[error("internal error: {0}")]
    InternalError(String),
}

impl MeridianError {
    /// Build a `VALIDATION_ERROR` with the given sub-kind.
    pub fn validation(kind: &str, message: impl Into<String>) -> Self {
        let kind = match kind {
            "context_invalid_shape" => ValidationKind::ContextInvalidShape,
            "context_unsupported_value" => ValidationKind::ContextUnsupportedValue,
            "context_non_finite_number" => ValidationKind::ContextNonFiniteNumber,
            "context_circular_reference" => ValidationKind::ContextCircularReference,
            "context_too_deep" => ValidationKind::ContextTooDeep,
            "context_not_canonical_json" => ValidationKind::ContextNotCanonicalJson,
            "context_budget_exceeded" => ValidationKind::ContextBudgetExceeded,
            other => {
                return Self::InternalError(format!("unknown validation kind: {other}"));
            }
        };
        Self::ValidationError {
            kind,
            message: message.into(),
            path: None,
        }
    }

    /// Attach a path to a `ValidationError`, no-op otherwise.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        if let Self::ValidationError { path: p, .. } = &mut self {
            *p = Some(path.into());
        }
        self
    }

    /// The closed wire error code, e.g. `TOKEN_BAD_SIGNATURE`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::TokenInvalidFormat => "TOKEN_INVALID_FORMAT",
            Self::TokenUnsupportedVersion => "TOKEN_UNSUPPORTED_VERSION",
            Self::TokenBadSignature => "TOKEN_BAD_SIGNATURE",
            Self::TokenScopeMismatch => "TOKEN_SCOPE_MISMATCH",
            Self::TokenWorkflowHashMismatch => "TOKEN_WORKFLOW_HASH_MISMATCH",
            Self::TokenUnknownNode => "TOKEN_UNKNOWN_NODE",
            Self::TokenSessionLocked { .. } => "TOKEN_SESSION_LOCKED",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::PreconditionFailed(_) => "PRECONDITION_FAILED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::SessionNotHealthy { .. } => "SESSION_NOT_HEALTHY",
            Self::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the client is expected to retry this error.
    pub fn retry(&self) -> Option<RetryHint> {
        match self {
            Self::TokenSessionLocked { retry } => Some(*retry),
            _ => None,
        }
    }

    /// Normalize a message for deterministic diagnostics by replacing the
    /// caller's home directory with `~`.
    pub fn scrub_home(message: &str) -> String {
        if let Some(home) = dirs_home() {
            let home = home.to_string_lossy().to_string();
            if !home.is_empty() {
                return message.replace(&home, "~");
            }
        }
        message.to_string()
    }
}

fn dirs_home() -> Option<std::path::PathBuf> {
    std::env::var_os("HOME").map(std::path::PathBuf::from)
}

/// Strip a caller's home directory prefix from a path for display purposes.
pub fn display_path(path: &Path) -> String {
    MeridianError::scrub_home(&path.display().to_string())
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, MeridianError>;
