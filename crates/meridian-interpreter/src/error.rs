//! The error union raised by the pure interpreter.

use thiserror::Error;

/// Errors raised by `apply_event`/`next`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InterpreterError {
    /// `apply_event` was called against a step that is not the current
    /// `pending` instance (or no step is pending at all).
    #[error("apply_event failed: {0}")]
    ApplyFailed(String),
    /// `next` could not walk the workflow, e.g. a loop's
    /// `runtime_expression` source is absent from `context`.
    #[error("next failed: {0}")]
    NextFailed(String),
}
