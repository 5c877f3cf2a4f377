#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **meridian-types** – Shared primitive data structures for the Meridian
//! workflow engine.
//!
//! This crate is dependency-light and sits at the bottom of the crate graph
//! so every other crate can depend on it without cycles. It makes no
//! assumptions about I/O, cryptography, or storage — those live in
//! `meridian-crypto`, `meridian-store`, and `meridian-eventlog`.

/// The closed error taxonomy.
pub mod error;
/// Domain events and the append-only log's event model.
pub mod event;
/// Typed opaque identifiers.
pub mod ids;
/// Execution snapshots and the compiled, pinned-workflow form.
pub mod snapshot;
/// External-collaborator input: workflow definitions.
pub mod workflow;
/// Advisory-lock capability value.
pub mod witness;

pub use error::{MeridianError, Result, RetryHint, ValidationKind};
pub use event::{
    AdvanceOutcome, DomainEvent, EdgeCause, EdgeKind, EventData, EventScope, NodeKind,
    OutputChannel, PreferenceSource,
};
pub use ids::{
    is_delimiter_safe, AttemptId, EventId, NodeId, OutputId, RunId, Sha256Digest, SessionId,
    SnapshotRef, WorkflowHash,
};
pub use snapshot::{
    ExecutionSnapshot, LoopFrame, PinnedWorkflow, PinnedWorkflowFile, SnapshotFile, StepInstance,
    StepMetadata, SOURCE_KIND_V1_PINNED,
};
pub use workflow::{IterationSource, LoopConfig, RunCondition, StepDefinition, WorkflowDefinition};
pub use witness::LockWitness;

/// Maximum size, in canonical bytes, of a `continue_workflow`/`start_workflow`
/// `context` payload.
pub const MAX_CONTEXT_BYTES: usize = 256 * 1024;

/// Maximum canonical-JSON nesting depth accepted anywhere in the system.
pub const MAX_CANON_DEPTH: usize = 64;

/// Truncation length for `output.notesMarkdown` attached to
/// `node_output_appended`.
pub const MAX_NOTES_MARKDOWN_BYTES: usize = 4096;

/// Default advisory-lock heartbeat TTL.
pub const LOCK_TTL_MS: u64 = 5_000;

/// Default retry hint handed back on `LOCK_BUSY`.
pub const LOCK_RETRY_AFTER_MS: u64 = 1_000;

/// Default content-addressed store file size ceiling.
pub const STORE_MAX_FILE_BYTES: u64 = 1024 * 1024;
