#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **meridian-store** – Content-addressed storage, built on the generic
//! [`content::ContentStore`] primitive.

/// Generic content-addressed key/value primitive.
pub mod content;
/// Execution-snapshot store.
pub mod snapshot_store;
/// Pinned-workflow store.
pub mod workflow_store;

pub use content::{path_for_digest, ContentStore, StoreError};
pub use snapshot_store::SnapshotStore;
pub use workflow_store::WorkflowStore;
