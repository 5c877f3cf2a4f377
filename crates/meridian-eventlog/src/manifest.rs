//! The sidecar manifest tracking a session log's hash chain and pins.

use meridian_types::{EventId, Sha256Digest, SnapshotRef};
use serde::{Deserialize, Serialize};

/// Persisted health marker. Once `Corrupt`, a session never returns to
/// `Healthy` without an external export/recreate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    /// Hash chain and structural invariants verified clean on last load.
    Healthy,
    /// An integrity check failed; the session is fail-closed.
    Corrupt,
}

/// One content-addressed snapshot pinned by a specific event in this log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPin {
    /// The pinned snapshot's content address.
    pub snapshot_ref: SnapshotRef,
    /// The event index that introduced this pin.
    pub event_index: u64,
    /// The id of the event that introduced this pin.
    pub created_by_event_id: EventId,
}

/// `sessions/<sessionId>/manifest.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Hash of event 0, once the log is non-empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head_hash: Option<Sha256Digest>,
    /// Rolling hash over the full log as of the last append.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tail_hash: Option<Sha256Digest>,
    /// The `eventIndex` the next appended event must use.
    pub next_event_index: u64,
    /// Snapshots pinned by events in this log, in append order.
    pub snapshot_pins: Vec<SnapshotPin>,
    /// Whether the log last passed its integrity check.
    pub health: Health,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            head_hash: None,
            tail_hash: None,
            next_event_index: 0,
            snapshot_pins: Vec::new(),
            health: Health::Healthy,
        }
    }
}
