//! Domain events committed to a session's append-only log.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{AttemptId, EventId, NodeId, OutputId, RunId, SessionId, SnapshotRef, WorkflowHash};

/// Which kind of node a `node_created` event introduces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// An ordinary workflow step.
    Step,
    /// A checkpoint node minted alongside its own token triple.
    Checkpoint,
    /// A node recording an attempt that was blocked rather than advanced.
    BlockedAttempt,
}

/// The outcome recorded by an `advance_recorded` event.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum AdvanceOutcome {
    /// The run moved forward to `to_node_id`.
    Advanced { to_node_id: NodeId },
    /// The attempt was blocked; `blockers` carries the reasons.
    Blocked { blockers: Vec<Value> },
}

/// What caused an `edge_created` event.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum EdgeCause {
    /// The caller deliberately forked from a non-tip node.
    IntentionalFork { event_id: EventId },
    /// The edge was created by an advance that did not land on the tip.
    NonTipAdvance { event_id: EventId },
}

/// Which kind of edge an `edge_created` event introduces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// An edge produced by an acknowledged step advance.
    AckedStep,
    /// An edge produced by a checkpoint.
    Checkpoint,
}

/// Output channel a `node_output_appended` event writes to. Closed to
/// `recap` for this core; the variant is open-shaped to allow a future
/// collaborator to introduce more channels without breaking the wire schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputChannel {
    /// The built-in recap channel.
    Recap,
    /// A channel name not recognized by this core, passed through verbatim.
    #[serde(untagged)]
    Other(String),
}

/// Source of a `preferences_changed` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreferenceSource {
    /// The preference was set by the system itself.
    System,
    /// The preference was set by the end user.
    User,
}

/// The closed set of event kinds a session log may contain.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum EventData {
    /// The session was created; always event 0.
    SessionCreated,
    /// A run was started against a pinned workflow.
    RunStarted {
        workflow_id: String,
        workflow_hash: WorkflowHash,
        source_kind: String,
        source_ref: String,
    },
    /// A node was created in the execution graph.
    NodeCreated {
        node_kind: NodeKind,
        parent_node_id: Option<NodeId>,
        workflow_hash: WorkflowHash,
        snapshot_ref: SnapshotRef,
    },
    /// An attempt against a node was recorded, advanced or blocked.
    AdvanceRecorded {
        attempt_id: AttemptId,
        intent: String,
        outcome: AdvanceOutcome,
    },
    /// An edge was created between two nodes.
    EdgeCreated {
        edge_kind: EdgeKind,
        from_node_id: NodeId,
        to_node_id: NodeId,
        cause: EdgeCause,
    },
    /// Output was appended to an existing node.
    NodeOutputAppended {
        output_id: OutputId,
        output_channel: OutputChannel,
        payload: Value,
    },
    /// The run's effective preferences changed.
    PreferencesChanged {
        source: PreferenceSource,
        effective: Value,
    },
}

/// The scope (run/node) an event pertains to, when applicable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventScope {
    /// The run this event pertains to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    /// The node this event pertains to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
}

/// One committed entry in a session's event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEvent {
    /// This event's position in the log, starting at 0.
    pub event_index: u64,
    /// This event's unique id.
    pub event_id: EventId,
    /// The session this event was appended to.
    pub session_id: SessionId,
    /// The key `append` uses to silently drop duplicate appends.
    pub dedupe_key: String,
    /// The run/node this event pertains to, when applicable.
    #[serde(default)]
    pub scope: EventScope,
    /// The event's kind-specific payload.
    #[serde(flatten)]
    pub data: EventData,
}

impl DomainEvent {
    /// The dedupe key for an `advance_recorded` event:
    /// `advance_recorded:{sessionId}:{nodeId}:{attemptId}`.
    pub fn advance_dedupe_key(session_id: &SessionId, node_id: &NodeId, attempt_id: &AttemptId) -> String {
        format!("advance_recorded:{}:{}:{}", session_id, node_id, attempt_id)
    }

    /// A human-readable `kind` discriminator matching the wire tag, used for
    /// logging without re-deriving it from the `data` payload.
    pub fn kind_str(&self) -> &'static str {
        match &self.data {
            EventData::SessionCreated => "session_created",
            EventData::RunStarted { .. } => "run_started",
            EventData::NodeCreated { .. } => "node_created",
            EventData::AdvanceRecorded { .. } => "advance_recorded",
            EventData::EdgeCreated { .. } => "edge_created",
            EventData::NodeOutputAppended { .. } => "node_output_appended",
            EventData::PreferencesChanged { .. } => "preferences_changed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_dedupe_key_is_session_node_attempt_scoped() {
        let session = SessionId::parse("sess_a").unwrap();
        let node = NodeId::parse("node_b").unwrap();
        let attempt = AttemptId::parse("att_c").unwrap();
        assert_eq!(
            DomainEvent::advance_dedupe_key(&session, &node, &attempt),
            "advance_recorded:sess_a:node_b:att_c"
        );
    }
}
