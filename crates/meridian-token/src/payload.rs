//! The typed payload carried inside each token kind.

use meridian_types::{AttemptId, NodeId, RunId, SessionId, WorkflowHash};
use serde::{Deserialize, Serialize};

/// The current, and only, token schema version.
pub const TOKEN_VERSION: u32 = 1;

/// `st.v1.`, `ack.v1.`, `chk.v1.` — the closed set of token kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// A state token: `st.v1.`.
    State,
    /// An ack token: `ack.v1.`.
    Ack,
    /// A checkpoint token: `chk.v1.`.
    Checkpoint,
}

impl TokenKind {
    /// The closed, ordered list of `(kind, prefix)` pairs token parsing
    /// checks against, longest-match order not required since prefixes are
    /// mutually exclusive by construction.
    pub const ALL: [(TokenKind, &'static str); 3] = [
        (TokenKind::State, "st.v1."),
        (TokenKind::Ack, "ack.v1."),
        (TokenKind::Checkpoint, "chk.v1."),
    ];

    /// This kind's wire prefix.
    pub fn prefix(self) -> &'static str {
        match self {
            Self::State => "st.v1.",
            Self::Ack => "ack.v1.",
            Self::Checkpoint => "chk.v1.",
        }
    }
}

/// The scope fields common to every token kind.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenScope {
    /// The session this token is scoped to.
    pub session_id: SessionId,
    /// The run this token is scoped to.
    pub run_id: RunId,
    /// The node this token is scoped to.
    pub node_id: NodeId,
}

/// The typed payload signed inside a token, matched against its prefix's
/// `tokenKind`.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tokenKind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum TokenPayload {
    /// `st.v1.` — identifies a position in the run's DAG plus the pinned
    /// workflow it belongs to.
    State {
        token_version: u32,
        session_id: SessionId,
        run_id: RunId,
        node_id: NodeId,
        workflow_hash: WorkflowHash,
    },
    /// `ack.v1.` — a client's acknowledgement of a specific pending step.
    Ack {
        token_version: u32,
        session_id: SessionId,
        run_id: RunId,
        node_id: NodeId,
        attempt_id: AttemptId,
    },
    /// `chk.v1.` — a checkpoint marker token.
    Checkpoint {
        token_version: u32,
        session_id: SessionId,
        run_id: RunId,
        node_id: NodeId,
        attempt_id: AttemptId,
    },
}

impl TokenPayload {
    /// This payload's kind.
    pub fn kind(&self) -> TokenKind {
        match self {
            Self::State { .. } => TokenKind::State,
            Self::Ack { .. } => TokenKind::Ack,
            Self::Checkpoint { .. } => TokenKind::Checkpoint,
        }
    }

    /// The carried `tokenVersion`, before it has been validated.
    pub fn token_version(&self) -> u32 {
        match self {
            Self::State { token_version, .. }
            | Self::Ack { token_version, .. }
            | Self::Checkpoint { token_version, .. } => *token_version,
        }
    }

    /// The scope fields, for `assert_scope_match`.
    pub fn scope(&self) -> TokenScope {
        match self {
            Self::State {
                session_id,
                run_id,
                node_id,
                ..
            }
            | Self::Ack {
                session_id,
                run_id,
                node_id,
                ..
            }
            | Self::Checkpoint {
                session_id,
                run_id,
                node_id,
                ..
            } => TokenScope {
                session_id: session_id.clone(),
                run_id: run_id.clone(),
                node_id: node_id.clone(),
            },
        }
    }

    /// The carried `workflowHash`, present only on state tokens.
    pub fn workflow_hash(&self) -> Option<&WorkflowHash> {
        match self {
            Self::State { workflow_hash, .. } => Some(workflow_hash),
            _ => None,
        }
    }

    /// The carried `attemptId`, present only on ack/checkpoint tokens.
    pub fn attempt_id(&self) -> Option<&AttemptId> {
        match self {
            Self::Ack { attempt_id, .. } | Self::Checkpoint { attempt_id, .. } => Some(attempt_id),
            Self::State { .. } => None,
        }
    }
}
