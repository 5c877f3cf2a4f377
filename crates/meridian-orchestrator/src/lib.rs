#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **meridian-orchestrator** – The execution orchestrator:
//! `start_workflow`/`continue_workflow`, implementing the rehydrate/advance/
//! replay state machine over the stores, gate, token codec, and interpreter
//! built by the rest of the workspace.

/// The workflow-definition provider collaborator.
pub mod provider;

pub use provider::{write_workflow_file, LocalFileWorkflowProvider, WorkflowProvider};

use std::path::PathBuf;

use meridian_crypto::Keyring;
use meridian_eventlog::{EventBatch, EventLog, EventLogError, SnapshotPin};
use meridian_gate::with_healthy_session_lock;
use meridian_interpreter::{self, EngineEvent};
use meridian_store::{SnapshotStore, WorkflowStore};
use meridian_types::{
    AdvanceOutcome, AttemptId, DomainEvent, EdgeCause, EdgeKind, EventData, EventId, EventScope,
    ExecutionSnapshot, MeridianError, NodeId, NodeKind, PinnedWorkflow, Result,
    RunId, SessionId, SnapshotRef, StepMetadata, WorkflowDefinition, WorkflowHash,
    MAX_CANON_DEPTH, MAX_CONTEXT_BYTES, MAX_NOTES_MARKDOWN_BYTES,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument};

/// What the caller should do next, derived from `(isComplete,
/// pending.requireConfirmation, was this a rehydrate call)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextIntent {
    /// A step is pending and does not require confirmation: the agent
    /// should perform it, then call `continue_workflow` again.
    PerformPendingThenContinue,
    /// A step is pending and requires explicit user confirmation first.
    AwaitUserConfirmation,
    /// This call only rehydrated state; no step was advanced.
    RehydrateOnly,
    /// The workflow has no further steps.
    Complete,
}

/// The output of `start_workflow`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    /// Opaque handle to resume or advance this run; echoed back in
    /// [`ContinueRequest::state_token`].
    pub state_token: String,
    /// Must be returned as [`ContinueRequest::ack_token`] to advance past the
    /// pending step; a rehydrate call omits it.
    pub ack_token: String,
    /// Token scoped to the latest checkpoint node.
    pub checkpoint_token: String,
    /// Whether the run has already exhausted the workflow.
    pub is_complete: bool,
    /// The step instance now awaiting an advance, if any.
    pub pending: Option<StepMetadata>,
    /// What the caller should do next.
    pub next_intent: NextIntent,
}

/// The input to `continue_workflow`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ContinueRequest {
    /// The state token from `start_workflow` or a previous `continue_workflow`.
    pub state_token: String,
    /// The ack token acknowledging the pending step; omit to rehydrate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_token: Option<String>,
    /// JSON object merged in as the step's context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    /// Free-text notes attached to the node being left.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputNote>,
}

/// Free-text notes an agent attaches to the node it is leaving.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputNote {
    /// Markdown notes, truncated to [`MAX_NOTES_MARKDOWN_BYTES`] on a char
    /// boundary before being attached to the log.
    pub notes_markdown: String,
}

/// The output of `continue_workflow`.
#[allow(missing_docs)]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ContinueResponse {
    /// The advance (or rehydrate) succeeded without being blocked.
    Ok {
        state_token: String,
        ack_token: String,
        checkpoint_token: String,
        is_complete: bool,
        pending: Option<StepMetadata>,
        next_intent: NextIntent,
    },
    /// The recorded advance was blocked; `blockers` carries the reasons.
    Blocked {
        state_token: String,
        ack_token: String,
        checkpoint_token: String,
        is_complete: bool,
        pending: Option<StepMetadata>,
        blockers: Vec<Value>,
        next_intent: NextIntent,
    },
}

fn compute_next_intent(is_complete: bool, require_confirmation: bool, was_rehydrate: bool) -> NextIntent {
    if is_complete {
        NextIntent::Complete
    } else if was_rehydrate {
        NextIntent::RehydrateOnly
    } else if require_confirmation {
        NextIntent::AwaitUserConfirmation
    } else {
        NextIntent::PerformPendingThenContinue
    }
}

/// Validate a `context` payload: must be a plain JSON object, canonicalizable,
/// at most [`MAX_CONTEXT_BYTES`], nesting no deeper than [`MAX_CANON_DEPTH`].
fn validate_context(context: &Value) -> Result<()> {
    if !context.is_object() {
        return Err(MeridianError::validation(
            "context_invalid_shape",
            "context must be a JSON object",
        ));
    }
    let bytes = meridian_canon::canonicalize(context).map_err(|e| match e {
        meridian_canon::CanonError::NonFiniteNumber => {
            MeridianError::validation("context_non_finite_number", e.to_string())
        }
        meridian_canon::CanonError::Circular => {
            MeridianError::validation("context_circular_reference", e.to_string())
        }
        meridian_canon::CanonError::TooDeep => MeridianError::validation(
            "context_too_deep",
            format!("context nesting exceeds {MAX_CANON_DEPTH}"),
        ),
        meridian_canon::CanonError::UnsupportedValue(_) => {
            MeridianError::validation("context_unsupported_value", e.to_string())
        }
    })?;
    if bytes.len() > MAX_CONTEXT_BYTES {
        return Err(MeridianError::validation(
            "context_budget_exceeded",
            format!("context is {} bytes, ceiling is {MAX_CONTEXT_BYTES}", bytes.len()),
        ));
    }
    Ok(())
}

fn find_run_started<'a>(events: &'a [DomainEvent], run_id: &RunId) -> Option<&'a DomainEvent> {
    events.iter().find(|e| {
        e.scope.run_id.as_ref() == Some(run_id) && matches!(e.data, EventData::RunStarted { .. })
    })
}

fn find_node_created<'a>(events: &'a [DomainEvent], node_id: &NodeId) -> Option<&'a DomainEvent> {
    events.iter().find(|e| {
        e.scope.node_id.as_ref() == Some(node_id) && matches!(e.data, EventData::NodeCreated { .. })
    })
}

fn node_has_outgoing_edge(events: &[DomainEvent], node_id: &NodeId) -> bool {
    events.iter().any(|e| match &e.data {
        EventData::EdgeCreated { from_node_id, .. } => from_node_id == node_id,
        _ => false,
    })
}

/// Locates `run_started`/`node_created` for `(run_id, node_id)` and checks
/// both carry `expected_hash`. Shared by the rehydrate and advance paths.
fn locate_run_and_node<'a>(
    events: &'a [DomainEvent],
    run_id: &RunId,
    node_id: &NodeId,
    expected_hash: &WorkflowHash,
) -> Result<&'a DomainEvent> {
    let run_started = find_run_started(events, run_id).ok_or(MeridianError::TokenUnknownNode)?;
    if let EventData::RunStarted { workflow_hash, .. } = &run_started.data {
        if workflow_hash != expected_hash {
            return Err(MeridianError::TokenWorkflowHashMismatch);
        }
    }

    let node_created = find_node_created(events, node_id).ok_or(MeridianError::TokenUnknownNode)?;
    if let EventData::NodeCreated { workflow_hash, .. } = &node_created.data {
        if workflow_hash != expected_hash {
            return Err(MeridianError::TokenWorkflowHashMismatch);
        }
    }
    Ok(node_created)
}

fn snapshot_ref_of(node_created: &DomainEvent) -> SnapshotRef {
    match &node_created.data {
        EventData::NodeCreated { snapshot_ref, .. } => snapshot_ref.clone(),
        _ => unreachable!("caller guarantees a node_created event"),
    }
}

/// The orchestrator: owns the data directory, the signing key, and the
/// collaborator used to resolve workflow ids.
pub struct Orchestrator<P: WorkflowProvider> {
    data_dir: PathBuf,
    key: Vec<u8>,
    provider: P,
    snapshot_store: SnapshotStore,
    workflow_store: WorkflowStore,
}

impl<P: WorkflowProvider> Orchestrator<P> {
    /// Construct an orchestrator rooted at `data_dir`, loading (or creating)
    /// its signing key.
    pub fn new(data_dir: impl Into<PathBuf>, provider: P) -> Result<Self> {
        let data_dir = data_dir.into();
        let key = Keyring::at(&data_dir)
            .load_or_create()
            .map_err(|e| MeridianError::InternalError(MeridianError::scrub_home(&e.to_string())))?;
        Ok(Self {
            snapshot_store: SnapshotStore::at(&data_dir),
            workflow_store: WorkflowStore::at(&data_dir),
            data_dir,
            key,
            provider,
        })
    }

    fn pinned(&self, hash: &WorkflowHash) -> Result<PinnedWorkflow> {
        self.workflow_store
            .get(hash)
            .map_err(|e| MeridianError::InternalError(e.to_string()))?
            .ok_or_else(|| {
                MeridianError::InternalError(format!("pinned workflow {hash} missing from store"))
            })
    }

    fn snapshot(&self, snapshot_ref: &SnapshotRef) -> Result<ExecutionSnapshot> {
        self.snapshot_store
            .get(snapshot_ref)
            .map_err(|e| MeridianError::InternalError(e.to_string()))?
            .ok_or_else(|| {
                MeridianError::InternalError(format!("snapshot {snapshot_ref} missing from store"))
            })
    }

    fn step_metadata_for(
        &self,
        pinned: &PinnedWorkflow,
        instance: Option<&meridian_types::StepInstance>,
    ) -> Option<StepMetadata> {
        instance.and_then(|i| pinned.step_metadata(&i.step_id))
    }

    /// `start_workflow(workflowId, context?)`.
    #[instrument(skip(self, context), fields(workflow_id))]
    pub fn start_workflow(&self, workflow_id: &str, context: Option<Value>) -> Result<StartResponse> {
        let context = context.unwrap_or_else(|| Value::Object(Default::default()));
        validate_context(&context)?;

        let definition = self
            .provider
            .get_workflow_by_id(workflow_id)?
            .ok_or_else(|| MeridianError::NotFound(format!("workflow {workflow_id}")))?;
        definition.validate()?;

        let workflow_hash = self
            .workflow_store
            .pin(definition.clone())
            .map_err(|e| MeridianError::InternalError(e.to_string()))?;

        let session_id = SessionId::new();
        let run_id = RunId::new();
        let node_id = NodeId::new();
        let attempt_id = AttemptId::new();

        let next_result = meridian_interpreter::next(&definition.steps, &ExecutionSnapshot::Init, &context)
            .map_err(|e| MeridianError::InternalError(e.to_string()))?;

        let snapshot_ref = self
            .snapshot_store
            .put(&next_result.state)
            .map_err(|e| MeridianError::InternalError(e.to_string()))?;

        let session_created = DomainEvent {
            event_index: 0,
            event_id: EventId::new(),
            session_id: session_id.clone(),
            dedupe_key: format!("session_created:{session_id}"),
            scope: EventScope::default(),
            data: EventData::SessionCreated,
        };
        let run_started = DomainEvent {
            event_index: 1,
            event_id: EventId::new(),
            session_id: session_id.clone(),
            dedupe_key: format!("run_started:{run_id}"),
            scope: EventScope {
                run_id: Some(run_id.clone()),
                node_id: None,
            },
            data: EventData::RunStarted {
                workflow_id: workflow_id.to_string(),
                workflow_hash: workflow_hash.clone(),
                source_kind: meridian_types::SOURCE_KIND_V1_PINNED.to_string(),
                source_ref: workflow_id.to_string(),
            },
        };
        let node_created_id = EventId::new();
        let node_created = DomainEvent {
            event_index: 2,
            event_id: node_created_id.clone(),
            session_id: session_id.clone(),
            dedupe_key: format!("node_created:{node_id}"),
            scope: EventScope {
                run_id: Some(run_id.clone()),
                node_id: Some(node_id.clone()),
            },
            data: EventData::NodeCreated {
                node_kind: NodeKind::Step,
                parent_node_id: None,
                workflow_hash: workflow_hash.clone(),
                snapshot_ref: snapshot_ref.clone(),
            },
        };

        with_healthy_session_lock(&self.data_dir, &session_id, |witness, _loaded| {
            let event_log = EventLog::at(&self.data_dir, &session_id);
            event_log
                .append(
                    witness,
                    EventBatch {
                        events: vec![session_created, run_started, node_created],
                        snapshot_pins: vec![SnapshotPin {
                            snapshot_ref: snapshot_ref.clone(),
                            event_index: 2,
                            created_by_event_id: node_created_id,
                        }],
                    },
                    |candidate| candidate == &snapshot_ref,
                )
                .map_err(|e: EventLogError| match e {
                    EventLogError::Io(io) => MeridianError::InternalError(MeridianError::scrub_home(&io.to_string())),
                    EventLogError::Corruption { location, reason } => {
                        MeridianError::SessionNotHealthy { location: location.to_string(), reason }
                    }
                    EventLogError::InvariantViolation(reason) => MeridianError::InternalError(reason),
                })
                .map(|_| ())
        })
        .map_err(MeridianError::from)?;

        let pinned = self.pinned(&workflow_hash)?;
        let pending_metadata = self.step_metadata_for(&pinned, next_result.pending.as_ref());
        let require_confirmation = pending_metadata
            .as_ref()
            .map(|m| m.require_confirmation)
            .unwrap_or(false);

        let state_token = meridian_token::sign(
            &meridian_token::TokenPayload::State {
                token_version: meridian_token::TOKEN_VERSION,
                session_id: session_id.clone(),
                run_id: run_id.clone(),
                node_id: node_id.clone(),
                workflow_hash,
            },
            &self.key,
        )?;
        let ack_token = meridian_token::sign(
            &meridian_token::TokenPayload::Ack {
                token_version: meridian_token::TOKEN_VERSION,
                session_id: session_id.clone(),
                run_id: run_id.clone(),
                node_id: node_id.clone(),
                attempt_id: attempt_id.clone(),
            },
            &self.key,
        )?;
        let checkpoint_token = meridian_token::sign(
            &meridian_token::TokenPayload::Checkpoint {
                token_version: meridian_token::TOKEN_VERSION,
                session_id,
                run_id,
                node_id,
                attempt_id,
            },
            &self.key,
        )?;

        info!(workflow_id, is_complete = next_result.is_complete, "workflow started");

        Ok(StartResponse {
            state_token,
            ack_token,
            checkpoint_token,
            is_complete: next_result.is_complete,
            pending: pending_metadata,
            next_intent: compute_next_intent(next_result.is_complete, require_confirmation, false),
        })
    }

    /// `continue_workflow({stateToken, ackToken?, context?, output?})`.
    #[instrument(skip(self, request))]
    pub fn continue_workflow(&self, request: ContinueRequest) -> Result<ContinueResponse> {
        let parsed_state = meridian_token::parse(&request.state_token)?;
        meridian_token::verify(&parsed_state, &self.key)?;
        if parsed_state.kind() != meridian_token::TokenKind::State {
            return Err(MeridianError::TokenInvalidFormat);
        }
        let state_payload = parsed_state.payload.clone();

        let context = request.context.clone().unwrap_or_else(|| Value::Object(Default::default()));
        validate_context(&context)?;

        let ack_payload = match &request.ack_token {
            Some(raw) => {
                let parsed_ack = meridian_token::parse(raw)?;
                meridian_token::verify(&parsed_ack, &self.key)?;
                if parsed_ack.kind() != meridian_token::TokenKind::Ack {
                    return Err(MeridianError::TokenInvalidFormat);
                }
                meridian_token::assert_scope_match(&state_payload, &parsed_ack.payload)?;
                Some(parsed_ack.payload)
            }
            None => None,
        };

        let (session_id, run_id, node_id, workflow_hash) = match &state_payload {
            meridian_token::TokenPayload::State {
                session_id,
                run_id,
                node_id,
                workflow_hash,
                ..
            } => (session_id.clone(), run_id.clone(), node_id.clone(), workflow_hash.clone()),
            _ => unreachable!("kind checked above"),
        };

        match ack_payload {
            None => self.rehydrate(&request.state_token, session_id, run_id, node_id, workflow_hash),
            Some(ack) => {
                let attempt_id = ack
                    .attempt_id()
                    .cloned()
                    .expect("ack payload always carries attemptId");
                self.advance(
                    &request.state_token,
                    session_id,
                    run_id,
                    node_id,
                    workflow_hash,
                    attempt_id,
                    &context,
                    request.output.as_ref(),
                )
            }
        }
    }

    fn rehydrate(
        &self,
        state_token: &str,
        session_id: SessionId,
        run_id: RunId,
        node_id: NodeId,
        workflow_hash: WorkflowHash,
    ) -> Result<ContinueResponse> {
        let event_log = EventLog::at(&self.data_dir, &session_id);
        let loaded = event_log.load().map_err(translate_load_error)?;

        let node_created = locate_run_and_node(&loaded.events, &run_id, &node_id, &workflow_hash)?;
        let snapshot_ref = snapshot_ref_of(node_created);
        let snapshot = self.snapshot(&snapshot_ref)?;
        let pinned = self.pinned(&workflow_hash)?;
        let pending_metadata = self.step_metadata_for(&pinned, snapshot.pending());
        let is_complete = snapshot.is_complete();

        let next_attempt_id = AttemptId::new();
        let ack_token = meridian_token::sign(
            &meridian_token::TokenPayload::Ack {
                token_version: meridian_token::TOKEN_VERSION,
                session_id: session_id.clone(),
                run_id: run_id.clone(),
                node_id: node_id.clone(),
                attempt_id: next_attempt_id.clone(),
            },
            &self.key,
        )?;
        let checkpoint_token = meridian_token::sign(
            &meridian_token::TokenPayload::Checkpoint {
                token_version: meridian_token::TOKEN_VERSION,
                session_id,
                run_id,
                node_id,
                attempt_id: next_attempt_id,
            },
            &self.key,
        )?;

        let require_confirmation = pending_metadata
            .as_ref()
            .map(|m| m.require_confirmation)
            .unwrap_or(false);

        Ok(ContinueResponse::Ok {
            state_token: state_token.to_string(),
            ack_token,
            checkpoint_token,
            is_complete,
            pending: pending_metadata,
            next_intent: compute_next_intent(is_complete, require_confirmation, true),
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn advance(
        &self,
        state_token: &str,
        session_id: SessionId,
        run_id: RunId,
        node_id: NodeId,
        workflow_hash: WorkflowHash,
        attempt_id: AttemptId,
        context: &Value,
        output: Option<&OutputNote>,
    ) -> Result<ContinueResponse> {
        let dedupe_key = DomainEvent::advance_dedupe_key(&session_id, &node_id, &attempt_id);
        let event_log = EventLog::at(&self.data_dir, &session_id);

        let loaded = event_log.load().map_err(translate_load_error)?;
        if loaded.events.iter().any(|e| e.dedupe_key == dedupe_key) {
            return self.replay(state_token, &loaded.events, &session_id, &run_id, &workflow_hash, &attempt_id);
        }

        let pinned = self.pinned(&workflow_hash)?;

        with_healthy_session_lock(&self.data_dir, &session_id, |witness, loaded| {
                if loaded.events.iter().any(|e| e.dedupe_key == dedupe_key) {
                    return Ok(());
                }

                let node_created = locate_run_and_node(&loaded.events, &run_id, &node_id, &workflow_hash)?;
                let snapshot_ref = snapshot_ref_of(node_created);
                let state = self.snapshot(&snapshot_ref)?;
                let pending = state
                    .pending()
                    .cloned()
                    .ok_or_else(|| MeridianError::PreconditionFailed("no step is pending".to_string()))?;

                let advanced_state = meridian_interpreter::apply_event(
                    &state,
                    &EngineEvent::StepCompleted(pending),
                )
                .map_err(|e| MeridianError::InternalError(e.to_string()))?;
                let next_result = meridian_interpreter::next(&pinned.file.definition.steps, &advanced_state, context)
                    .map_err(|e| MeridianError::InternalError(e.to_string()))?;

                let new_snapshot_ref = self
                    .snapshot_store
                    .put(&next_result.state)
                    .map_err(|e| MeridianError::InternalError(e.to_string()))?;

                let to_node_id = NodeId::new();
                let advance_event_id = EventId::new();
                let cause_is_non_tip = node_has_outgoing_edge(&loaded.events, &node_id);

                let advance_recorded = DomainEvent {
                    event_index: loaded.manifest.next_event_index,
                    event_id: advance_event_id.clone(),
                    session_id: session_id.clone(),
                    dedupe_key: dedupe_key.clone(),
                    scope: EventScope {
                        run_id: Some(run_id.clone()),
                        node_id: Some(node_id.clone()),
                    },
                    data: EventData::AdvanceRecorded {
                        attempt_id: attempt_id.clone(),
                        intent: "ack_pending".to_string(),
                        outcome: AdvanceOutcome::Advanced {
                            to_node_id: to_node_id.clone(),
                        },
                    },
                };
                let node_created_id = EventId::new();
                let node_created_event = DomainEvent {
                    event_index: loaded.manifest.next_event_index + 1,
                    event_id: node_created_id.clone(),
                    session_id: session_id.clone(),
                    dedupe_key: format!("node_created:{to_node_id}"),
                    scope: EventScope {
                        run_id: Some(run_id.clone()),
                        node_id: Some(to_node_id.clone()),
                    },
                    data: EventData::NodeCreated {
                        node_kind: NodeKind::Step,
                        parent_node_id: Some(node_id.clone()),
                        workflow_hash: workflow_hash.clone(),
                        snapshot_ref: new_snapshot_ref.clone(),
                    },
                };
                let edge_cause = if cause_is_non_tip {
                    EdgeCause::NonTipAdvance {
                        event_id: advance_event_id.clone(),
                    }
                } else {
                    EdgeCause::IntentionalFork {
                        event_id: advance_event_id.clone(),
                    }
                };
                let edge_created = DomainEvent {
                    event_index: loaded.manifest.next_event_index + 2,
                    event_id: EventId::new(),
                    session_id: session_id.clone(),
                    dedupe_key: format!("edge_created:{node_id}:{to_node_id}"),
                    scope: EventScope {
                        run_id: Some(run_id.clone()),
                        node_id: None,
                    },
                    data: EventData::EdgeCreated {
                        edge_kind: EdgeKind::AckedStep,
                        from_node_id: node_id.clone(),
                        to_node_id: to_node_id.clone(),
                        cause: edge_cause,
                    },
                };

                let mut events = vec![advance_recorded, node_created_event, edge_created];
                if let Some(note) = output {
                    let mut notes_markdown = note.notes_markdown.clone();
                    if notes_markdown.len() > MAX_NOTES_MARKDOWN_BYTES {
                        let mut boundary = MAX_NOTES_MARKDOWN_BYTES;
                        while !notes_markdown.is_char_boundary(boundary) {
                            boundary -= 1;
                        }
                        notes_markdown.truncate(boundary);
                    }
                    let output_id = meridian_types::OutputId::parse(format!("out_recap_{attempt_id}"))
                        .map_err(|_| MeridianError::InternalError("attemptId is not delimiter-safe".to_string()))?;
                    events.push(DomainEvent {
                        event_index: loaded.manifest.next_event_index + 3,
                        event_id: EventId::new(),
                        session_id: session_id.clone(),
                        dedupe_key: format!("node_output_appended:{output_id}"),
                        scope: EventScope {
                            run_id: Some(run_id.clone()),
                            node_id: Some(node_id.clone()),
                        },
                        data: EventData::NodeOutputAppended {
                            output_id,
                            output_channel: meridian_types::OutputChannel::Recap,
                            payload: serde_json::json!({"notesMarkdown": notes_markdown}),
                        },
                    });
                }

                event_log
                    .append(
                        witness,
                        EventBatch {
                            events,
                            snapshot_pins: vec![SnapshotPin {
                                snapshot_ref: new_snapshot_ref,
                                event_index: loaded.manifest.next_event_index + 1,
                                created_by_event_id: node_created_id,
                            }],
                        },
                        |candidate| self.snapshot_store.contains(candidate),
                    )
                    .map_err(|e: EventLogError| match e {
                        EventLogError::Io(io) => {
                            MeridianError::InternalError(MeridianError::scrub_home(&io.to_string()))
                        }
                        EventLogError::Corruption { location, reason } => {
                            MeridianError::SessionNotHealthy { location: location.to_string(), reason }
                        }
                        EventLogError::InvariantViolation(reason) => MeridianError::InternalError(reason),
                    })?;

                Ok(())
            })
            .map_err(MeridianError::from)?;

        // Whether we just appended or a concurrent writer (or an earlier
        // call) already had, the outcome is read back from disk so this
        // call and any replay of it return byte-identical responses.
        let reloaded = event_log.load().map_err(translate_load_error)?;
        self.replay(state_token, &reloaded.events, &session_id, &run_id, &workflow_hash, &attempt_id)
    }

    fn replay(
        &self,
        state_token: &str,
        events: &[DomainEvent],
        session_id: &SessionId,
        run_id: &RunId,
        workflow_hash: &WorkflowHash,
        attempt_id: &AttemptId,
    ) -> Result<ContinueResponse> {
        let advance_recorded = events
            .iter()
            .find(|e| matches!(&e.data, EventData::AdvanceRecorded { attempt_id: a, .. } if a == attempt_id))
            .ok_or_else(|| MeridianError::InternalError("advance_recorded missing on replay".to_string()))?;

        let (node_id, outcome) = match &advance_recorded.data {
            EventData::AdvanceRecorded { outcome, .. } => (
                advance_recorded
                    .scope
                    .node_id
                    .clone()
                    .ok_or_else(|| MeridianError::InternalError("advance_recorded missing nodeId scope".to_string()))?,
                outcome.clone(),
            ),
            _ => unreachable!("matched above"),
        };

        match outcome {
            AdvanceOutcome::Blocked { blockers } => {
                let node_created = find_node_created(events, &node_id)
                    .ok_or_else(|| MeridianError::InternalError("blocked node_created missing".to_string()))?;
                let snapshot = self.snapshot(&snapshot_ref_of(node_created))?;
                let pinned = self.pinned(workflow_hash)?;
                let pending_metadata = self.step_metadata_for(&pinned, snapshot.pending());
                let is_complete = snapshot.is_complete();
                let checkpoint_token = meridian_token::sign(
                    &meridian_token::TokenPayload::Checkpoint {
                        token_version: meridian_token::TOKEN_VERSION,
                        session_id: session_id.clone(),
                        run_id: run_id.clone(),
                        node_id: node_id.clone(),
                        attempt_id: attempt_id.clone(),
                    },
                    &self.key,
                )?;
                let ack_token = meridian_token::sign(
                    &meridian_token::TokenPayload::Ack {
                        token_version: meridian_token::TOKEN_VERSION,
                        session_id: session_id.clone(),
                        run_id: run_id.clone(),
                        node_id,
                        attempt_id: attempt_id.clone(),
                    },
                    &self.key,
                )?;
                let require_confirmation = pending_metadata
                    .as_ref()
                    .map(|m| m.require_confirmation)
                    .unwrap_or(false);
                Ok(ContinueResponse::Blocked {
                    state_token: state_token.to_string(),
                    ack_token,
                    checkpoint_token,
                    is_complete,
                    pending: pending_metadata,
                    blockers,
                    next_intent: compute_next_intent(is_complete, require_confirmation, false),
                })
            }
            AdvanceOutcome::Advanced { to_node_id } => {
                let node_created = find_node_created(events, &to_node_id)
                    .ok_or_else(|| MeridianError::InternalError("advanced child node_created missing".to_string()))?;
                let snapshot = self.snapshot(&snapshot_ref_of(node_created))?;
                let pinned = self.pinned(workflow_hash)?;
                let pending_metadata = self.step_metadata_for(&pinned, snapshot.pending());
                let is_complete = snapshot.is_complete();

                let next_attempt_id = attempt_id_for_next_node(attempt_id);
                let next_state_token = meridian_token::sign(
                    &meridian_token::TokenPayload::State {
                        token_version: meridian_token::TOKEN_VERSION,
                        session_id: session_id.clone(),
                        run_id: run_id.clone(),
                        node_id: to_node_id.clone(),
                        workflow_hash: workflow_hash.clone(),
                    },
                    &self.key,
                )?;
                let next_ack_token = meridian_token::sign(
                    &meridian_token::TokenPayload::Ack {
                        token_version: meridian_token::TOKEN_VERSION,
                        session_id: session_id.clone(),
                        run_id: run_id.clone(),
                        node_id: to_node_id.clone(),
                        attempt_id: next_attempt_id.clone(),
                    },
                    &self.key,
                )?;
                let next_checkpoint_token = meridian_token::sign(
                    &meridian_token::TokenPayload::Checkpoint {
                        token_version: meridian_token::TOKEN_VERSION,
                        session_id: session_id.clone(),
                        run_id: run_id.clone(),
                        node_id: to_node_id,
                        attempt_id: next_attempt_id,
                    },
                    &self.key,
                )?;

                debug!(%advance_recorded.event_id, "replayed an advance deterministically");

                let require_confirmation = pending_metadata
                    .as_ref()
                    .map(|m| m.require_confirmation)
                    .unwrap_or(false);

                Ok(ContinueResponse::Ok {
                    state_token: next_state_token,
                    ack_token: next_ack_token,
                    checkpoint_token: next_checkpoint_token,
                    is_complete,
                    pending: pending_metadata,
                    next_intent: compute_next_intent(is_complete, require_confirmation, false),
                })
            }
        }
    }
}

/// `attemptIdForNextNode(parentAttemptId) = "next_" + parentAttemptId`, so
/// repeated replays of the same advance mint byte-identical next tokens.
fn attempt_id_for_next_node(parent: &AttemptId) -> AttemptId {
    AttemptId::parse(format!("next_{parent}")).expect("prefixing a delimiter-safe id stays delimiter-safe")
}

fn translate_load_error(err: EventLogError) -> MeridianError {
    match err {
        EventLogError::Io(io) => MeridianError::InternalError(MeridianError::scrub_home(&io.to_string())),
        EventLogError::Corruption { location, reason } => MeridianError::SessionNotHealthy {
            location: location.to_string(),
            reason,
        },
        EventLogError::InvariantViolation(reason) => MeridianError::InternalError(reason),
    }
}

#[cfg(test)]
mod tests;
