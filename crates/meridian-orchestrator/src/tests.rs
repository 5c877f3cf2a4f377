use std::path::Path;

use meridian_types::{MeridianError, StepDefinition};
use serde_json::json;

use crate::provider::write_workflow_file;
use crate::{ContinueRequest, ContinueResponse, LocalFileWorkflowProvider, NextIntent, OutputNote, Orchestrator};

fn step(id: &str, require_confirmation: bool) -> StepDefinition {
    StepDefinition {
        step_id: id.into(),
        title: format!("Step {id}"),
        prompt: format!("do {id}"),
        require_confirmation: if require_confirmation { Some(true) } else { None },
        run_condition: None,
        loop_config: None,
    }
}

fn two_step_workflow() -> meridian_types::WorkflowDefinition {
    meridian_types::WorkflowDefinition {
        id: "demo".into(),
        name: "Demo".into(),
        version: "1".into(),
        steps: vec![step("s1", false), step("s2", true)],
    }
}

fn orchestrator(data_dir: &Path) -> Orchestrator<LocalFileWorkflowProvider> {
    write_workflow_file(data_dir, &two_step_workflow()).unwrap();
    Orchestrator::new(data_dir, LocalFileWorkflowProvider::at(data_dir)).unwrap()
}

fn ack_for(orc: &Orchestrator<LocalFileWorkflowProvider>, state_token: &str, ack_token: &str) -> ContinueResponse {
    orc.continue_workflow(ContinueRequest {
        state_token: state_token.to_string(),
        ack_token: Some(ack_token.to_string()),
        context: None,
        output: None,
    })
    .unwrap()
}

#[test]
fn start_workflow_mints_tokens_and_reports_the_first_pending_step() {
    let dir = tempfile::tempdir().unwrap();
    let orc = orchestrator(dir.path());

    let started = orc.start_workflow("demo", None).unwrap();
    assert!(!started.is_complete);
    let pending = started.pending.expect("s1 pending");
    assert_eq!(pending.step_id, "s1");
    assert_eq!(started.next_intent, NextIntent::PerformPendingThenContinue);
    assert!(started.state_token.starts_with("st.v1."));
    assert!(started.ack_token.starts_with("ack.v1."));
    assert!(started.checkpoint_token.starts_with("chk.v1."));
}

#[test]
fn rehydrate_echoes_the_state_token_and_mints_a_fresh_ack() {
    let dir = tempfile::tempdir().unwrap();
    let orc = orchestrator(dir.path());
    let started = orc.start_workflow("demo", None).unwrap();

    let rehydrated = orc
        .continue_workflow(ContinueRequest {
            state_token: started.state_token.clone(),
            ack_token: None,
            context: None,
            output: None,
        })
        .unwrap();

    match rehydrated {
        ContinueResponse::Ok {
            state_token,
            ack_token,
            pending,
            next_intent,
            is_complete,
            ..
        } => {
            assert_eq!(state_token, started.state_token);
            assert_ne!(ack_token, started.ack_token);
            assert_eq!(pending.unwrap().step_id, "s1");
            assert_eq!(next_intent, NextIntent::RehydrateOnly);
            assert!(!is_complete);
        }
        ContinueResponse::Blocked { .. } => panic!("rehydrate should never block"),
    }
}

#[test]
fn advance_moves_to_the_next_step_and_requires_confirmation_there() {
    let dir = tempfile::tempdir().unwrap();
    let orc = orchestrator(dir.path());
    let started = orc.start_workflow("demo", None).unwrap();

    let advanced = ack_for(&orc, &started.state_token, &started.ack_token);
    match advanced {
        ContinueResponse::Ok {
            pending,
            next_intent,
            is_complete,
            ..
        } => {
            assert_eq!(pending.unwrap().step_id, "s2");
            assert_eq!(next_intent, NextIntent::AwaitUserConfirmation);
            assert!(!is_complete);
        }
        ContinueResponse::Blocked { .. } => panic!("advance should not block here"),
    }
}

#[test]
fn advancing_past_the_last_step_reports_completion() {
    let dir = tempfile::tempdir().unwrap();
    let orc = orchestrator(dir.path());
    let started = orc.start_workflow("demo", None).unwrap();

    let at_s2 = ack_for(&orc, &started.state_token, &started.ack_token);
    let (s2_state, s2_ack) = match at_s2 {
        ContinueResponse::Ok { state_token, ack_token, .. } => (state_token, ack_token),
        ContinueResponse::Blocked { .. } => panic!("unexpected block"),
    };

    let finished = ack_for(&orc, &s2_state, &s2_ack);
    match finished {
        ContinueResponse::Ok {
            is_complete,
            pending,
            next_intent,
            ..
        } => {
            assert!(is_complete);
            assert!(pending.is_none());
            assert_eq!(next_intent, NextIntent::Complete);
        }
        ContinueResponse::Blocked { .. } => panic!("completion should not block"),
    }
}

#[test]
fn replaying_the_same_ack_is_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let orc = orchestrator(dir.path());
    let started = orc.start_workflow("demo", None).unwrap();

    let first = ack_for(&orc, &started.state_token, &started.ack_token);
    let second = ack_for(&orc, &started.state_token, &started.ack_token);

    let to_json = |r: &ContinueResponse| serde_json::to_string(r).unwrap();
    assert_eq!(to_json(&first), to_json(&second));
}

#[test]
fn advance_attaches_notes_markdown_as_a_node_output() {
    let dir = tempfile::tempdir().unwrap();
    let orc = orchestrator(dir.path());
    let started = orc.start_workflow("demo", None).unwrap();

    let response = orc
        .continue_workflow(ContinueRequest {
            state_token: started.state_token.clone(),
            ack_token: Some(started.ack_token.clone()),
            context: None,
            output: Some(OutputNote {
                notes_markdown: "did the thing".to_string(),
            }),
        })
        .unwrap();

    match response {
        ContinueResponse::Ok { pending, .. } => assert_eq!(pending.unwrap().step_id, "s2"),
        ContinueResponse::Blocked { .. } => panic!("unexpected block"),
    }
}

#[test]
fn rehydrating_with_an_unknown_workflow_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let orc = orchestrator(dir.path());
    let err = orc.start_workflow("does-not-exist", None).unwrap_err();
    assert!(matches!(err, MeridianError::NotFound(_)));
}

#[test]
fn continue_workflow_rejects_a_context_that_is_not_a_json_object() {
    let dir = tempfile::tempdir().unwrap();
    let orc = orchestrator(dir.path());
    let started = orc.start_workflow("demo", None).unwrap();

    let err = orc
        .continue_workflow(ContinueRequest {
            state_token: started.state_token,
            ack_token: None,
            context: Some(json!([1, 2, 3])),
            output: None,
        })
        .unwrap_err();
    assert!(matches!(err, MeridianError::ValidationError { .. }));
}

#[test]
fn continue_workflow_rejects_an_ack_token_scoped_to_a_different_node() {
    let dir = tempfile::tempdir().unwrap();
    let orc = orchestrator(dir.path());
    let started = orc.start_workflow("demo", None).unwrap();

    // An ack minted against a second, independent session's node must never
    // validate against this session's state token.
    let other = orc.start_workflow("demo", None).unwrap();

    let err = orc
        .continue_workflow(ContinueRequest {
            state_token: started.state_token,
            ack_token: Some(other.ack_token),
            context: None,
            output: None,
        })
        .unwrap_err();
    assert!(matches!(err, MeridianError::TokenScopeMismatch));
}

#[test]
fn continue_workflow_rejects_a_tampered_state_token() {
    let dir = tempfile::tempdir().unwrap();
    let orc = orchestrator(dir.path());
    let started = orc.start_workflow("demo", None).unwrap();

    let mut tampered = started.state_token.clone();
    let last = tampered.pop().unwrap();
    tampered.push(if last == 'A' { 'B' } else { 'A' });

    let err = orc
        .continue_workflow(ContinueRequest {
            state_token: tampered,
            ack_token: None,
            context: None,
            output: None,
        })
        .unwrap_err();
    assert!(matches!(err, MeridianError::TokenBadSignature));
}

#[test]
fn advance_on_a_workflow_with_one_step_completes_in_a_single_ack() {
    let dir = tempfile::tempdir().unwrap();
    write_workflow_file(
        dir.path(),
        &meridian_types::WorkflowDefinition {
            id: "single".into(),
            name: "Single".into(),
            version: "1".into(),
            steps: vec![step("only", false)],
        },
    )
    .unwrap();
    let orc = Orchestrator::new(dir.path(), LocalFileWorkflowProvider::at(dir.path())).unwrap();

    let started = orc.start_workflow("single", None).unwrap();
    assert_eq!(started.pending.unwrap().step_id, "only");

    let finished = ack_for(&orc, &started.state_token, &started.ack_token);
    match finished {
        ContinueResponse::Ok { is_complete, pending, .. } => {
            assert!(is_complete);
            assert!(pending.is_none());
        }
        ContinueResponse::Blocked { .. } => panic!("unexpected block"),
    }
}

#[test]
fn start_workflow_appends_exactly_three_events_at_indices_zero_one_two() {
    let dir = tempfile::tempdir().unwrap();
    let orc = orchestrator(dir.path());

    let started = orc.start_workflow("demo", None).unwrap();
    let parsed = meridian_token::parse(&started.state_token).unwrap();
    let meridian_token::TokenPayload::State { session_id, .. } = parsed.payload else {
        panic!("expected a state token payload");
    };

    let log = meridian_eventlog::EventLog::at(dir.path(), &session_id);
    let loaded = log.load().unwrap();
    let indices: Vec<u64> = loaded.events.iter().map(|e| e.event_index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    assert!(matches!(loaded.events[0].data, meridian_types::EventData::SessionCreated));
    assert!(matches!(loaded.events[1].data, meridian_types::EventData::RunStarted { .. }));
    assert!(matches!(loaded.events[2].data, meridian_types::EventData::NodeCreated { .. }));
}
