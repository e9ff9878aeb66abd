#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use common::{action, final_answer, Fixture};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use vigil_control::ModelSwitchSignal;
use vigil_core::{
    AgentEvent, AgentState, CycleOutcome, OrchestratorConfig, OrchestratorError, Role, Verdict,
};
use vigil_providers::Script;
use vigil_tasks::{TaskBoard, TaskStatus, VerifyProbe};
use vigil_tools::Observation;

fn roles(orchestrator: &vigil_core::Orchestrator) -> Vec<Role> {
    orchestrator
        .conversation()
        .turns()
        .map(|t| t.role)
        .collect()
}

#[tokio::test]
async fn test_direct_final_answer() {
    let fixture = Fixture::new(vec![final_answer("Hello there.")]);
    let mut orchestrator = fixture.orchestrator(OrchestratorConfig::default());

    let report = orchestrator
        .run_cycle("say hello", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.outcome.text(), Some("Hello there."));
    assert_eq!(report.model, "A");
    assert_eq!(roles(&orchestrator), vec![Role::User, Role::Assistant]);
    assert_eq!(orchestrator.state(), AgentState::Idle);
    assert!(fixture.audit.entries().unwrap().is_empty());
}

#[tokio::test]
async fn test_tool_step_feeds_observation_back() {
    let fixture = Fixture::new(vec![]);
    let notes = fixture.path("notes.txt");
    std::fs::write(&notes, "buy milk").unwrap();
    fixture.provider.push(action("file.read", json!({"path": notes})));
    fixture.provider.push(final_answer("The note says buy milk."));

    let mut orchestrator = fixture.orchestrator(OrchestratorConfig::default());
    let report = orchestrator
        .run_cycle("what does my note say?", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.outcome.text(), Some("The note says buy milk."));
    assert_eq!(
        roles(&orchestrator),
        vec![
            Role::User,
            Role::Assistant,
            Role::ToolObservation,
            Role::Assistant,
        ]
    );

    let observation = orchestrator.conversation().turns().nth(2).unwrap();
    assert_eq!(observation.content, "buy milk");

    let requests = fixture.provider.requests();
    assert_eq!(requests.len(), 2);
    let second = &requests[1].messages;
    assert_eq!(second[0].role, "system");
    assert!(second
        .iter()
        .any(|m| m.role == "user" && m.content == "Observation: buy milk"));

    let entries = fixture.audit.entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].tool, "file.read");
    assert_eq!(entries[0].decision, "approved");
    assert_eq!(entries[0].outcome, "success");
}

#[tokio::test]
async fn test_denied_call_is_logged_and_surfaced() {
    let fixture = Fixture::new(vec![
        action("shell.exec", json!({"command": "rm -rf /tmp/x"})),
        final_answer("I need your confirmation first."),
    ]);
    let mut orchestrator = fixture.orchestrator(OrchestratorConfig::default());

    let report = orchestrator
        .run_cycle("clean up", &CancellationToken::new())
        .await
        .unwrap();

    let step = &report.steps[0];
    assert_eq!(
        step.observation,
        Some(Observation::Denied("confirmation required".into()))
    );

    let observation = orchestrator
        .conversation()
        .turns()
        .find(|t| t.role == Role::ToolObservation)
        .unwrap();
    assert_eq!(observation.content, "Denied: confirmation required");

    let entries = fixture.audit.entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].tier, vigil_policy::RiskTier::High);
    assert_eq!(entries[0].decision, "denied: confirmation required");
    assert_eq!(entries[0].outcome, "denied");
}

#[tokio::test]
async fn test_banned_path_is_denied_without_execution() {
    let fixture = Fixture::new(vec![
        action(
            "file.write",
            json!({"path": "/usr/local/evil", "content": "x"}),
        ),
        final_answer("That location is off limits."),
    ]);
    let mut orchestrator = fixture.orchestrator(OrchestratorConfig::default());

    let report = orchestrator
        .run_cycle("write it", &CancellationToken::new())
        .await
        .unwrap();

    let observation = report.steps[0].observation.clone().unwrap();
    match observation {
        Observation::Denied(reason) => assert!(reason.starts_with("banned path"), "{reason}"),
        other => panic!("expected denial, got {other:?}"),
    }
    assert!(!std::path::Path::new("/usr/local/evil").exists());
}

#[tokio::test]
async fn test_malformed_arguments_are_denied() {
    let fixture = Fixture::new(vec![
        Script::text(
            "Thought: read it\nAction: file.read\nAction Input: {\"path\": ",
        ),
        final_answer("I could not form the call."),
    ]);
    let mut orchestrator = fixture.orchestrator(OrchestratorConfig::default());

    let report = orchestrator
        .run_cycle("read", &CancellationToken::new())
        .await
        .unwrap();

    let step = &report.steps[0];
    assert!(!step.action.as_ref().unwrap().decision.is_approved());
    match step.observation.as_ref().unwrap() {
        Observation::Denied(reason) => {
            assert!(reason.starts_with("malformed arguments"), "{reason}")
        }
        other => panic!("expected denial, got {other:?}"),
    }
    assert_eq!(fixture.audit.entries().unwrap()[0].outcome, "denied");
}

#[tokio::test]
async fn test_step_ceiling_stops_with_summary() {
    let fixture = Fixture::new(vec![]);
    let dir = fixture.temp.path().to_path_buf();
    for i in 0..16 {
        fixture.provider.push(Script::text(&format!(
            "Thought: look again, attempt {i}\nAction: file.list\nAction Input: {}",
            json!({"path": dir})
        )));
    }

    let mut orchestrator = fixture.orchestrator(OrchestratorConfig::default());
    let report = orchestrator
        .run_cycle("keep looking", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(fixture.provider.requests().len(), 15);
    assert_eq!(fixture.provider.remaining(), 1);
    assert_eq!(report.steps.len(), 15);

    let CycleOutcome::StepLimit { summary } = &report.outcome else {
        panic!("expected step limit, got {:?}", report.outcome);
    };
    assert!(summary.contains("limit of 15 reasoning steps"));
    assert!(summary.contains("- file.list:"));

    let last = orchestrator.conversation().last().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert_eq!(&last.content, summary);
}

#[tokio::test]
async fn test_repeated_step_ends_cycle() {
    let fixture = Fixture::new(vec![]);
    let step = action("file.list", json!({"path": fixture.temp.path()}));
    fixture.provider.push(step.clone());
    fixture.provider.push(step);
    fixture.provider.push(final_answer("never reached"));

    let mut orchestrator = fixture.orchestrator(OrchestratorConfig::default());
    let report = orchestrator
        .run_cycle("list", &CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(report.outcome, CycleOutcome::Repetition { .. }));
    assert_eq!(fixture.provider.requests().len(), 2);
    assert_eq!(fixture.audit.entries().unwrap().len(), 1);
}

#[tokio::test]
async fn test_model_switch_applies_on_next_step() {
    let fixture = Fixture::new(vec![
        action("test.switch", json!({"model": "B"})),
        final_answer("Switched."),
    ]);
    let mut orchestrator = fixture.orchestrator(OrchestratorConfig::default());

    let report = orchestrator
        .run_cycle("switch models", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(fixture.provider.models_requested(), vec!["A", "B"]);
    assert_eq!(orchestrator.model(), "B");
    assert_eq!(report.model, "B");
    assert!(!fixture.switch.path().exists());

    let observation = orchestrator
        .conversation()
        .turns()
        .find(|t| t.role == Role::ToolObservation)
        .unwrap();
    assert_eq!(observation.content, "switch to B requested");
}

#[tokio::test]
async fn test_switch_is_consumed_before_interrupt_check() {
    let fixture = Fixture::new(vec![final_answer("unused")]);
    fixture.switch.post(&ModelSwitchSignal::new("B")).unwrap();
    let mut orchestrator = fixture.orchestrator(OrchestratorConfig::default());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = orchestrator.run_cycle("hi", &cancel).await.unwrap();

    assert_eq!(report.outcome, CycleOutcome::Interrupted);
    assert_eq!(orchestrator.model(), "B");
    assert!(fixture.provider.requests().is_empty());
    assert!(fixture.switch.peek().unwrap().is_none());
}

#[tokio::test]
async fn test_interrupt_while_thinking_discards_partial_step() {
    let fixture = Fixture::new(vec![
        final_answer("first answer"),
        Script::Hang(vec!["Thought: ".into(), "still ".into(), "going".into()]),
    ]);
    let mut orchestrator = fixture.orchestrator(OrchestratorConfig::default());

    orchestrator
        .run_cycle("first", &CancellationToken::new())
        .await
        .unwrap();
    let before: Vec<_> = orchestrator.conversation().turns().cloned().collect();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let report = orchestrator.run_cycle("second", &cancel).await.unwrap();
    assert_eq!(report.outcome, CycleOutcome::Interrupted);
    assert!(report.steps.is_empty());
    assert_eq!(orchestrator.state(), AgentState::Idle);

    let after: Vec<_> = orchestrator.conversation().turns().cloned().collect();
    assert_eq!(after.len(), before.len() + 1);
    assert_eq!(&after[..before.len()], &before[..]);
    assert_eq!(after[before.len()].role, Role::User);
    assert_eq!(after[before.len()].content, "second");
}

#[tokio::test]
async fn test_interrupt_while_acting_still_audits_the_call() {
    let fixture = Fixture::new(vec![action("test.slow", json!({})), final_answer("unused")]);
    let mut orchestrator = fixture.orchestrator(OrchestratorConfig::default());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let report = orchestrator.run_cycle("wait", &cancel).await.unwrap();
    assert_eq!(report.outcome, CycleOutcome::Interrupted);
    assert!(started.elapsed() < Duration::from_millis(250));
    assert_eq!(roles(&orchestrator), vec![Role::User]);

    tokio::time::sleep(Duration::from_millis(500)).await;
    let entries = fixture.audit.entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].tool, "test.slow");
    assert_eq!(entries[0].outcome, "success");
}

#[tokio::test]
async fn test_model_failure_returns_error_and_idles() {
    let fixture = Fixture::new(vec![
        Script::Fail("connection refused".into()),
        final_answer("back"),
    ]);
    let mut orchestrator = fixture.orchestrator(OrchestratorConfig::default());

    let err = orchestrator
        .run_cycle("hello", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::ModelStream(_)));
    assert_eq!(orchestrator.state(), AgentState::Idle);
    assert_eq!(roles(&orchestrator), vec![Role::User]);

    let report = orchestrator
        .run_cycle("hello again", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.outcome.text(), Some("back"));
}

#[tokio::test]
async fn test_reading_stops_at_invented_observation() {
    let fixture = Fixture::new(vec![]);
    fixture.provider.push(Script::Hang(vec![
        "Thought: list\n".into(),
        "Action: file.list\n".into(),
        format!("Action Input: {}\n", json!({"path": fixture.temp.path()})),
        "Observation: ".into(),
        "nothing here".into(),
    ]));
    fixture.provider.push(final_answer("done"));

    let mut orchestrator = fixture.orchestrator(OrchestratorConfig::default());
    let report = orchestrator
        .run_cycle("list", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.outcome.text(), Some("done"));
    let step_turn = orchestrator.conversation().turns().nth(1).unwrap();
    assert!(!step_turn.content.contains("Observation:"));
    let observation = orchestrator.conversation().turns().nth(2).unwrap();
    assert_ne!(observation.content, "nothing here");
}

#[tokio::test]
async fn test_runaway_step_is_cut_off() {
    let fixture = Fixture::new(vec![Script::Hang(vec![
        "Final Answer: ".into(),
        "a".repeat(40),
        "b".repeat(40),
    ])]);
    let config = OrchestratorConfig {
        max_step_chars: 50,
        ..OrchestratorConfig::default()
    };
    let mut orchestrator = fixture.orchestrator(config);

    let report = orchestrator
        .run_cycle("talk", &CancellationToken::new())
        .await
        .unwrap();

    let answer = report.outcome.text().unwrap();
    assert!(answer.starts_with("aaaa"));
    assert!(!answer.contains('b'));
}

#[tokio::test]
async fn test_events_follow_the_cycle() {
    let fixture = Fixture::new(vec![final_answer("ok")]);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut orchestrator = fixture
        .orchestrator(OrchestratorConfig::default())
        .with_events(tx);

    orchestrator
        .run_cycle("go", &CancellationToken::new())
        .await
        .unwrap();
    drop(orchestrator);

    let mut states = Vec::new();
    let mut text = String::new();
    while let Some(event) = rx.recv().await {
        match event {
            AgentEvent::State(state) => states.push(state),
            AgentEvent::Token(token) => text.push_str(&token),
            _ => {}
        }
    }

    assert_eq!(
        states,
        vec![
            AgentState::Thinking,
            AgentState::Answering,
            AgentState::Idle,
        ]
    );
    assert_eq!(text, "Thought: I can answer.\nFinal Answer: ok");
}

#[tokio::test]
async fn test_answer_verifies_tracked_task() {
    let fixture = Fixture::new(vec![final_answer("Logs archived.")]);
    let marker = fixture.path("archive.log");
    std::fs::write(&marker, "archived 3 files").unwrap();

    let board = Arc::new(TaskBoard::new());
    let task = board
        .add(
            "archive the logs",
            Some(VerifyProbe {
                tool: "file.read".into(),
                arguments: json!({"path": marker}).as_object().unwrap().clone(),
                expect: Some("archived".into()),
            }),
        )
        .await
        .unwrap();
    board.start(&task.id).await.unwrap();

    let mut orchestrator = fixture
        .orchestrator(OrchestratorConfig::default())
        .with_tasks(board.clone());
    let report = orchestrator
        .run_cycle("archive the logs", &CancellationToken::new())
        .await
        .unwrap();

    let CycleOutcome::Answered { verifications, .. } = &report.outcome else {
        panic!("expected an answer");
    };
    assert_eq!(report.outcome.text(), Some("Logs archived."));
    assert_eq!(verifications[0].verdict, Verdict::Verified);
    assert_eq!(
        board.get(&task.id).await.unwrap().status,
        TaskStatus::Completed
    );
    assert_eq!(fixture.audit.entries().unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_verification_flags_the_answer() {
    let fixture = Fixture::new(vec![final_answer("Logs archived.")]);
    let board = Arc::new(TaskBoard::new());
    let task = board
        .add(
            "archive the logs",
            Some(VerifyProbe {
                tool: "file.read".into(),
                arguments: json!({"path": fixture.path("missing.log")})
                    .as_object()
                    .unwrap()
                    .clone(),
                expect: None,
            }),
        )
        .await
        .unwrap();
    board.start(&task.id).await.unwrap();
    let untouched = board.add("rotate certificates", None).await.unwrap();
    board.start(&untouched.id).await.unwrap();

    let mut orchestrator = fixture
        .orchestrator(OrchestratorConfig::default())
        .with_tasks(board.clone());
    let report = orchestrator
        .run_cycle("archive the logs", &CancellationToken::new())
        .await
        .unwrap();

    let answer = report.outcome.text().unwrap();
    assert!(answer.starts_with("Logs archived."));
    assert!(answer.contains("[unverified: archive the logs:"));
    assert_eq!(orchestrator.conversation().last().unwrap().content, answer);

    assert_eq!(
        board.get(&task.id).await.unwrap().status,
        TaskStatus::Unverified
    );
    assert_eq!(
        board.get(&untouched.id).await.unwrap().status,
        TaskStatus::InProgress
    );
}
