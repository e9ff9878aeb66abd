use crate::config::Config;
use anyhow::{Context, Result};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, WeakUnboundedSender};
use tracing::{info, warn};
use vigil_control::{Inbox, LivenessFile, SignalFile};
use vigil_core::{
    AgentEvent, AgentSession, AgentState, CycleOutcome, JsonlArchive, Orchestrator, UserEvent,
    Verdict,
};
use vigil_policy::RiskClassifier;
use vigil_providers::OllamaProvider;
use vigil_tasks::TaskBoard;
use vigil_tools::{AuditLog, ToolDispatcher, ToolRegistry};

const INBOX_POLL: Duration = Duration::from_millis(250);
const OBSERVATION_PREVIEW: usize = 500;

/// Runs the orchestrator process until shutdown.
///
/// Interactive mode reads user input from stdin; detached mode (used under the
/// supervisor) reads it from the runtime inbox.
pub async fn run(config: &Config, detached: bool) -> Result<()> {
    std::fs::create_dir_all(config.runtime_dir())
        .with_context(|| format!("Failed to create {}", config.runtime_dir().display()))?;

    // Published before any input is accepted.
    let liveness = LivenessFile::new(config.liveness_file());
    let _guard = liveness
        .claim()
        .context("Refusing to start a second orchestrator")?;
    info!(pid = std::process::id(), model = %config.model.name, "Orchestrator started");

    let classifier = Arc::new(RiskClassifier::new(config.risk_policy()?)?);
    let audit = Arc::new(AuditLog::open(config.audit_log())?);
    let dispatcher = ToolDispatcher::new(Arc::new(ToolRegistry::with_builtins()), audit);
    let provider = Arc::new(OllamaProvider::new(
        &config.model.host,
        Duration::from_millis(config.model.connect_timeout_ms),
    )?);

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let mut orchestrator = Orchestrator::new(
        provider,
        classifier,
        dispatcher,
        config.model.name.clone(),
        config.orchestrator_config(),
    )
    .with_archive(Arc::new(JsonlArchive::open(config.archive_file())?))
    .with_switch_signal(SignalFile::new(config.signal_file()))
    .with_events(events_tx);

    if let Some(path) = &config.tasks.path {
        let board = TaskBoard::open(path)
            .await
            .with_context(|| format!("Failed to open task board {}", path.display()))?;
        orchestrator = orchestrator.with_tasks(Arc::new(board));
    }

    let busy = Arc::new(AtomicBool::new(false));
    let printer = tokio::spawn(print_events(events_rx, busy.clone()));

    let (input_tx, input_rx) = mpsc::unbounded_channel();
    tokio::spawn(watch_signals(input_tx.downgrade(), busy));
    if detached {
        tokio::spawn(read_inbox(Inbox::new(config.inbox_dir()), input_tx));
    } else {
        spawn_stdin_reader(input_tx);
    }

    let orchestrator = AgentSession::new(orchestrator, input_rx).run().await;
    info!(
        turns = orchestrator.conversation().total_appended(),
        model = %orchestrator.model(),
        "Orchestrator exiting"
    );
    drop(orchestrator);

    if let Err(e) = printer.await {
        warn!(error = %e, "Event printer stopped abnormally");
    }
    Ok(())
}

/// Stdin is read on a plain thread so a pending read never holds up process exit.
fn spawn_stdin_reader(tx: UnboundedSender<UserEvent>) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.send(parse_input(&line)).is_err() {
                break;
            }
        }
    });
}

/// A leading `!` interrupts the running cycle; any text after it is answered next.
fn parse_input(line: &str) -> UserEvent {
    match line.strip_prefix('!') {
        Some(rest) => {
            let rest = rest.trim();
            UserEvent::Interrupt((!rest.is_empty()).then(|| rest.to_string()))
        }
        None => UserEvent::Input(line.to_string()),
    }
}

async fn read_inbox(inbox: Inbox, tx: UnboundedSender<UserEvent>) {
    loop {
        tokio::time::sleep(INBOX_POLL).await;

        let messages = match inbox.drain() {
            Ok(messages) => messages,
            Err(e) => {
                warn!(error = %e, "Could not read inbox");
                continue;
            }
        };

        for message in messages {
            let event = if message.interrupt {
                UserEvent::Interrupt(Some(message.text))
            } else {
                UserEvent::Input(message.text)
            };
            if tx.send(event).is_err() {
                return;
            }
        }
    }
}

/// Ctrl-C interrupts a busy orchestrator and shuts an idle one down. SIGTERM
/// always shuts down.
async fn watch_signals(tx: WeakUnboundedSender<UserEvent>, busy: Arc<AtomicBool>) {
    #[cfg(unix)]
    let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();

    loop {
        #[cfg(unix)]
        let terminated = async {
            match term.as_mut() {
                Some(term) => {
                    term.recv().await;
                }
                None => std::future::pending::<()>().await,
            }
        };
        #[cfg(not(unix))]
        let terminated = std::future::pending::<()>();

        let event = tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if result.is_err() {
                    return;
                }
                if busy.load(Ordering::SeqCst) {
                    UserEvent::Interrupt(None)
                } else {
                    UserEvent::Shutdown
                }
            }
            _ = terminated => UserEvent::Shutdown,
        };

        let Some(tx) = tx.upgrade() else {
            return;
        };
        if tx.send(event).is_err() {
            return;
        }
    }
}

async fn print_events(mut events: UnboundedReceiver<AgentEvent>, busy: Arc<AtomicBool>) {
    let mut stdout = std::io::stdout();

    while let Some(event) = events.recv().await {
        match event {
            AgentEvent::State(state) => busy.store(state != AgentState::Idle, Ordering::SeqCst),
            AgentEvent::Token(token) => {
                print!("{token}");
                let _ = stdout.flush();
            }
            AgentEvent::ModelSwitched { from, to } => {
                println!("\n[model switched: {from} -> {to}]")
            }
            AgentEvent::Observation { tool, observation } => {
                let text = observation.as_text();
                let preview: String = text.chars().take(OBSERVATION_PREVIEW).collect();
                let ellipsis = if text.chars().count() > OBSERVATION_PREVIEW {
                    "…"
                } else {
                    ""
                };
                println!("\nObservation ({tool}): {preview}{ellipsis}");
            }
            AgentEvent::CycleFinished(report) => match closing_text(&report.outcome) {
                Some(text) => println!("\n{text}\n"),
                None => println!("\n"),
            },
            AgentEvent::CycleFailed(error) => println!("\n[error] {error}"),
        }
    }
}

/// What is printed once a cycle ends. A final answer already streamed as
/// tokens, so only its verification notes are repeated.
fn closing_text(outcome: &CycleOutcome) -> Option<String> {
    match outcome {
        CycleOutcome::Answered { verifications, .. } => {
            let notes: Vec<String> = verifications
                .iter()
                .filter_map(|check| match &check.verdict {
                    Verdict::Verified => Some(format!("[verified: {}]", check.title)),
                    Verdict::Unverified(reason) => {
                        Some(format!("[unverified: {}: {reason}]", check.title))
                    }
                    Verdict::Unchecked => None,
                })
                .collect();
            (!notes.is_empty()).then(|| notes.join("\n"))
        }
        CycleOutcome::StepLimit { summary } | CycleOutcome::Repetition { summary } => {
            Some(summary.clone())
        }
        CycleOutcome::Interrupted => Some("[interrupted]".to_string()),
    }
}
