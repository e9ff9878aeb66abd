use crate::orchestrator::Orchestrator;
use crate::types::AgentEvent;
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserEvent {
    /// Queued and answered in arrival order.
    Input(String),
    /// Cancels the running cycle; the text, if any, is answered next.
    Interrupt(Option<String>),
    Shutdown,
}

/// Feeds user events to an orchestrator one cycle at a time.
pub struct AgentSession {
    orchestrator: Orchestrator,
    inbox: mpsc::UnboundedReceiver<UserEvent>,
}

impl AgentSession {
    pub fn new(orchestrator: Orchestrator, inbox: mpsc::UnboundedReceiver<UserEvent>) -> Self {
        Self {
            orchestrator,
            inbox,
        }
    }

    /// Runs until `Shutdown` arrives, or until every sender is dropped and the
    /// queue is drained, then hands the orchestrator back.
    pub async fn run(mut self) -> Orchestrator {
        let mut queue: VecDeque<String> = VecDeque::new();
        let mut open = true;

        loop {
            let input = match queue.pop_front() {
                Some(input) => input,
                None if !open => break,
                None => match self.inbox.recv().await {
                    Some(UserEvent::Input(text)) | Some(UserEvent::Interrupt(Some(text))) => text,
                    Some(UserEvent::Interrupt(None)) => continue,
                    Some(UserEvent::Shutdown) | None => break,
                },
            };

            if input.trim().is_empty() {
                continue;
            }

            let cancel = CancellationToken::new();
            let mut stopping = false;

            let result = {
                let cycle = self.orchestrator.run_cycle(&input, &cancel);
                tokio::pin!(cycle);

                loop {
                    tokio::select! {
                        result = &mut cycle => break result,
                        event = self.inbox.recv(), if open && !stopping => match event {
                            Some(UserEvent::Input(text)) => queue.push_back(text),
                            Some(UserEvent::Interrupt(text)) => {
                                debug!("Interrupt requested");
                                cancel.cancel();
                                if let Some(text) = text {
                                    queue.push_front(text);
                                }
                            }
                            Some(UserEvent::Shutdown) => {
                                cancel.cancel();
                                stopping = true;
                            }
                            // Senders gone: finish what is queued, then stop.
                            None => open = false,
                        },
                    }
                }
            };

            match result {
                Ok(report) => self.orchestrator.emit(AgentEvent::CycleFinished(report)),
                Err(e) => {
                    warn!(error = %e, "Cycle failed");
                    self.orchestrator
                        .emit(AgentEvent::CycleFailed(e.to_string()));
                }
            }

            if stopping {
                break;
            }
        }

        self.orchestrator
    }
}
