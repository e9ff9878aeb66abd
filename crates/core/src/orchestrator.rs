use crate::conversation::{Conversation, TurnArchive};
use crate::parser::{observation_offset, parse_step, StepKind};
use crate::prompt::{system_prompt, DEFAULT_PERSONA};
use crate::types::*;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vigil_control::{ModelSwitchSignal, SignalFile};
use vigil_policy::{RiskClassifier, ToolCall};
use vigil_providers::{ModelProvider, ProviderError};
use vigil_tasks::TaskTracker;
use vigil_tools::{DispatchError, Observation, ToolDispatcher};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("model stream error: {0}")]
    ModelStream(#[from] ProviderError),
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_steps: usize,
    pub history_window: usize,
    pub tool_timeout: Duration,
    pub max_step_chars: usize,
    pub persona: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_steps: 15,
            history_window: 20,
            tool_timeout: Duration::from_secs(30),
            max_step_chars: 8000,
            persona: DEFAULT_PERSONA.to_string(),
        }
    }
}

/// Bounded Thought → Action → Observation loop over one conversation.
pub struct Orchestrator {
    provider: Arc<dyn ModelProvider>,
    pub(crate) classifier: Arc<RiskClassifier>,
    pub(crate) dispatcher: ToolDispatcher,
    conversation: Conversation,
    model: String,
    switch: Option<SignalFile<ModelSwitchSignal>>,
    pub(crate) tasks: Option<Arc<dyn TaskTracker>>,
    events: Option<mpsc::UnboundedSender<AgentEvent>>,
    pub(crate) config: OrchestratorConfig,
    system_prompt: String,
    state: AgentState,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        classifier: Arc<RiskClassifier>,
        dispatcher: ToolDispatcher,
        model: impl Into<String>,
        config: OrchestratorConfig,
    ) -> Self {
        let system_prompt = system_prompt(
            &config.persona,
            dispatcher.registry(),
            &classifier.policy().confirmation_flag,
        );

        Self {
            provider,
            classifier,
            dispatcher,
            conversation: Conversation::in_memory(config.history_window),
            model: model.into(),
            switch: None,
            tasks: None,
            events: None,
            config,
            system_prompt,
            state: AgentState::Idle,
        }
    }

    pub fn with_archive(mut self, archive: Arc<dyn TurnArchive>) -> Self {
        self.conversation = Conversation::new(self.config.history_window, archive);
        self
    }

    pub fn with_switch_signal(mut self, signal: SignalFile<ModelSwitchSignal>) -> Self {
        self.switch = Some(signal);
        self
    }

    pub fn with_tasks(mut self, tracker: Arc<dyn TaskTracker>) -> Self {
        self.tasks = Some(tracker);
        self
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<AgentEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Runs one answer cycle for `input`.
    ///
    /// Cancelling `cancel` while thinking or acting ends the cycle as
    /// [`CycleOutcome::Interrupted`]; the step in flight appends no turn. A model
    /// stream failure ends the cycle with an error and leaves the orchestrator idle.
    pub async fn run_cycle(
        &mut self,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<CycleReport, OrchestratorError> {
        self.conversation.append(Turn::user(input));

        let mut steps: Vec<ReasoningStep> = Vec::new();
        let mut previous: Option<String> = None;

        let outcome = loop {
            let result = if steps.len() >= self.config.max_steps {
                StepResult::CeilingExceeded
            } else {
                match self.step(cancel, previous.as_deref()).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(error = %e, "Cycle aborted");
                        self.set_state(AgentState::Idle);
                        return Err(e);
                    }
                }
            };

            match result {
                StepResult::Continue { step, text } => {
                    steps.push(step);
                    previous = Some(text);
                }
                StepResult::FinalAnswer { thought, answer } => {
                    steps.push(ReasoningStep {
                        thought,
                        action: None,
                        observation: None,
                    });
                    break self.answer(input, answer, &mut steps).await;
                }
                StepResult::CeilingExceeded => {
                    info!(max_steps = self.config.max_steps, "Step ceiling reached");
                    let summary = format!(
                        "I reached the limit of {} reasoning steps without a final answer.{}",
                        self.config.max_steps,
                        progress_summary(&steps)
                    );
                    self.conversation.append(Turn::assistant(summary.clone()));
                    break CycleOutcome::StepLimit { summary };
                }
                StepResult::Repeated => {
                    info!("Model repeated its previous step");
                    let summary = format!(
                        "I stopped because my last step repeated the previous one exactly.{}",
                        progress_summary(&steps)
                    );
                    self.conversation.append(Turn::assistant(summary.clone()));
                    break CycleOutcome::Repetition { summary };
                }
                StepResult::Interrupted => {
                    info!(steps = steps.len(), "Cycle interrupted");
                    self.set_state(AgentState::Interrupted);
                    break CycleOutcome::Interrupted;
                }
            }
        };

        self.set_state(AgentState::Idle);
        Ok(CycleReport {
            outcome,
            steps,
            model: self.model.clone(),
        })
    }

    async fn step(
        &mut self,
        cancel: &CancellationToken,
        previous: Option<&str>,
    ) -> Result<StepResult, OrchestratorError> {
        // A pending switch is consumed before the interruption check.
        self.apply_pending_switch();
        if cancel.is_cancelled() {
            return Ok(StepResult::Interrupted);
        }

        self.set_state(AgentState::Thinking);
        let Some(raw) = self.think(cancel).await? else {
            return Ok(StepResult::Interrupted);
        };

        let parsed = parse_step(&raw);
        if previous == Some(parsed.text.as_str()) {
            return Ok(StepResult::Repeated);
        }

        let proposed = match parsed.kind {
            StepKind::Final(answer) => {
                return Ok(StepResult::FinalAnswer {
                    thought: parsed.thought,
                    answer,
                })
            }
            StepKind::Action(proposed) => proposed,
        };

        self.set_state(AgentState::Acting);
        let call = self.classifier.classify(proposed);
        let action = ActionRecord::from(&call);

        let Some(observation) = self.act(call, cancel).await? else {
            return Ok(StepResult::Interrupted);
        };

        self.conversation
            .append(Turn::assistant(parsed.text.clone()));
        self.conversation
            .append(Turn::observation(observation.as_text()));
        self.emit(AgentEvent::Observation {
            tool: action.tool_name.clone(),
            observation: observation.clone(),
        });

        Ok(StepResult::Continue {
            step: ReasoningStep {
                thought: parsed.thought,
                action: Some(action),
                observation: Some(observation),
            },
            text: parsed.text,
        })
    }

    /// Streams one completion. `None` means the cycle was interrupted.
    async fn think(&self, cancel: &CancellationToken) -> Result<Option<String>, OrchestratorError> {
        let messages = self.conversation.to_messages(&self.system_prompt);
        debug!(model = %self.model, turns = self.conversation.len(), "Requesting completion");

        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            stream = self.provider.stream(&self.model, &messages) => stream?,
        };

        let mut text = String::new();
        let mut chars = 0usize;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(None),
                next = stream.next() => match next {
                    Some(Ok(token)) => {
                        chars += token.chars().count();
                        text.push_str(&token);
                        self.emit(AgentEvent::Token(token));

                        if observation_offset(&text).is_some() {
                            debug!("Model started writing its own observation; stopping read");
                            break;
                        }
                        if chars > self.config.max_step_chars {
                            warn!(
                                limit = self.config.max_step_chars,
                                "Step exceeded character limit; stopping read"
                            );
                            break;
                        }
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => break,
                },
            }
        }

        Ok(Some(text))
    }

    /// Dispatches or records the denial. `None` means the cycle was interrupted;
    /// a dispatched call keeps running to its own timeout and its result is discarded.
    /// Every classified call reaches the audit log, interrupted or not.
    async fn act(
        &self,
        call: ToolCall,
        cancel: &CancellationToken,
    ) -> Result<Option<Observation>, OrchestratorError> {
        let pending = if call.is_approved() {
            self.dispatcher.dispatch(call, self.config.tool_timeout)?
        } else {
            self.dispatcher.deny(call)?
        };

        let tool = pending.tool().to_string();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(%tool, "Interrupted while tool runs; its observation will be discarded");
                Ok(None)
            }
            result = pending.wait() => Ok(Some(result?)),
        }
    }

    async fn answer(
        &mut self,
        input: &str,
        answer: String,
        steps: &mut Vec<ReasoningStep>,
    ) -> CycleOutcome {
        self.set_state(AgentState::Answering);

        let answer = if answer.trim().is_empty() {
            "(the model returned an empty answer)".to_string()
        } else {
            answer
        };

        let (answer, verifications) = self.verify_tasks(input, answer, steps).await;
        self.conversation.append(Turn::assistant(answer.clone()));

        CycleOutcome::Answered {
            answer,
            verifications,
        }
    }

    fn apply_pending_switch(&mut self) {
        let Some(switch) = &self.switch else {
            return;
        };

        match switch.take() {
            Ok(Some(signal)) => {
                let requested = signal.requested_model.trim().to_string();
                if requested.is_empty() {
                    warn!("Ignoring model switch without a model name");
                    return;
                }
                let from = std::mem::replace(&mut self.model, requested.clone());
                info!(%from, to = %requested, "Switched model");
                self.emit(AgentEvent::ModelSwitched {
                    from,
                    to: requested,
                });
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Discarding unreadable model switch signal"),
        }
    }

    fn set_state(&mut self, state: AgentState) {
        if self.state != state {
            self.state = state;
            self.emit(AgentEvent::State(state));
        }
    }

    pub(crate) fn emit(&self, event: AgentEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

fn progress_summary(steps: &[ReasoningStep]) -> String {
    let lines: Vec<String> = steps
        .iter()
        .filter_map(|step| {
            let action = step.action.as_ref()?;
            let observation = step
                .observation
                .as_ref()
                .map(|o| first_line(&o.as_text(), 160))
                .unwrap_or_default();
            Some(format!("- {}: {}", action.tool_name, observation))
        })
        .collect();

    if lines.is_empty() {
        " No tool calls were made.".to_string()
    } else {
        format!(" Steps taken:\n{}", lines.join("\n"))
    }
}

fn first_line(text: &str, limit: usize) -> String {
    let line = text.lines().next().unwrap_or("");
    if line.chars().count() > limit {
        let cut: String = line.chars().take(limit).collect();
        format!("{cut}…")
    } else {
        line.to_string()
    }
}
