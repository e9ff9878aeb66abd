use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vigil_policy::{Arguments, Decision, RiskTier, ToolCall};
use vigil_tools::Observation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    User,
    Assistant,
    ToolObservation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn observation(content: impl Into<String>) -> Self {
        Self::new(Role::ToolObservation, content)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Idle,
    Thinking,
    Acting,
    Answering,
    Interrupted,
}

/// What a step attempted, copied from the classified call before dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionRecord {
    pub tool_name: String,
    pub arguments: Arguments,
    pub risk_tier: RiskTier,
    pub decision: Decision,
}

impl From<&ToolCall> for ActionRecord {
    fn from(call: &ToolCall) -> Self {
        Self {
            tool_name: call.tool_name().to_string(),
            arguments: call.arguments().clone(),
            risk_tier: call.risk_tier(),
            decision: call.decision().clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReasoningStep {
    pub thought: String,
    pub action: Option<ActionRecord>,
    pub observation: Option<Observation>,
}

/// Result of one loop iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum StepResult {
    /// A tool call was attempted; `text` is the step as appended to the conversation.
    Continue { step: ReasoningStep, text: String },
    FinalAnswer { thought: String, answer: String },
    CeilingExceeded,
    /// The step repeated the previous step verbatim.
    Repeated,
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", content = "reason", rename_all = "lowercase")]
pub enum Verdict {
    Verified,
    Unverified(String),
    /// The task had no verification probe.
    Unchecked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskVerification {
    pub task_id: String,
    pub title: String,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    Answered {
        answer: String,
        verifications: Vec<TaskVerification>,
    },
    StepLimit {
        summary: String,
    },
    Repetition {
        summary: String,
    },
    Interrupted,
}

impl CycleOutcome {
    /// Text shown to the user, if the cycle produced any.
    pub fn text(&self) -> Option<&str> {
        match self {
            CycleOutcome::Answered { answer, .. } => Some(answer),
            CycleOutcome::StepLimit { summary } | CycleOutcome::Repetition { summary } => {
                Some(summary)
            }
            CycleOutcome::Interrupted => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    pub steps: Vec<ReasoningStep>,
    pub model: String,
}

/// Caller-visible progress from the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    State(AgentState),
    Token(String),
    ModelSwitched { from: String, to: String },
    Observation {
        tool: String,
        observation: Observation,
    },
    CycleFinished(CycleReport),
    CycleFailed(String),
}
