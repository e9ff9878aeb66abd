//! Reasoning loop: conversation window, ReAct parsing, orchestrator and session.

pub mod conversation;
pub mod orchestrator;
pub mod parser;
pub mod prompt;
pub mod session;
pub mod types;
mod verify;

pub use conversation::{ArchiveError, Conversation, JsonlArchive, NullArchive, TurnArchive};
pub use orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorError};
pub use parser::{parse_step, ParsedStep, StepKind};
pub use session::{AgentSession, UserEvent};
pub use types::{
    ActionRecord, AgentEvent, AgentState, CycleOutcome, CycleReport, ReasoningStep, Role,
    StepResult, TaskVerification, Turn, Verdict,
};
