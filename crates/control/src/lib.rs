//! Filesystem records shared between the orchestrator, the supervisor and
//! operator commands. Each record has one designated writer at a time.

pub mod files;
pub mod inbox;
pub mod liveness;
pub mod mailbox;
pub mod signal;
pub mod staging;

use thiserror::Error;

pub use inbox::{Inbox, InboxMessage};
pub use liveness::{process_alive, LivenessFile, LivenessGuard, LivenessRecord};
pub use mailbox::{ControlReply, ControlRequest, Mailbox, OperatorCommand};
pub use signal::{ModelSwitchSignal, SignalFile};
pub use staging::{Rejection, StagedSet, StagingArea};

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("already running with pid {0}")]
    AlreadyRunning(u32),
    #[error("no reply within {0}ms")]
    Timeout(u64),
}
