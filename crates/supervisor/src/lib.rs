//! Process supervisor for the vigil orchestrator.
//!
//! The supervisor owns the orchestrator's lifecycle: it restarts it after a
//! crash, applies staged updates while it is stopped, and answers operator
//! commands. It never reads the conversation or the audit log.

pub mod action_log;
pub mod config;
pub mod error;
pub mod events;
pub mod launcher;
pub mod status;
pub mod supervisor;
mod update;

pub use action_log::ActionLog;
pub use config::SupervisorConfig;
pub use error::SupervisorError;
pub use events::{LifecycleEvent, Severity};
pub use launcher::{Launcher, ProcessLauncher};
pub use status::{read_status, Desired, Health, SupervisorStatus};
pub use supervisor::Supervisor;
