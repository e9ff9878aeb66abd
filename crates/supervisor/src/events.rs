use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        }
    }
}

/// Everything the supervisor does, as published on its broadcast channel and
/// written to its action log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    SupervisorStarted { pid: u32 },
    SupervisorExiting,
    Started { pid: u32 },
    Adopted { pid: u32 },
    Crashed { pid: u32 },
    RecordMissing,
    StartupFailed { reason: String },
    Fatal { reason: String },
    Stopping { pid: u32, reason: String },
    Stopped { pid: u32, forced: bool },
    UpdateStaged { files: Vec<String> },
    UpdateRejected { file: String, reason: String },
    FileApplied {
        file: String,
        before: Option<String>,
        after: String,
    },
    UpdateApplied { files: Vec<String> },
    UpdateFailed { reason: String },
    ModelSwitchRequested { model: String },
    CommandReceived { command: String },
}

impl LifecycleEvent {
    pub fn severity(&self) -> Severity {
        match self {
            LifecycleEvent::Crashed { .. }
            | LifecycleEvent::RecordMissing
            | LifecycleEvent::StartupFailed { .. }
            | LifecycleEvent::UpdateRejected { .. } => Severity::Warn,
            LifecycleEvent::Fatal { .. } | LifecycleEvent::UpdateFailed { .. } => Severity::Error,
            LifecycleEvent::Stopped { forced: true, .. } => Severity::Warn,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleEvent::SupervisorStarted { pid } => {
                write!(f, "supervisor started (pid {pid})")
            }
            LifecycleEvent::SupervisorExiting => {
                write!(f, "supervisor exiting; orchestrator left as is")
            }
            LifecycleEvent::Started { pid } => write!(f, "orchestrator started (pid {pid})"),
            LifecycleEvent::Adopted { pid } => {
                write!(f, "adopted running orchestrator (pid {pid})")
            }
            LifecycleEvent::Crashed { pid } => {
                write!(f, "orchestrator pid {pid} is not running; restarting")
            }
            LifecycleEvent::RecordMissing => write!(f, "liveness record disappeared; restarting"),
            LifecycleEvent::StartupFailed { reason } => write!(f, "startup failed: {reason}"),
            LifecycleEvent::Fatal { reason } => {
                write!(f, "FATAL: {reason}; operator action required")
            }
            LifecycleEvent::Stopping { pid, reason } => {
                write!(f, "stopping orchestrator pid {pid}: {reason}")
            }
            LifecycleEvent::Stopped { pid, forced: false } => {
                write!(f, "orchestrator pid {pid} stopped")
            }
            LifecycleEvent::Stopped { pid, forced: true } => {
                write!(f, "orchestrator pid {pid} killed after grace period")
            }
            LifecycleEvent::UpdateStaged { files } => {
                write!(f, "staged update found: {}", files.join(", "))
            }
            LifecycleEvent::UpdateRejected { file, reason } => {
                write!(f, "rejected staged file {file}: {reason}")
            }
            LifecycleEvent::FileApplied {
                file,
                before,
                after,
            } => write!(
                f,
                "applied {file}: sha256 {} -> {after}",
                before.as_deref().unwrap_or("(new)")
            ),
            LifecycleEvent::UpdateApplied { files } => {
                write!(f, "update applied: {}", files.join(", "))
            }
            LifecycleEvent::UpdateFailed { reason } => {
                write!(f, "update failed and was rolled back: {reason}")
            }
            LifecycleEvent::ModelSwitchRequested { model } => {
                write!(f, "model switch to {model} requested")
            }
            LifecycleEvent::CommandReceived { command } => write!(f, "operator command: {command}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failures_are_not_info() {
        assert_eq!(LifecycleEvent::RecordMissing.severity(), Severity::Warn);
        assert_eq!(
            LifecycleEvent::Fatal { reason: "x".into() }.severity(),
            Severity::Error
        );
        assert_eq!(
            LifecycleEvent::Started { pid: 1 }.severity(),
            Severity::Info
        );
    }

    #[test]
    fn test_file_applied_shows_both_hashes() {
        let event = LifecycleEvent::FileApplied {
            file: "agent.yaml".into(),
            before: None,
            after: "abc".into(),
        };
        assert_eq!(event.to_string(), "applied agent.yaml: sha256 (new) -> abc");
    }
}
