use crate::error::SupervisorError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Whether the operator wants the orchestrator up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Desired {
    Running,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum Health {
    Healthy,
    /// Automatic restarts are suspended until `start` or `restart`.
    Fatal(String),
}

/// Snapshot written to `status.json` on every tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorStatus {
    pub orchestrator_pid: Option<u32>,
    pub desired: Desired,
    pub health: Health,
    pub restart_count: u32,
    pub last_restart: Option<DateTime<Utc>>,
    pub pending_updates: usize,
    pub supervisor_pid: u32,
    pub updated_at: DateTime<Utc>,
}

impl SupervisorStatus {
    pub fn orchestrator_running(&self) -> bool {
        self.orchestrator_pid.is_some()
    }

    pub fn render(&self) -> String {
        let orchestrator = match self.orchestrator_pid {
            Some(pid) => format!("running (pid {pid})"),
            None => "not running".to_string(),
        };
        let health = match &self.health {
            Health::Healthy => "healthy".to_string(),
            Health::Fatal(reason) => format!("FATAL: {reason}"),
        };
        let last_restart = self
            .last_restart
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_else(|| "never".to_string());
        let desired = match self.desired {
            Desired::Running => "running",
            Desired::Stopped => "stopped",
        };

        format!(
            "orchestrator: {orchestrator}\n\
             desired: {desired}\n\
             health: {health}\n\
             restarts: {} (last: {last_restart})\n\
             pending updates: {}\n\
             supervisor pid: {}",
            self.restart_count, self.pending_updates, self.supervisor_pid
        )
    }
}

pub fn read_status(path: &Path) -> Result<Option<SupervisorStatus>, SupervisorError> {
    Ok(vigil_control::files::read_json(path)?)
}
