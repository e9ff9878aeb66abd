use crate::files::{read_json, remove_if_exists, write_json};
use crate::ControlError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

const REPLY_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum OperatorCommand {
    Status,
    Restart,
    Stop,
    Start,
    SwitchModel { model: String },
    Logs { count: usize },
}

impl fmt::Display for OperatorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatorCommand::Status => write!(f, "status"),
            OperatorCommand::Restart => write!(f, "restart"),
            OperatorCommand::Stop => write!(f, "stop"),
            OperatorCommand::Start => write!(f, "start"),
            OperatorCommand::SwitchModel { model } => write!(f, "switch-model {model}"),
            OperatorCommand::Logs { count } => write!(f, "logs {count}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlRequest {
    pub id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub command: OperatorCommand,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlReply {
    pub id: Uuid,
    pub ok: bool,
    pub message: String,
    pub answered_at: DateTime<Utc>,
}

impl ControlReply {
    pub fn ok(id: Uuid, message: impl Into<String>) -> Self {
        Self {
            id,
            ok: true,
            message: message.into(),
            answered_at: Utc::now(),
        }
    }

    pub fn failed(id: Uuid, message: impl Into<String>) -> Self {
        Self {
            id,
            ok: false,
            message: message.into(),
            answered_at: Utc::now(),
        }
    }
}

/// Request/reply directories for operator commands: `requests/<id>.json`
/// written by clients, `replies/<id>.json` written by the supervisor.
#[derive(Debug, Clone)]
pub struct Mailbox {
    root: PathBuf,
}

impl Mailbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn request_path(&self, id: Uuid) -> PathBuf {
        self.root.join("requests").join(format!("{id}.json"))
    }

    fn reply_path(&self, id: Uuid) -> PathBuf {
        self.root.join("replies").join(format!("{id}.json"))
    }

    pub fn post(&self, command: OperatorCommand) -> Result<ControlRequest, ControlError> {
        let request = ControlRequest {
            id: Uuid::new_v4(),
            issued_at: Utc::now(),
            command,
        };
        write_json(&self.request_path(request.id), &request)?;
        Ok(request)
    }

    /// Claims every pending request, oldest first.
    pub fn take_requests(&self) -> Result<Vec<ControlRequest>, ControlError> {
        let mut requests = Vec::new();
        for path in json_files(&self.root.join("requests"))? {
            let parsed = read_json::<ControlRequest>(&path);
            remove_if_exists(&path)?;
            match parsed {
                Ok(Some(request)) => requests.push(request),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Discarding malformed request"),
            }
        }

        requests.sort_by(|a, b| a.issued_at.cmp(&b.issued_at));
        Ok(requests)
    }

    pub fn reply(&self, reply: &ControlReply) -> Result<(), ControlError> {
        write_json(&self.reply_path(reply.id), reply)
    }

    /// Waits for the reply to `id`. On timeout an unclaimed request is withdrawn
    /// so it cannot run later.
    pub async fn wait_reply(
        &self,
        id: Uuid,
        limit: Duration,
    ) -> Result<ControlReply, ControlError> {
        let deadline = tokio::time::Instant::now() + limit;
        let path = self.reply_path(id);

        loop {
            if let Some(reply) = read_json::<ControlReply>(&path)? {
                remove_if_exists(&path)?;
                return Ok(reply);
            }
            if tokio::time::Instant::now() >= deadline {
                remove_if_exists(&self.request_path(id))?;
                return Err(ControlError::Timeout(limit.as_millis() as u64));
            }
            tokio::time::sleep(REPLY_POLL).await;
        }
    }
}

pub(crate) fn json_files(dir: &Path) -> Result<Vec<PathBuf>, ControlError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !name.starts_with('.') && name.ends_with(".json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
