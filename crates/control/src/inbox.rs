use crate::files::{read_json, remove_if_exists, write_json};
use crate::mailbox::json_files;
use crate::ControlError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;
use uuid::Uuid;

/// User input for a detached orchestrator, one file per message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxMessage {
    pub id: Uuid,
    pub text: String,
    /// Interrupt the running cycle before queueing `text`.
    #[serde(default)]
    pub interrupt: bool,
    pub posted_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Inbox {
    dir: PathBuf,
}

impl Inbox {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn post(
        &self,
        text: impl Into<String>,
        interrupt: bool,
    ) -> Result<InboxMessage, ControlError> {
        let message = InboxMessage {
            id: Uuid::new_v4(),
            text: text.into(),
            interrupt,
            posted_at: Utc::now(),
        };
        write_json(&self.dir.join(format!("{}.json", message.id)), &message)?;
        Ok(message)
    }

    /// Claims all pending messages in posting order.
    pub fn drain(&self) -> Result<Vec<InboxMessage>, ControlError> {
        let mut messages = Vec::new();
        for path in json_files(&self.dir)? {
            let parsed = read_json::<InboxMessage>(&path);
            remove_if_exists(&path)?;
            match parsed {
                Ok(Some(message)) => messages.push(message),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Discarding malformed message"),
            }
        }

        messages.sort_by(|a, b| a.posted_at.cmp(&b.posted_at).then(a.id.cmp(&b.id)));
        Ok(messages)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_drain_returns_posting_order_once() {
        let temp = TempDir::new().unwrap();
        let inbox = Inbox::new(temp.path());

        inbox.post("first", false).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        inbox.post("second", true).unwrap();

        let drained = inbox.drain().unwrap();
        let texts: Vec<&str> = drained.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
        assert!(drained[1].interrupt);
        assert!(inbox.drain().unwrap().is_empty());
    }
}
