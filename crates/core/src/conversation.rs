use crate::types::{Role, Turn};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;
use vigil_providers::ChatMessage;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Receives every appended turn so turns leaving the live window are not lost.
pub trait TurnArchive: Send + Sync {
    fn archive(&self, turn: &Turn) -> Result<(), ArchiveError>;
}

pub struct NullArchive;

impl TurnArchive for NullArchive {
    fn archive(&self, _turn: &Turn) -> Result<(), ArchiveError> {
        Ok(())
    }
}

/// Appends turns as JSON lines.
pub struct JsonlArchive {
    file: Mutex<File>,
}

impl JsonlArchive {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ArchiveError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl TurnArchive for JsonlArchive {
    fn archive(&self, turn: &Turn) -> Result<(), ArchiveError> {
        let json = serde_json::to_string(turn)?;
        let mut file = self.file.lock();
        writeln!(file, "{}", json)?;
        file.flush()?;
        Ok(())
    }
}

/// Ordered turn history. Only the newest `window` turns are kept live.
pub struct Conversation {
    turns: VecDeque<Turn>,
    window: usize,
    archive: Arc<dyn TurnArchive>,
    appended: u64,
}

impl Conversation {
    pub fn new(window: usize, archive: Arc<dyn TurnArchive>) -> Self {
        Self {
            turns: VecDeque::with_capacity(window),
            window: window.max(1),
            archive,
            appended: 0,
        }
    }

    pub fn in_memory(window: usize) -> Self {
        Self::new(window, Arc::new(NullArchive))
    }

    pub fn append(&mut self, turn: Turn) {
        if let Err(e) = self.archive.archive(&turn) {
            warn!(error = %e, "Failed to archive turn");
        }

        self.turns.push_back(turn);
        while self.turns.len() > self.window {
            self.turns.pop_front();
        }
        self.appended += 1;
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.back()
    }

    /// Count of all turns ever appended, including evicted ones.
    pub fn total_appended(&self) -> u64 {
        self.appended
    }

    pub fn to_messages(&self, system_prompt: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.turns.len() + 1);
        messages.push(ChatMessage::new("system", system_prompt));

        for turn in &self.turns {
            messages.push(match turn.role {
                Role::User => ChatMessage::new("user", turn.content.clone()),
                Role::Assistant => ChatMessage::new("assistant", turn.content.clone()),
                Role::ToolObservation => {
                    ChatMessage::new("user", format!("Observation: {}", turn.content))
                }
            });
        }
        messages
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_window_evicts_oldest_in_order() {
        let mut conversation = Conversation::in_memory(3);
        for i in 0..5 {
            conversation.append(Turn::user(format!("m{i}")));
        }

        let contents: Vec<&str> = conversation.turns().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
        assert_eq!(conversation.total_appended(), 5);
    }

    #[test]
    fn test_archive_keeps_evicted_turns() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("turns.jsonl");
        let archive = Arc::new(JsonlArchive::open(&path).unwrap());

        let mut conversation = Conversation::new(1, archive);
        conversation.append(Turn::user("first"));
        conversation.append(Turn::assistant("second"));
        assert_eq!(conversation.len(), 1);

        let lines: Vec<Turn> = std::fs::read_to_string(&path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].content, "first");
        assert_eq!(lines[1].role, Role::Assistant);
    }

    #[test]
    fn test_observations_render_as_user_messages() {
        let mut conversation = Conversation::in_memory(10);
        conversation.append(Turn::user("q"));
        conversation.append(Turn::observation("42"));

        let messages = conversation.to_messages("sys");
        assert_eq!(messages[0], ChatMessage::new("system", "sys"));
        assert_eq!(messages[2], ChatMessage::new("user", "Observation: 42"));
    }

    #[test]
    fn test_role_wire_names() {
        assert_eq!(
            serde_json::to_string(&Role::ToolObservation).unwrap(),
            "\"tool-observation\""
        );
    }
}
