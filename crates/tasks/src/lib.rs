mod matching;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::RwLock;

pub use matching::matches_cycle;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Task not found: {0}")]
    NotFound(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Unverified,
    Failed,
}

/// Read-only tool call that confirms a task's side effect happened.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerifyProbe {
    pub tool: String,
    #[serde(default)]
    pub arguments: serde_json::Map<String, serde_json::Value>,
    /// Text the probe's output must contain.
    #[serde(default)]
    pub expect: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackedTask {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub verify: Option<VerifyProbe>,
    #[serde(default)]
    pub note: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// External task store consulted after a final answer.
#[async_trait]
pub trait TaskTracker: Send + Sync {
    async fn in_progress(&self) -> Result<Vec<TrackedTask>, TaskError>;
    async fn mark_completed(&self, id: &str) -> Result<(), TaskError>;
    async fn mark_unverified(&self, id: &str, reason: &str) -> Result<(), TaskError>;
}

/// JSON-file task store.
pub struct TaskBoard {
    tasks: RwLock<Vec<TrackedTask>>,
    state_file: Option<PathBuf>,
}

impl TaskBoard {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(Vec::new()),
            state_file: None,
        }
    }

    /// Opens a board backed by `state_file`, loading it if present.
    pub async fn open<P: AsRef<Path>>(state_file: P) -> Result<Self, TaskError> {
        let board = Self {
            tasks: RwLock::new(Vec::new()),
            state_file: Some(state_file.as_ref().to_path_buf()),
        };
        board.restore().await?;
        Ok(board)
    }

    async fn restore(&self) -> Result<(), TaskError> {
        let Some(state_file) = &self.state_file else {
            return Ok(());
        };

        if !state_file.exists() {
            return Ok(());
        }

        let content = tokio::fs::read_to_string(state_file).await?;
        let restored: Vec<TrackedTask> = if content.trim().is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(&content)?
        };

        *self.tasks.write().await = restored;
        Ok(())
    }

    pub async fn add(
        &self,
        title: &str,
        verify: Option<VerifyProbe>,
    ) -> Result<TrackedTask, TaskError> {
        let task = TrackedTask {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.to_string(),
            status: TaskStatus::Pending,
            verify,
            note: None,
            updated_at: Utc::now(),
        };

        self.tasks.write().await.push(task.clone());
        self.persist_state().await?;

        tracing::info!(id = %task.id, title = %task.title, "Added task");
        Ok(task)
    }

    pub async fn start(&self, id: &str) -> Result<(), TaskError> {
        self.set_status(id, TaskStatus::InProgress, None).await
    }

    pub async fn fail(&self, id: &str, reason: &str) -> Result<(), TaskError> {
        self.set_status(id, TaskStatus::Failed, Some(reason.to_string()))
            .await
    }

    pub async fn get(&self, id: &str) -> Result<TrackedTask, TaskError> {
        self.tasks
            .read()
            .await
            .iter()
            .find(|task| task.id == id)
            .cloned()
            .ok_or_else(|| TaskError::NotFound(id.to_string()))
    }

    pub async fn list(&self) -> Vec<TrackedTask> {
        self.tasks.read().await.clone()
    }

    async fn set_status(
        &self,
        id: &str,
        status: TaskStatus,
        note: Option<String>,
    ) -> Result<(), TaskError> {
        {
            let mut tasks = self.tasks.write().await;
            let task = tasks
                .iter_mut()
                .find(|task| task.id == id)
                .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
            task.status = status;
            task.note = note;
            task.updated_at = Utc::now();
        }
        self.persist_state().await
    }

    async fn persist_state(&self) -> Result<(), TaskError> {
        let Some(state_file) = &self.state_file else {
            return Ok(());
        };

        let snapshot = self.tasks.read().await.clone();

        if let Some(parent) = state_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp_file = state_file.with_extension("tmp");
        let content = serde_json::to_string_pretty(&snapshot)?;
        tokio::fs::write(&tmp_file, content).await?;
        tokio::fs::rename(tmp_file, state_file).await?;

        Ok(())
    }
}

impl Default for TaskBoard {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskTracker for TaskBoard {
    async fn in_progress(&self) -> Result<Vec<TrackedTask>, TaskError> {
        Ok(self
            .tasks
            .read()
            .await
            .iter()
            .filter(|task| task.status == TaskStatus::InProgress)
            .cloned()
            .collect())
    }

    async fn mark_completed(&self, id: &str) -> Result<(), TaskError> {
        tracing::info!(%id, "Task completed");
        self.set_status(id, TaskStatus::Completed, None).await
    }

    async fn mark_unverified(&self, id: &str, reason: &str) -> Result<(), TaskError> {
        tracing::warn!(%id, %reason, "Task could not be verified");
        self.set_status(id, TaskStatus::Unverified, Some(reason.to_string()))
            .await
    }
}
