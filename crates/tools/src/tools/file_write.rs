use crate::error::ToolError;
use crate::tools::base::{optional_bool, required_str, Tool};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use vigil_policy::{expand_home, Arguments};

pub struct FileWriteTool;

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "file.write"
    }

    fn description(&self) -> &str {
        "Writes text to a file, creating parent directories. Set append to add to the end."
    }

    fn usage(&self) -> Value {
        json!({"path": "<file path>", "content": "<text>", "append": false})
    }

    async fn execute(&self, arguments: Arguments) -> Result<String, ToolError> {
        let path = expand_home(required_str(&arguments, "path")?);
        let content = required_str(&arguments, "content")?;
        let append = optional_bool(&arguments, "append");

        let failed =
            |e: std::io::Error| ToolError::ExecutionFailed(format!("{}: {e}", path.display()));

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(failed)?;
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&path)
            .await
            .map_err(failed)?;

        file.write_all(content.as_bytes()).await.map_err(failed)?;
        file.flush().await.map_err(failed)?;

        let verb = if append { "appended" } else { "wrote" };
        Ok(format!("{verb} {} bytes to {}", content.len(), path.display()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_then_append() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("nested/out.txt");
        let path = file.display().to_string();

        let args = json!({"path": path, "content": "one"})
            .as_object()
            .cloned()
            .unwrap();
        FileWriteTool.execute(args).await.unwrap();

        let args = json!({"path": path, "content": "two", "append": true})
            .as_object()
            .cloned()
            .unwrap();
        let message = FileWriteTool.execute(args).await.unwrap();

        assert!(message.starts_with("appended 3 bytes"));
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "onetwo");
    }
}
