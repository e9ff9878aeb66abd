use crate::error::ToolError;
use crate::tools::base::{required_str, truncate_output, Tool};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::fs;
use vigil_policy::{expand_home, Arguments};

const MAX_CHARS: usize = 5000;

pub struct FileReadTool;

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file.read"
    }

    fn description(&self) -> &str {
        "Reads a text file. Directories are listed instead."
    }

    fn usage(&self) -> Value {
        json!({"path": "<file path>"})
    }

    async fn execute(&self, arguments: Arguments) -> Result<String, ToolError> {
        let path = expand_home(required_str(&arguments, "path")?);

        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("{}: {e}", path.display())))?;

        if metadata.is_dir() {
            let entries = super::file_list::list_dir(&path, false).await?;
            return Ok(format!(
                "{} is a directory:\n{}",
                path.display(),
                entries.join("\n")
            ));
        }

        let bytes = fs::read(&path)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("{}: {e}", path.display())))?;

        Ok(truncate_output(String::from_utf8_lossy(&bytes).into_owned(), MAX_CHARS))
    }
}
