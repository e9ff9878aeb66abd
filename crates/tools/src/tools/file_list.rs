use crate::error::ToolError;
use crate::tools::base::{optional_bool, required_str, Tool};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use tokio::fs;
use vigil_policy::{expand_home, Arguments};

const MAX_ENTRIES: usize = 1000;

pub struct FileListTool;

#[async_trait]
impl Tool for FileListTool {
    fn name(&self) -> &str {
        "file.list"
    }

    fn description(&self) -> &str {
        "Lists directory contents. Directories end with '/'."
    }

    fn usage(&self) -> Value {
        json!({"path": "<directory>", "all": false})
    }

    async fn execute(&self, arguments: Arguments) -> Result<String, ToolError> {
        let path = expand_home(required_str(&arguments, "path")?);
        let entries = list_dir(&path, optional_bool(&arguments, "all")).await?;

        if entries.is_empty() {
            return Ok(format!("{} is empty", path.display()));
        }
        Ok(entries.join("\n"))
    }
}

pub(crate) async fn list_dir(path: &Path, include_hidden: bool) -> Result<Vec<String>, ToolError> {
    let mut dir = fs::read_dir(path)
        .await
        .map_err(|e| ToolError::ExecutionFailed(format!("{}: {e}", path.display())))?;

    let mut entries = Vec::new();
    while let Some(entry) = dir
        .next_entry()
        .await
        .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?
    {
        if entries.len() >= MAX_ENTRIES {
            break;
        }

        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') && !include_hidden {
            continue;
        }

        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        entries.push(if is_dir { format!("{name}/") } else { name });
    }

    entries.sort();
    Ok(entries)
}
