use crate::error::ToolError;
use crate::tools::base::{optional_u64, required_str, truncate_output, Tool};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use vigil_policy::{expand_home, Arguments};

const MAX_OUTPUT_CHARS: usize = 8000;

/// Runs a command through `sh -c` with stdin closed.
pub struct ShellExecTool {
    default_timeout: Duration,
}

impl ShellExecTool {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }
}

impl Default for ShellExecTool {
    fn default() -> Self {
        Self::new(Duration::from_secs(120))
    }
}

#[async_trait]
impl Tool for ShellExecTool {
    fn name(&self) -> &str {
        "shell.exec"
    }

    fn description(&self) -> &str {
        "Runs a shell command. High risk: set \"confirmed\": true once the user has agreed."
    }

    fn usage(&self) -> Value {
        json!({
            "command": "<shell command>",
            "cwd": "<optional dir>",
            "timeout_ms": 120000,
            "confirmed": true
        })
    }

    async fn execute(&self, arguments: Arguments) -> Result<String, ToolError> {
        let command = required_str(&arguments, "command")?;
        if command.trim().is_empty() {
            return Err(ToolError::InvalidArguments("empty command".into()));
        }

        let limit = optional_u64(&arguments, "timeout_ms")?
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(cwd) = arguments.get("cwd").and_then(Value::as_str) {
            cmd.current_dir(expand_home(cwd));
        }

        // New session so the whole process group dies with the command.
        #[cfg(unix)]
        {
            unsafe {
                cmd.pre_exec(|| {
                    libc::setsid();
                    Ok(())
                });
            }
        }

        let output = timeout(limit, cmd.output())
            .await
            .map_err(|_| ToolError::TimedOut(limit.as_millis() as u64))?
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        let mut text = stdout.trim_end().to_string();
        if !stderr.trim().is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str("stderr: ");
            text.push_str(stderr.trim_end());
        }
        let text = truncate_output(text, MAX_OUTPUT_CHARS);

        if output.status.success() {
            Ok(if text.is_empty() {
                "(no output)".to_string()
            } else {
                text
            })
        } else {
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            Err(ToolError::ExecutionFailed(format!("exit status {code}: {text}")))
        }
    }
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn args(value: Value) -> Arguments {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_captures_stdout() {
        let out = ShellExecTool::default()
            .execute(args(json!({"command": "echo hello"})))
            .await
            .unwrap();
        assert_eq!(out, "hello");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure_with_output() {
        let err = ShellExecTool::default()
            .execute(args(json!({"command": "echo bad >&2; exit 3"})))
            .await
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("exit status 3"));
        assert!(text.contains("bad"));
    }

    #[tokio::test]
    async fn test_own_timeout() {
        let err = ShellExecTool::default()
            .execute(args(json!({"command": "sleep 5", "timeout_ms": 100})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::TimedOut(100)));
    }
}
