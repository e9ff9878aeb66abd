use crate::error::ToolError;
use crate::tools::base::{optional_u64, required_str, Tool};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use vigil_policy::Arguments;

/// TCP connect probe. Read-only, so it doubles as a verification probe.
pub struct ServiceCheckTool {
    connect_timeout: Duration,
}

impl Default for ServiceCheckTool {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
        }
    }
}

#[async_trait]
impl Tool for ServiceCheckTool {
    fn name(&self) -> &str {
        "service.check"
    }

    fn description(&self) -> &str {
        "Checks whether a TCP service accepts connections."
    }

    fn usage(&self) -> Value {
        json!({"host": "127.0.0.1", "port": 11434})
    }

    async fn execute(&self, arguments: Arguments) -> Result<String, ToolError> {
        let host = required_str(&arguments, "host")?;
        let port = optional_u64(&arguments, "port")?
            .and_then(|p| u16::try_from(p).ok())
            .ok_or_else(|| {
                ToolError::InvalidArguments("'port' must be between 0 and 65535".into())
            })?;

        let address = format!("{host}:{port}");
        match timeout(self.connect_timeout, TcpStream::connect(&address)).await {
            Ok(Ok(_)) => Ok(format!("{address} is accepting connections")),
            Ok(Err(e)) => Err(ToolError::ExecutionFailed(format!("{address} is unreachable: {e}"))),
            Err(_) => Err(ToolError::ExecutionFailed(format!(
                "{address} did not answer within {}ms",
                self.connect_timeout.as_millis()
            ))),
        }
    }
}
