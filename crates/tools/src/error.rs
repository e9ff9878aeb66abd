use thiserror::Error;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    ExecutionFailed(String),

    #[error("timed out after {0}ms")]
    TimedOut(u64),
}

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("refusing to dispatch denied call to '{tool}'")]
    NotApproved { tool: String },

    #[error("call to '{tool}' was approved and cannot be recorded as denied")]
    NotDenied { tool: String },

    #[error("audit log write failed: {0}")]
    Audit(#[from] AuditError),

    #[error("dispatch task failed: {0}")]
    Lane(String),
}
