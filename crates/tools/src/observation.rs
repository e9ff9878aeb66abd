use serde::{Deserialize, Serialize};

/// Result of a tool call attempt as fed back into the reasoning loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "lowercase")]
pub enum Observation {
    Success(String),
    Failure(String),
    Denied(String),
    /// Milliseconds the call was allowed to run.
    Timeout(u64),
}

impl Observation {
    pub fn kind(&self) -> &'static str {
        match self {
            Observation::Success(_) => "success",
            Observation::Failure(_) => "failure",
            Observation::Denied(_) => "denied",
            Observation::Timeout(_) => "timeout",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Observation::Success(_))
    }

    pub fn as_text(&self) -> String {
        match self {
            Observation::Success(text) => text.clone(),
            Observation::Failure(reason) => format!("Error: {reason}"),
            Observation::Denied(reason) => format!("Denied: {reason}"),
            Observation::Timeout(ms) => format!("Timed out: no result after {ms}ms"),
        }
    }
}
