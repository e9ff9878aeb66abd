use crate::error::ToolError;
use async_trait::async_trait;
use serde_json::Value;
use vigil_policy::Arguments;

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// Example argument object shown to the model.
    fn usage(&self) -> Value;
    async fn execute(&self, arguments: Arguments) -> Result<String, ToolError>;
}

pub(crate) fn required_str<'a>(arguments: &'a Arguments, key: &str) -> Result<&'a str, ToolError> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArguments(format!("'{key}' must be a string")))
}

pub(crate) fn optional_bool(arguments: &Arguments, key: &str) -> bool {
    match arguments.get(key) {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(text)) => text.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// Accepts either a JSON number or a numeric string.
pub(crate) fn optional_u64(arguments: &Arguments, key: &str) -> Result<Option<u64>, ToolError> {
    match arguments.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| {
                ToolError::InvalidArguments(format!("'{key}' must be a positive integer"))
            }),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| {
                ToolError::InvalidArguments(format!("'{key}' must be a positive integer"))
            }),
        Some(_) => Err(ToolError::InvalidArguments(format!("'{key}' must be a positive integer"))),
    }
}

pub(crate) fn truncate_output(text: String, limit: usize) -> String {
    let total = text.chars().count();
    if total <= limit {
        return text;
    }
    let kept: String = text.chars().take(limit).collect();
    format!("{kept}\n... (truncated, {total} chars total)")
}
