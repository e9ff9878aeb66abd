use serde_json::Value;
use vigil_policy::{Arguments, ProposedCall};

const THOUGHT: &str = "Thought:";
const ACTION: &str = "Action:";
const ACTION_INPUT: &str = "Action Input:";
const FINAL_ANSWER: &str = "Final Answer:";
const OBSERVATION: &str = "Observation:";

#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    Action(ProposedCall),
    Final(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedStep {
    pub thought: String,
    pub kind: StepKind,
    /// Model text with any hallucinated observation removed.
    pub text: String,
}

/// Parses one model completion in ReAct form.
///
/// Text with neither an `Action:` nor a `Final Answer:` marker is taken as the
/// final answer. When both appear, the earlier one wins.
pub fn parse_step(raw: &str) -> ParsedStep {
    let text = strip_observation(raw).trim().to_string();

    let action_at = find_marker(&text, ACTION);
    let final_at = find_marker(&text, FINAL_ANSWER);

    let kind = match (action_at, final_at) {
        (Some(action), Some(fin)) if fin < action => final_kind(&text, fin),
        (Some(action), _) => StepKind::Action(parse_action(&text[action + ACTION.len()..])),
        (None, Some(fin)) => final_kind(&text, fin),
        (None, None) => StepKind::Final(strip_prefix(&text, THOUGHT).trim().to_string()),
    };

    let end = [action_at, final_at]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(text.len());
    let thought = strip_prefix(text[..end].trim(), THOUGHT).trim().to_string();

    ParsedStep {
        thought,
        kind,
        text,
    }
}

/// Byte offset of an `Observation:` line, if the completion contains one.
pub fn observation_offset(text: &str) -> Option<usize> {
    find_marker(text, OBSERVATION)
}

fn strip_observation(raw: &str) -> &str {
    match observation_offset(raw) {
        Some(at) => &raw[..at],
        None => raw,
    }
}

fn final_kind(text: &str, at: usize) -> StepKind {
    StepKind::Final(text[at + FINAL_ANSWER.len()..].trim().to_string())
}

fn strip_prefix<'a>(text: &'a str, prefix: &str) -> &'a str {
    text.strip_prefix(prefix).unwrap_or(text)
}

// A marker counts only at the start of a line, ignoring leading whitespace.
fn find_marker(text: &str, marker: &str) -> Option<usize> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let indent = line.len() - line.trim_start().len();
        if line[indent..].starts_with(marker) {
            return Some(offset + indent);
        }
        offset += line.len();
    }
    None
}

fn parse_action(after_marker: &str) -> ProposedCall {
    let first_line = after_marker
        .lines()
        .next()
        .unwrap_or("")
        .trim()
        .trim_matches(|c| matches!(c, '`' | '"' | '\''));
    let tool_name: String = first_line
        .chars()
        .take_while(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();

    if tool_name.is_empty() {
        return ProposedCall::malformed("", "missing tool name after 'Action:'");
    }

    let Some(input_at) = find_marker(after_marker, ACTION_INPUT) else {
        return ProposedCall::new(tool_name, Arguments::new());
    };
    let input = &after_marker[input_at + ACTION_INPUT.len()..];

    match extract_json_object(input) {
        Ok(json) => match serde_json::from_str::<Value>(json) {
            Ok(Value::Object(arguments)) => ProposedCall::new(tool_name, arguments),
            Ok(_) => ProposedCall::malformed(tool_name, "Action Input must be a JSON object"),
            Err(e) => {
                ProposedCall::malformed(tool_name, format!("invalid JSON in Action Input: {e}"))
            }
        },
        Err(detail) => ProposedCall::malformed(tool_name, detail),
    }
}

/// Finds the first balanced `{...}` span, honouring string literals and escapes.
pub fn extract_json_object(text: &str) -> Result<&str, String> {
    let start = text
        .find('{')
        .ok_or_else(|| "expected a JSON object after 'Action Input:'".to_string())?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }

    Err("unterminated JSON object in Action Input".to_string())
}
