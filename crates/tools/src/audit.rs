use crate::error::AuditError;
use crate::observation::Observation;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use vigil_policy::{Decision, RiskTier, ToolCall};

const SUMMARY_LIMIT: usize = 500;
const REDACTED: &str = "[REDACTED]";
const SENSITIVE_KEYS: &[&str] = &[
    "token",
    "password",
    "secret",
    "api_key",
    "apikey",
    "authorization",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub tool: String,
    pub arguments: Value,
    pub tier: RiskTier,
    pub decision: String,
    pub outcome: String,
    pub summary: String,
}

/// Append-only JSON-lines record of every dispatched or denied call.
pub struct AuditLog {
    path: PathBuf,
    state: Mutex<AuditState>,
}

struct AuditState {
    file: File,
    next_seq: u64,
}

impl AuditLog {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let next_seq = match File::open(&path) {
            Ok(existing) => BufReader::new(existing).lines().count() as u64,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            state: Mutex::new(AuditState { file, next_seq }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(
        &self,
        call: &ToolCall,
        observation: &Observation,
    ) -> Result<AuditEntry, AuditError> {
        let mut state = self.state.lock();

        let entry = AuditEntry {
            seq: state.next_seq,
            timestamp: Utc::now(),
            tool: call.tool_name().to_string(),
            arguments: redact(&Value::Object(call.arguments().clone())),
            tier: call.risk_tier(),
            decision: match call.decision() {
                Decision::Approved => "approved".to_string(),
                Decision::Denied(reason) => format!("denied: {reason}"),
            },
            outcome: observation.kind().to_string(),
            summary: truncate(&observation.as_text(), SUMMARY_LIMIT),
        };

        let json = serde_json::to_string(&entry)?;
        writeln!(state.file, "{}", json)?;
        state.file.sync_all()?;
        state.next_seq += 1;

        Ok(entry)
    }

    pub fn entries(&self) -> Result<Vec<AuditEntry>, AuditError> {
        let _state = self.state.lock();
        let reader = BufReader::new(File::open(&self.path)?);

        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line)?);
        }
        Ok(entries)
    }
}

fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| {
                    let lowered = key.to_ascii_lowercase();
                    if SENSITIVE_KEYS.iter().any(|s| lowered.contains(s)) {
                        (key.clone(), Value::String(REDACTED.to_string()))
                    } else {
                        (key.clone(), redact(value))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    text.chars().take(limit).collect()
}
