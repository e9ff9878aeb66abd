use crate::classifier::RiskTier;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid escalation pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// How one tool is classified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRule {
    pub tier: RiskTier,
    /// Argument keys that must be present.
    #[serde(default)]
    pub required: Vec<String>,
    /// Argument keys holding filesystem paths checked against banned prefixes.
    #[serde(default)]
    pub path_args: Vec<String>,
    /// Argument key holding a shell command scanned for escalations.
    #[serde(default)]
    pub command_arg: Option<String>,
}

impl ToolRule {
    pub fn new(tier: RiskTier) -> Self {
        Self {
            tier,
            required: Vec::new(),
            path_args: Vec::new(),
            command_arg: None,
        }
    }

    pub fn require(mut self, key: &str) -> Self {
        self.required.push(key.to_string());
        self
    }

    pub fn path_arg(mut self, key: &str) -> Self {
        self.path_args.push(key.to_string());
        if !self.required.iter().any(|k| k == key) {
            self.required.push(key.to_string());
        }
        self
    }

    pub fn command_arg(mut self, key: &str) -> Self {
        self.command_arg = Some(key.to_string());
        if !self.required.iter().any(|k| k == key) {
            self.required.push(key.to_string());
        }
        self
    }
}

/// A command pattern that raises the effective tier when it matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escalation {
    pub pattern: String,
    pub tier: RiskTier,
    #[serde(default)]
    pub description: String,
}

impl Escalation {
    fn new(pattern: &str, tier: RiskTier, description: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            tier,
            description: description.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskPolicy {
    pub tools: BTreeMap<String, ToolRule>,
    pub banned_paths: Vec<String>,
    pub confirmation_flag: String,
    pub escalations: Vec<Escalation>,
}

impl RiskPolicy {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, PolicyError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn empty() -> Self {
        Self {
            tools: BTreeMap::new(),
            banned_paths: Vec::new(),
            confirmation_flag: "confirmed".to_string(),
            escalations: Vec::new(),
        }
    }

    pub fn with_tool(mut self, name: &str, rule: ToolRule) -> Self {
        self.tools.insert(name.to_string(), rule);
        self
    }

    pub fn with_banned_path(mut self, path: &str) -> Self {
        self.banned_paths.push(path.to_string());
        self
    }

    pub fn with_escalation(mut self, pattern: &str, tier: RiskTier, description: &str) -> Self {
        self.escalations
            .push(Escalation::new(pattern, tier, description));
        self
    }

    fn default_escalations() -> Vec<Escalation> {
        use RiskTier::{High, Medium};
        vec![
            Escalation::new(
                r"\brm\s+-[a-zA-Z]*r[a-zA-Z]*f|\brm\s+-[a-zA-Z]*f[a-zA-Z]*r",
                High,
                "recursive force delete",
            ),
            Escalation::new(r"\bsudo\s+rm\b", High, "root-level delete"),
            Escalation::new(r"\bdd\s+if=", High, "raw disk write"),
            Escalation::new(r"\bmkfs\b|\bnewfs\b", High, "filesystem format"),
            Escalation::new(
                r"\bfdisk\b|\bdiskutil\s+erase",
                High,
                "disk partition or erase",
            ),
            Escalation::new(
                r"\bshutdown\b|\breboot\b",
                High,
                "system shutdown or reboot",
            ),
            Escalation::new(r"\bsudo\s+(chmod|chown)\b", High, "root permission change"),
            Escalation::new(
                r"\|\s*(sh|bash|zsh|python3?|perl|ruby|node)\b",
                High,
                "pipe to interpreter",
            ),
            Escalation::new(
                r"\b(pip3?|npm|brew|cargo)\s+install\b",
                Medium,
                "package install",
            ),
            Escalation::new(r"\bgit\s+push\b", Medium, "git push"),
        ]
    }
}

impl Default for RiskPolicy {
    fn default() -> Self {
        let tools = BTreeMap::from([
            (
                "file.read".to_string(),
                ToolRule::new(RiskTier::Low).path_arg("path"),
            ),
            (
                "file.list".to_string(),
                ToolRule::new(RiskTier::Low).path_arg("path"),
            ),
            (
                "file.write".to_string(),
                ToolRule::new(RiskTier::Medium)
                    .path_arg("path")
                    .require("content"),
            ),
            (
                "shell.exec".to_string(),
                ToolRule::new(RiskTier::High).command_arg("command"),
            ),
            (
                "service.check".to_string(),
                ToolRule::new(RiskTier::Low).require("host").require("port"),
            ),
        ]);

        Self {
            tools,
            banned_paths: ["/System", "/Library", "~/Library", "/usr", "/bin", "/sbin"]
                .iter()
                .map(|p| p.to_string())
                .collect(),
            confirmation_flag: "confirmed".to_string(),
            escalations: Self::default_escalations(),
        }
    }
}
