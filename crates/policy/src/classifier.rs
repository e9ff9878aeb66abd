use crate::path_guard::PathGuard;
use crate::policy::{PolicyError, RiskPolicy, ToolRule};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

const COMMAND_DELIMITERS: &[char] = &['\'', '"', '`', ';', '(', ')', '|', '&', '>', '<', '=', ','];

pub type Arguments = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskTier::Low => write!(f, "low"),
            RiskTier::Medium => write!(f, "medium"),
            RiskTier::High => write!(f, "high"),
        }
    }
}

/// Why a call was refused. The rendered text is surfaced to the model verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DenyReason {
    #[error("unknown tool: {name}")]
    UnknownTool { name: String },
    #[error("malformed arguments: {detail}")]
    MalformedArguments { detail: String },
    #[error("missing required argument '{key}'")]
    MissingArgument { key: String },
    #[error("banned path: {path} (under {prefix})")]
    BannedPath { path: String, prefix: String },
    #[error("unresolvable path: {path}")]
    UnresolvablePath { path: String },
    #[error("confirmation required")]
    ConfirmationRequired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approved,
    Denied(DenyReason),
}

impl Decision {
    pub fn is_approved(&self) -> bool {
        matches!(self, Decision::Approved)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Decision::Approved => "approved",
            Decision::Denied(_) => "denied",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub tier: RiskTier,
    pub decision: Decision,
}

/// A tool invocation parsed from model output that has not been classified yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedCall {
    pub tool_name: String,
    pub arguments: Arguments,
    /// Set when the argument text could not be decoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
}

impl ProposedCall {
    pub fn new(tool_name: impl Into<String>, arguments: Arguments) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
            parse_error: None,
        }
    }

    pub fn malformed(tool_name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments: Arguments::new(),
            parse_error: Some(detail.into()),
        }
    }
}

/// A classified call. Only [`RiskClassifier::classify`] can build one, and it
/// is not `Clone`, so each classification is consumed by exactly one dispatch.
#[derive(Debug, PartialEq, Serialize)]
pub struct ToolCall {
    tool_name: String,
    arguments: Arguments,
    risk_tier: RiskTier,
    decision: Decision,
}

impl ToolCall {
    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    pub fn arguments(&self) -> &Arguments {
        &self.arguments
    }

    pub fn risk_tier(&self) -> RiskTier {
        self.risk_tier
    }

    pub fn decision(&self) -> &Decision {
        &self.decision
    }

    pub fn is_approved(&self) -> bool {
        self.decision.is_approved()
    }
}

struct CompiledEscalation {
    regex: Regex,
    tier: RiskTier,
}

pub struct RiskClassifier {
    policy: RiskPolicy,
    guard: PathGuard,
    escalations: Vec<CompiledEscalation>,
}

impl RiskClassifier {
    pub fn new(policy: RiskPolicy) -> Result<Self, PolicyError> {
        let escalations = policy
            .escalations
            .iter()
            .map(|escalation| {
                Regex::new(&escalation.pattern)
                    .map(|regex| CompiledEscalation {
                        regex,
                        tier: escalation.tier,
                    })
                    .map_err(|source| PolicyError::Pattern {
                        pattern: escalation.pattern.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let guard = PathGuard::new(&policy.banned_paths);

        Ok(Self {
            policy,
            guard,
            escalations,
        })
    }

    pub fn policy(&self) -> &RiskPolicy {
        &self.policy
    }

    pub fn classify(&self, proposed: ProposedCall) -> ToolCall {
        let Classification { tier, decision } = match &proposed.parse_error {
            Some(detail) => self.malformed(&proposed.tool_name, detail),
            None => self.evaluate(&proposed.tool_name, &proposed.arguments),
        };

        ToolCall {
            tool_name: proposed.tool_name,
            arguments: proposed.arguments,
            risk_tier: tier,
            decision,
        }
    }

    /// Deterministic and side-effect free apart from reading path metadata.
    pub fn evaluate(&self, tool_name: &str, arguments: &Arguments) -> Classification {
        let Some(rule) = self.policy.tools.get(tool_name) else {
            return Classification {
                tier: RiskTier::High,
                decision: Decision::Denied(DenyReason::UnknownTool {
                    name: tool_name.to_string(),
                }),
            };
        };

        let mut tier = rule.tier;
        let deny = |tier: RiskTier, reason: DenyReason| Classification {
            tier,
            decision: Decision::Denied(reason),
        };

        if let Some(key) = rule.required.iter().find(|k| !arguments.contains_key(*k)) {
            return deny(tier, DenyReason::MissingArgument { key: key.clone() });
        }

        for key in &rule.path_args {
            let Some(value) = arguments.get(key) else {
                continue;
            };
            let Some(raw) = value.as_str() else {
                return deny(
                    tier,
                    DenyReason::MalformedArguments {
                        detail: format!("argument '{key}' must be a string"),
                    },
                );
            };
            if let Err(reason) = self.guard.check(raw) {
                return deny(tier, reason);
            }
        }

        if let Some(key) = &rule.command_arg {
            match arguments.get(key).map(Value::as_str) {
                Some(Some(command)) => {
                    if let Err(reason) = self.scan_command(command) {
                        return deny(tier, reason);
                    }
                    tier = tier.max(self.escalated_tier(command));
                }
                Some(None) => {
                    return deny(
                        tier,
                        DenyReason::MalformedArguments {
                            detail: format!("argument '{key}' must be a string"),
                        },
                    );
                }
                None => {}
            }
        }

        if tier == RiskTier::High && !self.confirmed(arguments) {
            return deny(tier, DenyReason::ConfirmationRequired);
        }

        Classification {
            tier,
            decision: Decision::Approved,
        }
    }

    fn malformed(&self, tool_name: &str, detail: &str) -> Classification {
        let tier = self
            .policy
            .tools
            .get(tool_name)
            .map(|rule: &ToolRule| rule.tier)
            .unwrap_or(RiskTier::High);

        Classification {
            tier,
            decision: Decision::Denied(DenyReason::MalformedArguments {
                detail: detail.to_string(),
            }),
        }
    }

    fn escalated_tier(&self, command: &str) -> RiskTier {
        self.escalations
            .iter()
            .filter(|escalation| escalation.regex.is_match(command))
            .map(|escalation| escalation.tier)
            .max()
            .unwrap_or(RiskTier::Low)
    }

    // Every path-like word in a command gets the same banned-prefix check as path arguments.
    // Redirections (`>`, `2>`, `&>`, `<`), assignments and comma lists all end a word.
    fn scan_command(&self, command: &str) -> Result<(), DenyReason> {
        let is_delimiter = |c: char| c.is_whitespace() || COMMAND_DELIMITERS.contains(&c);
        for word in command.split(is_delimiter) {
            if word.starts_with('/') || word.starts_with('~') {
                self.guard.check(word)?;
            }
        }
        Ok(())
    }

    fn confirmed(&self, arguments: &Arguments) -> bool {
        match arguments.get(&self.policy.confirmation_flag) {
            Some(Value::Bool(flag)) => *flag,
            Some(Value::String(text)) => {
                matches!(text.trim().to_ascii_lowercase().as_str(), "true" | "yes")
            }
            _ => false,
        }
    }
}
