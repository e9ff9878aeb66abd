use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use vigil_core::OrchestratorConfig;
use vigil_policy::RiskPolicy;
use vigil_supervisor::SupervisorConfig;

/// Longest time allowed between an orchestrator crash and its replacement
/// publishing a liveness record.
const RESTART_BOUND_MS: u64 = 3000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model: ModelConfig,
    pub agent: AgentConfig,
    pub runtime: RuntimeConfig,
    pub policy: PolicyConfig,
    pub tasks: TasksConfig,
    pub supervisor: SupervisorSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub host: String,
    pub name: String,
    pub connect_timeout_ms: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            host: "http://127.0.0.1:11434".to_string(),
            name: "llama3.1".to_string(),
            connect_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub max_steps: usize,
    pub history_window: usize,
    pub tool_timeout_ms: u64,
    pub max_step_chars: usize,
    /// Replaces the built-in persona at the top of the system prompt.
    pub persona: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 15,
            history_window: 20,
            tool_timeout_ms: 30_000,
            max_step_chars: 8000,
            persona: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Holds the liveness records, signal file, logs and control mailbox.
    pub dir: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".vigil"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Risk policy YAML. The built-in policy is used when unset.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TasksConfig {
    /// Task board checked after each final answer. Disabled when unset.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSection {
    pub poll_interval_ms: u64,
    pub startup_timeout_ms: u64,
    pub grace_period_ms: u64,
    pub max_rapid_failures: usize,
    pub failure_window_ms: u64,
    pub staging_dir: Option<PathBuf>,
    /// Where staged files are copied. Defaults to the current directory.
    pub work_dir: Option<PathBuf>,
    pub whitelist: Vec<String>,
    pub protected_files: Vec<String>,
    /// Program started as the orchestrator. Defaults to this executable.
    pub orchestrator_program: Option<PathBuf>,
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            startup_timeout_ms: 2000,
            grace_period_ms: 2000,
            max_rapid_failures: 3,
            failure_window_ms: 60_000,
            staging_dir: None,
            work_dir: None,
            whitelist: ["yaml", "yml", "json", "toml", "md", "txt"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            protected_files: vec!["vigil.yaml".to_string()],
            orchestrator_program: None,
        }
    }
}

impl Config {
    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "No config file; using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// `VIGIL_MODEL` and `VIGIL_OLLAMA_HOST` take precedence over the file.
    pub fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var("VIGIL_MODEL").ok(),
            std::env::var("VIGIL_OLLAMA_HOST").ok(),
        );
    }

    fn apply_overrides(&mut self, model: Option<String>, host: Option<String>) {
        if let Some(model) = model.filter(|m| !m.trim().is_empty()) {
            self.model.name = model;
        }
        if let Some(host) = host.filter(|h| !h.trim().is_empty()) {
            self.model.host = host;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.model.name.trim().is_empty() {
            bail!("model.name must not be empty");
        }
        if self.agent.max_steps == 0 {
            bail!("agent.max_steps must be at least 1");
        }
        if self.agent.history_window == 0 {
            bail!("agent.history_window must be at least 1");
        }
        if self.agent.tool_timeout_ms == 0 {
            bail!("agent.tool_timeout_ms must be positive");
        }

        let supervisor = &self.supervisor;
        if supervisor.poll_interval_ms == 0 {
            bail!("supervisor.poll_interval_ms must be positive");
        }
        if supervisor.poll_interval_ms + supervisor.startup_timeout_ms > RESTART_BOUND_MS {
            bail!(
                "supervisor.poll_interval_ms + supervisor.startup_timeout_ms must not exceed {}ms",
                RESTART_BOUND_MS
            );
        }
        if supervisor.max_rapid_failures == 0 {
            bail!("supervisor.max_rapid_failures must be at least 1");
        }
        Ok(())
    }

    pub fn runtime_dir(&self) -> &Path {
        &self.runtime.dir
    }

    pub fn liveness_file(&self) -> PathBuf {
        self.runtime.dir.join("agent.pid")
    }

    pub fn signal_file(&self) -> PathBuf {
        self.runtime.dir.join("model-switch.json")
    }

    pub fn audit_log(&self) -> PathBuf {
        self.runtime.dir.join("audit.jsonl")
    }

    pub fn archive_file(&self) -> PathBuf {
        self.runtime.dir.join("turns.jsonl")
    }

    pub fn inbox_dir(&self) -> PathBuf {
        self.runtime.dir.join("inbox")
    }

    pub fn control_dir(&self) -> PathBuf {
        self.runtime.dir.join("control")
    }

    pub fn supervisor_pid_file(&self) -> PathBuf {
        self.runtime.dir.join("supervisor.pid")
    }

    pub fn status_file(&self) -> PathBuf {
        self.runtime.dir.join("status.json")
    }

    pub fn action_log(&self) -> PathBuf {
        self.runtime.dir.join("supervisor.log")
    }

    pub fn orchestrator_log(&self) -> PathBuf {
        self.runtime.dir.join("agent.log")
    }

    pub fn risk_policy(&self) -> Result<RiskPolicy> {
        match &self.policy.path {
            Some(path) => RiskPolicy::load(path)
                .with_context(|| format!("Failed to load risk policy {}", path.display())),
            None => Ok(RiskPolicy::default()),
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let defaults = OrchestratorConfig::default();
        OrchestratorConfig {
            max_steps: self.agent.max_steps,
            history_window: self.agent.history_window,
            tool_timeout: Duration::from_millis(self.agent.tool_timeout_ms),
            max_step_chars: self.agent.max_step_chars,
            persona: self.agent.persona.clone().unwrap_or(defaults.persona),
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        let section = &self.supervisor;
        let work_dir = section
            .work_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));

        let mut config = SupervisorConfig::new(&self.runtime.dir, &work_dir);
        config.poll_interval = Duration::from_millis(section.poll_interval_ms);
        config.startup_timeout = Duration::from_millis(section.startup_timeout_ms);
        config.grace_period = Duration::from_millis(section.grace_period_ms);
        config.max_rapid_failures = section.max_rapid_failures;
        config.failure_window = Duration::from_millis(section.failure_window_ms);

        config.liveness_file = self.liveness_file();
        config.signal_file = self.signal_file();
        config.own_liveness = self.supervisor_pid_file();
        config.status_file = self.status_file();
        config.action_log = self.action_log();
        config.control_dir = self.control_dir();
        if let Some(staging) = &section.staging_dir {
            config.staging_dir = staging.clone();
        }
        config.whitelist = section.whitelist.clone();
        config.protected_files = section.protected_files.clone();
        config
    }
}
