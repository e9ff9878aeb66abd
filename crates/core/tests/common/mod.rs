#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use vigil_control::{ModelSwitchSignal, SignalFile};
use vigil_core::{Orchestrator, OrchestratorConfig};
use vigil_policy::{Arguments, RiskClassifier, RiskPolicy, RiskTier, ToolRule};
use vigil_providers::{Script, ScriptedProvider};
use vigil_tools::{AuditLog, Tool, ToolDispatcher, ToolError, ToolRegistry};

/// Posts a model switch signal when executed.
pub struct SwitchTool {
    signal: SignalFile<ModelSwitchSignal>,
}

#[async_trait]
impl Tool for SwitchTool {
    fn name(&self) -> &str {
        "test.switch"
    }

    fn description(&self) -> &str {
        "Requests a model switch."
    }

    fn usage(&self) -> Value {
        json!({"model": "B"})
    }

    async fn execute(&self, arguments: Arguments) -> Result<String, ToolError> {
        let model = arguments
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or("B");
        self.signal
            .post(&ModelSwitchSignal::new(model))
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        Ok(format!("switch to {model} requested"))
    }
}

pub struct SlowTool;

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "test.slow"
    }

    fn description(&self) -> &str {
        "Sleeps for 300ms."
    }

    fn usage(&self) -> Value {
        json!({})
    }

    async fn execute(&self, _arguments: Arguments) -> Result<String, ToolError> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok("slept".to_string())
    }
}

pub struct Fixture {
    pub temp: TempDir,
    pub provider: Arc<ScriptedProvider>,
    pub audit: Arc<AuditLog>,
    pub switch: SignalFile<ModelSwitchSignal>,
}

impl Fixture {
    pub fn new(scripts: Vec<Script>) -> Self {
        let temp = TempDir::new().unwrap();
        let audit = Arc::new(AuditLog::open(temp.path().join("audit.jsonl")).unwrap());
        let switch = SignalFile::new(temp.path().join("model-switch.json"));

        Self {
            provider: Arc::new(ScriptedProvider::new(scripts)),
            audit,
            switch,
            temp,
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.temp.path().join(name)
    }

    pub fn orchestrator(&self, config: OrchestratorConfig) -> Orchestrator {
        let mut registry = ToolRegistry::with_builtins();
        registry
            .register(Arc::new(SwitchTool {
                signal: self.switch.clone(),
            }))
            .register(Arc::new(SlowTool));

        let policy = RiskPolicy::default()
            .with_tool("test.switch", ToolRule::new(RiskTier::Low))
            .with_tool("test.slow", ToolRule::new(RiskTier::Low));
        let classifier = Arc::new(RiskClassifier::new(policy).unwrap());
        let dispatcher = ToolDispatcher::new(Arc::new(registry), self.audit.clone());

        Orchestrator::new(self.provider.clone(), classifier, dispatcher, "A", config)
            .with_switch_signal(self.switch.clone())
    }
}

pub fn action(tool: &str, arguments: Value) -> Script {
    Script::text(&format!(
        "Thought: I will use {tool}.\nAction: {tool}\nAction Input: {arguments}"
    ))
}

pub fn final_answer(text: &str) -> Script {
    Script::text(&format!("Thought: I can answer.\nFinal Answer: {text}"))
}
