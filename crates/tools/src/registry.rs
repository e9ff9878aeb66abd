use crate::tools::Tool;
use std::collections::HashMap;
use std::sync::Arc;

pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Registry holding every built-in tool.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::tools::register_builtins(&mut registry);
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> &mut Self {
        self.tools.insert(tool.name().to_string(), tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn count(&self) -> usize {
        self.tools.len()
    }

    /// One line per tool, sorted by name, for the system prompt.
    pub fn describe(&self) -> String {
        self.names()
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| {
                format!(
                    "- {}: {} Input: {}",
                    tool.name(),
                    tool.description(),
                    tool.usage()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
