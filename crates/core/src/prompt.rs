use vigil_tools::ToolRegistry;

pub const DEFAULT_PERSONA: &str = "You are Vigil, a careful local assistant. You act on the user's \
machine only through the tools listed below and you report every failure or denial honestly.";

/// System prompt: persona, tool list and the ReAct response format.
pub fn system_prompt(persona: &str, registry: &ToolRegistry, confirmation_flag: &str) -> String {
    format!(
        "{persona}\n\n\
         Available tools:\n{tools}\n\n\
         Respond in exactly this format:\n\n\
         Thought: what you need to do next\n\
         Action: <tool name>\n\
         Action Input: <JSON object with the tool's arguments>\n\n\
         Stop after Action Input. The result comes back to you as an Observation.\n\
         When you can answer the user, respond with:\n\n\
         Thought: why you can answer now\n\
         Final Answer: <your answer>\n\n\
         Tools marked high risk only run when Action Input contains \"{confirmation_flag}\": true. \
         Add it only after the user has agreed to that exact action.",
        tools = registry.describe(),
    )
}
