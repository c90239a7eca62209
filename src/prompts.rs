//! System prompts.

// Prompt files loaded at compile time
pub const SYSTEM_PROMPT: &str = include_str!("prompts/system.txt");
pub const AGENT_PROMPT: &str = include_str!("prompts/agent.txt");

/// Preamble for the chat history, unless the config overrides it.
#[must_use]
pub fn default_system_prompt() -> String {
    SYSTEM_PROMPT.trim().to_string()
}

/// Instructions the tool-calling agent runs with.
#[must_use]
pub fn agent_system_prompt() -> String {
    AGENT_PROMPT.trim().to_string()
}
