//! chatterm: one terminal input multiplexed over LLM chat, shell commands and
//! a tool-using agent.
//!
//! The [`core::session::Session`] owns the transcript and the conversation
//! history. Handlers run as tasks and report back through an update queue;
//! front ends implement [`surface::Surface`] to show the result.

pub mod agent;
pub mod client;
pub mod config;
pub mod core;
pub mod escape;
pub mod llm_client;
pub mod logging;
pub mod markup;
pub mod mcp;
pub mod models;
pub mod palette;
pub mod prompts;
pub mod surface;
pub mod tui;
