//! Collaborator traits for the session engine.
//!
//! The session only talks to models, agents and tool servers through these
//! traits, so the HTTP client, the tool-calling agent and the MCP pool can be
//! swapped for scripted fakes in tests.
//!
//! # Architecture
//!
//! - `ChatClient`: streams the text of one assistant reply for a history
//! - `ReasoningAgent`: streams the [`StreamEvent`]s of one agent run
//! - `ToolManager`: connects to tool servers, lists and calls their tools

use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::Stream;
use serde_json::Value;

use crate::models::{Message, StreamEvent, Tool};

/// Boxed stream of reply text chunks.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send + 'static>>;

/// Boxed stream of agent events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send + 'static>>;

/// A language model that streams a reply to a conversation.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Model identifier, for status and logs.
    fn model(&self) -> &str;

    /// Start streaming the assistant reply to `history`.
    ///
    /// The returned stream is finite and cannot be restarted. Errors before
    /// the first chunk come back from this call; errors mid-stream come
    /// back as stream items.
    async fn stream_chat(&self, history: Vec<Message>) -> Result<TextStream>;
}

/// A multi-step agent that plans, calls tools and answers.
#[async_trait]
pub trait ReasoningAgent: Send + Sync {
    async fn stream_agent(
        &self,
        initial: Message,
        tools: Vec<Tool>,
        max_iterations: u32,
    ) -> Result<EventStream>;
}

/// Connections to the external tool servers.
#[async_trait]
pub trait ToolManager: Send + Sync {
    /// Connect every configured server that is not connected yet.
    async fn connect(&self) -> Result<()>;

    /// Tools from every connected server.
    async fn list_tools(&self) -> Result<Vec<Tool>>;

    /// Call a tool by name and return its text output.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<String>;
}

/// Tool manager with no servers. Used when no MCP config exists.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTools;

#[async_trait]
impl ToolManager for NoTools {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<Tool>> {
        Ok(Vec::new())
    }

    async fn call_tool(&self, name: &str, _arguments: Value) -> Result<String> {
        anyhow::bail!("Unknown tool: {name}")
    }
}
