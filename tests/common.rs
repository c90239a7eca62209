//! Scripted collaborators and helpers shared by the integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;

use chatterm::core::error_log::ErrorLog;
use chatterm::core::session::{Collaborators, Session, SessionOptions, SubmissionPolicy};
use chatterm::llm_client::{
    ChatClient, EventStream, NoTools, ReasoningAgent, TextStream, ToolManager,
};
use chatterm::models::{Message, StreamEvent, Tool};
use chatterm::surface::{Status, Surface};

pub const PREAMBLE: &str = "You are a test assistant.";

/// Surface that keeps everything the session showed it.
#[derive(Debug, Default)]
pub struct RecordingSurface {
    pub last: String,
    pub renders: usize,
    pub scrolls: usize,
    pub statuses: Vec<Status>,
}

impl Surface for RecordingSurface {
    fn render(&mut self, markup: &str) {
        self.last = markup.to_string();
        self.renders += 1;
    }

    fn scroll_to_end(&mut self) {
        self.scrolls += 1;
    }

    fn refresh_status(&mut self, status: &Status) {
        self.statuses.push(*status);
    }
}

/// Chat client that streams the same chunks for every request and keeps
/// the histories it was asked about.
#[derive(Default)]
pub struct ScriptedChat {
    chunks: Vec<Result<String, String>>,
    /// Error returned before any chunk.
    refuse: Option<String>,
    /// When set, streaming starts only after a notification.
    gate: Option<Arc<Notify>>,
    pub requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedChat {
    pub fn replying(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|chunk| Ok((*chunk).to_string())).collect(),
            ..Self::default()
        }
    }

    pub fn failing_midway(chunk: &str, error: &str) -> Self {
        Self {
            chunks: vec![Ok(chunk.to_string()), Err(error.to_string())],
            ..Self::default()
        }
    }

    pub fn refusing(error: &str) -> Self {
        Self {
            refuse: Some(error.to_string()),
            ..Self::default()
        }
    }

    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }
}

#[async_trait]
impl ChatClient for ScriptedChat {
    fn model(&self) -> &str {
        "scripted-chat"
    }

    async fn stream_chat(&self, history: Vec<Message>) -> Result<TextStream> {
        self.requests
            .lock()
            .map_err(|_| anyhow::anyhow!("poisoned"))?
            .push(history);
        if let Some(error) = &self.refuse {
            anyhow::bail!("{error}");
        }
        let chunks = self.chunks.clone();
        let gate = self.gate.clone();
        Ok(Box::pin(async_stream::stream! {
            if let Some(gate) = gate {
                gate.notified().await;
            }
            for chunk in chunks {
                yield chunk.map_err(|err| anyhow::anyhow!(err));
            }
        }))
    }
}

/// Chat client whose stream panics.
pub struct PanickingChat;

#[async_trait]
impl ChatClient for PanickingChat {
    fn model(&self) -> &str {
        "panicking"
    }

    async fn stream_chat(&self, _history: Vec<Message>) -> Result<TextStream> {
        panic!("chat client exploded");
    }
}

/// Agent that replays a fixed event list and keeps what it was given.
#[derive(Default)]
pub struct ScriptedAgent {
    events: Vec<StreamEvent>,
    /// Error yielded after the events.
    error: Option<String>,
    pub calls: Mutex<Vec<(Message, Vec<Tool>, u32)>>,
}

impl ScriptedAgent {
    pub fn new(events: Vec<StreamEvent>) -> Self {
        Self {
            events,
            ..Self::default()
        }
    }

    pub fn failing_after(events: Vec<StreamEvent>, error: &str) -> Self {
        Self {
            events,
            error: Some(error.to_string()),
            ..Self::default()
        }
    }
}

#[async_trait]
impl ReasoningAgent for ScriptedAgent {
    async fn stream_agent(
        &self,
        initial: Message,
        tools: Vec<Tool>,
        max_iterations: u32,
    ) -> Result<EventStream> {
        self.calls
            .lock()
            .map_err(|_| anyhow::anyhow!("poisoned"))?
            .push((initial, tools, max_iterations));
        let mut events: Vec<Result<StreamEvent>> =
            self.events.iter().cloned().map(Ok).collect();
        if let Some(error) = &self.error {
            events.push(Err(anyhow::anyhow!("{error}")));
        }
        Ok(Box::pin(futures_util::stream::iter(events)))
    }
}

/// Tool manager with a fixed tool list.
pub struct StaticTools(pub Vec<Tool>);

#[async_trait]
impl ToolManager for StaticTools {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<Tool>> {
        Ok(self.0.clone())
    }

    async fn call_tool(&self, name: &str, _arguments: Value) -> Result<String> {
        Ok(format!("called {name}"))
    }
}

/// Tool manager that cannot reach its servers.
pub struct UnreachableTools;

#[async_trait]
impl ToolManager for UnreachableTools {
    async fn connect(&self) -> Result<()> {
        anyhow::bail!("server offline")
    }

    async fn list_tools(&self) -> Result<Vec<Tool>> {
        Ok(Vec::new())
    }

    async fn call_tool(&self, name: &str, _arguments: Value) -> Result<String> {
        anyhow::bail!("Unknown tool: {name}")
    }
}

pub fn collaborators(
    chat: Arc<dyn ChatClient>,
    agent: Arc<dyn ReasoningAgent>,
    tools: Arc<dyn ToolManager>,
) -> Collaborators {
    Collaborators { chat, agent, tools }
}

pub fn chat_only(chat: Arc<dyn ChatClient>) -> Collaborators {
    collaborators(
        chat,
        Arc::new(ScriptedAgent::default()),
        Arc::new(NoTools),
    )
}

pub fn options(policy: SubmissionPolicy) -> SessionOptions {
    SessionOptions {
        system_prompt: PREAMBLE.to_string(),
        submission_policy: policy,
        ..SessionOptions::default()
    }
}

/// A session writing its error log into `dir`.
pub fn session(
    dir: &tempfile::TempDir,
    collaborators: Collaborators,
    policy: SubmissionPolicy,
) -> Session<RecordingSurface> {
    Session::new(
        RecordingSurface::default(),
        collaborators,
        ErrorLog::new(dir.path().join("logs").join("error.log")),
        options(policy),
    )
}

/// Lines of the error log, or none if it was never written.
pub fn error_log_lines(dir: &tempfile::TempDir) -> Vec<String> {
    std::fs::read_to_string(dir.path().join("logs").join("error.log"))
        .map(|text| text.lines().map(str::to_string).collect())
        .unwrap_or_default()
}
