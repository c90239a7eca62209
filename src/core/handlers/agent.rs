//! Agent mode: drive a reasoning agent and render each event kind.

use std::sync::Arc;

use anyhow::Result;
use futures_util::StreamExt;
use serde_json::Value;

use super::user_block;
use crate::core::SessionError;
use crate::core::error_log::FailureOrigin;
use crate::core::events::TaskContext;
use crate::escape::escape;
use crate::llm_client::{ReasoningAgent, ToolManager};
use crate::models::{Message, StreamEvent};

/// Transcript header appended when an agent line is dispatched.
#[must_use]
pub fn header(line: &str) -> String {
    format!("{}\n[green]AGENT:[/green]\n", user_block(line))
}

/// Transcript markup produced by one agent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub markup: String,
    /// Set for in-band `Error` events, which also go to the error log.
    pub error: Option<String>,
}

impl Rendered {
    fn markup(markup: String) -> Self {
        Self {
            markup,
            error: None,
        }
    }
}

/// Per-submission state of an agent run.
///
/// Builds the escaped transcript markup and, in parallel, the unescaped text
/// recorded as the assistant turn.
#[derive(Debug, Default)]
pub struct AgentTurn {
    current_iteration: Option<u32>,
    iteration_unannounced: bool,
    final_header_shown: bool,
    message_content: String,
}

impl AgentTurn {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn current_iteration(&self) -> Option<u32> {
        self.current_iteration
    }

    #[must_use]
    pub fn message_content(&self) -> &str {
        &self.message_content
    }

    #[must_use]
    pub fn into_message_content(self) -> String {
        self.message_content
    }

    /// Apply one event. `Ok(None)` means nothing to render.
    pub fn apply(&mut self, event: StreamEvent) -> Result<Option<Rendered>, SessionError> {
        let rendered = match event {
            StreamEvent::Thinking { content, iteration } => {
                if self.current_iteration != Some(iteration) {
                    self.current_iteration = Some(iteration);
                    self.iteration_unannounced = true;
                }
                if content.is_empty() {
                    return Ok(None);
                }
                let label = if std::mem::take(&mut self.iteration_unannounced) {
                    format!(" [dim](iteration {iteration})[/dim]")
                } else {
                    String::new()
                };
                self.message_content
                    .push_str(&format!("\n|THINKING|:\n{content}\n"));
                Rendered::markup(format!(
                    "\n[orange]|THINKING|:[/orange]{label}\n{}\n",
                    escape(&content)
                ))
            }
            StreamEvent::ToolPrediction { name, arguments } => {
                let params = pretty_json(&arguments);
                self.message_content.push_str(&format!(
                    "\n|TOOL PREDICTION|:\nTool: `{name}`\nParameters:\n```json\n{params}\n```\n"
                ));
                Rendered::markup(format!(
                    "\n[purple]|TOOL PREDICTION|:[/purple]\nTool: `{}`\nParameters:\n```json\n{}\n```\n",
                    escape(&name),
                    escape(&params)
                ))
            }
            StreamEvent::ToolResult { name, result } => {
                self.message_content.push_str(&format!(
                    "\n|TOOL RESULT|:\nTool: `{name}`\nResult: {result}\n"
                ));
                Rendered::markup(format!(
                    "\n[purple]|TOOL RESULT|:[/purple]\nTool: `{}`\nResult: {}\n",
                    escape(&name),
                    escape(&result)
                ))
            }
            StreamEvent::Error { content } => {
                self.message_content
                    .push_str(&format!("\n|ERROR|:\nError: {content}\n"));
                Rendered {
                    markup: format!("\n[red]|ERROR|:[/red]\nError: {}\n", escape(&content)),
                    error: Some(content),
                }
            }
            StreamEvent::FinalText { content } => {
                let mut markup = String::new();
                if !self.final_header_shown {
                    self.final_header_shown = true;
                    markup.push_str("\n[green]|FINAL RESPONSE|:[/green]\n");
                    self.message_content.push_str("\n|FINAL RESPONSE|:\n");
                }
                markup.push_str(&escape(&content));
                self.message_content.push_str(&content);
                Rendered::markup(markup)
            }
            StreamEvent::Done => return Ok(None),
            event @ StreamEvent::TextChunk { .. } => {
                return Err(SessionError::ProtocolViolation { kind: event.kind() });
            }
        };
        Ok(Some(rendered))
    }
}

fn pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Run one agent submission and report it to the session.
pub async fn run(
    ctx: TaskContext,
    agent: Arc<dyn ReasoningAgent>,
    tools: Arc<dyn ToolManager>,
    line: String,
    max_iterations: u32,
) {
    tracing::debug!(task = ctx.id, max_iterations, "Agent started");
    match drive(&ctx, agent.as_ref(), tools.as_ref(), line, max_iterations).await {
        Ok(content) => {
            ctx.append("\n").await;
            ctx.record(Message::assistant(content)).await;
        }
        Err(err) => {
            tracing::warn!(task = ctx.id, "Agent stream failed: {err:#}");
            ctx.fail(FailureOrigin::AgentStream, format!("{err:#}")).await;
        }
    }
}

async fn drive(
    ctx: &TaskContext,
    agent: &dyn ReasoningAgent,
    tools: &dyn ToolManager,
    line: String,
    max_iterations: u32,
) -> Result<String> {
    tools.connect().await.map_err(SessionError::ToolManager)?;
    let available = tools.list_tools().await.map_err(SessionError::ToolManager)?;
    tracing::debug!(task = ctx.id, tools = available.len(), "Tools listed");

    let mut stream = agent
        .stream_agent(Message::user(line), available, max_iterations)
        .await?;
    let mut turn = AgentTurn::new();
    while let Some(event) = stream.next().await {
        let Some(rendered) = turn.apply(event?)? else {
            continue;
        };
        if let Some(error) = rendered.error {
            ctx.log_error(FailureOrigin::AgentEvent, error).await;
        }
        ctx.append_rendered(rendered.markup).await;
        ctx.scroll_to_end().await;
    }
    Ok(turn.into_message_content())
}
