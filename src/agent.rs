//! Tool-calling agent over an OpenAI-compatible completion API.
//!
//! Each iteration sends the conversation and the tool schemas. Text that
//! accompanies tool calls is surfaced as thinking, every call is executed
//! through the [`ToolManager`] and its output fed back, and the first reply
//! without tool calls ends the run.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::client::OpenAiClient;
use crate::llm_client::{EventStream, ReasoningAgent, ToolManager};
use crate::models::{ChatCompletionRequest, Message, StreamEvent, Tool, WireMessage, WireTool};
use crate::prompts;

#[derive(Clone)]
pub struct ToolCallingAgent {
    client: OpenAiClient,
    model: String,
    tools: Arc<dyn ToolManager>,
    system_prompt: String,
}

impl ToolCallingAgent {
    pub fn new(client: OpenAiClient, model: impl Into<String>, tools: Arc<dyn ToolManager>) -> Self {
        Self {
            client,
            model: model.into(),
            tools,
            system_prompt: prompts::agent_system_prompt(),
        }
    }

    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }
}

/// Parse the JSON-encoded arguments of a tool call. Anything that is not
/// valid JSON is passed through as a string.
fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(serde_json::Map::new());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[async_trait]
impl ReasoningAgent for ToolCallingAgent {
    async fn stream_agent(
        &self,
        initial: Message,
        tools: Vec<Tool>,
        max_iterations: u32,
    ) -> Result<EventStream> {
        let client = self.client.clone();
        let manager = Arc::clone(&self.tools);
        let model = self.model.clone();
        let wire_tools: Vec<WireTool> = tools.iter().map(WireTool::from).collect();
        let mut messages = vec![
            WireMessage::from(&Message::system(self.system_prompt.clone())),
            WireMessage::from(&initial),
        ];

        let stream = async_stream::try_stream! {
            for iteration in 1..=max_iterations {
                let request = ChatCompletionRequest {
                    model: model.clone(),
                    messages: messages.clone(),
                    tools: (!wire_tools.is_empty()).then(|| wire_tools.clone()),
                    temperature: client.temperature(),
                    stream: false,
                };
                let response = client.complete(request).await?;
                let choice = response
                    .choices
                    .into_iter()
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("Completion response had no choices"))?;
                let reply = choice.message;
                let content = reply.content.clone().unwrap_or_default();

                if reply.tool_calls.is_empty() {
                    yield StreamEvent::FinalText { content };
                    yield StreamEvent::Done;
                    return;
                }

                tracing::debug!(iteration, calls = reply.tool_calls.len(), "Agent requested tools");
                if !content.trim().is_empty() {
                    yield StreamEvent::Thinking { content: content.clone(), iteration };
                }

                let calls = reply.tool_calls.clone();
                messages.push(WireMessage {
                    role: "assistant".to_string(),
                    content: reply.content,
                    tool_calls: reply.tool_calls,
                    tool_call_id: None,
                });

                for call in calls {
                    let name = call.function.name.clone();
                    let arguments = parse_arguments(&call.function.arguments);
                    yield StreamEvent::ToolPrediction {
                        name: name.clone(),
                        arguments: arguments.clone(),
                    };

                    let output = match manager.call_tool(&name, arguments).await {
                        Ok(result) => {
                            yield StreamEvent::ToolResult {
                                name: name.clone(),
                                result: result.clone(),
                            };
                            result
                        }
                        Err(err) => {
                            let content = format!("Tool `{name}` failed: {err:#}");
                            tracing::warn!(tool = %name, "{content}");
                            yield StreamEvent::Error { content: content.clone() };
                            content
                        }
                    };
                    messages.push(WireMessage::tool_result(call.id, output));
                }
            }

            yield StreamEvent::Error {
                content: format!("Reached the limit of {max_iterations} iterations without a final response"),
            };
            yield StreamEvent::Done;
        };

        Ok(Box::pin(stream))
    }
}
