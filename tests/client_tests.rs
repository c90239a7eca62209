//! HTTP chat client and tool-calling agent against a mock API.

mod common;

use std::sync::Arc;

use futures_util::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chatterm::agent::ToolCallingAgent;
use chatterm::client::OpenAiClient;
use chatterm::config::RetryPolicy;
use chatterm::llm_client::{ChatClient, ReasoningAgent};
use chatterm::models::{Message, StreamEvent, Tool};

use common::StaticTools;

const COMPLETIONS: &str = "/v1/chat/completions";

fn client(server: &MockServer, model: &str) -> OpenAiClient {
    OpenAiClient::new(server.uri(), Some("test-key".to_string()), model)
        .unwrap()
        .with_retry(RetryPolicy {
            initial_delay: 0.0,
            ..RetryPolicy::default()
        })
}

fn sse(chunks: &[&str]) -> ResponseTemplate {
    let mut body = String::new();
    for chunk in chunks {
        let event = json!({"choices": [{"delta": {"content": chunk}}]});
        body.push_str(&format!("data: {event}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
}

async fn collect(client: &OpenAiClient, history: Vec<Message>) -> Vec<String> {
    client
        .stream_chat(history)
        .await
        .unwrap()
        .map(|chunk| chunk.unwrap())
        .collect()
        .await
}

#[tokio::test]
async fn streams_chat_deltas() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "gpt-test",
            "stream": true,
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "hello"}
            ]
        })))
        .respond_with(sse(&["Hel", "lo", "!"]))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, "gpt-test");
    let chunks = collect(
        &client,
        vec![Message::system("be brief"), Message::user("hello")],
    )
    .await;
    assert_eq!(chunks, vec!["Hel", "lo", "!"]);
}

#[tokio::test]
async fn retries_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS))
        .respond_with(sse(&["ok"]))
        .mount(&server)
        .await;

    let client = client(&server, "gpt-test");
    assert_eq!(collect(&client, vec![Message::user("hi")]).await, vec!["ok"]);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, "gpt-test");
    let err = client
        .stream_chat(vec![Message::user("hi")])
        .await
        .err()
        .unwrap();
    let message = format!("{err:#}");
    assert!(message.contains("HTTP 400"), "{message}");
    assert!(message.contains("bad request"), "{message}");
}

fn list_files() -> Tool {
    Tool {
        name: "list_files".to_string(),
        description: "List files".to_string(),
        input_schema: json!({"type": "object", "properties": {"path": {"type": "string"}}}),
    }
}

fn tool_call_reply() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{
            "message": {
                "role": "assistant",
                "content": "Let me look.",
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "list_files", "arguments": "{\"path\": \".\"}"}
                }]
            },
            "finish_reason": "tool_calls"
        }]
    }))
}

async fn run_agent(server: &MockServer, max_iterations: u32) -> Vec<StreamEvent> {
    let tools = Arc::new(StaticTools(vec![list_files()]));
    let agent = ToolCallingAgent::new(client(server, "agent-test"), "agent-test", tools);
    agent
        .stream_agent(Message::user("list files"), vec![list_files()], max_iterations)
        .await
        .unwrap()
        .map(|event| event.unwrap())
        .collect()
        .await
}

#[tokio::test]
async fn agent_calls_tools_then_answers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS))
        .and(body_string_contains("call_1"))
        .and(body_partial_json(json!({"stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": {"role": "assistant", "content": "Two files."},
                "finish_reason": "stop"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS))
        .and(body_partial_json(json!({
            "tools": [{"type": "function", "function": {"name": "list_files"}}]
        })))
        .respond_with(tool_call_reply())
        .expect(1)
        .mount(&server)
        .await;

    let events = run_agent(&server, 5).await;
    assert_eq!(
        events,
        vec![
            StreamEvent::Thinking {
                content: "Let me look.".to_string(),
                iteration: 1,
            },
            StreamEvent::ToolPrediction {
                name: "list_files".to_string(),
                arguments: json!({"path": "."}),
            },
            StreamEvent::ToolResult {
                name: "list_files".to_string(),
                result: "called list_files".to_string(),
            },
            StreamEvent::FinalText {
                content: "Two files.".to_string(),
            },
            StreamEvent::Done,
        ]
    );
}

#[tokio::test]
async fn agent_reports_exhausted_iterations() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS))
        .respond_with(tool_call_reply())
        .mount(&server)
        .await;

    let events = run_agent(&server, 1).await;
    assert_eq!(events.len(), 5);
    match &events[3] {
        StreamEvent::Error { content } => assert!(content.contains("limit of 1 iterations")),
        other => panic!("expected an error event, got {other:?}"),
    }
    assert_eq!(events[4], StreamEvent::Done);
}
