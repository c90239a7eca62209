//! Chat mode: stream a model reply to the full history.

use std::sync::Arc;

use anyhow::Result;
use futures_util::StreamExt;

use super::user_block;
use crate::core::error_log::FailureOrigin;
use crate::core::events::TaskContext;
use crate::escape::escape;
use crate::llm_client::ChatClient;
use crate::models::Message;

/// Transcript header appended when a chat line is dispatched.
#[must_use]
pub fn header(line: &str) -> String {
    format!("{}\n[green]ASSISTANT:[/green]\n", user_block(line))
}

/// Stream one reply and report it to the session.
pub async fn run(ctx: TaskContext, client: Arc<dyn ChatClient>, history: Vec<Message>) {
    tracing::debug!(task = ctx.id, model = client.model(), turns = history.len(), "Chat started");
    match stream_reply(&ctx, client.as_ref(), history).await {
        Ok(response) => {
            ctx.append("\n").await;
            ctx.record(Message::assistant(response)).await;
        }
        Err(err) => {
            tracing::warn!(task = ctx.id, "Chat stream failed: {err:#}");
            ctx.fail(FailureOrigin::ChatStream, format!("{err:#}")).await;
        }
    }
}

async fn stream_reply(
    ctx: &TaskContext,
    client: &dyn ChatClient,
    history: Vec<Message>,
) -> Result<String> {
    let mut stream = client.stream_chat(history).await?;
    let mut response = String::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        ctx.append_rendered(escape(&chunk)).await;
        ctx.scroll_to_end().await;
        response.push_str(&chunk);
    }
    Ok(response)
}
