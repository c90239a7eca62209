//! HTTP client for OpenAI-compatible chat completion APIs.
//!
//! This module centralizes retry behavior, base URLs, and streaming helpers
//! for the network requests made by the chat handler and the agent.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};

use crate::config::{Config, RetryPolicy};
use crate::llm_client::{ChatClient, TextStream};
use crate::logging;
use crate::models::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, Message, WireMessage,
};

/// Client for OpenAI-compatible chat completion requests.
#[derive(Clone)]
#[must_use]
pub struct OpenAiClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    retry: RetryPolicy,
    model: String,
    temperature: Option<f32>,
}

// === OpenAiClient ===

impl OpenAiClient {
    /// Create a client against `base_url` (without the `/v1` suffix).
    ///
    /// Without an API key the client still builds, and every request fails
    /// with a message naming the missing key.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            retry: RetryPolicy::default(),
            model: model.into(),
            temperature: None,
        })
    }

    /// Create a client from the resolved config, pinned to `model`.
    pub fn from_config(config: &Config, model: String) -> Result<Self> {
        let base_url = config.base_url();
        let api_key = config.api_key().ok();
        if api_key.is_none() {
            logging::warn("No API key configured; model requests will fail");
        }
        let retry = config.retry_policy();

        logging::info(format!("API base URL: {base_url}"));
        logging::info(format!(
            "Retry policy: enabled={}, max_retries={}, initial_delay={}s, max_delay={}s",
            retry.enabled, retry.max_retries, retry.initial_delay, retry.max_delay
        ));

        Ok(Self::new(base_url, api_key, model)?
            .with_retry(retry)
            .with_temperature(config.temperature()))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    #[must_use]
    pub fn temperature(&self) -> Option<f32> {
        self.temperature
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .context("Failed to call model: no API key. Set CHATTERM_API_KEY or OPENAI_API_KEY.")
    }

    /// Send a non-streaming completion request.
    pub async fn complete(&self, request: ChatCompletionRequest) -> Result<ChatCompletionResponse> {
        let url = self.completions_url();
        let api_key = self.api_key()?;
        let mut request = request;
        request.stream = false;

        let response = send_with_retry(&self.retry, || {
            self.http_client.post(&url).bearer_auth(api_key).json(&request)
        })
        .await?;
        response
            .json::<ChatCompletionResponse>()
            .await
            .context("Failed to parse chat completion response")
    }

    /// Send a streaming completion request and yield the text deltas.
    pub async fn complete_stream(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<impl Stream<Item = Result<String>> + Send + 'static> {
        let url = self.completions_url();
        let api_key = self.api_key()?;
        let mut request = request;
        request.stream = true;

        let response = send_with_retry(&self.retry, || {
            self.http_client.post(&url).bearer_auth(api_key).json(&request)
        })
        .await?;

        Ok(parse_sse_stream(response.bytes_stream()))
    }
}

// === Retry + Streaming Helpers ===

async fn send_with_retry<F>(policy: &RetryPolicy, mut build: F) -> Result<reqwest::Response>
where
    F: FnMut() -> reqwest::RequestBuilder,
{
    let mut attempt: u32 = 0;

    loop {
        let result = build().send().await;

        match result {
            Ok(response) => {
                if response.status().is_success() {
                    return Ok(response);
                }

                let status = response.status();
                let retryable = status.as_u16() == 429 || status.is_server_error();

                if !policy.enabled || !retryable || attempt >= policy.max_retries {
                    let text = response
                        .text()
                        .await
                        .unwrap_or_else(|e| format!("(failed to read body: {e})"));
                    anyhow::bail!("Failed to send API request: HTTP {status}: {text}");
                }
                tracing::warn!(
                    status = status.as_u16(),
                    attempt = attempt + 1,
                    max_attempts = policy.max_retries + 1,
                    "Retryable API response"
                );
            }
            Err(err) => {
                if !policy.enabled || attempt >= policy.max_retries {
                    return Err(err).context("Failed to send API request");
                }
                tracing::warn!(
                    attempt = attempt + 1,
                    max_attempts = policy.max_retries + 1,
                    "Request error: {err}"
                );
            }
        }

        let delay = policy.delay_for_attempt(attempt);
        attempt += 1;
        tracing::info!("Retrying after {:.2}s", delay.as_secs_f64());
        tokio::time::sleep(delay).await;
    }
}

/// Parse an SSE stream of completion chunks into text deltas.
fn parse_sse_stream(
    stream: impl Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
) -> impl Stream<Item = Result<String>> + Send + 'static {
    async_stream::try_stream! {
        // Raw bytes: a UTF-8 sequence may be split across network reads.
        let mut buffer: Vec<u8> = Vec::new();
        let mut stream = Box::pin(stream);

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Failed to read response stream")?;
            buffer.extend(chunk.iter().copied().filter(|byte| *byte != b'\r'));

            while let Some(pos) = buffer.windows(2).position(|pair| pair == b"\n\n") {
                let event: Vec<u8> = buffer.drain(..pos + 2).collect();
                let block = String::from_utf8_lossy(&event[..pos]);

                for line in block.lines() {
                    let Some(data) = line.strip_prefix("data:").map(str::trim_start) else {
                        continue;
                    };
                    if data == "[DONE]" {
                        return;
                    }
                    match serde_json::from_str::<ChatCompletionChunk>(data) {
                        Ok(chunk) => {
                            for choice in chunk.choices {
                                if let Some(content) = choice.delta.content
                                    && !content.is_empty()
                                {
                                    yield content;
                                }
                            }
                        }
                        Err(err) => {
                            tracing::warn!("Failed to parse SSE event: {err}; raw: {data}");
                        }
                    }
                }
            }
        }
    }
}

// === Trait Implementations ===

#[async_trait]
impl ChatClient for OpenAiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn stream_chat(&self, history: Vec<Message>) -> Result<TextStream> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: history.iter().map(WireMessage::from).collect(),
            tools: None,
            temperature: self.temperature,
            stream: true,
        };
        let stream = self.complete_stream(request).await?;
        Ok(Box::pin(stream))
    }
}
