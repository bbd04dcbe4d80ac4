//! HTTP client for chat-completion endpoints.
//!
//! Two wire flavors are supported: the OpenAI-compatible `/chat/completions`
//! API (OpenAI itself, and most local or hosted gateways) and Anthropic's
//! `/messages` API. Both can stream over server-sent events.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use super::{ChunkSender, Completion, LlmProvider, estimate_tokens};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Which wire protocol the endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Flavor {
    #[default]
    #[value(name = "openai")]
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
}

impl Flavor {
    pub fn default_base_url(self) -> &'static str {
        match self {
            Flavor::OpenAi => "https://api.openai.com/v1",
            Flavor::Anthropic => "https://api.anthropic.com/v1",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Flavor::OpenAi => "gpt-4-turbo",
            Flavor::Anthropic => "claude-sonnet-4-20250514",
        }
    }
}

/// Bounded retries with exponential backoff for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Failure of a single attempt.
enum Failure {
    /// Worth another attempt: rate limit, server error, transport hiccup.
    Transient(anyhow::Error),
    Fatal(anyhow::Error),
}

impl Failure {
    fn from_send(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            Failure::Transient(anyhow!(err).context("Failed to call LLM API"))
        } else {
            Failure::Fatal(anyhow!(err).context("Failed to call LLM API"))
        }
    }
}

/// Chat-completion client.
pub struct LlmClient {
    flavor: Flavor,
    api_key: Option<String>,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    retry: RetryPolicy,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(flavor: Flavor, api_key: Option<String>) -> Self {
        Self {
            flavor,
            api_key,
            base_url: flavor.default_base_url().to_string(),
            model: flavor.default_model().to_string(),
            temperature: 0.7,
            max_tokens: 4096,
            retry: RetryPolicy::default(),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn flavor(&self) -> Flavor {
        self.flavor
    }

    fn request(&self, prompt: &str, system: Option<&str>, stream: bool) -> reqwest::RequestBuilder {
        match self.flavor {
            Flavor::OpenAi => {
                let mut messages = Vec::new();
                if let Some(system) = system {
                    messages.push(ChatMessage {
                        role: "system",
                        content: system,
                    });
                }
                messages.push(ChatMessage {
                    role: "user",
                    content: prompt,
                });
                let body = OpenAiRequest {
                    model: &self.model,
                    messages,
                    temperature: self.temperature,
                    max_tokens: self.max_tokens,
                    stream,
                    stream_options: stream.then_some(StreamOptions {
                        include_usage: true,
                    }),
                };
                let mut builder = self
                    .http
                    .post(format!("{}/chat/completions", self.base_url))
                    .header("content-type", "application/json")
                    .json(&body);
                if let Some(key) = &self.api_key {
                    builder = builder.bearer_auth(key);
                }
                builder
            }
            Flavor::Anthropic => {
                let body = AnthropicRequest {
                    model: &self.model,
                    max_tokens: self.max_tokens,
                    system,
                    messages: vec![ChatMessage {
                        role: "user",
                        content: prompt,
                    }],
                    temperature: self.temperature,
                    stream,
                };
                self.http
                    .post(format!("{}/messages", self.base_url))
                    .header("x-api-key", self.api_key.as_deref().unwrap_or_default())
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .header("content-type", "application/json")
                    .json(&body)
            }
        }
    }

    async fn send(&self, prompt: &str, system: Option<&str>, stream: bool) -> Result<reqwest::Response, Failure> {
        let resp = self
            .request(prompt, system, stream)
            .send()
            .await
            .map_err(Failure::from_send)?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let err = anyhow!("LLM API error {status}: {body}");
        if status.as_u16() == 429 || status.is_server_error() {
            Err(Failure::Transient(err))
        } else {
            Err(Failure::Fatal(err))
        }
    }

    async fn attempt(
        &self,
        prompt: &str,
        system: Option<&str>,
        on_chunk: Option<&ChunkSender>,
    ) -> Result<Completion, Failure> {
        let resp = self.send(prompt, system, on_chunk.is_some()).await?;
        let usage = match on_chunk {
            None => self.read_buffered(resp).await.map_err(Failure::Fatal)?,
            Some(tx) => self.read_stream(resp, tx).await?,
        };

        let prompt_tokens = usage.prompt_tokens.unwrap_or_else(|| {
            estimate_tokens(prompt) + system.map(estimate_tokens).unwrap_or(0)
        });
        let completion_tokens = usage
            .completion_tokens
            .unwrap_or_else(|| estimate_tokens(&usage.text));
        Ok(Completion {
            text: usage.text,
            prompt_tokens,
            completion_tokens,
            model: self.model.clone(),
        })
    }

    async fn read_buffered(&self, resp: reqwest::Response) -> Result<Usage> {
        match self.flavor {
            Flavor::OpenAi => {
                let body: OpenAiResponse = resp
                    .json()
                    .await
                    .context("Failed to parse chat completion response")?;
                let text = body
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .unwrap_or_default();
                Ok(Usage {
                    text,
                    prompt_tokens: body.usage.as_ref().map(|u| u.prompt_tokens),
                    completion_tokens: body.usage.as_ref().map(|u| u.completion_tokens),
                })
            }
            Flavor::Anthropic => {
                let body: AnthropicResponse = resp
                    .json()
                    .await
                    .context("Failed to parse Claude response")?;
                let text = body
                    .content
                    .iter()
                    .filter_map(|b| b.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("");
                Ok(Usage {
                    text,
                    prompt_tokens: body.usage.as_ref().map(|u| u.input_tokens),
                    completion_tokens: body.usage.as_ref().map(|u| u.output_tokens),
                })
            }
        }
    }

    async fn read_stream(&self, resp: reqwest::Response, tx: &ChunkSender) -> Result<Usage, Failure> {
        let mut usage = Usage::default();
        let mut pending: Vec<u8> = Vec::new();
        let mut bytes = resp.bytes_stream();

        while let Some(item) = bytes.next().await {
            let chunk = match item {
                Ok(chunk) => chunk,
                // Once text went out a retry would duplicate it.
                Err(e) if usage.text.is_empty() => return Err(Failure::from_send(e)),
                Err(e) => return Err(Failure::Fatal(anyhow!(e).context("LLM stream interrupted"))),
            };
            pending.extend_from_slice(&chunk);

            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                let Some(data) = line.trim().strip_prefix("data:").map(str::trim) else {
                    continue;
                };
                if data.is_empty() || data == "[DONE]" {
                    continue;
                }
                if let Some(delta) = self.apply_event(data, &mut usage).map_err(Failure::Fatal)? {
                    usage.text.push_str(&delta);
                    // Receiver gone means nobody is watching; keep reading.
                    let _ = tx.send(delta);
                }
            }
        }
        Ok(usage)
    }

    /// Fold one SSE `data:` payload into `usage`, returning any text delta.
    fn apply_event(&self, data: &str, usage: &mut Usage) -> Result<Option<String>> {
        match self.flavor {
            Flavor::OpenAi => {
                let chunk: OpenAiChunk =
                    serde_json::from_str(data).context("Malformed chat completion chunk")?;
                if let Some(u) = chunk.usage {
                    usage.prompt_tokens = Some(u.prompt_tokens);
                    usage.completion_tokens = Some(u.completion_tokens);
                }
                Ok(chunk
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.delta.content)
                    .filter(|t| !t.is_empty()))
            }
            Flavor::Anthropic => {
                let event: AnthropicEvent =
                    serde_json::from_str(data).context("Malformed Claude stream event")?;
                match event {
                    AnthropicEvent::MessageStart { message } => {
                        usage.prompt_tokens = message.usage.map(|u| u.input_tokens);
                        Ok(None)
                    }
                    AnthropicEvent::ContentBlockDelta { delta } => {
                        Ok(delta.text.filter(|t| !t.is_empty()))
                    }
                    AnthropicEvent::MessageDelta { usage: Some(u) } => {
                        usage.completion_tokens = Some(u.output_tokens);
                        Ok(None)
                    }
                    AnthropicEvent::Error { error } => {
                        anyhow::bail!("Claude stream error: {}", error.message)
                    }
                    _ => Ok(None),
                }
            }
        }
    }
}

#[async_trait]
impl LlmProvider for LlmClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn invoke(
        &self,
        prompt: &str,
        system: Option<&str>,
        on_chunk: Option<ChunkSender>,
    ) -> Result<Completion> {
        let mut attempt = 0;
        loop {
            match self.attempt(prompt, system, on_chunk.as_ref()).await {
                Ok(completion) => {
                    tracing::debug!(
                        model = %completion.model,
                        prompt_tokens = completion.prompt_tokens,
                        completion_tokens = completion.completion_tokens,
                        "LLM call finished"
                    );
                    return Ok(completion);
                }
                Err(Failure::Transient(e)) if attempt < self.retry.max_retries => {
                    let delay = self.retry.delay(attempt);
                    attempt += 1;
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "LLM call failed, retrying: {e:#}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(Failure::Transient(e)) | Err(Failure::Fatal(e)) => return Err(e),
            }
        }
    }
}

#[derive(Debug, Default)]
struct Usage {
    text: String,
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Deserialize)]
struct OpenAiChunk {
    #[serde(default)]
    choices: Vec<OpenAiChunkChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChunkChoice {
    #[serde(default)]
    delta: OpenAiDelta,
}

#[derive(Deserialize, Default)]
struct OpenAiDelta {
    content: Option<String>,
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicBlock>,
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    text: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicEvent {
    MessageStart { message: AnthropicStart },
    ContentBlockDelta { delta: AnthropicDelta },
    MessageDelta { usage: Option<AnthropicUsage> },
    Error { error: AnthropicError },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct AnthropicStart {
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct AnthropicDelta {
    text: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicError {
    message: String,
}
