//! LLM capability used by actions.
//!
//! [`LlmProvider`] is the only seam the engine sees. [`LlmClient`] talks to
//! OpenAI-compatible and Anthropic endpoints; [`ScriptedLlm`] replays canned
//! responses for offline runs and tests.

mod client;
mod scripted;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use client::{Flavor, LlmClient, RetryPolicy};
pub use scripted::ScriptedLlm;

/// Receives text increments while a streaming call is in flight.
pub type ChunkSender = mpsc::UnboundedSender<String>;

/// Result of one LLM call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub model: String,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Model name used for pricing.
    fn model(&self) -> &str;

    /// Run one completion. With `on_chunk`, increments are sent as they
    /// arrive and the full text is still returned.
    async fn invoke(
        &self,
        prompt: &str,
        system: Option<&str>,
        on_chunk: Option<ChunkSender>,
    ) -> anyhow::Result<Completion>;
}

/// Rough token count for providers that don't report usage: 1.3 per word.
pub fn estimate_tokens(text: &str) -> u64 {
    let words = text.split_whitespace().count() as f64;
    (words * 1.3).ceil() as u64
}
