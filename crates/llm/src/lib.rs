//! LLM provider adapters and the failover-composing [`LlmClient`].
//!
//! Each [`Adapter`] maps the shared [`Message`]/[`ToolDefinition`] model onto
//! one provider's wire format. Providers never leak through the trait
//! boundary — callers only ever see [`deskflow_core::LlmError`].

mod anthropic;
mod client;
mod dashscope;
mod openai;

pub use anthropic::AnthropicAdapter;
pub use client::LlmClient;
pub use dashscope::DashscopeAdapter;
pub use openai::OpenAiAdapter;

use async_trait::async_trait;
use deskflow_core::LlmError;
use deskflow_core::models::{Message, StreamChunk, ToolDefinition};
use futures::stream::BoxStream;

/// One provider's chat capability: request/response mapping, streaming,
/// a token estimate, and a cheap liveness probe.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Stable, lowercase provider name used in error messages and the
    /// `health_check` status map.
    fn name(&self) -> &'static str;

    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<Message, LlmError>;

    /// A lazy, finite sequence of text chunks. Tool-call detection is not
    /// streamed — callers that need tool calls use [`Adapter::chat`]
    /// instead; `stream` is for rendering assistant prose incrementally.
    async fn stream(
        &self,
        messages: &[Message],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<BoxStream<'static, StreamChunk>, LlmError>;

    /// `len(content) / 4` heuristic, summed across all messages. Providers
    /// with a real tokenizer endpoint may override; none of the three
    /// shipped adapters do, since the estimate only feeds the Prompt
    /// Assembler's budget walk, not billing.
    async fn count_tokens(&self, messages: &[Message]) -> Result<usize, LlmError> {
        Ok(messages.iter().map(|m| m.content.len() / 4).sum())
    }

    /// Issues a minimal chat call and reports whether it succeeded.
    async fn health_check(&self) -> Result<(), LlmError> {
        let probe = [Message::user("ping")];
        self.chat(&probe, None, 1, 0.0).await.map(|_| ())
    }
}

/// Shared heuristic token estimator, exposed so the Prompt Assembler can
/// use the same function an adapter would fall back to.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / 4
}
