//! Alibaba Cloud DashScope, accessed through its OpenAI-compatible endpoint.

use async_trait::async_trait;
use deskflow_core::LlmError;
use deskflow_core::models::{Message, StreamChunk, ToolDefinition};
use futures::stream::BoxStream;

use crate::openai::OpenAiAdapter;
use crate::Adapter;

const COMPATIBLE_MODE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";

/// Delegates entirely to [`OpenAiAdapter`] — DashScope's compatible-mode
/// endpoint accepts the same chat-completions request/response shape.
pub struct DashscopeAdapter {
    inner: OpenAiAdapter,
}

impl DashscopeAdapter {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self { inner: OpenAiAdapter::with_provider_name(COMPATIBLE_MODE_URL, api_key, model, "dashscope") }
    }
}

#[async_trait]
impl Adapter for DashscopeAdapter {
    fn name(&self) -> &'static str {
        "dashscope"
    }

    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<Message, LlmError> {
        self.inner.chat(messages, tools, max_tokens, temperature).await
    }

    async fn stream(&self, messages: &[Message], max_tokens: u32, temperature: f32) -> Result<BoxStream<'static, StreamChunk>, LlmError> {
        self.inner.stream(messages, max_tokens, temperature).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_name_is_dashscope_not_openai() {
        let adapter = DashscopeAdapter::new("key", "qwen-max");
        assert_eq!(adapter.name(), "dashscope");
    }
}
