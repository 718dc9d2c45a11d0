//! [`LlmClient`]: one primary [`Adapter`] plus an ordered fallback chain,
//! implementing the failover algorithm.

use std::collections::HashMap;
use std::sync::Arc;

use deskflow_config::{LlmConfig, LlmProvider};
use deskflow_core::LlmError;
use deskflow_core::models::{Message, StreamChunk, ToolDefinition};
use futures::stream::BoxStream;
use tracing::warn;

use crate::{Adapter, AnthropicAdapter, DashscopeAdapter, OpenAiAdapter};

pub struct LlmClient {
    primary: Arc<dyn Adapter>,
    fallbacks: Vec<Arc<dyn Adapter>>,
}

fn build_adapter(provider: LlmProvider, config: &LlmConfig) -> Arc<dyn Adapter> {
    match provider {
        LlmProvider::Anthropic => Arc::new(AnthropicAdapter::new(config.api_key_for(provider), &config.model)),
        LlmProvider::Openai => Arc::new(OpenAiAdapter::new(&config.openai_base_url, config.api_key_for(provider), &config.model)),
        LlmProvider::Dashscope => Arc::new(DashscopeAdapter::new(config.api_key_for(provider), &config.model)),
    }
}

impl LlmClient {
    pub fn new(primary: Arc<dyn Adapter>, fallbacks: Vec<Arc<dyn Adapter>>) -> Self {
        Self { primary, fallbacks }
    }

    /// Builds the primary adapter and fallback chain straight from
    /// [`LlmConfig`], matching `provider` to the concrete adapter and
    /// `fallback_providers` to the ordered fallback list.
    pub fn from_config(config: &LlmConfig) -> Self {
        let primary = build_adapter(config.provider, config);
        let fallbacks = config.fallback_providers.iter().map(|p| build_adapter(*p, config)).collect();
        Self::new(primary, fallbacks)
    }

    fn all_adapters(&self) -> impl Iterator<Item = &Arc<dyn Adapter>> {
        std::iter::once(&self.primary).chain(self.fallbacks.iter())
    }

    /// Tries the primary, then each fallback in order, on a retryable
    /// error. A `ContextOverflow` is returned immediately without trying
    /// further adapters.
    pub async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<Message, LlmError> {
        let mut providers_tried = Vec::new();
        let mut errors = Vec::new();

        for adapter in self.all_adapters() {
            match adapter.chat(messages, tools, max_tokens, temperature).await {
                Ok(message) => return Ok(message),
                Err(err @ LlmError::ContextOverflow { .. }) => return Err(err),
                Err(err) => {
                    warn!(provider = adapter.name(), error = %err, "LLM adapter failed, trying next");
                    providers_tried.push(adapter.name().to_string());
                    errors.push(err.to_string());
                }
            }
        }

        Err(LlmError::AllProvidersFailed { providers: providers_tried, errors })
    }

    /// Same failover order as [`LlmClient::chat`], applied to the act of
    /// establishing a stream rather than to chunks already in flight.
    pub async fn stream(&self, messages: &[Message], max_tokens: u32, temperature: f32) -> Result<BoxStream<'static, StreamChunk>, LlmError> {
        let mut providers_tried = Vec::new();
        let mut errors = Vec::new();

        for adapter in self.all_adapters() {
            match adapter.stream(messages, max_tokens, temperature).await {
                Ok(stream) => return Ok(stream),
                Err(err @ LlmError::ContextOverflow { .. }) => return Err(err),
                Err(err) => {
                    warn!(provider = adapter.name(), error = %err, "LLM adapter failed to stream, trying next");
                    providers_tried.push(adapter.name().to_string());
                    errors.push(err.to_string());
                }
            }
        }

        Err(LlmError::AllProvidersFailed { providers: providers_tried, errors })
    }

    /// Queries every configured adapter in parallel; individual failures
    /// are recorded as `false`, never raised.
    pub async fn health_check(&self) -> HashMap<String, bool> {
        let checks = self.all_adapters().map(|adapter| {
            let name = adapter.name().to_string();
            let adapter = Arc::clone(adapter);
            async move { (name, adapter.health_check().await.is_ok()) }
        });
        futures::future::join_all(checks).await.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubAdapter {
        name: &'static str,
        outcome: fn() -> Result<Message, LlmError>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Adapter for StubAdapter {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn chat(&self, _messages: &[Message], _tools: Option<&[ToolDefinition]>, _max_tokens: u32, _temperature: f32) -> Result<Message, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.outcome)()
        }

        async fn stream(&self, _messages: &[Message], _max_tokens: u32, _temperature: f32) -> Result<BoxStream<'static, StreamChunk>, LlmError> {
            (self.outcome)().map(|m| futures::stream::iter(vec![StreamChunk::Text { content: m.content }]).boxed() as BoxStream<'static, StreamChunk>)
        }
    }

    #[tokio::test]
    async fn primary_success_never_touches_fallback() {
        let primary = Arc::new(StubAdapter { name: "primary", outcome: || Ok(Message::assistant("ok")), calls: AtomicUsize::new(0) });
        let fallback = Arc::new(StubAdapter { name: "fallback", outcome: || Ok(Message::assistant("should not run")), calls: AtomicUsize::new(0) });
        let client = LlmClient::new(primary.clone(), vec![fallback.clone()]);

        let result = client.chat(&[Message::user("hi")], None, 100, 0.5).await.unwrap();
        assert_eq!(result.content, "ok");
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn connection_error_falls_back_to_next_adapter() {
        let primary = Arc::new(StubAdapter { name: "primary", outcome: || Err(LlmError::Connection("down".to_string())), calls: AtomicUsize::new(0) });
        let fallback = Arc::new(StubAdapter { name: "fallback", outcome: || Ok(Message::assistant("from fallback")), calls: AtomicUsize::new(0) });
        let client = LlmClient::new(primary, vec![fallback]);

        let result = client.chat(&[Message::user("hi")], None, 100, 0.5).await.unwrap();
        assert_eq!(result.content, "from fallback");
    }

    #[tokio::test]
    async fn context_overflow_is_not_retried_across_providers() {
        let primary = Arc::new(StubAdapter {
            name: "primary",
            outcome: || Err(LlmError::ContextOverflow { used: 200_000, limit: 100_000 }),
            calls: AtomicUsize::new(0),
        });
        let fallback = Arc::new(StubAdapter { name: "fallback", outcome: || Ok(Message::assistant("should not run")), calls: AtomicUsize::new(0) });
        let client = LlmClient::new(primary, vec![fallback.clone()]);

        let err = client.chat(&[Message::user("hi")], None, 100, 0.5).await.unwrap_err();
        assert!(matches!(err, LlmError::ContextOverflow { .. }));
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn all_providers_failing_raises_all_providers_failed() {
        let primary = Arc::new(StubAdapter { name: "primary", outcome: || Err(LlmError::Connection("down".to_string())), calls: AtomicUsize::new(0) });
        let fallback = Arc::new(StubAdapter { name: "fallback", outcome: || Err(LlmError::RateLimit { retry_after: None }), calls: AtomicUsize::new(0) });
        let client = LlmClient::new(primary, vec![fallback]);

        let err = client.chat(&[Message::user("hi")], None, 100, 0.5).await.unwrap_err();
        match err {
            LlmError::AllProvidersFailed { providers, errors } => {
                assert_eq!(providers, vec!["primary".to_string(), "fallback".to_string()]);
                assert_eq!(errors.len(), 2);
            }
            other => panic!("expected AllProvidersFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn health_check_runs_all_adapters_and_records_failures() {
        let primary = Arc::new(StubAdapter { name: "primary", outcome: || Ok(Message::assistant("ok")), calls: AtomicUsize::new(0) });
        let fallback = Arc::new(StubAdapter { name: "fallback", outcome: || Err(LlmError::Connection("down".to_string())), calls: AtomicUsize::new(0) });
        let client = LlmClient::new(primary, vec![fallback]);

        let statuses = client.health_check().await;
        assert_eq!(statuses.get("primary"), Some(&true));
        assert_eq!(statuses.get("fallback"), Some(&false));
    }
}
