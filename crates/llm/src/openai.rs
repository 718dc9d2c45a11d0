//! The OpenAI-compatible chat-completions adapter. Also backs
//! [`crate::DashscopeAdapter`], whose endpoint speaks the same wire format.

use async_trait::async_trait;
use deskflow_core::LlmError;
use deskflow_core::models::{Message, Role, StreamChunk, ToolCall, ToolCallStatus, ToolDefinition};
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Adapter;

pub struct OpenAiAdapter {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    provider_name: &'static str,
}

impl OpenAiAdapter {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_provider_name(base_url, api_key, model, "openai")
    }

    pub(crate) fn with_provider_name(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        provider_name: &'static str,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            provider_name,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
}

#[derive(Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction,
}

#[derive(Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Serialize, Deserialize, Clone)]
struct WireMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize, Deserialize, Clone)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    function: WireToolCallFunction,
}

#[derive(Serialize, Deserialize, Clone)]
struct WireToolCallFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

fn to_wire_messages(messages: &[Message]) -> Vec<WireMessage> {
    messages
        .iter()
        .map(|m| match m.role {
            Role::System => WireMessage { role: "system".to_string(), content: Some(m.content.clone()), tool_calls: vec![], tool_call_id: None },
            Role::User => WireMessage { role: "user".to_string(), content: Some(m.content.clone()), tool_calls: vec![], tool_call_id: None },
            Role::Assistant if !m.tool_calls.is_empty() => WireMessage {
                role: "assistant".to_string(),
                content: if m.content.is_empty() { None } else { Some(m.content.clone()) },
                tool_calls: m
                    .tool_calls
                    .iter()
                    .map(|c| WireToolCall {
                        id: c.id.clone(),
                        function: WireToolCallFunction { name: c.name.clone(), arguments: c.arguments.to_string() },
                    })
                    .collect(),
                tool_call_id: None,
            },
            Role::Assistant => WireMessage { role: "assistant".to_string(), content: Some(m.content.clone()), tool_calls: vec![], tool_call_id: None },
            Role::Tool => WireMessage {
                role: "tool".to_string(),
                content: Some(m.content.clone()),
                tool_calls: vec![],
                tool_call_id: m.tool_call_id.clone(),
            },
        })
        .collect()
}

fn from_wire_message(wire: WireMessage) -> Message {
    if wire.tool_calls.is_empty() {
        return Message::assistant(wire.content.unwrap_or_default());
    }
    let tool_calls = wire
        .tool_calls
        .into_iter()
        .map(|c| {
            let arguments = serde_json::from_str(&c.function.arguments).unwrap_or(Value::Null);
            ToolCall { id: c.id, name: c.function.name, arguments, status: ToolCallStatus::Pending }
        })
        .collect();
    let mut msg = Message::assistant_tool_calls(tool_calls);
    msg.content = wire.content.unwrap_or_default();
    msg
}

fn classify_error(status: reqwest::StatusCode, body: &str) -> LlmError {
    let parsed: Option<ErrorBody> = serde_json::from_str(body).ok();
    let message = parsed.as_ref().map(|b| b.error.message.clone()).unwrap_or_else(|| body.to_string());
    let code = parsed.and_then(|b| b.error.code);

    match status.as_u16() {
        429 => LlmError::RateLimit { retry_after: None },
        400 if code.as_deref() == Some("context_length_exceeded") => LlmError::ContextOverflow { used: 0, limit: 0 },
        500..=599 => LlmError::Connection(message),
        _ => LlmError::Response(message),
    }
}

#[async_trait]
impl Adapter for OpenAiAdapter {
    fn name(&self) -> &'static str {
        self.provider_name
    }

    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<Message, LlmError> {
        let tools = tools.map(|tools| {
            tools
                .iter()
                .map(|t| WireTool {
                    kind: "function",
                    function: WireFunction { name: t.name.clone(), description: t.description.clone(), parameters: t.parameters.clone() },
                })
                .collect()
        });

        let request = ChatRequest { model: self.model.clone(), messages: to_wire_messages(messages), max_tokens, temperature, tools };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|err| LlmError::Connection(err.to_string()))?;

        let status = response.status();
        let body = response.text().await.map_err(|err| LlmError::Connection(err.to_string()))?;

        if !status.is_success() {
            return Err(classify_error(status, &body));
        }

        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|err| LlmError::Response(format!("malformed response: {err}")))?;
        let choice = parsed.choices.into_iter().next().ok_or_else(|| LlmError::Response("empty choices array".to_string()))?;
        Ok(from_wire_message(choice.message))
    }

    async fn stream(&self, messages: &[Message], max_tokens: u32, temperature: f32) -> Result<BoxStream<'static, StreamChunk>, LlmError> {
        let message = self.chat(messages, None, max_tokens, temperature).await?;
        Ok(stream::iter(vec![StreamChunk::Text { content: message.content }, StreamChunk::Done]).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn wire_messages_round_trip_system_and_user() {
        let messages = vec![Message::system("be terse"), Message::user("hi")];
        let wire = to_wire_messages(&messages);
        assert_eq!(wire[0].role, "system");
        assert_eq!(wire[1].role, "user");
    }

    #[test]
    fn assistant_with_tool_calls_serializes_arguments_as_json_string() {
        let call = ToolCall::new("shell", serde_json::json!({"command": "ls"}));
        let messages = vec![Message::assistant_tool_calls(vec![call])];
        let wire = to_wire_messages(&messages);
        assert_eq!(wire[0].tool_calls.len(), 1);
        assert!(wire[0].tool_calls[0].function.arguments.contains("command"));
    }

    #[test]
    fn response_with_no_tool_calls_is_plain_text() {
        let wire = WireMessage { role: "assistant".to_string(), content: Some("hi".to_string()), tool_calls: vec![], tool_call_id: None };
        let message = from_wire_message(wire);
        assert_eq!(message.content, "hi");
        assert!(message.tool_calls.is_empty());
    }

    #[test]
    fn response_with_tool_calls_parses_arguments_back_to_json() {
        let wire = WireMessage {
            role: "assistant".to_string(),
            content: None,
            tool_calls: vec![WireToolCall {
                id: "call_1".to_string(),
                function: WireToolCallFunction { name: "shell".to_string(), arguments: r#"{"command":"ls"}"#.to_string() },
            }],
            tool_call_id: None,
        };
        let message = from_wire_message(wire);
        assert_eq!(message.tool_calls[0].arguments["command"], "ls");
    }

    #[tokio::test]
    async fn chat_against_mock_server_round_trips_a_plain_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "hello there"}}]
            })))
            .mount(&server)
            .await;

        let adapter = OpenAiAdapter::new(server.uri(), "test-key", "gpt-4o");
        let response = adapter.chat(&[Message::user("hi")], None, 100, 0.5).await.unwrap();
        assert_eq!(response.content, "hello there");
    }

    #[tokio::test]
    async fn rate_limit_response_maps_to_llm_rate_limit_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": {"message": "rate limited"}
            })))
            .mount(&server)
            .await;

        let adapter = OpenAiAdapter::new(server.uri(), "test-key", "gpt-4o");
        let err = adapter.chat(&[Message::user("hi")], None, 100, 0.5).await.unwrap_err();
        assert!(matches!(err, LlmError::RateLimit { .. }));
    }

    #[tokio::test]
    async fn server_error_maps_to_connection_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
            .mount(&server)
            .await;

        let adapter = OpenAiAdapter::new(server.uri(), "test-key", "gpt-4o");
        let err = adapter.chat(&[Message::user("hi")], None, 100, 0.5).await.unwrap_err();
        assert!(matches!(err, LlmError::Connection(_)));
    }
}
