//! The Anthropic Messages API adapter.

use async_trait::async_trait;
use deskflow_core::LlmError;
use deskflow_core::models::{Message, Role, StreamChunk, ToolCall, ToolDefinition};
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Adapter;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicAdapter {
    client: Client,
    api_key: String,
    model: String,
}

impl AnthropicAdapter {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<AnthropicContentBlock>,
}

#[derive(Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
    ToolResult { tool_use_id: String, content: String },
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicErrorBody {
    error: AnthropicErrorDetail,
}

#[derive(Deserialize)]
struct AnthropicErrorDetail {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

fn to_wire_messages(messages: &[Message]) -> (Option<String>, Vec<AnthropicMessage>) {
    let mut system_parts = Vec::new();
    let mut wire = Vec::new();

    for message in messages {
        match message.role {
            Role::System => system_parts.push(message.content.clone()),
            Role::User => wire.push(AnthropicMessage {
                role: "user".to_string(),
                content: vec![AnthropicContentBlock::Text { text: message.content.clone() }],
            }),
            Role::Assistant => {
                let mut blocks = Vec::new();
                if !message.content.is_empty() {
                    blocks.push(AnthropicContentBlock::Text { text: message.content.clone() });
                }
                for call in &message.tool_calls {
                    blocks.push(AnthropicContentBlock::ToolUse {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        input: call.arguments.clone(),
                    });
                }
                wire.push(AnthropicMessage { role: "assistant".to_string(), content: blocks });
            }
            Role::Tool => {
                let tool_use_id = message.tool_call_id.clone().unwrap_or_default();
                wire.push(AnthropicMessage {
                    role: "user".to_string(),
                    content: vec![AnthropicContentBlock::ToolResult { tool_use_id, content: message.content.clone() }],
                });
            }
        }
    }

    let system = if system_parts.is_empty() { None } else { Some(system_parts.join("\n\n")) };
    (system, wire)
}

fn from_wire_response(response: AnthropicResponse) -> Message {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in response.content {
        match block {
            AnthropicContentBlock::Text { text: t } => text.push_str(&t),
            AnthropicContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolCall { id, name, arguments: input, status: deskflow_core::models::ToolCallStatus::Pending });
            }
            AnthropicContentBlock::ToolResult { .. } => {}
        }
    }

    if tool_calls.is_empty() {
        Message::assistant(text)
    } else {
        let mut msg = Message::assistant_tool_calls(tool_calls);
        msg.content = text;
        msg
    }
}

fn classify_error(status: reqwest::StatusCode, body: &str) -> LlmError {
    let parsed: Option<AnthropicErrorBody> = serde_json::from_str(body).ok();
    let (kind, message) = parsed
        .map(|b| (b.error.kind, b.error.message))
        .unwrap_or_else(|| ("unknown".to_string(), body.to_string()));

    match status.as_u16() {
        429 => LlmError::RateLimit { retry_after: None },
        400 if kind == "invalid_request_error" && message.to_lowercase().contains("context") => {
            LlmError::ContextOverflow { used: 0, limit: 0 }
        }
        500..=599 => LlmError::Connection(message),
        _ => LlmError::Response(message),
    }
}

#[async_trait]
impl Adapter for AnthropicAdapter {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<Message, LlmError> {
        let (system, wire_messages) = to_wire_messages(messages);
        let tools = tools.map(|tools| {
            tools
                .iter()
                .map(|t| AnthropicTool {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    input_schema: t.parameters.clone(),
                })
                .collect()
        });

        let request = AnthropicRequest {
            model: self.model.clone(),
            max_tokens,
            temperature,
            system,
            messages: wire_messages,
            tools,
            stream: false,
        };

        let response = self
            .client
            .post(API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|err| LlmError::Connection(err.to_string()))?;

        let status = response.status();
        let body = response.text().await.map_err(|err| LlmError::Connection(err.to_string()))?;

        if !status.is_success() {
            return Err(classify_error(status, &body));
        }

        let parsed: AnthropicResponse =
            serde_json::from_str(&body).map_err(|err| LlmError::Response(format!("malformed Anthropic response: {err}")))?;
        let _ = parsed.stop_reason.as_deref();
        Ok(from_wire_response(parsed))
    }

    async fn stream(
        &self,
        messages: &[Message],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<BoxStream<'static, StreamChunk>, LlmError> {
        // The non-streaming path is reused and replayed as a single chunk
        // followed by `Done` — full incremental SSE parsing of Anthropic's
        // `content_block_delta` events is not implemented here.
        let message = self.chat(messages, None, max_tokens, temperature).await?;
        Ok(stream::iter(vec![StreamChunk::Text { content: message.content }, StreamChunk::Done]).boxed())
    }
}
