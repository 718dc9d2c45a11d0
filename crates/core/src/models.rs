//! The shared data model: messages, tool calls, conversations, memory
//! entries and the handful of snapshot types used for monitoring.
//!
//! These are plain value types — no behavior lives here beyond small
//! invariant-preserving constructors and accessors.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Message role in a conversation. Closed variant set — never an open string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Status of a single tool call as it moves through the tool loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
}

/// A request, emitted by the model, to invoke a named tool.
///
/// `arguments` is schema-free at this layer; the tool itself validates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default = "new_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
    #[serde(default = "default_tool_call_status")]
    pub status: ToolCallStatus,
}

fn default_tool_call_status() -> ToolCallStatus {
    ToolCallStatus::Pending
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            arguments,
            status: ToolCallStatus::Pending,
        }
    }
}

/// Result of executing one [`ToolCall`].
///
/// Invariant: `success` true implies `error` is `None`; `success` false
/// implies `error` is `Some` or `output` itself carries a diagnostic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub tool_name: String,
    pub success: bool,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub duration_ms: f64,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ToolResult {
    pub fn ok(tool_call_id: impl Into<String>, tool_name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            success: true,
            output: output.into(),
            error: None,
            duration_ms: 0.0,
            metadata: HashMap::new(),
        }
    }

    pub fn err(tool_call_id: impl Into<String>, tool_name: impl Into<String>, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            success: false,
            output: String::new(),
            error: Some(error),
            duration_ms: 0.0,
            metadata: HashMap::new(),
        }
    }
}

/// A single turn in a [`Conversation`].
///
/// Invariant: `role == Role::Tool` implies `tool_call_id` is `Some` and
/// references a prior assistant `tool_calls` entry in the same conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(default = "new_id")]
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::new(Role::Assistant, String::new())
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(Role::Tool, content)
        }
    }

    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            metadata: HashMap::new(),
        }
    }

    /// An assistant message carrying unresolved tool calls (a "partial turn").
    pub fn is_partial_tool_turn(&self) -> bool {
        self.role == Role::Assistant && !self.tool_calls.is_empty()
    }
}

/// An append-only ordered sequence of messages sharing an id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(default = "new_id")]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Conversation {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: None,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            metadata: HashMap::new(),
        }
    }

    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
        self.updated_at = Utc::now();
    }
}

/// A durable fact or observation indexed for later retrieval.
///
/// Invariants: `importance` is clamped to `[0,1]`; `last_accessed >=
/// created_at`; `access_count` is monotonically non-decreasing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    #[serde(default = "new_id")]
    pub id: String,
    pub content: String,
    #[serde(default = "default_memory_type")]
    pub memory_type: String,
    #[serde(default = "default_importance")]
    pub importance: f32,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub source_conversation_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub last_accessed: DateTime<Utc>,
    #[serde(default)]
    pub access_count: u64,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

fn default_memory_type() -> String {
    "episodic".to_string()
}

fn default_importance() -> f32 {
    0.5
}

impl MemoryEntry {
    pub fn new(content: impl Into<String>, memory_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            content: content.into(),
            memory_type: memory_type.into(),
            importance: default_importance(),
            embedding: None,
            tags: Vec::new(),
            source_conversation_id: None,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            metadata: HashMap::new(),
        }
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = importance.clamp(0.0, 1.0);
        self
    }

    pub fn touch(&mut self) {
        self.last_accessed = Utc::now();
        self.access_count += 1;
    }
}

/// Definition of a tool exposed to the model for function calling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub required_params: Vec<String>,
}

/// One chunk of a streamed response. A tagged variant, never a
/// subclass hierarchy — exhaustive matching stays compile-time checked.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    Text { content: String },
    ToolStart { tool_call: ToolCall },
    ToolEnd { tool_result: ToolResult },
    Error { content: String },
    Done,
}

/// Monitoring snapshot produced by the Task Monitor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentStatus {
    pub is_online: bool,
    pub is_busy: bool,
    pub current_task: Option<String>,
    pub uptime_seconds: f64,
    pub total_conversations: u64,
    pub total_tool_calls: u64,
    pub total_tokens_used: u64,
    pub memory_count: usize,
    pub active_tools: usize,
    pub available_tools: usize,
    pub llm_provider: String,
    pub llm_model: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_tool_result_sets_tool_call_id() {
        let msg = Message::tool_result("call_1", "output text");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn assistant_tool_calls_marks_partial_turn() {
        let msg = Message::assistant_tool_calls(vec![ToolCall::new("shell", serde_json::json!({}))]);
        assert!(msg.is_partial_tool_turn());
        let plain = Message::assistant("done");
        assert!(!plain.is_partial_tool_turn());
    }

    #[test]
    fn memory_entry_importance_is_clamped() {
        let entry = MemoryEntry::new("x", "episodic").with_importance(5.0);
        assert_eq!(entry.importance, 1.0);
        let entry = MemoryEntry::new("x", "episodic").with_importance(-5.0);
        assert_eq!(entry.importance, 0.0);
    }

    #[test]
    fn conversation_add_message_refreshes_updated_at() {
        let mut convo = Conversation::new("c1");
        let before = convo.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(5));
        convo.add_message(Message::user("hi"));
        assert!(convo.updated_at >= before);
        assert_eq!(convo.messages.len(), 1);
    }

    #[test]
    fn memory_entry_touch_increments_access_count() {
        let mut entry = MemoryEntry::new("x", "episodic");
        entry.touch();
        entry.touch();
        assert_eq!(entry.access_count, 2);
        assert!(entry.last_accessed >= entry.created_at);
    }
}
