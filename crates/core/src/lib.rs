//! Shared data model, error taxonomy, identity provider and task monitor —
//! the foundations every other crate in the workspace builds on.

pub mod error;
pub mod identity;
pub mod models;
pub mod task_monitor;

pub use error::{ConfigError, ErrorCode, LlmError, MemoryError, ToolError};
pub use identity::{DefaultIdentity, identity_dir_if_present};
pub use models::{
    AgentStatus, Conversation, Message, MemoryEntry, Role, StreamChunk, ToolCall, ToolCallStatus,
    ToolDefinition, ToolResult,
};
pub use task_monitor::TaskMonitor;

/// Structural capability: anything that can produce a system prompt for the
/// Prompt Assembler. Implemented as a trait, never a base class, so the
/// conversation loop can be wired against a test double.
pub trait Identity: Send + Sync {
    fn get_system_prompt(&self) -> &str;
}

impl Identity for DefaultIdentity {
    fn get_system_prompt(&self) -> &str {
        DefaultIdentity::get_system_prompt(self)
    }
}
