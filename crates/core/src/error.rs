//! The typed error taxonomy for the runtime core.
//!
//! Every variant carries a stable [`ErrorCode::code`] and a `details` map
//! suitable for structured `tracing` fields, per the error-handling design:
//! errors a component can mitigate locally are handled there (LLM
//! connection failure -> failover, FTS parse failure -> LIKE fallback);
//! everything else surfaces to the Conversation Loop.

use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;

/// Uniform access to a stable error code and structured details, independent
/// of which concrete error enum is in play.
pub trait ErrorCode {
    fn code(&self) -> &'static str;
    fn details(&self) -> HashMap<String, Value>;
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("memory storage error: {0}")]
    Storage(String),
    #[error("memory retrieval error: {0}")]
    Retrieval(String),
}

impl ErrorCode for MemoryError {
    fn code(&self) -> &'static str {
        match self {
            MemoryError::Storage(_) => "memory.storage",
            MemoryError::Retrieval(_) => "memory.retrieval",
        }
    }

    fn details(&self) -> HashMap<String, Value> {
        let mut d = HashMap::new();
        d.insert("message".to_string(), Value::String(self.to_string()));
        d
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),
    #[error("tool '{name}' timed out after {timeout_secs}s")]
    Timeout { name: String, timeout_secs: f64 },
    #[error("tool '{name}' execution failed: {message}")]
    Execution { name: String, message: String },
    #[error("tool '{name}' blocked by safety policy: {reason}")]
    Security { name: String, reason: String },
    #[error("tool '{0}' is already registered")]
    AlreadyRegistered(String),
}

impl ErrorCode for ToolError {
    fn code(&self) -> &'static str {
        match self {
            ToolError::NotFound(_) => "tool.not_found",
            ToolError::Timeout { .. } => "tool.timeout",
            ToolError::Execution { .. } => "tool.execution",
            ToolError::Security { .. } => "tool.security",
            ToolError::AlreadyRegistered(_) => "tool.already_registered",
        }
    }

    fn details(&self) -> HashMap<String, Value> {
        let mut d = HashMap::new();
        match self {
            ToolError::NotFound(name) | ToolError::AlreadyRegistered(name) => {
                d.insert("name".to_string(), Value::String(name.clone()));
            }
            ToolError::Timeout { name, timeout_secs } => {
                d.insert("name".to_string(), Value::String(name.clone()));
                d.insert(
                    "timeout_secs".to_string(),
                    serde_json::json!(timeout_secs),
                );
            }
            ToolError::Execution { name, message } => {
                d.insert("name".to_string(), Value::String(name.clone()));
                d.insert("message".to_string(), Value::String(message.clone()));
            }
            ToolError::Security { name, reason } => {
                d.insert("name".to_string(), Value::String(name.clone()));
                d.insert("reason".to_string(), Value::String(reason.clone()));
            }
        }
        d
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM connection error: {0}")]
    Connection(String),
    #[error("LLM rate limited{}", retry_after_suffix(*retry_after))]
    RateLimit { retry_after: Option<f64> },
    #[error("LLM context overflow: used {used} tokens, limit {limit}")]
    ContextOverflow { used: usize, limit: usize },
    #[error("LLM returned a malformed response: {0}")]
    Response(String),
    #[error("all LLM providers failed: {providers:?}")]
    AllProvidersFailed {
        providers: Vec<String>,
        errors: Vec<String>,
    },
}

fn retry_after_suffix(retry_after: Option<f64>) -> String {
    match retry_after {
        Some(secs) => format!(", retry after {secs}s"),
        None => String::new(),
    }
}

impl LlmError {
    /// Whether a Client should try the next adapter in the fallback chain.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Connection(_) | LlmError::RateLimit { .. } | LlmError::Response(_)
        )
    }
}

impl ErrorCode for LlmError {
    fn code(&self) -> &'static str {
        match self {
            LlmError::Connection(_) => "llm.connection",
            LlmError::RateLimit { .. } => "llm.rate_limit",
            LlmError::ContextOverflow { .. } => "llm.context_overflow",
            LlmError::Response(_) => "llm.response",
            LlmError::AllProvidersFailed { .. } => "llm.all_providers_failed",
        }
    }

    fn details(&self) -> HashMap<String, Value> {
        let mut d = HashMap::new();
        match self {
            LlmError::Connection(msg) | LlmError::Response(msg) => {
                d.insert("message".to_string(), Value::String(msg.clone()));
            }
            LlmError::RateLimit { retry_after } => {
                d.insert("retry_after".to_string(), serde_json::json!(retry_after));
            }
            LlmError::ContextOverflow { used, limit } => {
                d.insert("used".to_string(), serde_json::json!(used));
                d.insert("limit".to_string(), serde_json::json!(limit));
            }
            LlmError::AllProvidersFailed { providers, errors } => {
                d.insert("providers".to_string(), serde_json::json!(providers));
                d.insert("errors".to_string(), serde_json::json!(errors));
            }
        }
        d
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    Missing(String),
    #[error("invalid configuration value for '{field}': {message}")]
    Invalid { field: String, message: String },
}

impl ErrorCode for ConfigError {
    fn code(&self) -> &'static str {
        match self {
            ConfigError::Missing(_) => "config.missing",
            ConfigError::Invalid { .. } => "config.invalid",
        }
    }

    fn details(&self) -> HashMap<String, Value> {
        let mut d = HashMap::new();
        match self {
            ConfigError::Missing(field) => {
                d.insert("field".to_string(), Value::String(field.clone()));
            }
            ConfigError::Invalid { field, message } => {
                d.insert("field".to_string(), Value::String(field.clone()));
                d.insert("message".to_string(), Value::String(message.clone()));
            }
        }
        d
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_error_retryability_matches_spec() {
        assert!(LlmError::Connection("down".into()).is_retryable());
        assert!(LlmError::RateLimit { retry_after: None }.is_retryable());
        assert!(LlmError::Response("bad json".into()).is_retryable());
        assert!(!LlmError::ContextOverflow { used: 10, limit: 5 }.is_retryable());
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(ToolError::NotFound("x".into()).code(), "tool.not_found");
        assert_eq!(MemoryError::Storage("x".into()).code(), "memory.storage");
    }
}
