//! Tracks agent activity, token/tool-call counters, and busy/idle state.
//!
//! A single `Mutex`-guarded struct, per the concurrency discipline of
//! "integer updates under a single monitor lock; the activity ring buffer
//! trims to its cap under the same lock."

use std::sync::Mutex;
use std::time::Instant;

use serde_json::Value;

use crate::models::AgentStatus;

const MAX_ACTIVITY_LOG: usize = 1000;

#[derive(Debug, Clone)]
pub struct ActivityEntry {
    pub kind: String,
    pub fields: Vec<(String, Value)>,
    pub at: chrono::DateTime<chrono::Utc>,
}

struct Inner {
    started_at: Instant,
    total_conversations: u64,
    total_tool_calls: u64,
    total_tokens_used: u64,
    is_busy: bool,
    current_task: Option<String>,
    activity_log: Vec<ActivityEntry>,
}

/// Tracks agent tasks, performance metrics, and status.
pub struct TaskMonitor {
    inner: Mutex<Inner>,
}

impl Default for TaskMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskMonitor {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                started_at: Instant::now(),
                total_conversations: 0,
                total_tool_calls: 0,
                total_tokens_used: 0,
                is_busy: false,
                current_task: None,
                activity_log: Vec::new(),
            }),
        }
    }

    pub fn record_conversation(&self) {
        let mut inner = self.inner.lock().expect("task monitor lock poisoned");
        inner.total_conversations += 1;
    }

    pub fn record_tool_call(&self, tool_name: &str, duration_ms: f64, success: bool) {
        let mut inner = self.inner.lock().expect("task monitor lock poisoned");
        inner.total_tool_calls += 1;
        Self::push_activity(
            &mut inner,
            ActivityEntry {
                kind: "tool_call".to_string(),
                fields: vec![
                    ("tool_name".to_string(), Value::String(tool_name.to_string())),
                    ("duration_ms".to_string(), serde_json::json!(duration_ms)),
                    ("success".to_string(), Value::Bool(success)),
                ],
                at: chrono::Utc::now(),
            },
        );
    }

    pub fn record_tokens(&self, input_tokens: u64, output_tokens: u64) {
        let mut inner = self.inner.lock().expect("task monitor lock poisoned");
        inner.total_tokens_used += input_tokens + output_tokens;
        Self::push_activity(
            &mut inner,
            ActivityEntry {
                kind: "llm_call".to_string(),
                fields: vec![
                    ("input_tokens".to_string(), serde_json::json!(input_tokens)),
                    ("output_tokens".to_string(), serde_json::json!(output_tokens)),
                ],
                at: chrono::Utc::now(),
            },
        );
    }

    pub fn set_busy(&self, task: impl Into<String>) {
        let mut inner = self.inner.lock().expect("task monitor lock poisoned");
        inner.is_busy = true;
        inner.current_task = Some(task.into());
    }

    pub fn set_idle(&self) {
        let mut inner = self.inner.lock().expect("task monitor lock poisoned");
        inner.is_busy = false;
        inner.current_task = None;
    }

    pub fn get_status(
        &self,
        memory_count: usize,
        active_tools: usize,
        available_tools: usize,
        llm_provider: impl Into<String>,
        llm_model: impl Into<String>,
    ) -> AgentStatus {
        let inner = self.inner.lock().expect("task monitor lock poisoned");
        AgentStatus {
            is_online: true,
            is_busy: inner.is_busy,
            current_task: inner.current_task.clone(),
            uptime_seconds: inner.started_at.elapsed().as_secs_f64(),
            total_conversations: inner.total_conversations,
            total_tool_calls: inner.total_tool_calls,
            total_tokens_used: inner.total_tokens_used,
            memory_count,
            active_tools,
            available_tools,
            llm_provider: llm_provider.into(),
            llm_model: llm_model.into(),
        }
    }

    pub fn recent_activity(&self, limit: usize) -> Vec<ActivityEntry> {
        let inner = self.inner.lock().expect("task monitor lock poisoned");
        let len = inner.activity_log.len();
        let start = len.saturating_sub(limit);
        inner.activity_log[start..].to_vec()
    }

    fn push_activity(inner: &mut Inner, entry: ActivityEntry) {
        inner.activity_log.push(entry);
        if inner.activity_log.len() > MAX_ACTIVITY_LOG {
            let overflow = inner.activity_log.len() - MAX_ACTIVITY_LOG;
            inner.activity_log.drain(..overflow);
        }
    }
}
