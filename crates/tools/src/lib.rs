//! The Tool capability and Tool Registry.
//!
//! A [`Tool`] is a named, schema-described capability executed locally on
//! the host. It never raises to its caller — every outcome, success or
//! failure, is reported as a [`ToolResult`]. The [`ToolRegistry`] maps
//! names to tools and runs invocations under a per-call timeout, converting
//! registry-level failures (not found, timeout, a tool task panicking) into
//! the [`ToolError`] taxonomy.

pub mod builtins;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use deskflow_core::ToolError;
use deskflow_core::models::{ToolDefinition, ToolResult};
use tokio::sync::RwLock;
use tracing::warn;

/// Structural capability: anything the conversation loop can invoke by
/// name. Implemented as a trait, never a base class, so tests can supply a
/// double without touching the registry.
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    /// Run the tool. MUST NOT panic on ordinary failure conditions — report
    /// them via `ToolResult::err`. Bugs that do escape as a panic are
    /// caught by the registry, which runs every call on its own task.
    async fn execute(&self, tool_call_id: &str, args: serde_json::Value) -> ToolResult;
}

/// Name → [`Tool`] mapping. Registration happens at startup; concurrent
/// registration during a run is permitted but not required to be
/// lock-free — an `RwLock` guards the map per the concurrency model's
/// "single writer during startup, readers-writer lock otherwise" rule.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    default_timeout: Duration,
}

impl ToolRegistry {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            default_timeout,
        }
    }

    /// Fails if `name` is already present.
    pub async fn register(&self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.definition().name;
        let mut tools = self.tools.write().await;
        if tools.contains_key(&name) {
            return Err(ToolError::AlreadyRegistered(name));
        }
        tools.insert(name, tool);
        Ok(())
    }

    /// Drops a registration. Returns `true` iff one was present. Not part
    /// of the core spec surface, but needed to keep `list_tools().len()`
    /// meaning "successful registrations minus unregistrations" testable.
    pub async fn unregister(&self, name: &str) -> bool {
        self.tools.write().await.remove(name).is_some()
    }

    pub async fn get_tool(&self, name: &str) -> Result<Arc<dyn Tool>, ToolError> {
        self.tools
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }

    pub async fn list_tools(&self) -> Vec<ToolDefinition> {
        self.tools.read().await.values().map(|t| t.definition()).collect()
    }

    /// Invoke `name` under `timeout` (registry default when `None`).
    ///
    /// - `ToolNotFoundError` propagates straight through.
    /// - A timeout aborts the in-flight task and raises `ToolTimeoutError`.
    /// - A panic inside the tool is caught (each call runs on its own task)
    ///   and wrapped as `ToolExecutionError`.
    /// - `success: false` inside a normally-returned `ToolResult` is NOT
    ///   converted into an error — only registry-level failures are.
    pub async fn execute(
        &self,
        tool_call_id: &str,
        name: &str,
        args: serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<ToolResult, ToolError> {
        let tool = self.get_tool(name).await?;
        let timeout = timeout.unwrap_or(self.default_timeout);
        let tool_call_id = tool_call_id.to_string();
        let name_owned = name.to_string();

        let start = Instant::now();
        let mut handle = tokio::spawn(async move { tool.execute(&tool_call_id, args).await });

        tokio::select! {
            joined = &mut handle => {
                match joined {
                    Ok(mut result) => {
                        result.duration_ms = start.elapsed().as_secs_f64() * 1000.0;
                        Ok(result)
                    }
                    Err(join_err) => {
                        warn!(tool = %name_owned, error = %join_err, "tool task panicked");
                        Err(ToolError::Execution { name: name_owned, message: join_err.to_string() })
                    }
                }
            }
            _ = tokio::time::sleep(timeout) => {
                handle.abort();
                Err(ToolError::Timeout { name: name_owned, timeout_secs: timeout.as_secs_f64() })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "echo".to_string(),
                description: "echoes its input".to_string(),
                parameters: serde_json::json!({"type": "object"}),
                required_params: vec![],
            }
        }

        async fn execute(&self, tool_call_id: &str, args: serde_json::Value) -> ToolResult {
            ToolResult::ok(tool_call_id, "echo", args.to_string())
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "slow".to_string(),
                description: "sleeps longer than any sane timeout".to_string(),
                parameters: serde_json::json!({}),
                required_params: vec![],
            }
        }

        async fn execute(&self, tool_call_id: &str, _args: serde_json::Value) -> ToolResult {
            tokio::time::sleep(Duration::from_secs(5)).await;
            ToolResult::ok(tool_call_id, "slow", "done")
        }
    }

    struct PanicTool;

    #[async_trait]
    impl Tool for PanicTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "panic".to_string(),
                description: "panics".to_string(),
                parameters: serde_json::json!({}),
                required_params: vec![],
            }
        }

        async fn execute(&self, _tool_call_id: &str, _args: serde_json::Value) -> ToolResult {
            panic!("boom");
        }
    }

    #[tokio::test]
    async fn register_then_execute_round_trips() {
        let registry = ToolRegistry::new(Duration::from_secs(5));
        registry.register(Arc::new(EchoTool)).await.unwrap();

        let result = registry
            .execute("call_1", "echo", serde_json::json!({"x": 1}), None)
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.output.contains('1'));
    }

    #[tokio::test]
    async fn duplicate_registration_fails() {
        let registry = ToolRegistry::new(Duration::from_secs(5));
        registry.register(Arc::new(EchoTool)).await.unwrap();
        let err = registry.register(Arc::new(EchoTool)).await.unwrap_err();
        assert!(matches!(err, ToolError::AlreadyRegistered(_)));
    }

    #[tokio::test]
    async fn unknown_tool_propagates_not_found() {
        let registry = ToolRegistry::new(Duration::from_secs(5));
        let err = registry.execute("call_1", "nope", serde_json::json!({}), None).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn slow_tool_times_out_within_bound() {
        let registry = ToolRegistry::new(Duration::from_secs(5));
        registry.register(Arc::new(SlowTool)).await.unwrap();

        let start = Instant::now();
        let err = registry
            .execute("call_1", "slow", serde_json::json!({}), Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn panicking_tool_is_wrapped_as_execution_error() {
        let registry = ToolRegistry::new(Duration::from_secs(5));
        registry.register(Arc::new(PanicTool)).await.unwrap();

        let err = registry.execute("call_1", "panic", serde_json::json!({}), None).await.unwrap_err();
        assert!(matches!(err, ToolError::Execution { .. }));
    }

    #[tokio::test]
    async fn list_tools_reflects_registrations_minus_unregistrations() {
        let registry = ToolRegistry::new(Duration::from_secs(5));
        registry.register(Arc::new(EchoTool)).await.unwrap();
        registry.register(Arc::new(SlowTool)).await.unwrap();
        assert_eq!(registry.list_tools().await.len(), 2);

        registry.unregister("echo").await;
        assert_eq!(registry.list_tools().await.len(), 1);
    }

    #[tokio::test]
    async fn duration_ms_is_set_on_successful_result() {
        let registry = ToolRegistry::new(Duration::from_secs(5));
        registry.register(Arc::new(EchoTool)).await.unwrap();
        let result = registry.execute("call_1", "echo", serde_json::json!({}), None).await.unwrap();
        assert!(result.duration_ms >= 0.0);
    }
}
