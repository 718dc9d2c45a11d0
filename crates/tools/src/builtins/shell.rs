//! The Shell built-in: runs a command string through [`ShellSandbox`].

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use deskflow_core::models::{ToolDefinition, ToolResult};
use deskflow_exec::{ShellError, ShellSandbox};

use crate::Tool;

/// Executes shell commands in a subprocess, subject to the block-list
/// policy and output caps enforced by [`deskflow_exec::ShellSandbox`].
pub struct ShellTool {
    sandbox: ShellSandbox,
    default_timeout: Duration,
}

impl ShellTool {
    pub fn new(workspace_root: PathBuf, default_timeout: Duration) -> Self {
        Self {
            sandbox: ShellSandbox::new(workspace_root),
            default_timeout,
        }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "shell".to_string(),
            description: "Run a command in a subprocess and capture its stdout/stderr.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "The shell command to execute",
                    }
                },
                "required": ["command"],
            }),
            required_params: vec!["command".to_string()],
        }
    }

    async fn execute(&self, tool_call_id: &str, args: serde_json::Value) -> ToolResult {
        let command = match args.get("command").and_then(|v| v.as_str()) {
            Some(command) => command,
            None => return ToolResult::err(tool_call_id, "shell", "missing required parameter 'command'"),
        };

        match self.sandbox.run(command, self.default_timeout).await {
            Ok(output) if output.success() => ToolResult::ok(tool_call_id, "shell", output.stdout),
            Ok(output) => ToolResult::err(
                tool_call_id,
                "shell",
                format!(
                    "command exited with {:?}\nstdout: {}\nstderr: {}",
                    output.exit_code, output.stdout, output.stderr
                ),
            ),
            Err(ShellError::Blocked(reason)) => ToolResult::err(tool_call_id, "shell", reason),
            Err(ShellError::Timeout(timeout)) => {
                ToolResult::err(tool_call_id, "shell", format!("command timed out after {timeout:?}"))
            }
            Err(ShellError::Spawn(err)) => ToolResult::err(tool_call_id, "shell", format!("failed to spawn command: {err}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn blocked_command_reports_failure_without_spawning() {
        let tool = ShellTool::new(std::env::temp_dir(), Duration::from_secs(5));
        let start = std::time::Instant::now();
        let result = tool.execute("call_1", serde_json::json!({"command": "rm -rf /"})).await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap_or_default().contains("Blocked"));
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn harmless_command_succeeds() {
        let tool = ShellTool::new(std::env::temp_dir(), Duration::from_secs(5));
        let result = tool.execute("call_1", serde_json::json!({"command": "echo hello"})).await;
        assert!(result.success);
        assert_eq!(result.output, "hello\n");
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_as_failure() {
        let tool = ShellTool::new(std::env::temp_dir(), Duration::from_secs(5));
        let result = tool.execute("call_1", serde_json::json!({"command": "exit 3"})).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn missing_command_arg_fails_cleanly() {
        let tool = ShellTool::new(std::env::temp_dir(), Duration::from_secs(5));
        let result = tool.execute("call_1", serde_json::json!({})).await;
        assert!(!result.success);
    }
}
