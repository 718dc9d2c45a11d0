//! Sandboxed subprocess execution for the Shell tool.
//!
//! Owns the safety policy (block-list / prefix block-list checked before a
//! process is ever spawned) and the actual `tokio::process::Command` spawn,
//! output capture with truncation, and cancellation-on-timeout. Platform
//! sandboxing of the spawned child is delegated to [`sandbox`].

pub mod sandbox;

use std::path::PathBuf;
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::process::CommandExt;

use thiserror::Error;
use tracing::warn;

/// Commands whose *normalized* form matches exactly are refused outright.
/// Normalization lowercases and collapses internal whitespace, so
/// `"rm  -rf /"` and `"RM -RF /"` are both caught.
const BLOCKED_COMMANDS: &[&str] = &[
    "rm -rf /",
    "rm -rf /*",
    "rm -rf ~",
    "rm -rf .",
    ":(){ :|:& };:",
    "mkfs",
    "mkfs.ext4",
    "dd if=/dev/zero of=/dev/sda",
    "shutdown",
    "shutdown -h now",
    "reboot",
    "poweroff",
    "halt",
    "init 0",
    "init 6",
];

/// Commands whose normalized form *starts with* one of these are refused,
/// regardless of trailing arguments.
const BLOCKED_PREFIXES: &[&str] = &[
    "rm -rf /",
    "mkfs",
    "dd if=/dev/zero",
    "dd if=/dev/random",
    ":(){ ",
    "chmod -r 777 /",
    "chmod -R 777 /",
    "> /dev/sda",
];

fn normalize(command: &str) -> String {
    command.split_whitespace().collect::<Vec<_>>().join(" ").to_ascii_lowercase()
}

/// Returns `Some(reason)` when `command` is refused by the block-list
/// policy, checked *before* any subprocess is spawned.
pub fn blocked_reason(command: &str) -> Option<String> {
    let normalized = normalize(command);
    if BLOCKED_COMMANDS.iter().any(|blocked| normalized == *blocked) {
        return Some(format!("Blocked: '{command}' matches a disallowed command"));
    }
    if let Some(prefix) = BLOCKED_PREFIXES.iter().find(|p| normalized.starts_with(**p)) {
        return Some(format!("Blocked: '{command}' starts with disallowed prefix '{prefix}'"));
    }
    None
}

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("{0}")]
    Blocked(String),
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to spawn command: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct ShellOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs shell commands under the block-list policy, output caps, a
/// wall-clock timeout, and (on Linux/macOS, when the `sandbox` feature is
/// enabled) platform process sandboxing.
pub struct ShellSandbox {
    pub workspace_root: PathBuf,
    pub stdout_cap: usize,
    pub stderr_cap: usize,
    pub profile: sandbox::SandboxProfile,
}

impl ShellSandbox {
    pub fn new(workspace_root: PathBuf) -> Self {
        Self {
            workspace_root,
            stdout_cap: 10_000,
            stderr_cap: 5_000,
            profile: sandbox::SandboxProfile::Strict,
        }
    }

    /// Runs `command` in a fresh `sh -c` child rooted at `workspace_root`.
    ///
    /// Refuses before spawning if `command` matches the block-list policy.
    /// On timeout, the child is killed and any in-flight output discarded.
    pub async fn run(&self, command: &str, timeout: Duration) -> Result<ShellOutput, ShellError> {
        if let Some(reason) = blocked_reason(command) {
            return Err(ShellError::Blocked(reason));
        }

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&self.workspace_root)
            .kill_on_drop(true)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        #[cfg(unix)]
        {
            let workspace_root = self.workspace_root.display().to_string();
            unsafe {
                cmd.pre_exec(move || {
                    // SAFETY: runs after fork, before exec, in the child only.
                    sandbox::apply_to_child(&workspace_root)
                });
            }
        }

        let mut child = cmd.spawn()?;

        let wait = async {
            let output = child.wait_with_output().await?;
            Ok::<_, std::io::Error>(output)
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(output)) => Ok(ShellOutput {
                stdout: truncate(&String::from_utf8_lossy(&output.stdout), self.stdout_cap),
                stderr: truncate(&String::from_utf8_lossy(&output.stderr), self.stderr_cap),
                exit_code: output.status.code(),
            }),
            Ok(Err(err)) => Err(ShellError::Spawn(err)),
            Err(_) => {
                warn!(command, "shell command timed out; child killed");
                Err(ShellError::Timeout(timeout))
            }
        }
    }
}

/// Truncates `text` to `cap` bytes on a `char` boundary. Silent — no
/// ellipsis marker is appended.
fn truncate(text: &str, cap: usize) -> String {
    if text.len() <= cap {
        return text.to_string();
    }
    let mut end = cap;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_exact_rm_rf_root() {
        assert!(blocked_reason("rm -rf /").is_some());
    }

    #[test]
    fn blocks_rm_rf_root_with_odd_spacing_and_case() {
        assert!(blocked_reason("RM   -rf   /").is_some());
    }

    #[test]
    fn blocks_fork_bomb() {
        assert!(blocked_reason(":(){ :|:& };:").is_some());
    }

    #[test]
    fn allows_harmless_command() {
        assert!(blocked_reason("echo hello").is_none());
    }

    #[tokio::test]
    async fn blocked_command_never_spawns_a_process() {
        let sandbox = ShellSandbox::new(std::env::temp_dir());
        let start = std::time::Instant::now();
        let err = sandbox.run("rm -rf /", Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, ShellError::Blocked(_)));
        // No subprocess was spawned, so this returns near-instantly.
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn runs_harmless_command_successfully() {
        let sandbox = ShellSandbox::new(std::env::temp_dir());
        let output = sandbox.run("echo hello", Duration::from_secs(5)).await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "hello\n");
    }

    #[tokio::test]
    async fn nonzero_exit_is_not_success() {
        let sandbox = ShellSandbox::new(std::env::temp_dir());
        let output = sandbox.run("exit 1", Duration::from_secs(5)).await.unwrap();
        assert!(!output.success());
    }

    #[tokio::test]
    async fn times_out_long_running_command() {
        let sandbox = ShellSandbox::new(std::env::temp_dir());
        let err = sandbox.run("sleep 5", Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, ShellError::Timeout(_)));
    }

    #[test]
    fn truncate_caps_output_silently() {
        let long = "a".repeat(100);
        let capped = truncate(&long, 10);
        assert_eq!(capped.len(), 10);
    }
}
