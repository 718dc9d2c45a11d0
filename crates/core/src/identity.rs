//! Identity Provider — assembles a stable system-prompt string from
//! optional persona files, falling back to a built-in default.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

const DEFAULT_SYSTEM_PROMPT: &str = "\
You are DeskFlow Agent, an intelligent assistant running on the DeskFlow runtime.

## Core Principles
- Be helpful, accurate, and concise.
- When using tools, explain what you're doing and why.
- If a task fails, analyze the error and try a different approach.
- Always prioritize user safety and data security.
- Be transparent about your limitations.

## Capabilities
- Execute shell commands and fetch web content through registered tools.
- Store and recall conversation context via long-term memory.
- Learn from interactions to improve over time.

## Communication Style
- Professional but friendly.
- Use code blocks with syntax highlighting when showing code.
- Structure longer responses with headings and lists.
- Acknowledge errors honestly and propose solutions.
";

/// Loads `SOUL.md`, `AGENT.md`, `USER.md`, and persona-specific markdown
/// from a directory, joining whatever is present with a visible `---`
/// separator. Falls back to [`DEFAULT_SYSTEM_PROMPT`] when nothing is
/// found. The assembled prompt is memoised on first access.
pub struct DefaultIdentity {
    identity_dir: Option<PathBuf>,
    persona: String,
    cached: OnceLock<String>,
}

impl Default for DefaultIdentity {
    fn default() -> Self {
        Self::new(None, "default")
    }
}

impl DefaultIdentity {
    pub fn new(identity_dir: Option<PathBuf>, persona: impl Into<String>) -> Self {
        Self {
            identity_dir,
            persona: persona.into(),
            cached: OnceLock::new(),
        }
    }

    fn load_file(&self, filename: &str) -> Option<String> {
        let dir = self.identity_dir.as_ref()?;
        let path = dir.join(filename);
        fs::read_to_string(&path).ok()
    }

    fn build_system_prompt(&self) -> String {
        let mut parts = Vec::new();
        if let Some(soul) = self.load_file("SOUL.md") {
            parts.push(soul);
        }
        if let Some(agent) = self.load_file("AGENT.md") {
            parts.push(agent);
        }
        if let Some(user) = self.load_file("USER.md") {
            parts.push(user);
        }
        if self.persona != "default" {
            if let Some(persona_file) = self.load_file(&format!("personas/{}.md", self.persona)) {
                parts.push(persona_file);
            }
        }

        if parts.is_empty() {
            DEFAULT_SYSTEM_PROMPT.to_string()
        } else {
            parts.join("\n\n---\n\n")
        }
    }

    pub fn get_system_prompt(&self) -> &str {
        self.cached.get_or_init(|| self.build_system_prompt())
    }

    pub fn get_persona_name(&self) -> &str {
        "DeskFlow Agent"
    }

    pub fn get_greeting(&self) -> String {
        let hour = chrono::Local::now().format("%H").to_string().parse::<u32>().unwrap_or(12);
        let time_greeting = match hour {
            5..=11 => "Good morning",
            12..=17 => "Good afternoon",
            18..=21 => "Good evening",
            _ => "Hello",
        };
        format!(
            "{time_greeting}! I'm DeskFlow Agent, your long-running AI assistant. How can I help you today?"
        )
    }
}

/// Returns `path/identity` if it contains at least one persona file, else
/// `None` — a small helper for constructing a [`DefaultIdentity`] from a
/// workspace root without hand-checking each file.
pub fn identity_dir_if_present(workspace_root: &Path) -> Option<PathBuf> {
    let dir = workspace_root.join("identity");
    if dir.is_dir() { Some(dir) } else { None }
}
