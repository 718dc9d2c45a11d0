//! Flat, typed configuration for the agent runtime.
//!
//! Loaded from a TOML file with field defaults, then overridden by
//! `AGENT_`-prefixed environment variables (the process-level namespace
//! convention). Paths are `~`-expanded on load.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Supported LLM providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Anthropic,
    Openai,
    Dashscope,
}

impl std::str::FromStr for LlmProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "anthropic" => Ok(Self::Anthropic),
            "openai" => Ok(Self::Openai),
            "dashscope" => Ok(Self::Dashscope),
            other => bail!("invalid configuration value for 'llm_provider': {other}"),
        }
    }
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LlmProvider::Anthropic => "anthropic",
            LlmProvider::Openai => "openai",
            LlmProvider::Dashscope => "dashscope",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub anthropic_api_key: String,
    pub openai_api_key: String,
    pub dashscope_api_key: String,
    pub openai_base_url: String,
    /// Ordered fallback providers tried after `provider` fails.
    pub fallback_providers: Vec<LlmProvider>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Anthropic,
            model: "claude-sonnet-4-5".to_string(),
            max_tokens: 4096,
            temperature: 0.7,
            anthropic_api_key: String::new(),
            openai_api_key: String::new(),
            dashscope_api_key: String::new(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            fallback_providers: Vec::new(),
        }
    }
}

impl LlmConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=200_000).contains(&self.max_tokens) {
            bail!("invalid configuration value for 'llm_max_tokens': {}", self.max_tokens);
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            bail!("invalid configuration value for 'llm_temperature': {}", self.temperature);
        }
        Ok(())
    }

    /// API key configured for `provider`, empty string if unset.
    pub fn api_key_for(&self, provider: LlmProvider) -> &str {
        match provider {
            LlmProvider::Anthropic => &self.anthropic_api_key,
            LlmProvider::Openai => &self.openai_api_key,
            LlmProvider::Dashscope => &self.dashscope_api_key,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub db_path: String,
    pub cache_size: usize,
    /// TTL in seconds per memory type. Unconfigured types are immortal.
    /// Resolves the "TTL table per memory type" open question.
    pub ttl_seconds: HashMap<String, i64>,
    /// Capacity above which the lifecycle controller starts LRU eviction.
    pub capacity: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: "~/.deskflow/memory.redb".to_string(),
            cache_size: 500,
            ttl_seconds: HashMap::new(),
            capacity: 10_000,
        }
    }
}

impl MemoryConfig {
    pub fn validate(&self) -> Result<()> {
        if !(10..=100_000).contains(&self.cache_size) {
            bail!("invalid configuration value for 'memory_cache_size': {}", self.cache_size);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Per-call timeout in seconds, default used when a call does not
    /// specify its own.
    pub timeout: f64,
    pub max_parallel: usize,
    /// Comma-separated list of filesystem prefixes tools are permitted to
    /// touch. Empty means unrestricted.
    pub allowed_paths: Vec<String>,
    /// Tool names denied regardless of allowlist.
    pub denied_tools: Vec<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            timeout: 30.0,
            max_parallel: 4,
            allowed_paths: Vec::new(),
            denied_tools: Vec::new(),
        }
    }
}

impl ToolConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1.0..=300.0).contains(&self.timeout) {
            bail!("invalid configuration value for 'tool_timeout': {}", self.timeout);
        }
        if !(1..=10).contains(&self.max_parallel) {
            bail!("invalid configuration value for 'tool_max_parallel': {}", self.max_parallel);
        }
        Ok(())
    }
}

/// Parameters governing the Conversation Loop and Prompt Assembler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    pub max_tool_iterations: usize,
    pub max_context_tokens: usize,
    pub response_reserve_tokens: usize,
    pub identity_dir: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "DeskFlow Agent".to_string(),
            max_tool_iterations: 8,
            max_context_tokens: 128_000,
            response_reserve_tokens: 4096,
            identity_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { log_level: "info".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub llm: LlmConfig,
    pub memory: MemoryConfig,
    pub tool: ToolConfig,
    pub telemetry: TelemetryConfig,
}

/// Environment variable prefix for overrides, e.g. `AGENT_LLM_PROVIDER`.
pub const ENV_PREFIX: &str = "AGENT_";

impl AppConfig {
    /// Load from `path`, falling back to defaults if the file is absent or
    /// unreadable, then apply `AGENT_`-prefixed environment overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path.as_ref()) {
            config = toml::from_str(&raw)
                .with_context(|| format!("parsing config file {}", path.as_ref().display()))?;
        }
        config.apply_env_overrides();
        config.expand_paths();
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var(format!("{ENV_PREFIX}LLM_PROVIDER")) {
            if let Ok(p) = v.parse() {
                self.llm.provider = p;
            }
        }
        if let Ok(v) = env::var(format!("{ENV_PREFIX}LLM_MODEL")) {
            self.llm.model = v;
        }
        if let Ok(v) = env::var(format!("{ENV_PREFIX}LLM_MAX_TOKENS")) {
            if let Ok(n) = v.parse() {
                self.llm.max_tokens = n;
            }
        }
        if let Ok(v) = env::var(format!("{ENV_PREFIX}LLM_TEMPERATURE")) {
            if let Ok(n) = v.parse() {
                self.llm.temperature = n;
            }
        }
        if let Ok(v) = env::var(format!("{ENV_PREFIX}ANTHROPIC_API_KEY")) {
            self.llm.anthropic_api_key = v;
        }
        if let Ok(v) = env::var(format!("{ENV_PREFIX}OPENAI_API_KEY")) {
            self.llm.openai_api_key = v;
        }
        if let Ok(v) = env::var(format!("{ENV_PREFIX}DASHSCOPE_API_KEY")) {
            self.llm.dashscope_api_key = v;
        }
        if let Ok(v) = env::var(format!("{ENV_PREFIX}OPENAI_BASE_URL")) {
            self.llm.openai_base_url = v;
        }
        if let Ok(v) = env::var(format!("{ENV_PREFIX}MEMORY_DB_PATH")) {
            self.memory.db_path = v;
        }
        if let Ok(v) = env::var(format!("{ENV_PREFIX}MEMORY_CACHE_SIZE")) {
            if let Ok(n) = v.parse() {
                self.memory.cache_size = n;
            }
        }
        if let Ok(v) = env::var(format!("{ENV_PREFIX}TOOL_TIMEOUT")) {
            if let Ok(n) = v.parse() {
                self.tool.timeout = n;
            }
        }
        if let Ok(v) = env::var(format!("{ENV_PREFIX}TOOL_MAX_PARALLEL")) {
            if let Ok(n) = v.parse() {
                self.tool.max_parallel = n;
            }
        }
        if let Ok(v) = env::var(format!("{ENV_PREFIX}TOOL_ALLOWED_PATHS")) {
            self.tool.allowed_paths = v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }
    }

    fn expand_paths(&mut self) {
        self.memory.db_path = expand_tilde(&self.memory.db_path);
        self.tool.allowed_paths = self.tool.allowed_paths.iter().map(|p| expand_tilde(p)).collect();
        if let Some(dir) = &self.agent.identity_dir {
            self.agent.identity_dir = Some(expand_tilde(dir));
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.llm.validate()?;
        self.memory.validate()?;
        self.tool.validate()?;
        Ok(())
    }

    /// TTL for `memory_type`, if configured.
    pub fn ttl_for(&self, memory_type: &str) -> Option<chrono::Duration> {
        self.memory
            .ttl_seconds
            .get(memory_type)
            .map(|secs| chrono::Duration::seconds(*secs))
    }
}

/// Expands a leading `~` to the user's home directory. Leaves the path
/// unchanged if `~` is not the first component or `HOME` is unset.
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = env::var("HOME") {
            return PathBuf::from(home).join(rest).to_string_lossy().into_owned();
        }
    } else if path == "~" {
        if let Ok(home) = env::var("HOME") {
            return home;
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_out_of_range_max_tokens() {
        let mut cfg = AppConfig::default();
        cfg.llm.max_tokens = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_temperature() {
        let mut cfg = AppConfig::default();
        cfg.llm.temperature = 3.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_cache_size_out_of_range() {
        let mut cfg = AppConfig::default();
        cfg.memory.cache_size = 5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn tilde_expansion() {
        unsafe { env::set_var("HOME", "/home/tester") };
        assert_eq!(expand_tilde("~/data"), "/home/tester/data");
        assert_eq!(expand_tilde("/abs/path"), "/abs/path");
    }

    #[test]
    fn load_from_missing_file_falls_back_to_defaults() {
        let cfg = AppConfig::load_from("/nonexistent/path/config.toml").unwrap();
        assert_eq!(cfg.llm.provider, LlmProvider::Anthropic);
    }

    #[test]
    fn save_and_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut cfg = AppConfig::default();
        cfg.llm.model = "custom-model".to_string();
        cfg.save_to(&path).unwrap();

        let reloaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(reloaded.llm.model, "custom-model");
    }

    #[test]
    fn provider_parses_case_insensitively() {
        let p: LlmProvider = "OpenAI".parse().unwrap();
        assert_eq!(p, LlmProvider::Openai);
        assert!("unknown".parse::<LlmProvider>().is_err());
    }
}
