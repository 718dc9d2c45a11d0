//! The application state: built once at startup from [`AppConfig`] and
//! threaded through every collaborator — confining them
//! to a single explicit application-state value instead of scattering
//! ambient globals. Grounded in `aigent-daemon::server::DaemonState`
//! (config + runtime + memory bundled behind one struct constructed once
//! in `run_unified_daemon`), generalized here to own the `Agent` directly
//! rather than a thinner runtime handle.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use deskflow_config::AppConfig;
use deskflow_core::{DefaultIdentity, Identity, identity_dir_if_present};
use deskflow_llm::LlmClient;
use deskflow_memory::MemoryManager;
use deskflow_tools::ToolRegistry;
use deskflow_tools::builtins::{ShellTool, WebTool};

use crate::Agent;

/// Everything a transport layer (HTTP routes, an IM gateway, a CLI) needs
/// to drive the core: the constructed [`Agent`] plus a handle to its
/// [`ToolRegistry`] for callers that want to register additional tools
/// before serving traffic.
pub struct AppState {
    pub agent: Arc<Agent>,
    pub tools: Arc<ToolRegistry>,
}

impl AppState {
    /// Builds the full collaborator graph from `config`: opens memory
    /// storage at `config.memory.db_path`, registers the Shell and Web
    /// built-ins rooted at `workspace_root`, resolves identity from
    /// `config.agent.identity_dir` (or `workspace_root/identity`), and
    /// wires the LLM failover chain per `config.llm`. Async because tool
    /// registration takes the registry's `RwLock` — call from within the
    /// async runtime the rest of the server already runs on.
    pub async fn bootstrap(config: &AppConfig, workspace_root: PathBuf) -> Result<Self> {
        let memory = Arc::new(MemoryManager::open(&config.memory.db_path, &config.memory)?);

        let tools = Arc::new(ToolRegistry::new(Duration::from_secs_f64(config.tool.timeout)));
        Self::register_builtins(&tools, &config.tool, workspace_root.clone()).await;

        let identity_dir = config
            .agent
            .identity_dir
            .as_ref()
            .map(PathBuf::from)
            .or_else(|| identity_dir_if_present(&workspace_root));
        let identity: Arc<dyn Identity> = Arc::new(DefaultIdentity::new(identity_dir, "default"));

        let monitor = Arc::new(deskflow_core::TaskMonitor::new());
        let llm = LlmClient::from_config(&config.llm);

        let agent = Arc::new(Agent::new(
            llm,
            Arc::clone(&tools),
            memory,
            identity,
            monitor,
            config.agent.clone(),
            Duration::from_secs_f64(config.tool.timeout),
            config.llm.max_tokens,
            config.llm.temperature,
        ));

        Ok(Self { agent, tools })
    }

    async fn register_builtins(tools: &Arc<ToolRegistry>, tool_config: &deskflow_config::ToolConfig, workspace_root: PathBuf) {
        let denied: std::collections::HashSet<&str> = tool_config.denied_tools.iter().map(String::as_str).collect();
        let timeout = Duration::from_secs_f64(tool_config.timeout);

        if !denied.contains("shell") {
            let _ = tools.register(Arc::new(ShellTool::new(workspace_root, timeout))).await;
        }
        if !denied.contains("web") {
            let _ = tools.register(Arc::new(WebTool::new())).await;
        }
    }
}
