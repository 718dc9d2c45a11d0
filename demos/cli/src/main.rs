//! A thin CLI entry point exercising `deskflow_agent` end to end: loads
//! configuration, bootstraps [`deskflow_agent::AppState`], and drives either
//! a single one-shot turn or an interactive REPL loop.

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use deskflow_agent::AppState;
use deskflow_config::AppConfig;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "deskflow", version, about = "Conversational agent runtime core, CLI demo")]
struct Cli {
    /// Path to the TOML config file; defaults are used if absent.
    #[arg(long, default_value = "config/default.toml")]
    config: PathBuf,

    /// Workspace root the Shell/Web tools are rooted at.
    #[arg(long, default_value = ".")]
    workspace: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Send a single message and print the reply.
    Ask {
        /// The message to send.
        message: String,
        /// Reuse an existing conversation id instead of starting a new one.
        #[arg(long)]
        conversation: Option<String>,
    },
    /// Start an interactive chat loop (default when no subcommand is given).
    Chat,
    /// Print the agent's current status (busy/idle, counters).
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)?;
    let state = AppState::bootstrap(&config, cli.workspace).await?;

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Ask { message, conversation } => {
            let reply = state.agent.chat(&message, conversation).await;
            println!("{}", reply.content);
        }
        Commands::Chat => run_chat_loop(&state).await?,
        Commands::Status => {
            let memory_count = state.agent.memory().count().unwrap_or(0);
            let tools = state.tools.list_tools().await;
            let status = state.agent.monitor().get_status(
                memory_count,
                tools.len(),
                tools.len(),
                config.llm.provider.to_string(),
                config.llm.model.clone(),
            );
            println!("online: {}  busy: {}", status.is_online, status.is_busy);
            println!("conversations: {}  tool calls: {}  tokens used: {}", status.total_conversations, status.total_tool_calls, status.total_tokens_used);
            println!("memory entries: {}  tools: {}/{}", status.memory_count, status.active_tools, status.available_tools);
            println!("provider: {} ({})", status.llm_provider, status.llm_model);
        }
    }

    Ok(())
}

/// Reads lines from stdin until EOF or `/quit`, sending each as a turn on
/// a single conversation id so history accumulates across the session.
async fn run_chat_loop(state: &AppState) -> Result<()> {
    let conversation_id = uuid::Uuid::new_v4().to_string();
    println!("deskflow chat — type /quit to exit");

    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }

        let reply = state.agent.chat(line, Some(conversation_id.clone())).await;
        println!("{}", reply.content);
    }

    Ok(())
}
