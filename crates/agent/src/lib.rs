//! The Conversation Loop: the multi-turn state machine that interleaves
//! model calls and tool calls, persists a memory entry after each turn,
//! and keeps the Task Monitor's counters current.
//!
//! Grounded in `runtime::tool_loop::run_tool_loop` for the
//! call-LLM / detect-tool-calls / execute / re-prompt shape, and in
//! `runtime::runtime::AgentRuntime` (`crates/runtime/src/runtime/mod.rs`)
//! for bundling config + LLM + memory behind one struct with thin public
//! entry points. `conversations` is a `tokio::Mutex`-guarded map: each id
//! gets its own `tokio::sync::Mutex<Conversation>`, held for the whole
//! turn, so concurrent calls on the same id serialize without blocking
//! calls on other ids.

mod state;

pub use state::AppState;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use deskflow_config::AgentConfig as AgentSettings;
use deskflow_core::models::{Conversation, Message, MemoryEntry, StreamChunk, ToolCall};
use deskflow_core::{Identity, LlmError};
use deskflow_llm::LlmClient;
use deskflow_memory::MemoryManager;
use deskflow_memory::manager::persist_turn_best_effort;
use deskflow_prompt::PromptAssembler;
use deskflow_tools::ToolRegistry;
use deskflow_core::TaskMonitor;
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

const TURN_DELIMITER: &str = "\n---\n";

/// `chat`/`stream_chat`'s public contract never returns a bare error: an
/// LLM-layer failure is translated into a one-sentence assistant
/// [`Message`] for the end user. This
/// type exists only so callers that *do* want the underlying cause (e.g.
/// the HTTP/CLI transport, for structured logging) can inspect it.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub message: Message,
    pub llm_error: Option<String>,
}

/// The runtime core: LLM client with failover, tool registry, memory
/// manager, identity, task monitor, and the per-conversation state map.
/// Constructed once at startup and threaded through collaborators — the
/// single explicit application state, rather than
/// ambient globals.
pub struct Agent {
    llm: LlmClient,
    tools: Arc<ToolRegistry>,
    memory: Arc<MemoryManager>,
    identity: Arc<dyn Identity>,
    monitor: Arc<TaskMonitor>,
    conversations: Mutex<HashMap<String, Arc<Mutex<Conversation>>>>,
    settings: AgentSettings,
    tool_timeout: Duration,
    llm_max_tokens: u32,
    llm_temperature: f32,
}

impl Agent {
    pub fn new(
        llm: LlmClient,
        tools: Arc<ToolRegistry>,
        memory: Arc<MemoryManager>,
        identity: Arc<dyn Identity>,
        monitor: Arc<TaskMonitor>,
        settings: AgentSettings,
        tool_timeout: Duration,
        llm_max_tokens: u32,
        llm_temperature: f32,
    ) -> Self {
        Self {
            llm,
            tools,
            memory,
            identity,
            monitor,
            conversations: Mutex::new(HashMap::new()),
            settings,
            tool_timeout,
            llm_max_tokens,
            llm_temperature,
        }
    }

    /// Returns the conversation for `conversation_id`, creating and
    /// registering one if the id is unknown or absent.
    async fn get_or_create(&self, conversation_id: Option<String>) -> Arc<Mutex<Conversation>> {
        let id = conversation_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut conversations = self.conversations.lock().await;
        conversations
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Conversation::new(id))))
            .clone()
    }

    /// Snapshot of a conversation's messages, for callers outside the loop
    /// (e.g. a transport layer rendering history).
    pub async fn get_conversation(&self, conversation_id: &str) -> Option<Conversation> {
        let conversations = self.conversations.lock().await;
        let handle = conversations.get(conversation_id)?.clone();
        drop(conversations);
        Some(handle.lock().await.clone())
    }

    pub fn monitor(&self) -> &TaskMonitor {
        &self.monitor
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    /// One user turn, bounded by `max_tool_iterations` model calls. Always
    /// returns a [`Message`] — LLM-layer failures are translated to a
    /// user-visible assistant message rather than propagated.
    #[instrument(skip(self, user_text), fields(conversation_id = conversation_id.as_deref()))]
    pub async fn chat(&self, user_text: &str, conversation_id: Option<String>) -> Message {
        self.run_turn(user_text, conversation_id, None).await.message
    }

    /// Identical state machine to [`Agent::chat`], but forwards the
    /// assistant's text as a single [`StreamChunk::Text`] and brackets each
    /// tool invocation with `ToolStart`/`ToolEnd`, ending in `Done` (or
    /// `Error` on an unrecoverable LLM failure). The shipped [`deskflow_llm`]
    /// adapters already synthesize their own `stream()` from a single
    /// `chat()` call rather than truly incrementally streaming tokens, so
    /// this reuses `chat()`'s tool-call detection rather than duplicating
    /// the turn logic against a text-only stream that cannot see tool
    /// calls at all.
    /// Takes `Arc<Self>` so the spawned task driving the channel can
    /// outlive the borrow of `&self`; call as `Arc::clone(&agent)
    /// .stream_chat(...)` from an `Arc<Agent>` application state.
    pub fn stream_chat(self: &Arc<Self>, user_text: String, conversation_id: Option<String>) -> BoxStream<'static, StreamChunk> {
        let agent = Arc::clone(self);
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            let outcome = agent.run_turn(&user_text, conversation_id, Some(&tx)).await;
            if let Some(err) = outcome.llm_error {
                let _ = tx.send(StreamChunk::Error { content: err });
            }
            let _ = tx.send(StreamChunk::Done);
        });

        futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|chunk| (chunk, rx)) }).boxed()
    }

    /// Shared turn implementation. When `chunks` is `Some`, emits the
    /// streaming chunk sequence alongside building the same final message
    /// `chat()` would return.
    async fn run_turn(
        &self,
        user_text: &str,
        conversation_id: Option<String>,
        chunks: Option<&tokio::sync::mpsc::UnboundedSender<StreamChunk>>,
    ) -> TurnOutcome {
        self.monitor.set_busy("chat");
        self.monitor.record_conversation();

        let conversation = self.get_or_create(conversation_id).await;
        // Single-writer-per-id: held for the whole turn so a second
        // concurrent call on this id queues behind this one rather than
        // interleaving appended messages.
        let mut conversation = conversation.lock().await;

        let tool_definitions = self.tools.list_tools().await;
        let assembler = PromptAssembler::new(
            self.identity.as_ref(),
            &self.memory,
            self.settings.max_context_tokens,
            self.settings.response_reserve_tokens,
        );
        let mut messages = assembler.assemble(user_text, &conversation.messages, &tool_definitions);

        conversation.add_message(Message::user(user_text));

        let mut tool_call_count = 0usize;
        let mut had_error = false;
        let mut llm_error: Option<String> = None;
        let mut final_message: Option<Message> = None;

        for _iteration in 0..self.settings.max_tool_iterations.max(1) {
            let assistant_message = match self
                .llm
                .chat(&messages, Some(&tool_definitions), self.llm_max_tokens, self.llm_temperature)
                .await
            {
                Ok(message) => message,
                Err(err) => {
                    warn!(error = %err, "LLM layer failed; translating to a user-visible message");
                    had_error = true;
                    llm_error = Some(err.to_string());
                    let explanation = Message::assistant(format!("I couldn't complete that because {}.", explain_llm_error(&err)));
                    conversation.add_message(explanation.clone());
                    final_message = Some(explanation);
                    break;
                }
            };

            self.record_token_usage(&assistant_message);
            conversation.add_message(assistant_message.clone());
            messages.push(assistant_message.clone());

            if let Some(tx) = chunks {
                if !assistant_message.content.is_empty() {
                    let _ = tx.send(StreamChunk::Text { content: assistant_message.content.clone() });
                }
            }

            if assistant_message.tool_calls.is_empty() {
                final_message = Some(assistant_message);
                break;
            }

            // Sequential by default: ordering of appended tool results must
            // respect the original tool_call order, which a simple
            // sequential walk guarantees trivially.
            for call in &assistant_message.tool_calls {
                tool_call_count += 1;
                if let Some(tx) = chunks {
                    let _ = tx.send(StreamChunk::ToolStart { tool_call: call.clone() });
                }

                let result = self.execute_tool_call(call).await;
                if !result.success {
                    had_error = true;
                }
                self.monitor.record_tool_call(&call.name, result.duration_ms, result.success);

                if let Some(tx) = chunks {
                    let _ = tx.send(StreamChunk::ToolEnd { tool_result: result.clone() });
                }

                let content = if result.success { result.output.clone() } else { result.error.clone().unwrap_or_default() };
                let tool_message = Message::tool_result(&call.id, content);
                conversation.add_message(tool_message.clone());
                messages.push(tool_message);
            }
        }

        let final_message = final_message.unwrap_or_else(|| {
            info!(max_iterations = self.settings.max_tool_iterations, "tool loop exhausted without a final answer");
            let note = Message::assistant(format!(
                "I reached the limit of {} tool iterations without a final answer.",
                self.settings.max_tool_iterations
            ));
            conversation.add_message(note.clone());
            note
        });

        let source_conversation_id = conversation.id.clone();
        drop(conversation);

        let entry = build_turn_entry(user_text, &final_message.content, tool_call_count, had_error, source_conversation_id);
        persist_turn_best_effort(&self.memory, entry);

        self.monitor.set_idle();

        TurnOutcome { message: final_message, llm_error }
    }

    async fn execute_tool_call(&self, call: &ToolCall) -> deskflow_core::models::ToolResult {
        match self.tools.execute(&call.id, &call.name, call.arguments.clone(), Some(self.tool_timeout)).await {
            Ok(result) => result,
            Err(err) => deskflow_core::models::ToolResult::err(call.id.clone(), call.name.clone(), err.to_string()),
        }
    }

    /// Reads an adapter-populated `usage_input_tokens`/`usage_output_tokens`
    /// pair from the message's metadata when present; none of the shipped
    /// adapters set it today, so this falls back to the same `len/4`
    /// heuristic the Prompt Assembler uses, treating the assistant
    /// message's own content as the "output" side of the estimate.
    fn record_token_usage(&self, message: &Message) {
        let input = message
            .metadata
            .get("usage_input_tokens")
            .and_then(|v| v.as_u64());
        let output = message
            .metadata
            .get("usage_output_tokens")
            .and_then(|v| v.as_u64());

        match (input, output) {
            (Some(input), Some(output)) => self.monitor.record_tokens(input, output),
            _ => self.monitor.record_tokens(0, deskflow_prompt::estimate_tokens(&message.content) as u64),
        }
    }
}

/// One sentence explaining an LLM-layer failure to the end user.
fn explain_llm_error(err: &LlmError) -> String {
    match err {
        LlmError::AllProvidersFailed { providers, .. } => {
            format!("every configured language model provider ({}) was unavailable", providers.join(", "))
        }
        LlmError::ContextOverflow { used, limit } => {
            format!("the conversation used {used} tokens against a {limit}-token limit")
        }
        LlmError::Connection(message) => format!("the language model connection failed ({message})"),
        LlmError::RateLimit { retry_after } => match retry_after {
            Some(secs) => format!("the language model is rate-limited (retry after {secs}s)"),
            None => "the language model is rate-limited right now".to_string(),
        },
        LlmError::Response(message) => format!("the language model returned an unexpected response ({message})"),
    }
}

/// The turn-summary importance heuristic:
/// `0.3 + 0.1·log(1+tool_calls) + 0.1·has_error`, clamped to `[0,1]`.
fn importance_heuristic(tool_call_count: usize, had_error: bool) -> f32 {
    let base = 0.3 + 0.1 * ((1 + tool_call_count) as f32).ln() + if had_error { 0.1 } else { 0.0 };
    base.clamp(0.0, 1.0)
}

fn build_turn_entry(user_text: &str, assistant_text: &str, tool_call_count: usize, had_error: bool, conversation_id: String) -> MemoryEntry {
    let content = format!("{user_text}{TURN_DELIMITER}{assistant_text}");
    let mut entry = MemoryEntry::new(content, "episodic").with_importance(importance_heuristic(tool_call_count, had_error));
    entry.source_conversation_id = Some(conversation_id);
    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use deskflow_config::{AgentConfig as AgentSettings, MemoryConfig};
    use deskflow_core::DefaultIdentity;
    use deskflow_core::models::{Role, ToolDefinition, ToolResult};
    use deskflow_llm::Adapter;
    use futures::stream::BoxStream as AdapterBoxStream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct ScriptedAdapter {
        responses: StdMutex<Vec<Message>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Adapter for ScriptedAdapter {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn chat(
            &self,
            _messages: &[Message],
            _tools: Option<&[ToolDefinition]>,
            _max_tokens: u32,
            _temperature: f32,
        ) -> Result<Message, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(LlmError::Response("script exhausted".to_string()));
            }
            Ok(responses.remove(0))
        }

        async fn stream(
            &self,
            _messages: &[Message],
            _max_tokens: u32,
            _temperature: f32,
        ) -> Result<AdapterBoxStream<'static, StreamChunk>, LlmError> {
            unimplemented!("not exercised by these tests")
        }
    }

    struct EchoShellTool;

    #[async_trait]
    impl deskflow_tools::Tool for EchoShellTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "shell".to_string(),
                description: "echoes".to_string(),
                parameters: serde_json::json!({"type": "object"}),
                required_params: vec![],
            }
        }

        async fn execute(&self, tool_call_id: &str, args: serde_json::Value) -> ToolResult {
            let command = args.get("command").and_then(|v| v.as_str()).unwrap_or_default();
            let output = command.strip_prefix("echo ").unwrap_or(command).to_string();
            ToolResult::ok(tool_call_id, "shell", output)
        }
    }

    async fn build_agent(adapter: Arc<ScriptedAdapter>) -> Agent {
        let tools = Arc::new(ToolRegistry::new(Duration::from_secs(5)));
        tools.register(Arc::new(EchoShellTool)).await.unwrap();

        let memory = Arc::new(MemoryManager::open_temp(&MemoryConfig::default()).unwrap());
        let identity = Arc::new(DefaultIdentity::default());
        let monitor = Arc::new(TaskMonitor::new());
        let llm = LlmClient::new(adapter, vec![]);

        Agent::new(llm, tools, memory, identity, monitor, AgentSettings::default(), Duration::from_secs(5), 1024, 0.7)
    }

    #[tokio::test]
    async fn plain_reply_without_tool_calls_terminates_in_one_llm_call() {
        let adapter = Arc::new(ScriptedAdapter { responses: StdMutex::new(vec![Message::assistant("hi there")]), calls: AtomicUsize::new(0) });
        let agent = build_agent(Arc::clone(&adapter)).await;

        let reply = agent.chat("hello", None).await;
        assert_eq!(reply.content, "hi there");
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn tool_loop_calls_model_exactly_twice_and_records_four_messages() {
        let call = ToolCall::new("shell", serde_json::json!({"command": "echo integration-test"}));
        let first = Message::assistant_tool_calls(vec![call]);
        let second = Message::assistant("The output was: integration-test");

        let adapter = Arc::new(ScriptedAdapter { responses: StdMutex::new(vec![first, second]), calls: AtomicUsize::new(0) });
        let agent = build_agent(Arc::clone(&adapter)).await;

        let reply = agent.chat("run echo integration-test", Some("conv-1".to_string())).await;
        assert_eq!(reply.content, "The output was: integration-test");
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 2);

        let conversation = agent.get_conversation("conv-1").await.unwrap();
        assert_eq!(conversation.messages.len(), 4);
        assert_eq!(conversation.messages[0].role, Role::User);
        assert!(!conversation.messages[1].tool_calls.is_empty());
        assert_eq!(conversation.messages[2].role, Role::Tool);
        assert_eq!(conversation.messages[3].role, Role::Assistant);
    }

    #[tokio::test]
    async fn tool_failure_is_reported_to_model_without_ending_the_loop() {
        let call = ToolCall::new("shell", serde_json::json!({}));
        let first = Message::assistant_tool_calls(vec![call]);
        let second = Message::assistant("handled the missing command gracefully");

        let adapter = Arc::new(ScriptedAdapter { responses: StdMutex::new(vec![first, second]), calls: AtomicUsize::new(0) });
        let tools = Arc::new(ToolRegistry::new(Duration::from_secs(5)));
        tools.register(Arc::new(deskflow_tools::builtins::ShellTool::new(std::env::temp_dir(), Duration::from_secs(5)))).await.unwrap();

        let memory = Arc::new(MemoryManager::open_temp(&MemoryConfig::default()).unwrap());
        let identity = Arc::new(DefaultIdentity::default());
        let monitor = Arc::new(TaskMonitor::new());
        let llm = LlmClient::new(adapter, vec![]);
        let agent = Agent::new(llm, tools, memory, identity, monitor, AgentSettings::default(), Duration::from_secs(5), 1024, 0.7);

        let reply = agent.chat("run something", None).await;
        assert_eq!(reply.content, "handled the missing command gracefully");
    }

    #[tokio::test]
    async fn exhausting_max_tool_iterations_yields_a_synthetic_message() {
        let call = ToolCall::new("shell", serde_json::json!({"command": "echo x"}));
        let responses: Vec<Message> = (0..3).map(|_| Message::assistant_tool_calls(vec![call.clone()])).collect();
        let adapter = Arc::new(ScriptedAdapter { responses: StdMutex::new(responses), calls: AtomicUsize::new(0) });

        let mut settings = AgentSettings::default();
        settings.max_tool_iterations = 3;

        let tools = Arc::new(ToolRegistry::new(Duration::from_secs(5)));
        tools.register(Arc::new(EchoShellTool)).await.unwrap();
        let memory = Arc::new(MemoryManager::open_temp(&MemoryConfig::default()).unwrap());
        let identity = Arc::new(DefaultIdentity::default());
        let monitor = Arc::new(TaskMonitor::new());
        let llm = LlmClient::new(adapter, vec![]);
        let agent = Agent::new(llm, tools, memory, identity, monitor, settings, Duration::from_secs(5), 1024, 0.7);

        let reply = agent.chat("loop forever", None).await;
        assert!(reply.content.contains("3 tool iterations"));
    }

    #[tokio::test]
    async fn llm_failure_becomes_a_one_sentence_assistant_message() {
        let adapter = Arc::new(ScriptedAdapter { responses: StdMutex::new(vec![]), calls: AtomicUsize::new(0) });
        let agent = build_agent(adapter).await;

        let reply = agent.chat("hello", None).await;
        assert_eq!(reply.role, Role::Assistant);
        assert!(reply.content.starts_with("I couldn't complete that because"));
    }

    #[tokio::test]
    async fn successful_turn_persists_an_episodic_memory_entry() {
        let adapter = Arc::new(ScriptedAdapter { responses: StdMutex::new(vec![Message::assistant("done")]), calls: AtomicUsize::new(0) });
        let agent = build_agent(adapter).await;

        agent.chat("remember this", None).await;
        let recent = agent.memory().get_recent(5).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].memory_type, "episodic");
        assert!(recent[0].content.contains("remember this"));
    }

    #[test]
    fn importance_heuristic_is_clamped_and_monotone_in_tool_calls() {
        let none = importance_heuristic(0, false);
        let some = importance_heuristic(3, false);
        let errored = importance_heuristic(0, true);
        assert!(some > none);
        assert!(errored > none);
        assert!((0.0..=1.0).contains(&none));
        assert!((0.0..=1.0).contains(&some));
    }
}
