//! The Prompt Assembler: turns prior conversation history, the current
//! user message, the registered tools, and Memory/Identity into the
//! ordered message list handed to an LLM adapter.

use deskflow_core::Identity;
use deskflow_core::models::{Message, Role, ToolDefinition};
use deskflow_memory::MemoryManager;
use tracing::warn;

const MEMORY_TOP_K: usize = 5;

/// `len(content) / 4`, rounded down — a monotonic under-estimate, not an
/// exact tokenizer.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / 4
}

/// Assembles prompts against a fixed token budget.
pub struct PromptAssembler<'a> {
    pub identity: &'a dyn Identity,
    pub memory: &'a MemoryManager,
    pub max_context_tokens: usize,
    pub response_reserve_tokens: usize,
}

impl<'a> PromptAssembler<'a> {
    pub fn new(identity: &'a dyn Identity, memory: &'a MemoryManager, max_context_tokens: usize, response_reserve_tokens: usize) -> Self {
        Self { identity, memory, max_context_tokens, response_reserve_tokens }
    }

    /// Builds the ordered message list: one system message, a
    /// budget-trimmed slice of `history` preserving chronological order
    /// and never an orphaned partial tool turn, then `user_message` last.
    pub fn assemble(&self, user_message: &str, history: &[Message], tools: &[ToolDefinition]) -> Vec<Message> {
        let system_content = self.build_system_message(user_message, tools);
        let system_tokens = estimate_tokens(&system_content);
        let user_tokens = estimate_tokens(user_message);

        let mut remaining_budget = self
            .max_context_tokens
            .saturating_sub(self.response_reserve_tokens)
            .saturating_sub(system_tokens)
            .saturating_sub(user_tokens);

        let kept = self.select_history(history, &mut remaining_budget);

        let mut messages = Vec::with_capacity(kept.len() + 2);
        messages.push(Message::system(system_content));
        messages.extend(kept);
        messages.push(Message::user(user_message));
        messages
    }

    fn build_system_message(&self, user_message: &str, tools: &[ToolDefinition]) -> String {
        let mut parts = vec![self.identity.get_system_prompt().to_string()];

        match self.memory.retrieve(user_message, MEMORY_TOP_K, None) {
            Ok(entries) if !entries.is_empty() => {
                let mut section = String::from("## Relevant Context from Memory\n");
                for entry in entries {
                    section.push_str("- ");
                    section.push_str(&entry.content);
                    section.push('\n');
                }
                parts.push(section);
            }
            Ok(_) => {}
            Err(err) => warn!(%err, "memory retrieval failed while assembling prompt; continuing without it"),
        }

        if !tools.is_empty() {
            let mut section = String::from("## Available Tools\n");
            for tool in tools {
                section.push_str(&format!("- {}: {}\n", tool.name, tool.description));
            }
            parts.push(section);
        }

        parts.join("\n\n")
    }

    /// Walks `history` newest-to-oldest, keeping whatever fits
    /// `remaining_budget`, decrementing it as messages are kept. Returns
    /// the kept subsequence in original chronological order, with any
    /// orphaned partial tool turn removed.
    fn select_history(&self, history: &[Message], remaining_budget: &mut usize) -> Vec<Message> {
        let mut kept_reversed: Vec<Message> = Vec::new();

        for message in history.iter().rev() {
            let cost = estimate_tokens(&message.content)
                + message.tool_calls.iter().map(|c| estimate_tokens(&c.arguments.to_string())).sum::<usize>();
            if cost > *remaining_budget {
                break;
            }
            *remaining_budget -= cost;
            kept_reversed.push(message.clone());
        }

        kept_reversed.reverse();
        drop_orphaned_partial_turns(kept_reversed)
    }
}

/// Removes any assistant message with `tool_calls` that is not immediately
/// followed by tool-result messages covering every one of its calls
/// (either because the matching results were themselves trimmed, or the
/// turn was cut off mid-budget) — and, symmetrically, any `tool` message
/// whose parent assistant turn was itself trimmed away. The trim walks a
/// newest-first suffix, so the cut can land on either side of an
/// assistant/tool_calls pair; both orphan shapes must be dropped or the
/// assembled list can carry a `tool` message with no preceding `tool_use`.
fn drop_orphaned_partial_turns(messages: Vec<Message>) -> Vec<Message> {
    let mut out = Vec::with_capacity(messages.len());
    let mut i = 0;
    while i < messages.len() {
        let message = &messages[i];
        if message.role == Role::Assistant && !message.tool_calls.is_empty() {
            let expected: std::collections::HashSet<&str> = message.tool_calls.iter().map(|c| c.id.as_str()).collect();
            let mut found: std::collections::HashSet<&str> = std::collections::HashSet::new();
            let mut j = i + 1;
            while j < messages.len() && messages[j].role == Role::Tool {
                if let Some(id) = messages[j].tool_call_id.as_deref() {
                    found.insert(id);
                }
                j += 1;
            }

            if expected.is_subset(&found) {
                out.push(message.clone());
                out.extend_from_slice(&messages[i + 1..j]);
            }
            // else: drop the assistant message and its (incomplete) tool
            // results entirely — they cannot stand alone.
            i = j;
        } else if message.role == Role::Tool {
            // Standalone tool message: its parent assistant turn was
            // trimmed away (or never kept), so there is nothing for it to
            // reference. Drop it rather than emit an orphaned tool_result.
            i += 1;
        } else {
            out.push(message.clone());
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskflow_config::MemoryConfig;
    use deskflow_core::DefaultIdentity;
    use deskflow_core::models::ToolCall;

    fn memory() -> MemoryManager {
        MemoryManager::open_temp(&MemoryConfig::default()).unwrap()
    }

    #[test]
    fn system_message_always_leads_and_user_message_always_trails() {
        let identity = DefaultIdentity::default();
        let mem = memory();
        let assembler = PromptAssembler::new(&identity, &mem, 100_000, 1000);

        let messages = assembler.assemble("hello", &[], &[]);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages.last().unwrap().role, Role::User);
        assert_eq!(messages.last().unwrap().content, "hello");
    }

    #[test]
    fn tool_summary_appears_in_system_message_when_tools_present() {
        let identity = DefaultIdentity::default();
        let mem = memory();
        let assembler = PromptAssembler::new(&identity, &mem, 100_000, 1000);
        let tools = vec![ToolDefinition {
            name: "shell".to_string(),
            description: "runs commands".to_string(),
            parameters: serde_json::json!({}),
            required_params: vec![],
        }];

        let messages = assembler.assemble("hi", &[], &tools);
        assert!(messages[0].content.contains("shell: runs commands"));
    }

    #[test]
    fn history_preserves_chronological_order_when_it_all_fits() {
        let identity = DefaultIdentity::default();
        let mem = memory();
        let assembler = PromptAssembler::new(&identity, &mem, 100_000, 1000);

        let history = vec![Message::user("first"), Message::assistant("second"), Message::user("third")];
        let messages = assembler.assemble("current", &history, &[]);

        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        let first_idx = contents.iter().position(|c| *c == "first").unwrap();
        let second_idx = contents.iter().position(|c| *c == "second").unwrap();
        let third_idx = contents.iter().position(|c| *c == "third").unwrap();
        assert!(first_idx < second_idx);
        assert!(second_idx < third_idx);
    }

    #[test]
    fn never_exceeds_budget() {
        let identity = DefaultIdentity::default();
        let mem = memory();
        let assembler = PromptAssembler::new(&identity, &mem, 200, 50);

        let history: Vec<Message> = (0..50).map(|i| Message::user(format!("message number {i} with some padding text"))).collect();
        let messages = assembler.assemble("current question", &history, &[]);

        let total: usize = messages.iter().map(|m| estimate_tokens(&m.content)).sum();
        assert!(total <= assembler.max_context_tokens - assembler.response_reserve_tokens);
    }

    #[test]
    fn orphaned_partial_tool_turn_is_dropped_when_budget_cuts_off_its_results() {
        let call = ToolCall::new("shell", serde_json::json!({"command": "echo hi"}));
        let assistant_with_call = Message::assistant_tool_calls(vec![call.clone()]);
        let tool_response = Message::tool_result(&call.id, "hi\n");

        let history = vec![Message::user("run echo"), assistant_with_call, tool_response];

        // A budget of zero keeps nothing from history.
        let identity = DefaultIdentity::default();
        let mem = memory();
        let assembler = PromptAssembler::new(&identity, &mem, 10, 1);
        let messages = assembler.assemble("current", &history, &[]);

        assert!(messages.iter().all(|m| m.tool_calls.is_empty()));
    }

    #[test]
    fn complete_tool_turn_is_kept_together() {
        let call = ToolCall::new("shell", serde_json::json!({"command": "echo hi"}));
        let assistant_with_call = Message::assistant_tool_calls(vec![call.clone()]);
        let tool_response = Message::tool_result(&call.id, "hi\n");
        let history = vec![assistant_with_call, tool_response];

        let identity = DefaultIdentity::default();
        let mem = memory();
        let assembler = PromptAssembler::new(&identity, &mem, 100_000, 1000);
        let messages = assembler.assemble("current", &history, &[]);

        let has_tool_call = messages.iter().any(|m| !m.tool_calls.is_empty());
        let has_tool_result = messages.iter().any(|m| m.role == Role::Tool);
        assert!(has_tool_call);
        assert!(has_tool_result);
    }

    #[test]
    fn standalone_tool_message_is_dropped_when_its_assistant_turn_is_trimmed() {
        // The inverse orphan shape: the trim kept a `tool` message but cut
        // the assistant/tool_calls message that preceded it.
        let call = ToolCall::new("shell", serde_json::json!({"command": "echo hi"}));
        let tool_response = Message::tool_result(&call.id, "hi\n");

        let kept = drop_orphaned_partial_turns(vec![Message::user("earlier"), tool_response]);

        assert!(kept.iter().all(|m| m.role != Role::Tool));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].content, "earlier");
    }
}
