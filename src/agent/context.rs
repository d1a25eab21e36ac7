//! Ordered conversation log with the system-prompt invariant.
//!
//! The log begins with at most one system message, and tool-role messages
//! immediately follow the assistant message whose call they answer. The
//! context owns the canonical message order; the loop and compactor
//! mutate it only through these methods.

use crate::llm::{AssistantTurn, ChatMessage, Role};

#[derive(Debug, Clone, Default)]
pub struct ConversationContext {
    messages: Vec<ChatMessage>,
}

impl ConversationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::system(prompt)],
        }
    }

    pub fn from_messages(messages: Vec<ChatMessage>) -> Self {
        let mut ctx = Self::new();
        ctx.replace_messages(messages);
        ctx
    }

    /// Install or replace the system prompt, keeping it unique and first.
    pub fn set_system(&mut self, prompt: impl Into<String>) {
        match self.messages.first() {
            Some(m) if m.role == Role::System => self.messages[0] = ChatMessage::system(prompt),
            _ => self.messages.insert(0, ChatMessage::system(prompt)),
        }
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .first()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::user(content));
    }

    pub fn push_assistant(&mut self, turn: &AssistantTurn) {
        self.messages.push(turn.to_message());
    }

    /// Append a tool-role result answering `tool_call_id`. Tool messages
    /// always directly follow the assistant message that requested them.
    pub fn push_tool_result(&mut self, tool_call_id: impl Into<String>, content: impl Into<String>) {
        self.messages.push(ChatMessage::tool(tool_call_id, content));
    }

    pub fn push(&mut self, message: ChatMessage) {
        if message.role == Role::System {
            self.set_system(message.content);
        } else {
            self.messages.push(message);
        }
    }

    /// Replace the whole log, re-establishing the system invariant: the
    /// first system message (if any) leads, later ones are dropped.
    pub fn replace_messages(&mut self, messages: Vec<ChatMessage>) {
        let mut system: Option<ChatMessage> = None;
        let mut rest = Vec::with_capacity(messages.len());
        for message in messages {
            if message.role == Role::System {
                if system.is_none() {
                    system = Some(message);
                }
            } else {
                rest.push(message);
            }
        }
        self.messages = match system {
            Some(system) => std::iter::once(system).chain(rest).collect(),
            None => rest,
        };
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::FinishReason;

    #[test]
    fn system_prompt_is_unique_and_first() {
        let mut ctx = ConversationContext::with_system("v1");
        ctx.push_user("hello");
        ctx.set_system("v2");
        assert_eq!(ctx.system_prompt(), Some("v2"));
        assert_eq!(ctx.len(), 2);
    }

    #[test]
    fn set_system_inserts_when_absent() {
        let mut ctx = ConversationContext::new();
        ctx.push_user("q");
        ctx.set_system("s");
        assert_eq!(ctx.messages()[0].role, Role::System);
        assert_eq!(ctx.messages()[1].role, Role::User);
    }

    #[test]
    fn replace_messages_drops_stray_system_messages() {
        let mut ctx = ConversationContext::new();
        ctx.replace_messages(vec![
            ChatMessage::user("a"),
            ChatMessage::system("first"),
            ChatMessage::system("second"),
            ChatMessage::assistant("b"),
        ]);
        assert_eq!(ctx.system_prompt(), Some("first"));
        assert_eq!(ctx.len(), 3);
    }

    #[test]
    fn tool_result_follows_assistant() {
        let mut ctx = ConversationContext::with_system("s");
        ctx.push_user("read it");
        let turn = AssistantTurn {
            text: String::new(),
            tool_calls: vec![crate::llm::ToolCall {
                id: "c1".into(),
                name: "read_file".into(),
                arguments: "{}".into(),
            }],
            usage: None,
            finish_reason: FinishReason::ToolCalls,
        };
        ctx.push_assistant(&turn);
        ctx.push_tool_result("c1", "contents");

        let messages = ctx.messages();
        assert_eq!(messages[2].role, Role::Assistant);
        assert_eq!(messages[3].role, Role::Tool);
        assert_eq!(messages[3].tool_call_id.as_deref(), Some("c1"));
    }
}
