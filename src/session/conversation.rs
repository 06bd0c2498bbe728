use serde::Serialize;

use crate::models::{ Message, Role };

/// A display row: who said it and what they said.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedTurn {
    pub role: Role,
    pub content: String,
}

/// Ordered, append-only log of messages. It is both the transcript and the
/// literal request payload, so order is never changed and nothing is merged.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub(crate) fn reset(&mut self) {
        self.messages = Vec::new();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn render(&self) -> Vec<RenderedTurn> {
        self.messages
            .iter()
            .map(|m| RenderedTurn {
                role: m.role(),
                content: m.content().to_string(),
            })
            .collect()
    }

    /// `User: ...` / `Assistant: ...` lines, one per message.
    pub fn transcript(&self) -> String {
        self.messages
            .iter()
            .map(|m| format!("{}: {}", m.role(), m.content()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
