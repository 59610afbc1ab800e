//! Ordered chat log with a length-based token budget.

use serde_json::{json, Value};

use crate::error::{LlmError, LlmErrorCode};
use crate::types::{Message, MessageRole};

/// Messages kept by [`Conversation::truncate_to_token_limit`] when callers
/// have no stronger preference.
pub const DEFAULT_KEEP_RECENT: usize = 10;

/// Characters per estimated token.
const CHARS_PER_TOKEN: usize = 4;

/// Insertion order is wire order. At most one system message is expected, at
/// index 0, but only [`Conversation::set_system_prompt`] enforces that.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn add_message(&mut self, role: MessageRole, content: impl Into<String>) {
        self.messages.push(Message::new(role, content));
    }

    pub fn add_system(&mut self, content: impl Into<String>) {
        self.add_message(MessageRole::System, content);
    }

    pub fn add_user(&mut self, content: impl Into<String>) {
        self.add_message(MessageRole::User, content);
    }

    pub fn add_assistant(&mut self, content: impl Into<String>) {
        self.add_message(MessageRole::Assistant, content);
    }

    /// Replaces a leading system message in place, or inserts one at index 0.
    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        let prompt = prompt.into();
        match self.messages.first_mut() {
            Some(first) if first.role == MessageRole::System => first.content = prompt,
            _ => self.messages.insert(0, Message::system(prompt)),
        }
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .first()
            .filter(|message| message.role == MessageRole::System)
            .map(|message| message.content.as_str())
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Removes and returns the last message.
    pub fn pop(&mut self) -> Option<Message> {
        self.messages.pop()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Sum of `chars / 4` per message. This is a heuristic, not a tokenizer:
    /// it only needs to be cheap and monotonic in message length.
    pub fn estimate_tokens(&self) -> usize {
        self.messages
            .iter()
            .map(|message| message.content.chars().count() / CHARS_PER_TOKEN)
            .sum()
    }

    /// Keeps the leading system message (if any) plus the last `keep_recent`
    /// remaining messages once the estimate exceeds `max_tokens`.
    ///
    /// This is a count-based cut. The kept tail may still exceed `max_tokens`.
    pub fn truncate_to_token_limit(&mut self, max_tokens: usize, keep_recent: usize) {
        if self.estimate_tokens() <= max_tokens {
            return;
        }

        let has_system_head = self
            .messages
            .first()
            .is_some_and(|message| message.role == MessageRole::System);
        let rest_start = usize::from(has_system_head);
        let tail_start = self
            .messages
            .len()
            .saturating_sub(keep_recent)
            .max(rest_start);

        let before = self.messages.len();
        self.messages.drain(rest_start..tail_start);
        tracing::debug!(
            before,
            after = self.messages.len(),
            max_tokens,
            keep_recent,
            "conversation truncated"
        );
    }

    /// `[System] …` / `[User] …` / `[Assistant] …`, one message per line.
    pub fn transcript(&self) -> String {
        let mut out = String::new();
        for message in &self.messages {
            out.push('[');
            out.push_str(message.role.label());
            out.push_str("] ");
            out.push_str(&message.content);
            out.push('\n');
        }
        out
    }

    /// Array of `{role, content}` in message order.
    pub fn to_document(&self) -> Value {
        Value::Array(
            self.messages
                .iter()
                .map(|message| json!({ "role": message.role.as_str(), "content": message.content }))
                .collect(),
        )
    }

    /// Inverse of [`Conversation::to_document`]. A missing or unknown role
    /// reads as `user`; a missing or non-string `content` is an error.
    pub fn from_document(document: &Value) -> Result<Self, LlmError> {
        let entries = document.as_array().ok_or_else(|| {
            LlmError::new(
                LlmErrorCode::ProtocolError,
                "conversation document must be an array",
            )
        })?;

        let mut messages = Vec::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            let content = entry
                .get("content")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    LlmError::new(
                        LlmErrorCode::ProtocolError,
                        format!("conversation entry {index} has no string content"),
                    )
                    .with_details(entry.clone())
                })?;
            let role = entry
                .get("role")
                .and_then(Value::as_str)
                .map(MessageRole::from_wire)
                .unwrap_or(MessageRole::User);
            messages.push(Message::new(role, content));
        }
        Ok(Self { messages })
    }
}
