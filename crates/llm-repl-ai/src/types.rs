use std::fmt::{Display, Formatter};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::LlmErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Unrecognized role strings read as `User`.
    pub fn from_wire(role: &str) -> Self {
        match role {
            "system" => Self::System,
            "assistant" => Self::Assistant,
            _ => Self::User,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::System => "System",
            Self::User => "User",
            Self::Assistant => "Assistant",
        }
    }
}

impl Display for MessageRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MessageRole {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageRole {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let role = String::deserialize(deserializer)?;
        Ok(Self::from_wire(&role))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

/// Normalized result of one completion call.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    pub success: bool,
    pub error: String,
    pub tokens_used: u64,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<LlmErrorCode>,
}

impl CompletionResponse {
    pub fn succeeded(content: impl Into<String>, tokens_used: u64, model: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            success: true,
            error: String::new(),
            tokens_used,
            model: model.into(),
            error_code: None,
        }
    }

    pub fn failed(
        code: Option<LlmErrorCode>,
        error: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            content: String::new(),
            success: false,
            error: error.into(),
            tokens_used: 0,
            model: model.into(),
            error_code: code,
        }
    }
}

/// Static catalog entry for a model a provider serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub context_length: usize,
    pub supports_streaming: bool,
}

impl ModelInfo {
    pub fn new(id: &str, name: &str, context_length: usize) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            context_length,
            supports_streaming: true,
        }
    }
}
