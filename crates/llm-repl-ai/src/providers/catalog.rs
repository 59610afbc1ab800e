use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{LlmError, LlmErrorCode};
use crate::types::ModelInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Groq,
    Together,
    Ollama,
}

/// Static facts about one provider endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderProfile {
    pub name: &'static str,
    pub base_url: &'static str,
    pub default_model: &'static str,
    /// Environment variable holding the API key, if the provider needs one.
    pub api_key_env: Option<&'static str>,
    pub max_tokens_cap: usize,
}

const GROQ: ProviderProfile = ProviderProfile {
    name: "groq",
    base_url: "https://api.groq.com/openai/v1",
    default_model: "llama-3.1-70b-versatile",
    api_key_env: Some("GROQ_API_KEY"),
    max_tokens_cap: 8192,
};

const TOGETHER: ProviderProfile = ProviderProfile {
    name: "together",
    base_url: "https://api.together.xyz/v1",
    default_model: "meta-llama/Llama-2-70b-chat-hf",
    api_key_env: Some("TOGETHER_API_KEY"),
    max_tokens_cap: 4096,
};

const OLLAMA: ProviderProfile = ProviderProfile {
    name: "ollama",
    base_url: "http://localhost:11434/v1",
    default_model: "llama3.1",
    api_key_env: None,
    max_tokens_cap: 8192,
};

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [Self::Groq, Self::Together, Self::Ollama];

    pub fn profile(self) -> &'static ProviderProfile {
        match self {
            Self::Groq => &GROQ,
            Self::Together => &TOGETHER,
            Self::Ollama => &OLLAMA,
        }
    }

    pub fn name(self) -> &'static str {
        self.profile().name
    }

    pub fn requires_api_key(self) -> bool {
        self.profile().api_key_env.is_some()
    }

    /// Ordered model catalog. Built on each call; callers keep the copy.
    pub fn models(self) -> Vec<ModelInfo> {
        match self {
            Self::Groq => vec![
                ModelInfo::new("llama-3.1-70b-versatile", "Llama 3.1 70B", 131_072),
                ModelInfo::new("llama-3.1-8b-instant", "Llama 3.1 8B", 131_072),
                ModelInfo::new("mixtral-8x7b-32768", "Mixtral 8x7B", 32_768),
                ModelInfo::new("gemma2-9b-it", "Gemma 2 9B", 8_192),
            ],
            Self::Together => vec![
                ModelInfo::new("meta-llama/Llama-2-70b-chat-hf", "Llama 2 70B Chat", 4_096),
                ModelInfo::new(
                    "mistralai/Mixtral-8x7B-Instruct-v0.1",
                    "Mixtral 8x7B Instruct",
                    32_768,
                ),
            ],
            Self::Ollama => vec![
                ModelInfo::new("llama3.1", "Llama 3.1 (local)", 131_072),
                ModelInfo::new("mistral", "Mistral (local)", 32_768),
            ],
        }
    }

    pub fn find_model(self, model_id: &str) -> Option<ModelInfo> {
        self.models().into_iter().find(|model| model.id == model_id)
    }
}

impl Display for ProviderKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProviderKind {
    type Err = LlmError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == normalized)
            .ok_or_else(|| {
                LlmError::new(
                    LlmErrorCode::ConfigurationError,
                    format!("unknown provider '{value}' (expected groq, together or ollama)"),
                )
            })
    }
}
