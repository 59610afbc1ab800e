use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::conversation::Conversation;
use crate::error::LlmError;
use crate::providers::{OpenAiCompatService, ProviderKind};
use crate::transport::TransportConfig;
use crate::types::{CompletionResponse, ModelInfo};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_MAX_TOKENS: usize = 2048;
pub const MIN_TEMPERATURE: f64 = 0.0;
pub const MAX_TEMPERATURE: f64 = 2.0;

/// Push consumer for streamed deltas: `(content, false)` zero or more times,
/// then `(_, true)` exactly once.
pub type ChunkSink<'a> = dyn FnMut(&str, bool) + Send + 'a;

/// Capabilities every chat-completion backend offers to a session.
#[async_trait]
pub trait LlmService: Send + Sync {
    fn provider(&self) -> ProviderKind;

    async fn complete(&self, conversation: &Conversation) -> CompletionResponse;

    /// One-turn completion: configured system prompt (when non-empty) plus
    /// `prompt` as the user message.
    async fn complete_prompt(&self, prompt: &str) -> CompletionResponse;

    /// Runs [`LlmService::complete`] on a spawned task.
    fn complete_async(&self, conversation: Conversation) -> JoinHandle<CompletionResponse>;

    /// Streams a completion into `on_chunk`. The returned response carries the
    /// outcome but no content; callers accumulate the deltas themselves.
    async fn stream_complete(
        &self,
        conversation: &Conversation,
        on_chunk: &mut ChunkSink<'_>,
    ) -> CompletionResponse;

    async fn stream_complete_prompt(
        &self,
        prompt: &str,
        on_chunk: &mut ChunkSink<'_>,
    ) -> CompletionResponse;

    fn available_models(&self) -> Vec<ModelInfo>;

    async fn is_available(&self) -> bool;

    fn set_model(&mut self, model_id: &str) -> Result<(), LlmError>;

    fn current_model(&self) -> &str;

    fn set_temperature(&mut self, temperature: f64);

    fn temperature(&self) -> f64;

    fn set_max_tokens(&mut self, max_tokens: usize);

    fn max_tokens(&self) -> usize;

    fn set_system_prompt(&mut self, prompt: &str);

    fn system_prompt(&self) -> &str;
}

/// Session-start settings handed over by the config loader.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSettings {
    pub provider: ProviderKind,
    pub api_key: Option<String>,
    /// Overrides the provider's default endpoint.
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub temperature: f64,
    pub max_tokens: usize,
    pub system_prompt: String,
    pub transport: TransportConfig,
}

impl ServiceSettings {
    pub fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            api_key: None,
            base_url: None,
            model: None,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            transport: TransportConfig::default(),
        }
    }
}

/// Selects the backend variant for `settings.provider`.
pub fn create_service(settings: ServiceSettings) -> Box<dyn LlmService> {
    tracing::info!(
        provider = settings.provider.name(),
        model = settings.model.as_deref().unwrap_or(settings.provider.profile().default_model),
        "creating completion service"
    );
    match settings.provider {
        ProviderKind::Groq | ProviderKind::Together | ProviderKind::Ollama => {
            Box::new(OpenAiCompatService::new(settings))
        }
    }
}
