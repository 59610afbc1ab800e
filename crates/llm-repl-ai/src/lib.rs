//! Transport, stream decoding and conversation state for OpenAI-compatible
//! chat-completion clients.

mod conversation;
mod error;
mod providers;
mod service;
mod sse;
mod transport;
mod transport_retry;
mod types;

pub use conversation::{Conversation, DEFAULT_KEEP_RECENT};
pub use error::{LlmError, LlmErrorCode};
pub use providers::{
    OpenAiCompatService, ProviderKind, ProviderProfile, CHAT_COMPLETIONS_PATH, MODELS_PATH,
};
pub use service::{
    create_service, ChunkSink, LlmService, ServiceSettings, DEFAULT_MAX_TOKENS,
    DEFAULT_SYSTEM_PROMPT, DEFAULT_TEMPERATURE, MAX_TEMPERATURE, MIN_TEMPERATURE,
};
pub use sse::{decode_sse, parse_delta_content, SseDecoder, StreamChunk, DATA_PREFIX, DONE_SENTINEL};
pub use transport::{Headers, HttpClient, HttpResponse, TransportConfig, DEFAULT_TIMEOUT};
pub use transport_retry::{backoff_delay, DEFAULT_RETRY_COUNT, DEFAULT_RETRY_DELAY_MS};
pub use types::{CompletionResponse, Message, MessageRole, ModelInfo};
