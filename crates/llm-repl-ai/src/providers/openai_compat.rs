use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use super::catalog::ProviderKind;
use crate::conversation::Conversation;
use crate::error::{LlmError, LlmErrorCode};
use crate::service::{ChunkSink, LlmService, ServiceSettings, MAX_TEMPERATURE, MIN_TEMPERATURE};
use crate::transport::{Headers, HttpClient, HttpResponse};
use crate::types::{CompletionResponse, ModelInfo};

pub const CHAT_COMPLETIONS_PATH: &str = "/chat/completions";
pub const MODELS_PATH: &str = "/models";

const INVALID_RESPONSE_FORMAT: &str = "Invalid response format";

/// Chat-completions client for any endpoint speaking the OpenAI wire format.
#[derive(Debug, Clone)]
pub struct OpenAiCompatService {
    provider: ProviderKind,
    http: HttpClient,
    current_model: String,
    temperature: f64,
    max_tokens: usize,
    system_prompt: String,
}

impl OpenAiCompatService {
    pub fn new(settings: ServiceSettings) -> Self {
        let profile = settings.provider.profile();
        let base_url = settings
            .base_url
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| profile.base_url.to_string());
        let mut transport = settings.transport;
        transport.bearer_token = settings
            .api_key
            .or(transport.bearer_token)
            .filter(|key| !key.trim().is_empty());

        let mut service = Self {
            provider: settings.provider,
            http: HttpClient::with_config(base_url, transport),
            current_model: settings
                .model
                .filter(|model| !model.trim().is_empty())
                .unwrap_or_else(|| profile.default_model.to_string()),
            temperature: crate::service::DEFAULT_TEMPERATURE,
            max_tokens: crate::service::DEFAULT_MAX_TOKENS,
            system_prompt: settings.system_prompt,
        };
        service.set_temperature(settings.temperature);
        service.set_max_tokens(settings.max_tokens);
        service
    }

    pub fn http_client(&self) -> &HttpClient {
        &self.http
    }

    pub fn http_client_mut(&mut self) -> &mut HttpClient {
        &mut self.http
    }

    pub fn build_request(&self, conversation: &Conversation, stream: bool) -> Value {
        json!({
            "model": self.current_model,
            "messages": conversation.to_document(),
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "stream": stream,
        })
    }

    /// Maps a non-streaming exchange onto [`CompletionResponse`].
    pub fn parse_response(&self, response: &HttpResponse) -> CompletionResponse {
        if !response.success {
            return CompletionResponse::failed(
                response.failure_code(),
                response.error.clone(),
                &self.current_model,
            );
        }

        let document: Value = match serde_json::from_str(&response.body) {
            Ok(document) => document,
            Err(error) => {
                return CompletionResponse::failed(
                    Some(LlmErrorCode::ProtocolError),
                    format!("JSON parsing error: {error}"),
                    &self.current_model,
                );
            }
        };

        let content = document
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(Value::as_str);
        let Some(content) = content else {
            tracing::debug!(body = %response.body, "completion response missing choices[0].message.content");
            return CompletionResponse::failed(
                Some(LlmErrorCode::ProtocolError),
                INVALID_RESPONSE_FORMAT,
                &self.current_model,
            );
        };

        let tokens_used = document
            .get("usage")
            .and_then(|usage| usage.get("total_tokens"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        CompletionResponse::succeeded(content, tokens_used, &self.current_model)
    }

    fn prompt_conversation(&self, prompt: &str) -> Conversation {
        let mut conversation = Conversation::new();
        if !self.system_prompt.is_empty() {
            conversation.set_system_prompt(self.system_prompt.as_str());
        }
        conversation.add_user(prompt);
        conversation
    }

    fn missing_credentials(&self) -> Option<CompletionResponse> {
        let env = self.provider.profile().api_key_env?;
        if self.http.config().bearer_token.is_some() {
            return None;
        }
        Some(CompletionResponse::failed(
            Some(LlmErrorCode::ConfigurationError),
            format!(
                "Missing API key for provider '{}' (set {env})",
                self.provider.name()
            ),
            &self.current_model,
        ))
    }
}

#[async_trait]
impl LlmService for OpenAiCompatService {
    fn provider(&self) -> ProviderKind {
        self.provider
    }

    async fn complete(&self, conversation: &Conversation) -> CompletionResponse {
        if let Some(failure) = self.missing_credentials() {
            return failure;
        }
        let request = self.build_request(conversation, false);
        tracing::debug!(provider = self.provider.name(), payload = %request, "completion request");
        let response = self
            .http
            .post(CHAT_COMPLETIONS_PATH, &request, &Headers::new())
            .await;
        let completion = self.parse_response(&response);
        if !completion.success {
            tracing::warn!(
                provider = self.provider.name(),
                status = response.status_code,
                error = %completion.error,
                "completion failed"
            );
        }
        completion
    }

    async fn complete_prompt(&self, prompt: &str) -> CompletionResponse {
        let conversation = self.prompt_conversation(prompt);
        self.complete(&conversation).await
    }

    fn complete_async(&self, conversation: Conversation) -> JoinHandle<CompletionResponse> {
        let service = self.clone();
        tokio::spawn(async move { service.complete(&conversation).await })
    }

    async fn stream_complete(
        &self,
        conversation: &Conversation,
        on_chunk: &mut ChunkSink<'_>,
    ) -> CompletionResponse {
        if let Some(failure) = self.missing_credentials() {
            on_chunk("", true);
            return failure;
        }
        let request = self.build_request(conversation, true);
        tracing::debug!(provider = self.provider.name(), payload = %request, "streaming request");
        let response = self
            .http
            .post_stream(CHAT_COMPLETIONS_PATH, &request, &mut *on_chunk, &Headers::new())
            .await;

        if !response.success {
            return CompletionResponse::failed(
                response.failure_code(),
                response.error,
                &self.current_model,
            );
        }
        if !response.error.is_empty() {
            return CompletionResponse::failed(
                Some(LlmErrorCode::TransportFailure),
                response.error,
                &self.current_model,
            );
        }
        CompletionResponse::succeeded(String::new(), 0, &self.current_model)
    }

    async fn stream_complete_prompt(
        &self,
        prompt: &str,
        on_chunk: &mut ChunkSink<'_>,
    ) -> CompletionResponse {
        let conversation = self.prompt_conversation(prompt);
        self.stream_complete(&conversation, on_chunk).await
    }

    fn available_models(&self) -> Vec<ModelInfo> {
        self.provider.models()
    }

    /// Probes `GET /models`.
    async fn is_available(&self) -> bool {
        let response = self.http.get(MODELS_PATH, &Headers::new()).await;
        if !response.success {
            tracing::warn!(
                provider = self.provider.name(),
                error = %response.error,
                "availability probe failed"
            );
        }
        response.success
    }

    /// Accepts any non-empty id. Ids outside the built-in catalog are logged
    /// and left for the provider to validate.
    fn set_model(&mut self, model_id: &str) -> Result<(), LlmError> {
        let model_id = model_id.trim();
        if model_id.is_empty() {
            return Err(LlmError::new(
                LlmErrorCode::ConfigurationError,
                "model id must not be empty",
            ));
        }
        if self.provider.find_model(model_id).is_none() {
            tracing::warn!(
                provider = self.provider.name(),
                model = model_id,
                "model is not in the built-in catalog"
            );
        }
        self.current_model = model_id.to_string();
        Ok(())
    }

    fn current_model(&self) -> &str {
        &self.current_model
    }

    fn set_temperature(&mut self, temperature: f64) {
        if temperature.is_nan() {
            tracing::warn!("ignoring NaN temperature");
            return;
        }
        self.temperature = temperature.clamp(MIN_TEMPERATURE, MAX_TEMPERATURE);
    }

    fn temperature(&self) -> f64 {
        self.temperature
    }

    fn set_max_tokens(&mut self, max_tokens: usize) {
        self.max_tokens = max_tokens.min(self.provider.profile().max_tokens_cap);
    }

    fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    fn set_system_prompt(&mut self, prompt: &str) {
        self.system_prompt = prompt.to_string();
    }

    fn system_prompt(&self) -> &str {
        &self.system_prompt
    }
}
