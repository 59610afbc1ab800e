use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Response};
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::error::LlmErrorCode;
use crate::sse::{SseDecoder, StreamChunk};
use crate::transport_retry::{
    retry_with_backoff, tokio_sleep, DEFAULT_RETRY_COUNT, DEFAULT_RETRY_DELAY_MS,
};

pub type Headers = BTreeMap<String, String>;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const CONTENT_TYPE: &str = "Content-Type";
const ACCEPT: &str = "Accept";
const AUTHORIZATION: &str = "Authorization";
const APPLICATION_JSON: &str = "application/json";
const EVENT_STREAM: &str = "text/event-stream";

/// Outcome of one HTTP exchange, including retries. Transport failures use
/// status 0; nothing in this module returns an `Err`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HttpResponse {
    pub status_code: u16,
    pub body: String,
    pub headers: Headers,
    pub success: bool,
    pub error: String,
}

impl HttpResponse {
    pub fn transport_failure(error: impl Into<String>) -> Self {
        Self {
            status_code: 0,
            body: String::new(),
            headers: Headers::new(),
            success: false,
            error: error.into(),
        }
    }

    pub fn from_status(status_code: u16, body: String, headers: Headers) -> Self {
        let success = (200..300).contains(&status_code);
        let error = if success {
            String::new()
        } else {
            format!("HTTP {status_code}: {body}")
        };
        Self {
            status_code,
            body,
            headers,
            success,
            error,
        }
    }

    pub fn failure_code(&self) -> Option<LlmErrorCode> {
        LlmErrorCode::from_status(self.status_code)
    }

    pub fn is_retryable(&self) -> bool {
        !self.success && self.failure_code().is_some_and(LlmErrorCode::is_retryable)
    }
}

/// Runtime-adjustable transport settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub bearer_token: Option<String>,
    /// Applied to connect, whole-request and per-chunk stream reads.
    pub timeout: Duration,
    /// Total attempts per call, not extra retries.
    pub retry_count: usize,
    pub retry_delay_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bearer_token: None,
            timeout: DEFAULT_TIMEOUT,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

/// JSON-over-HTTP client bound to one base URL.
///
/// Setters take `&mut self`: configure before sharing. [`HttpClient::post_async`]
/// works on a clone, so later reconfiguration never reaches calls in flight.
#[derive(Debug, Clone)]
pub struct HttpClient {
    base_url: String,
    config: TransportConfig,
    client: Client,
}

enum StreamAttempt {
    Open(Response),
    Failed(HttpResponse),
}

impl StreamAttempt {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Open(_) => false,
            Self::Failed(response) => response.is_retryable(),
        }
    }
}

impl HttpClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_config(base_url, TransportConfig::default())
    }

    pub fn with_config(base_url: impl Into<String>, config: TransportConfig) -> Self {
        let base_url = base_url.into();
        let client = build_client(&base_url, config.timeout);
        Self {
            base_url,
            config,
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// An empty token disables the `Authorization` header.
    pub fn set_bearer_token(&mut self, token: Option<String>) {
        self.config.bearer_token = token.filter(|token| !token.trim().is_empty());
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.config.timeout = timeout;
        self.client = build_client(&self.base_url, timeout);
    }

    pub fn set_retry_count(&mut self, retry_count: usize) {
        self.config.retry_count = retry_count;
    }

    pub fn set_retry_delay_ms(&mut self, retry_delay_ms: u64) {
        self.config.retry_delay_ms = retry_delay_ms;
    }

    pub fn url_for(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    /// Caller headers merged with the required ones, compared
    /// case-insensitively. `Content-Type` and `Accept` always win;
    /// `Authorization` wins only when a bearer token is configured.
    pub fn request_headers(&self, caller: &Headers, accept: &str) -> Headers {
        let token = self.config.bearer_token.as_deref();
        let mut merged: Headers = caller
            .iter()
            .filter(|(name, _)| {
                let required = [CONTENT_TYPE, ACCEPT]
                    .iter()
                    .any(|required| name.eq_ignore_ascii_case(required));
                let replaced_auth = token.is_some() && name.eq_ignore_ascii_case(AUTHORIZATION);
                !required && !replaced_auth
            })
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        merged.insert(CONTENT_TYPE.to_string(), APPLICATION_JSON.to_string());
        merged.insert(ACCEPT.to_string(), accept.to_string());
        if let Some(token) = token {
            merged.insert(AUTHORIZATION.to_string(), format!("Bearer {token}"));
        }
        merged
    }

    pub async fn post(&self, path: &str, body: &Value, headers: &Headers) -> HttpResponse {
        let url = self.url_for(path);
        let header_map = to_header_map(&self.request_headers(headers, APPLICATION_JSON));
        let payload = body.to_string();
        self.with_retry(|_| {
            self.exchange(Method::POST, &url, Some(payload.as_str()), &header_map)
        })
        .await
    }

    pub async fn get(&self, path: &str, headers: &Headers) -> HttpResponse {
        let url = self.url_for(path);
        let header_map = to_header_map(&self.request_headers(headers, APPLICATION_JSON));
        self.with_retry(|_| self.exchange(Method::GET, &url, None, &header_map))
            .await
    }

    /// Runs [`HttpClient::post`] on a spawned task. Must be called from
    /// within a tokio runtime. Aborting the handle is best effort.
    pub fn post_async(
        &self,
        path: impl Into<String>,
        body: Value,
        headers: Headers,
    ) -> JoinHandle<HttpResponse> {
        let client = self.clone();
        let path = path.into();
        tokio::spawn(async move { client.post(&path, &body, &headers).await })
    }

    /// Posts with `Accept: text/event-stream` and feeds the body through
    /// [`SseDecoder`] as it arrives. `on_chunk` sees zero or more
    /// `(content, false)` calls and then exactly one `(_, true)`, whatever
    /// the outcome. Retries happen only before any body is delivered.
    pub async fn post_stream<F>(
        &self,
        path: &str,
        body: &Value,
        mut on_chunk: F,
        headers: &Headers,
    ) -> HttpResponse
    where
        F: FnMut(&str, bool),
    {
        let url = self.url_for(path);
        let header_map = to_header_map(&self.request_headers(headers, EVENT_STREAM));
        let payload = body.to_string();

        let opened = retry_with_backoff(
            self.config.retry_count,
            self.config.retry_delay_ms,
            |_| self.open_stream(&url, &payload, &header_map),
            StreamAttempt::is_retryable,
            tokio_sleep,
        )
        .await;

        let mut response = match opened {
            StreamAttempt::Open(response) => response,
            StreamAttempt::Failed(failure) => {
                on_chunk("", true);
                return failure;
            }
        };

        let status_code = response.status().as_u16();
        let response_headers = collect_headers(response.headers());
        let mut decoder = SseDecoder::new();
        let mut read_error = String::new();

        loop {
            let next = tokio::time::timeout(self.config.timeout, response.chunk()).await;
            let chunks = match next {
                Ok(Ok(Some(bytes))) => decoder.push(&bytes),
                Ok(Ok(None)) => {
                    let tail = decoder.finish();
                    deliver(&mut on_chunk, tail);
                    break;
                }
                Ok(Err(error)) => {
                    read_error = format!("Stream read failed from {url}: {error}");
                    break;
                }
                Err(_) => {
                    read_error = format!(
                        "Stream read timed out after {}s from {url}",
                        self.config.timeout.as_secs()
                    );
                    break;
                }
            };
            deliver(&mut on_chunk, chunks);
            if decoder.is_finished() {
                break;
            }
        }

        if !decoder.is_finished() {
            on_chunk("", true);
        }
        if !read_error.is_empty() {
            tracing::warn!(%url, error = %read_error, "stream ended early");
        }

        HttpResponse {
            status_code,
            body: String::new(),
            headers: response_headers,
            success: true,
            error: read_error,
        }
    }

    async fn with_retry<F, Fut>(&self, operation: F) -> HttpResponse
    where
        F: FnMut(usize) -> Fut,
        Fut: std::future::Future<Output = HttpResponse>,
    {
        retry_with_backoff(
            self.config.retry_count,
            self.config.retry_delay_ms,
            operation,
            HttpResponse::is_retryable,
            tokio_sleep,
        )
        .await
    }

    async fn exchange(
        &self,
        method: Method,
        url: &str,
        payload: Option<&str>,
        headers: &HeaderMap,
    ) -> HttpResponse {
        let response = match self.send(method.clone(), url, payload, headers, true).await {
            Ok(response) => response,
            Err(failure) => return failure,
        };
        let status_code = response.status().as_u16();
        let response_headers = collect_headers(response.headers());
        match response.text().await {
            Ok(body) => {
                tracing::debug!(%method, url, status_code, "http exchange finished");
                HttpResponse::from_status(status_code, body, response_headers)
            }
            Err(error) => HttpResponse::transport_failure(format!(
                "Failed to read response from {url}: {error}"
            )),
        }
    }

    async fn open_stream(&self, url: &str, payload: &str, headers: &HeaderMap) -> StreamAttempt {
        let response = match self.send(Method::POST, url, Some(payload), headers, false).await {
            Ok(response) => response,
            Err(failure) => return StreamAttempt::Failed(failure),
        };
        if response.status().is_success() {
            return StreamAttempt::Open(response);
        }

        let status_code = response.status().as_u16();
        let response_headers = collect_headers(response.headers());
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unable to read error body".to_string());
        StreamAttempt::Failed(HttpResponse::from_status(
            status_code,
            body,
            response_headers,
        ))
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        payload: Option<&str>,
        headers: &HeaderMap,
        whole_request_timeout: bool,
    ) -> Result<Response, HttpResponse> {
        let timeout = self.config.timeout;
        let mut request = self.client.request(method, url).headers(headers.clone());
        if let Some(payload) = payload {
            request = request.body(payload.to_string());
        }
        if whole_request_timeout {
            request = request.timeout(timeout);
        }
        // Streams bound only the wait for response headers here; body reads
        // are bounded per chunk.
        match tokio::time::timeout(timeout, request.send()).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(error)) => {
                tracing::debug!(url, %error, "http request failed");
                Err(HttpResponse::transport_failure(format!(
                    "Connection failed to {url}: {error}"
                )))
            }
            Err(_) => Err(HttpResponse::transport_failure(format!(
                "Connection failed to {url}: timed out after {}s",
                timeout.as_secs()
            ))),
        }
    }
}

fn deliver<F>(on_chunk: &mut F, chunks: Vec<StreamChunk>)
where
    F: FnMut(&str, bool),
{
    for chunk in chunks {
        on_chunk(&chunk.content, chunk.is_done);
    }
}

pub(crate) fn join_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{path}")
    }
}

fn build_client(base_url: &str, timeout: Duration) -> Client {
    let mut builder = Client::builder().connect_timeout(timeout);
    if is_loopback_base_url(base_url) {
        builder = builder.no_proxy();
    }
    builder.build().unwrap_or_else(|error| {
        tracing::warn!(%error, "falling back to default http client");
        Client::new()
    })
}

pub(crate) fn is_loopback_base_url(base_url: &str) -> bool {
    let Ok(url) = reqwest::Url::parse(base_url) else {
        return false;
    };
    let Some(host) = url.host_str() else {
        return false;
    };
    host.eq_ignore_ascii_case("localhost") || host == "127.0.0.1" || host == "[::1]"
}

fn to_header_map(headers: &Headers) -> HeaderMap {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => tracing::warn!(header = %name, "skipping invalid request header"),
        }
    }
    map
}

fn collect_headers(headers: &HeaderMap) -> Headers {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}
