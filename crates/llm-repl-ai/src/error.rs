use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Failure classes shared by the transport and the completion service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmErrorCode {
    /// Connect, DNS, TLS or timeout failure. Reported with status 0.
    TransportFailure,
    /// 4xx other than 429. Never retried.
    ClientError,
    /// 429.
    RateLimited,
    /// 5xx.
    ServerError,
    /// The response arrived but its payload did not match the expected schema.
    ProtocolError,
    /// Missing credentials or an invalid local setting.
    ConfigurationError,
}

impl LlmErrorCode {
    /// Classifies an HTTP status code. Returns `None` for 2xx.
    pub fn from_status(status_code: u16) -> Option<Self> {
        match status_code {
            0 => Some(Self::TransportFailure),
            200..=299 => None,
            429 => Some(Self::RateLimited),
            400..=499 => Some(Self::ClientError),
            500..=599 => Some(Self::ServerError),
            _ => Some(Self::ProtocolError),
        }
    }

    /// Transport failures, rate limiting and server errors are transient.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::TransportFailure | Self::RateLimited | Self::ServerError
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TransportFailure => "transport_failure",
            Self::ClientError => "client_error",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::ProtocolError => "protocol_error",
            Self::ConfigurationError => "configuration_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmError {
    pub code: LlmErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl LlmError {
    pub fn new(code: LlmErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn as_compact_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"code\":\"{}\",\"message\":\"{}\"}}",
                self.code.as_str(),
                self.message.replace('\"', "\\\"")
            )
        })
    }
}

impl Display for LlmError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for LlmError {}
