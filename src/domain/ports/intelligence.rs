//! Intelligence provider port - the external LLM capability.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// A single completion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntelligenceRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl IntelligenceRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            max_tokens: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Successful provider reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub content: String,
    pub usage: TokenUsage,
    /// Cost of this call in budget units.
    pub cost: f64,
}

/// Errors reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("Rate limited{}", .retry_after.map(|d| format!(" (retry after {}s)", d.as_secs())).unwrap_or_default())]
    RateLimited { retry_after: Option<Duration> },

    #[error("Request timed out")]
    Timeout,

    #[error("Connection reset: {0}")]
    ConnectionReset(String),

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Provider error: {0}")]
    Other(String),
}

impl ProviderError {
    /// Rate limits, timeouts, dropped connections and 5xx are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Timeout | Self::ConnectionReset(_) | Self::Server { .. }
        )
    }
}

#[async_trait]
pub trait IntelligenceProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn complete(&self, request: &IntelligenceRequest) -> Result<ProviderResponse, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::RateLimited { retry_after: None }.is_transient());
        assert!(ProviderError::Timeout.is_transient());
        assert!(ProviderError::ConnectionReset("reset by peer".into()).is_transient());
        assert!(ProviderError::Server {
            status: 503,
            message: "overloaded".into()
        }
        .is_transient());
        assert!(!ProviderError::Unauthorized("bad key".into()).is_transient());
        assert!(!ProviderError::MalformedRequest("bad json".into()).is_transient());
        assert!(!ProviderError::Other("?".into()).is_transient());
    }
}
