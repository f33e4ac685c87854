//! Anthropic Messages API provider.
//!
//! One HTTP call per `complete`; retries, backoff and circuit breaking live in
//! the gateway above this adapter.

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Client as ReqwestClient, StatusCode};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::IntelligenceConfig;
use crate::domain::ports::{
    IntelligenceProvider, IntelligenceRequest, ProviderError, ProviderResponse, TokenUsage,
};

const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

/// Pricing in budget units per million tokens.
#[derive(Debug, Clone, Copy)]
pub struct Pricing {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

impl Pricing {
    pub fn cost(&self, usage: TokenUsage) -> f64 {
        (usage.input_tokens as f64 * self.input_per_mtok
            + usage.output_tokens as f64 * self.output_per_mtok)
            / 1_000_000.0
    }
}

pub struct AnthropicProvider {
    http_client: ReqwestClient,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    pricing: Pricing,
    rate_limiter: DefaultDirectRateLimiter,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>, config: &IntelligenceConfig) -> DomainResult<Self> {
        let http_client = ReqwestClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(10)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| DomainError::ValidationFailed(format!("Failed to build HTTP client: {e}")))?;

        let rps = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            http_client,
            api_key: api_key.into(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            pricing: Pricing {
                input_per_mtok: config.input_cost_per_mtok,
                output_per_mtok: config.output_cost_per_mtok,
            },
            rate_limiter: RateLimiter::direct(Quota::per_second(rps)),
        })
    }
}

fn classify_send_error(err: &reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else if err.is_connect() || err.is_request() {
        ProviderError::ConnectionReset(err.to_string())
    } else {
        ProviderError::Other(err.to_string())
    }
}

fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: String) -> ProviderError {
    match status.as_u16() {
        429 => ProviderError::RateLimited { retry_after },
        408 => ProviderError::Timeout,
        401 | 403 => ProviderError::Unauthorized(body),
        400 | 404 | 413 | 422 => ProviderError::MalformedRequest(body),
        code if status.is_server_error() || code == 529 => ProviderError::Server {
            status: code,
            message: body,
        },
        code => ProviderError::Other(format!("unexpected status {code}: {body}")),
    }
}

#[async_trait]
impl IntelligenceProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    #[instrument(skip(self, request), fields(model = %self.model))]
    async fn complete(&self, request: &IntelligenceRequest) -> Result<ProviderResponse, ProviderError> {
        self.rate_limiter.until_ready().await;

        let body = MessagesRequest {
            model: &self.model,
            max_tokens: request.max_tokens.unwrap_or(self.max_tokens),
            system: request.system.as_deref(),
            messages: vec![Message {
                role: "user",
                content: &request.prompt,
            }],
        };

        let response = self
            .http_client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_send_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(classify_status(status, retry_after, body));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Other(format!("Failed to parse response: {e}")))?;

        let content = parsed
            .content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        let usage = TokenUsage {
            input_tokens: parsed.usage.input_tokens,
            output_tokens: parsed.usage.output_tokens,
        };
        let cost = self.pricing.cost(usage);
        debug!(input_tokens = usage.input_tokens, output_tokens = usage.output_tokens, cost, "Completion received");

        Ok(ProviderResponse {
            content,
            usage,
            cost,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    fn config(base_url: String) -> IntelligenceConfig {
        IntelligenceConfig {
            base_url,
            requests_per_second: 100,
            input_cost_per_mtok: 3.0,
            output_cost_per_mtok: 15.0,
            ..Default::default()
        }
    }

    fn success_body() -> String {
        serde_json::json!({
            "id": "msg_01",
            "type": "message",
            "role": "assistant",
            "content": [{ "type": "text", "text": "Plan: build it" }],
            "model": "claude-sonnet-4-5-20250929",
            "stop_reason": "end_turn",
            "usage": { "input_tokens": 1000, "output_tokens": 2000 }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_success_reports_content_and_cost() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .match_header("x-api-key", "test-key")
            .match_header("anthropic-version", API_VERSION)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(success_body())
            .create_async()
            .await;

        let provider = AnthropicProvider::new("test-key", &config(server.url())).unwrap();
        let response = provider.complete(&IntelligenceRequest::new("plan it")).await.unwrap();

        mock.assert_async().await;
        assert_eq!(response.content, "Plan: build it");
        assert_eq!(response.usage.output_tokens, 2000);
        // 1000 * 3 / 1e6 + 2000 * 15 / 1e6
        assert!((response.cost - 0.033).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let cases = [
            (429, true),
            (500, true),
            (529, true),
            (401, false),
            (400, false),
        ];
        for (status, transient) in cases {
            let mut server = Server::new_async().await;
            let _mock = server
                .mock("POST", "/v1/messages")
                .with_status(status)
                .with_body("{\"error\":\"x\"}")
                .create_async()
                .await;
            let provider = AnthropicProvider::new("k", &config(server.url())).unwrap();
            let err = provider.complete(&IntelligenceRequest::new("p")).await.unwrap_err();
            assert_eq!(err.is_transient(), transient, "status {status} -> {err:?}");
        }
    }

    #[tokio::test]
    async fn test_rate_limited_reads_retry_after() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/messages")
            .with_status(429)
            .with_header("retry-after", "7")
            .create_async()
            .await;
        let provider = AnthropicProvider::new("k", &config(server.url())).unwrap();
        let err = provider.complete(&IntelligenceRequest::new("p")).await.unwrap_err();
        assert_eq!(
            err,
            ProviderError::RateLimited {
                retry_after: Some(Duration::from_secs(7))
            }
        );
    }
}
