//! Mock intelligence provider.
//!
//! Used when no API credential is configured, and by tests to script
//! provider behaviour call by call.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::domain::ports::{
    IntelligenceProvider, IntelligenceRequest, ProviderError, ProviderResponse, TokenUsage,
};

/// Mock response configuration.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub content: String,
    pub cost: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self {
            content: "Mock response.".to_string(),
            cost: 0.0,
            input_tokens: 100,
            output_tokens: 50,
        }
    }
}

impl MockResponse {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    fn into_response(self) -> ProviderResponse {
        ProviderResponse {
            content: self.content,
            usage: TokenUsage {
                input_tokens: self.input_tokens,
                output_tokens: self.output_tokens,
            },
            cost: self.cost,
        }
    }
}

/// Provider that replays scripted outcomes, then falls back to a default.
pub struct MockIntelligenceProvider {
    script: Mutex<VecDeque<Result<MockResponse, ProviderError>>>,
    default_response: MockResponse,
    calls: AtomicUsize,
}

impl MockIntelligenceProvider {
    pub fn new() -> Self {
        Self::with_default_response(MockResponse::default())
    }

    pub fn with_default_response(response: MockResponse) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default_response: response,
            calls: AtomicUsize::new(0),
        }
    }

    /// Queue outcomes returned by the next calls, in order.
    pub fn with_script(self, outcomes: impl IntoIterator<Item = Result<MockResponse, ProviderError>>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.extend(outcomes);
        }
        self
    }

    pub fn push(&self, outcome: Result<MockResponse, ProviderError>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(outcome);
        }
    }

    /// Number of times `complete` was called.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockIntelligenceProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IntelligenceProvider for MockIntelligenceProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn complete(&self, _request: &IntelligenceRequest) -> Result<ProviderResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match next {
            Some(outcome) => outcome.map(MockResponse::into_response),
            None => Ok(self.default_response.clone().into_response()),
        }
    }
}
