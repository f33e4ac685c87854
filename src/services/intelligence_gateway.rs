//! Retrying, budget-limited, circuit-broken caller of the intelligence
//! capability.
//!
//! The gateway never touches a manifest. It reports the cost of a call and
//! the caller decides whether to charge it.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::domain::errors::DomainError;
use crate::domain::models::Phase;
use crate::domain::ports::{IntelligenceProvider, IntelligenceRequest, ProviderError, TokenUsage};
use crate::services::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::services::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    #[error("Budget exceeded: remaining {remaining:.4}, required {required:.4}")]
    BudgetExceeded { remaining: f64, required: f64 },

    /// The call went through but cost more than the caller could afford.
    /// `cost` was still spent.
    #[error("Call cost {cost:.4} exceeds remaining budget {remaining:.4}")]
    CostOverrun { remaining: f64, cost: f64 },

    #[error("Circuit open, retry after {}s", .retry_after.as_secs())]
    CircuitOpen { retry_after: Duration },

    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: ProviderError },

    #[error("Permanent provider error: {0}")]
    Permanent(ProviderError),
}

impl GatewayError {
    /// Spend the failed call still incurred.
    pub fn spent(&self) -> f64 {
        match self {
            Self::CostOverrun { cost, .. } => *cost,
            _ => 0.0,
        }
    }

    /// Surface as a domain error for the step running in `phase`.
    pub fn into_domain(self, phase: Phase) -> DomainError {
        match self {
            Self::BudgetExceeded { remaining, required } => {
                DomainError::BudgetExceeded { remaining, required }
            }
            Self::CostOverrun { remaining, cost } => DomainError::BudgetExceeded {
                remaining,
                required: cost,
            },
            other => DomainError::PhaseFailed {
                phase,
                reason: other.to_string(),
            },
        }
    }
}

/// A completed call.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayResponse {
    pub content: String,
    pub usage: TokenUsage,
    pub cost: f64,
    pub attempts: u32,
}

pub struct IntelligenceGateway {
    provider: Arc<dyn IntelligenceProvider>,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
}

impl IntelligenceGateway {
    pub fn new(provider: Arc<dyn IntelligenceProvider>, breaker: CircuitBreaker, retry: RetryPolicy) -> Self {
        Self {
            provider,
            breaker,
            retry,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Call the provider, retrying transient failures.
    ///
    /// Fails without calling out when `budget_remaining <= 0` or the circuit
    /// is open. A response costing more than `budget_remaining` is rejected
    /// with `CostOverrun`, which still reports the spend.
    #[instrument(skip(self, request), fields(provider = self.provider.name()))]
    pub async fn invoke(
        &self,
        request: &IntelligenceRequest,
        budget_remaining: f64,
    ) -> Result<GatewayResponse, GatewayError> {
        if budget_remaining <= 0.0 {
            return Err(GatewayError::BudgetExceeded {
                remaining: budget_remaining,
                required: 0.0,
            });
        }

        let max_attempts = self.retry.max_attempts();
        let mut last = None;
        for attempt in 1..=max_attempts {
            self.breaker
                .try_acquire()
                .map_err(|rejected| GatewayError::CircuitOpen {
                    retry_after: rejected.retry_after,
                })?;

            match self.provider.complete(request).await {
                Ok(response) => {
                    self.breaker.record_success();
                    if response.cost > budget_remaining {
                        warn!(cost = response.cost, budget_remaining, "Call cost exceeds remaining budget");
                        return Err(GatewayError::CostOverrun {
                            remaining: budget_remaining,
                            cost: response.cost,
                        });
                    }
                    debug!(attempt, cost = response.cost, "Intelligence call succeeded");
                    return Ok(GatewayResponse {
                        content: response.content,
                        usage: response.usage,
                        cost: response.cost,
                        attempts: attempt,
                    });
                }
                Err(err) if err.is_transient() => {
                    self.breaker.record_failure();
                    if attempt < max_attempts {
                        let hint = match &err {
                            ProviderError::RateLimited { retry_after } => *retry_after,
                            _ => None,
                        };
                        let wait = self.retry.backoff_with_hint(attempt - 1, hint);
                        warn!(attempt, error = %err, wait_ms = wait.as_millis(), "Transient intelligence failure, backing off");
                        tokio::time::sleep(wait).await;
                    }
                    last = Some(err);
                }
                Err(err) => {
                    self.breaker.record_neutral();
                    warn!(error = %err, "Permanent intelligence failure");
                    return Err(GatewayError::Permanent(err));
                }
            }
        }

        Err(GatewayError::RetriesExhausted {
            attempts: max_attempts,
            last: last.unwrap_or(ProviderError::Other("no attempt made".to_string())),
        })
    }
}
