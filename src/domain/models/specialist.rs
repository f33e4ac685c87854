//! Specialist execution contract types.

use serde::{Deserialize, Serialize};

use super::phase::{Phase, SubState};
use crate::domain::errors::{DomainError, DomainResult};

/// Reference to an artifact held by the artifact store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    name: String,
    location: String,
}

impl ArtifactRef {
    pub fn new(name: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn location(&self) -> &str {
        &self.location
    }
}

/// Value returned by a specialist for one invocation.
///
/// Built through the constructors so that a failed result can never carry a
/// `next_phase` and always carries an error. [`SpecialistResult::validate`]
/// re-checks the contract for results that arrive deserialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialistResult {
    success: bool,
    #[serde(default)]
    next_phase: Option<Phase>,
    #[serde(default)]
    artifacts: Vec<ArtifactRef>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    sub_state: Option<SubState>,
    #[serde(default)]
    cost_incurred: f64,
}

impl SpecialistResult {
    /// Successful step that requests a transition to `next`.
    pub fn advance(next: Phase, artifacts: Vec<ArtifactRef>) -> Self {
        Self {
            success: true,
            next_phase: Some(next),
            artifacts,
            error: None,
            sub_state: None,
            cost_incurred: 0.0,
        }
    }

    /// Successful step that keeps the current phase.
    pub fn partial(artifacts: Vec<ArtifactRef>) -> Self {
        Self {
            success: true,
            next_phase: None,
            artifacts,
            error: None,
            sub_state: None,
            cost_incurred: 0.0,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            next_phase: None,
            artifacts: Vec::new(),
            error: Some(error.into()),
            sub_state: None,
            cost_incurred: 0.0,
        }
    }

    pub fn with_sub_state(mut self, sub_state: SubState) -> Self {
        self.sub_state = Some(sub_state);
        self
    }

    /// Spend reported by the specialist for this invocation.
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost_incurred = cost;
        self
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn next_phase(&self) -> Option<Phase> {
        self.next_phase
    }

    pub fn artifacts(&self) -> &[ArtifactRef] {
        &self.artifacts
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn sub_state(&self) -> Option<SubState> {
        self.sub_state
    }

    pub fn cost_incurred(&self) -> f64 {
        self.cost_incurred
    }

    pub fn validate(&self) -> DomainResult<()> {
        if !self.success && self.next_phase.is_some() {
            return Err(DomainError::InvalidSpecialistResult(
                "next_phase set on a failed result".to_string(),
            ));
        }
        if !self.success && self.error.as_deref().map_or(true, |e| e.trim().is_empty()) {
            return Err(DomainError::InvalidSpecialistResult(
                "failed result without an error message".to_string(),
            ));
        }
        if !self.cost_incurred.is_finite() || self.cost_incurred < 0.0 {
            return Err(DomainError::InvalidSpecialistResult(format!(
                "cost_incurred must be non-negative, got {}",
                self.cost_incurred
            )));
        }
        Ok(())
    }
}
