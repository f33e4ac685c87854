use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Phase, ProjectManifest};

/// What a gate sees: the manifest as it would be after the transition.
#[derive(Debug, Clone, Copy)]
pub struct GateContext<'a> {
    pub from: Phase,
    pub to: Phase,
    pub manifest: &'a ProjectManifest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckVerdict {
    pub passed: bool,
    pub detail: Option<String>,
}

impl CheckVerdict {
    pub fn pass() -> Self {
        Self {
            passed: true,
            detail: None,
        }
    }

    pub fn fail(detail: impl Into<String>) -> Self {
        Self {
            passed: false,
            detail: Some(detail.into()),
        }
    }
}

/// The capability behind a quality gate. An `Err` counts as a failed check.
#[async_trait]
pub trait QualityCheck: Send + Sync {
    async fn check(&self, ctx: GateContext<'_>) -> DomainResult<CheckVerdict>;
}
