//! Specialist port - the execution contract of a phase handler.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Phase, ProjectManifest, SpecialistResult, TaskAction};

/// Provider spend incurred during one invocation.
///
/// Shared between clones of a [`SpecialistContext`], so spend is visible to
/// the orchestrator even when `execute` returns an error.
#[derive(Debug, Clone, Default)]
pub struct SpendMeter(Arc<Mutex<f64>>);

impl SpendMeter {
    pub fn record(&self, cost: f64) {
        if cost.is_finite() && cost > 0.0 {
            let mut total = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            *total += cost;
        }
    }

    pub fn total(&self) -> f64 {
        *self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Read-only input of one specialist invocation.
///
/// The manifest is a snapshot: changes a specialist wants go through the
/// returned [`SpecialistResult`], never through persistence. Paid calls are
/// recorded on `spend`.
#[derive(Debug, Clone)]
pub struct SpecialistContext {
    pub task_id: Uuid,
    pub action: TaskAction,
    pub manifest: ProjectManifest,
    pub spend: SpendMeter,
}

impl SpecialistContext {
    pub fn new(task_id: Uuid, action: TaskAction, manifest: ProjectManifest) -> Self {
        Self {
            task_id,
            action,
            manifest,
            spend: SpendMeter::default(),
        }
    }

    /// Budget left for further calls in this invocation.
    pub fn budget_remaining(&self) -> f64 {
        (self.manifest.budget().remaining() - self.spend.total()).max(0.0)
    }
}

/// Phase-specific handler.
#[async_trait]
pub trait Specialist: Send + Sync {
    fn name(&self) -> &'static str;

    /// The phase this specialist serves.
    fn phase(&self) -> Phase;

    /// Logical artifacts that must already exist before `execute`.
    fn required_artifacts(&self) -> &'static [&'static str] {
        &[]
    }

    /// Human-readable reasons the step cannot run; empty when it can.
    fn missing_preconditions(&self, ctx: &SpecialistContext) -> Vec<String> {
        self.required_artifacts()
            .iter()
            .filter(|name| !ctx.manifest.has_artifact(name))
            .map(|name| format!("missing artifact '{name}'"))
            .collect()
    }

    fn validate_preconditions(&self, ctx: &SpecialistContext) -> bool {
        self.missing_preconditions(ctx).is_empty()
    }

    async fn execute(&self, ctx: &SpecialistContext) -> DomainResult<SpecialistResult>;
}
