//! Phase orchestrator: one caller-driven step of the project state machine.
//!
//! A step loads the manifest, dispatches the specialist of the current phase
//! and applies its result. Every manifest change is staged on a copy and
//! committed with a single save. An aborted step persists nothing except the
//! provider spend it caused, booked to the budget. Each task gets one ledger
//! entry.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    GateOutcome, GateRecord, NewLedgerEntry, OrchestratorConfig, Phase, ProjectManifest,
    SpecialistResult, SubState, Task, TaskAction,
};
use crate::domain::ports::SpecialistContext;
use crate::services::persistence::PersistenceLayer;
use crate::services::quality_gates::{GateObserver, GateSet};
use crate::services::specialist_registry::SpecialistRegistry;
use crate::services::task_ledger::TaskLedger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// TESTING -> CODING repairs allowed before a failure becomes fatal.
    pub max_repair_cycles: u32,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self { max_repair_cycles: 3 }
    }
}

impl From<&OrchestratorConfig> for OrchestratorSettings {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            max_repair_cycles: config.max_repair_cycles,
        }
    }
}

/// What a completed step did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepOutcome {
    /// The phase changed along the transition table.
    Advanced { from: Phase, to: Phase },
    /// Success without a phase change; artifacts or sub-state may have moved.
    Progressed {
        phase: Phase,
        sub_state: Option<SubState>,
    },
    /// A failure in a repairing phase sent the project back.
    Repaired {
        from: Phase,
        to: Phase,
        repair_cycles: u32,
        reason: String,
    },
    /// Status query; nothing was executed.
    Observed { phase: Phase },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub task_id: Uuid,
    pub project_id: Uuid,
    pub phase_at_start: Phase,
    pub phase_at_end: Phase,
    pub outcome: StepOutcome,
    pub artifacts_added: Vec<String>,
    pub cost: f64,
    pub blocking_gates: Vec<GateOutcome>,
    pub budget_alert: bool,
}

impl StepReport {
    fn summary(&self) -> String {
        let mut text = match &self.outcome {
            StepOutcome::Advanced { from, to } => format!("advanced {from} -> {to}"),
            StepOutcome::Progressed { phase, sub_state } => match sub_state {
                Some(s) => format!("progressed within {phase} ({s})"),
                None => format!("progressed within {phase}"),
            },
            StepOutcome::Repaired {
                from,
                to,
                repair_cycles,
                reason,
            } => format!("repaired {from} -> {to} (cycle {repair_cycles}): {reason}"),
            StepOutcome::Observed { phase } => format!("status: {phase}"),
        };
        if !self.artifacts_added.is_empty() {
            text.push_str(&format!(" +[{}]", self.artifacts_added.join(", ")));
        }
        if self.budget_alert {
            text.push_str(" [budget alert]");
        }
        text
    }
}

/// An aborted step and the spend it had already caused.
struct StepFailure {
    error: DomainError,
    cost: f64,
}

impl From<DomainError> for StepFailure {
    fn from(error: DomainError) -> Self {
        Self { error, cost: 0.0 }
    }
}

trait WithCost<T> {
    fn with_cost(self, cost: f64) -> Result<T, StepFailure>;
}

impl<T> WithCost<T> for DomainResult<T> {
    fn with_cost(self, cost: f64) -> Result<T, StepFailure> {
        self.map_err(|error| StepFailure { error, cost })
    }
}

pub struct PhaseOrchestrator {
    persistence: Arc<PersistenceLayer>,
    registry: SpecialistRegistry,
    gates: GateSet,
    observer: Arc<GateObserver>,
    ledger: TaskLedger,
    settings: OrchestratorSettings,
}

impl PhaseOrchestrator {
    pub fn new(
        persistence: Arc<PersistenceLayer>,
        registry: SpecialistRegistry,
        gates: GateSet,
        ledger: TaskLedger,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            persistence,
            registry,
            gates,
            observer: Arc::new(GateObserver::default()),
            ledger,
            settings,
        }
    }

    pub fn with_observer(mut self, observer: Arc<GateObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn observer(&self) -> &Arc<GateObserver> {
        &self.observer
    }

    /// Run one step for `task` and append its ledger entry.
    #[instrument(skip(self, task), fields(task_id = %task.id, project_id = %task.project_id, action = %task.action))]
    pub async fn run_task(&self, task: &Task) -> DomainResult<StepReport> {
        let manifest = match self.persistence.load(task.project_id).await {
            Ok(m) => m,
            Err(e) => {
                self.append_ledger(task, None, None, format!("failed {}: {e}", e.kind()), 0.0)
                    .await;
                return Err(e);
            }
        };
        let phase_at_start = manifest.phase();

        match self.step(task, manifest.clone()).await {
            Ok(report) => {
                self.append_ledger(
                    task,
                    Some(report.phase_at_start),
                    Some(report.phase_at_end),
                    report.summary(),
                    report.cost,
                )
                .await;
                Ok(report)
            }
            Err(StepFailure { error, cost }) => {
                warn!(error = %error, kind = error.kind(), cost, "Step aborted");
                if cost > 0.0 {
                    self.book_aborted_spend(manifest, cost).await;
                }
                self.append_ledger(
                    task,
                    Some(phase_at_start),
                    Some(phase_at_start),
                    format!("failed {}: {error}", error.kind()),
                    cost,
                )
                .await;
                Err(error)
            }
        }
    }

    async fn step(&self, task: &Task, manifest: ProjectManifest) -> Result<StepReport, StepFailure> {
        let phase = manifest.phase();

        match &task.action {
            TaskAction::Status => {
                return Ok(self.report(task, phase, phase, StepOutcome::Observed { phase }));
            }
            TaskAction::ApproveQa | TaskAction::RejectQa { .. } if phase != Phase::AwaitingQaApproval => {
                return Err(DomainError::PreconditionNotMet {
                    phase,
                    reason: format!("{} requires {}", task.action, Phase::AwaitingQaApproval),
                }
                .into());
            }
            _ => {}
        }

        let specialist = self.registry.resolve(phase)?;
        let ctx = SpecialistContext::new(task.id, task.action.clone(), manifest);
        let missing = specialist.missing_preconditions(&ctx);
        if !missing.is_empty() {
            return Err(DomainError::PreconditionNotMet {
                phase,
                reason: missing.join("; "),
            }
            .into());
        }

        let executed = specialist.execute(&ctx).await;
        let metered = ctx.spend.total();
        let result = executed.with_cost(metered)?;
        let cost = result.cost_incurred() + metered;
        result.validate().with_cost(cost)?;
        info!(specialist = specialist.name(), success = result.success(), cost, "Specialist finished");

        let manifest = ctx.manifest;
        if result.success() {
            self.commit_success(task, manifest, &result, cost).await
        } else {
            self.repair_or_fail(task, manifest, &result, cost).await
        }
    }

    /// Failure path: repairing phases go back to their producer, everything
    /// else is fatal. A repair books its spend in the same save.
    async fn repair_or_fail(
        &self,
        task: &Task,
        mut manifest: ProjectManifest,
        result: &SpecialistResult,
        cost: f64,
    ) -> Result<StepReport, StepFailure> {
        let phase = manifest.phase();
        let reason = result.error().unwrap_or("unspecified failure").to_string();

        let Some(target) = phase.repair_target() else {
            return Err(DomainError::PhaseFailed { phase, reason }).with_cost(cost);
        };
        let cycles = manifest.trajectory().repair_cycles;
        if cycles >= self.settings.max_repair_cycles {
            return Err(DomainError::PhaseFailed {
                phase,
                reason: format!(
                    "repair limit of {} cycles reached: {reason}",
                    self.settings.max_repair_cycles
                ),
            })
            .with_cost(cost);
        }

        manifest.transition_to(target).with_cost(cost)?;
        manifest.record_repair();
        let budget_alert = manifest.absorb_spend(cost).with_cost(cost)?;
        manifest.touch();
        self.persistence.save(&mut manifest).await.with_cost(cost)?;

        let repair_cycles = manifest.trajectory().repair_cycles;
        warn!(from = %phase, to = %target, repair_cycles, reason = %reason, "Repair loop engaged");
        let mut report = self.report(
            task,
            phase,
            target,
            StepOutcome::Repaired {
                from: phase,
                to: target,
                repair_cycles,
                reason,
            },
        );
        report.cost = cost;
        report.budget_alert = budget_alert;
        Ok(report)
    }

    async fn commit_success(
        &self,
        task: &Task,
        manifest: ProjectManifest,
        result: &SpecialistResult,
        cost: f64,
    ) -> Result<StepReport, StepFailure> {
        let from = manifest.phase();
        let mut staged = manifest;

        let artifacts_added = staged.merge_artifacts(result.artifacts());
        let budget_alert = staged.charge(cost).with_cost(cost)?;

        let mut blocking_gates = Vec::new();
        let outcome = match result.next_phase() {
            Some(to) => {
                staged.transition_to(to).with_cost(cost)?;
                if let Some(sub_state) = result.sub_state() {
                    staged.set_sub_state(Some(sub_state)).with_cost(cost)?;
                }

                blocking_gates = self.gates.run_blocking(from, to, &staged).await;
                let failed: Vec<String> = blocking_gates
                    .iter()
                    .filter(|o| !o.passed)
                    .map(|o| o.gate_id.clone())
                    .collect();
                if !failed.is_empty() {
                    return Err(DomainError::QualityGateFailure { from, to, failed }).with_cost(cost);
                }

                let checked_at = Utc::now();
                for gate in &blocking_gates {
                    staged.record_gate(GateRecord {
                        gate_id: gate.gate_id.clone(),
                        blocking: true,
                        passed: true,
                        from,
                        to,
                        detail: gate.detail.clone(),
                        checked_at,
                    });
                }
                if from == Phase::Testing && to == Phase::AwaitingQaApproval {
                    staged.reset_repairs();
                }
                StepOutcome::Advanced { from, to }
            }
            None => {
                if let Some(sub_state) = result.sub_state() {
                    staged.set_sub_state(Some(sub_state)).with_cost(cost)?;
                }
                StepOutcome::Progressed {
                    phase: from,
                    sub_state: staged.sub_state(),
                }
            }
        };

        staged.touch();
        self.persistence.save(&mut staged).await.with_cost(cost)?;

        if let StepOutcome::Advanced { to, .. } = outcome {
            info!(%from, %to, "Phase advanced");
            self.observer
                .spawn(self.gates.async_gates(from, to), staged.clone());
        }
        if budget_alert {
            let budget = staged.budget();
            warn!(
                current_cost = budget.current_cost,
                max_cost = budget.max_cost,
                alert_threshold = budget.alert_threshold,
                "Budget alert threshold crossed"
            );
        }

        let mut report = self.report(task, from, staged.phase(), outcome);
        report.artifacts_added = artifacts_added;
        report.cost = cost;
        report.blocking_gates = blocking_gates;
        report.budget_alert = budget_alert;
        Ok(report)
    }

    /// Book the spend of an aborted step onto the manifest as loaded, leaving
    /// everything else untouched.
    async fn book_aborted_spend(&self, mut manifest: ProjectManifest, cost: f64) {
        let alert = match manifest.absorb_spend(cost) {
            Ok(alert) => alert,
            Err(e) => {
                error!(error = %e, cost, "Unbookable step spend");
                return;
            }
        };
        manifest.touch();
        if let Err(e) = self.persistence.save(&mut manifest).await {
            error!(error = %e, cost, "Failed to book spend of aborted step");
            return;
        }
        let budget = manifest.budget();
        info!(cost, current_cost = budget.current_cost, max_cost = budget.max_cost, "Booked spend of aborted step");
        if alert {
            warn!(current_cost = budget.current_cost, max_cost = budget.max_cost, "Budget alert threshold crossed");
        }
    }

    fn report(&self, task: &Task, start: Phase, end: Phase, outcome: StepOutcome) -> StepReport {
        StepReport {
            task_id: task.id,
            project_id: task.project_id,
            phase_at_start: start,
            phase_at_end: end,
            outcome,
            artifacts_added: Vec::new(),
            cost: 0.0,
            blocking_gates: Vec::new(),
            budget_alert: false,
        }
    }

    async fn append_ledger(
        &self,
        task: &Task,
        phase_at_start: Option<Phase>,
        phase_at_end: Option<Phase>,
        result_summary: String,
        cost_delta: f64,
    ) {
        let entry = NewLedgerEntry {
            task_id: task.id,
            project_id: task.project_id,
            phase_at_start,
            phase_at_end,
            result_summary,
            cost_delta,
            recorded_at: Utc::now(),
        };
        if let Err(e) = self.ledger.record(entry).await {
            error!(task_id = %task.id, error = %e, "Failed to append ledger entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::documents::InMemoryDocumentStore;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteLedgerRepository};
    use crate::domain::models::{ArtifactRef, Budget};
    use crate::domain::ports::Specialist;
    use async_trait::async_trait;

    struct Scripted {
        phase: Phase,
        result: SpecialistResult,
    }

    #[async_trait]
    impl Specialist for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn phase(&self) -> Phase {
            self.phase
        }

        async fn execute(&self, _ctx: &SpecialistContext) -> DomainResult<SpecialistResult> {
            Ok(self.result.clone())
        }
    }

    async fn orchestrator(specialist: Scripted) -> (PhaseOrchestrator, Arc<PersistenceLayer>) {
        let pool = create_migrated_test_pool().await.unwrap();
        let persistence = Arc::new(PersistenceLayer::new(Arc::new(InMemoryDocumentStore::new())));
        let registry = SpecialistRegistry::new().with(Arc::new(specialist));
        let orchestrator = PhaseOrchestrator::new(
            persistence.clone(),
            registry,
            GateSet::new(),
            TaskLedger::new(Arc::new(SqliteLedgerRepository::new(pool))),
            OrchestratorSettings::default(),
        );
        (orchestrator, persistence)
    }

    async fn seeded(persistence: &PersistenceLayer) -> ProjectManifest {
        let manifest = ProjectManifest::new(Uuid::new_v4(), "gina", Budget::new(10.0));
        persistence.create(&manifest).await.unwrap();
        manifest
    }

    #[tokio::test]
    async fn test_partial_result_keeps_phase_and_merges_artifacts() {
        let (orch, persistence) = orchestrator(Scripted {
            phase: Phase::Planning,
            result: SpecialistResult::partial(vec![ArtifactRef::new("discovery", "loc/1")])
                .with_sub_state(SubState::Requirements)
                .with_cost(0.5),
        })
        .await;
        let manifest = seeded(&persistence).await;

        let task = Task::new(manifest.project_id(), TaskAction::Advance);
        let report = orch.run_task(&task).await.unwrap();
        assert_eq!(
            report.outcome,
            StepOutcome::Progressed {
                phase: Phase::Planning,
                sub_state: Some(SubState::Requirements)
            }
        );

        let saved = persistence.load(manifest.project_id()).await.unwrap();
        assert_eq!(saved.phase(), Phase::Planning);
        assert_eq!(saved.sub_state(), Some(SubState::Requirements));
        assert!(saved.has_artifact("discovery"));
        assert!((saved.budget().current_cost - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_transition_outside_table_is_rejected() {
        let (orch, persistence) = orchestrator(Scripted {
            phase: Phase::Planning,
            result: SpecialistResult::advance(Phase::Deployment, vec![]),
        })
        .await;
        let manifest = seeded(&persistence).await;

        let task = Task::new(manifest.project_id(), TaskAction::Advance);
        let err = orch.run_task(&task).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
        let saved = persistence.load(manifest.project_id()).await.unwrap();
        assert_eq!(saved, manifest);
    }

    #[tokio::test]
    async fn test_qa_actions_need_qa_phase() {
        let (orch, persistence) = orchestrator(Scripted {
            phase: Phase::Planning,
            result: SpecialistResult::partial(vec![]),
        })
        .await;
        let manifest = seeded(&persistence).await;

        let task = Task::new(manifest.project_id(), TaskAction::ApproveQa);
        assert!(matches!(
            orch.run_task(&task).await,
            Err(DomainError::PreconditionNotMet { phase: Phase::Planning, .. })
        ));
    }

    #[tokio::test]
    async fn test_status_does_not_touch_manifest() {
        let (orch, persistence) = orchestrator(Scripted {
            phase: Phase::Planning,
            result: SpecialistResult::failure("must not run"),
        })
        .await;
        let manifest = seeded(&persistence).await;

        let task = Task::new(manifest.project_id(), TaskAction::Status);
        let report = orch.run_task(&task).await.unwrap();
        assert_eq!(report.outcome, StepOutcome::Observed { phase: Phase::Planning });
        assert_eq!(persistence.load(manifest.project_id()).await.unwrap(), manifest);
    }

    #[tokio::test]
    async fn test_overspend_is_rejected_and_exhausts_budget() {
        let (orch, persistence) = orchestrator(Scripted {
            phase: Phase::Planning,
            result: SpecialistResult::partial(vec![ArtifactRef::new("discovery", "loc/1")]).with_cost(11.0),
        })
        .await;
        let manifest = seeded(&persistence).await;

        let task = Task::new(manifest.project_id(), TaskAction::Advance);
        assert!(matches!(
            orch.run_task(&task).await,
            Err(DomainError::BudgetExceeded { .. })
        ));
        let saved = persistence.load(manifest.project_id()).await.unwrap();
        assert_eq!(saved.phase(), Phase::Planning);
        assert!(!saved.has_artifact("discovery"));
        assert!(saved.budget().is_exhausted());
        assert_eq!(saved.revision(), manifest.revision() + 1);
    }
}
