//! Engine facade: scheduler, orchestrator and persistence behind one API.
//!
//! The engine owns the single-consumer tick loop. Every caller-facing
//! operation (create, advance, approve, reject, status) becomes a task; a
//! tick dequeues one task, runs one orchestrator step and records the task's
//! terminal status.

use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Budget, ProjectManifest, Task, TaskAction};
use crate::services::persistence::PersistenceLayer;
use crate::services::phase_orchestrator::{PhaseOrchestrator, StepReport};
use crate::services::scheduler::{RecoveryReport, Scheduler};
use crate::services::task_ledger::TaskLedger;

/// One processed task and what its step produced.
#[derive(Debug)]
pub struct TickOutcome {
    /// The task in its terminal state.
    pub task: Task,
    pub result: DomainResult<StepReport>,
}

pub struct Engine {
    scheduler: Arc<Scheduler>,
    orchestrator: Arc<PhaseOrchestrator>,
    persistence: Arc<PersistenceLayer>,
    ledger: TaskLedger,
}

impl Engine {
    pub fn new(
        scheduler: Arc<Scheduler>,
        orchestrator: Arc<PhaseOrchestrator>,
        persistence: Arc<PersistenceLayer>,
        ledger: TaskLedger,
    ) -> Self {
        Self {
            scheduler,
            orchestrator,
            persistence,
            ledger,
        }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn orchestrator(&self) -> &Arc<PhaseOrchestrator> {
        &self.orchestrator
    }

    pub fn persistence(&self) -> &Arc<PersistenceLayer> {
        &self.persistence
    }

    pub fn ledger(&self) -> &TaskLedger {
        &self.ledger
    }

    /// Create a project in PLANNING/DISCOVERY with a fresh budget.
    #[instrument(skip(self))]
    pub async fn create_project(
        &self,
        owner: &str,
        max_cost: f64,
        alert_threshold: Option<f64>,
    ) -> DomainResult<ProjectManifest> {
        let mut budget = Budget::new(max_cost);
        if let Some(threshold) = alert_threshold {
            budget = budget.with_alert_threshold(threshold);
        }
        budget.validate()?;

        let manifest = ProjectManifest::new(Uuid::new_v4(), owner, budget);
        manifest.validate()?;
        self.persistence.create(&manifest).await?;
        info!(project_id = %manifest.project_id(), "Project initialized");
        Ok(manifest)
    }

    pub async fn load_project(&self, project_id: Uuid) -> DomainResult<ProjectManifest> {
        self.persistence.load(project_id).await
    }

    /// Enqueue an action for an existing project.
    pub async fn submit(&self, project_id: Uuid, action: TaskAction) -> DomainResult<Task> {
        self.persistence.load(project_id).await?;
        self.scheduler.submit(project_id, action).await
    }

    /// Process the oldest queued task, if any.
    ///
    /// Step errors end up in the returned outcome and in the task's FAILED
    /// status; only scheduler failures are returned as `Err`.
    pub async fn tick(&self) -> DomainResult<Option<TickOutcome>> {
        let Some(task) = self.scheduler.next().await? else {
            return Ok(None);
        };

        let result = self.orchestrator.run_task(&task).await;
        let task = match &result {
            Ok(_) => self.scheduler.complete(task.id).await?,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "Task failed");
                self.scheduler.fail(task.id, &e.to_string()).await?
            }
        };
        Ok(Some(TickOutcome { task, result }))
    }

    /// Submit `action` and tick until it has been processed.
    ///
    /// Tasks queued before it are processed first, in order.
    pub async fn run_now(&self, project_id: Uuid, action: TaskAction) -> DomainResult<TickOutcome> {
        let submitted = self.submit(project_id, action).await?;
        loop {
            match self.tick().await? {
                Some(outcome) if outcome.task.id == submitted.id => return Ok(outcome),
                Some(_) => {}
                None => return Err(DomainError::TaskNotFound(submitted.id)),
            }
        }
    }

    /// Tick until the queue is empty or `limit` tasks were processed.
    pub async fn drain(&self, limit: usize) -> DomainResult<Vec<TickOutcome>> {
        let mut outcomes = Vec::new();
        while outcomes.len() < limit {
            match self.tick().await? {
                Some(outcome) => outcomes.push(outcome),
                None => break,
            }
        }
        Ok(outcomes)
    }

    /// Raise a project's budget ceiling.
    #[instrument(skip(self))]
    pub async fn raise_budget(&self, project_id: Uuid, max_cost: f64) -> DomainResult<ProjectManifest> {
        let mut manifest = self.persistence.load(project_id).await?;
        manifest.raise_budget(max_cost)?;
        self.persistence.save(&mut manifest).await?;
        info!(max_cost, "Budget raised");
        Ok(manifest)
    }

    /// Wait for background gate evaluations spawned by earlier steps. Call
    /// before the runtime shuts down, or their outcomes are lost.
    pub async fn settle(&self) {
        self.orchestrator.observer().wait().await;
    }

    /// Restore the queue after a restart.
    pub async fn recover(&self) -> DomainResult<RecoveryReport> {
        self.scheduler.recover().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::artifacts::FsArtifactStore;
    use crate::adapters::documents::InMemoryDocumentStore;
    use crate::adapters::intelligence::{MockIntelligenceProvider, MockResponse};
    use crate::adapters::sqlite::{
        create_migrated_test_pool, SqliteLedgerRepository, SqliteTaskRepository,
    };
    use crate::domain::models::{Phase, SubState, TaskStatus};
    use crate::services::circuit_breaker::CircuitBreaker;
    use crate::services::intelligence_gateway::IntelligenceGateway;
    use crate::services::phase_orchestrator::{OrchestratorSettings, StepOutcome};
    use crate::services::quality_gates::GateSet;
    use crate::services::retry::RetryPolicy;
    use crate::services::specialists::{builtin_registry, PromptToolkit};
    use std::time::Duration;

    async fn engine(dir: &std::path::Path) -> Engine {
        let pool = create_migrated_test_pool().await.unwrap();
        let persistence = Arc::new(PersistenceLayer::new(Arc::new(InMemoryDocumentStore::new())));
        let ledger = TaskLedger::new(Arc::new(SqliteLedgerRepository::new(pool.clone())));
        let provider = Arc::new(MockIntelligenceProvider::with_default_response(
            MockResponse::success("document").with_cost(0.25),
        ));
        let gateway = IntelligenceGateway::new(provider, CircuitBreaker::default(), RetryPolicy::default());
        let toolkit = PromptToolkit::new(Arc::new(gateway), Arc::new(FsArtifactStore::new(dir)));
        let orchestrator = PhaseOrchestrator::new(
            persistence.clone(),
            builtin_registry(toolkit, None, Duration::from_secs(5)),
            GateSet::new(),
            ledger.clone(),
            OrchestratorSettings::default(),
        );
        Engine::new(
            Arc::new(Scheduler::new(Arc::new(SqliteTaskRepository::new(pool)))),
            Arc::new(orchestrator),
            persistence,
            ledger,
        )
    }

    #[tokio::test]
    async fn test_run_now_advances_planning_sub_state() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path()).await;
        let project = engine.create_project("fern", 10.0, None).await.unwrap();

        let outcome = engine
            .run_now(project.project_id(), TaskAction::Advance)
            .await
            .unwrap();
        assert_eq!(outcome.task.status, TaskStatus::Completed);
        let report = outcome.result.unwrap();
        assert_eq!(
            report.outcome,
            StepOutcome::Progressed {
                phase: Phase::Planning,
                sub_state: Some(SubState::Requirements)
            }
        );

        let ledger = engine.ledger().history(project.project_id()).await.unwrap();
        assert_eq!(ledger.len(), 1);
        assert!((ledger[0].cost_delta - 0.25).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_planning_reaches_coding_after_four_steps() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path()).await;
        let id = engine.create_project("fern", 10.0, None).await.unwrap().project_id();

        for _ in 0..4 {
            engine.run_now(id, TaskAction::Advance).await.unwrap().result.unwrap();
        }
        let manifest = engine.load_project(id).await.unwrap();
        assert_eq!(manifest.phase(), Phase::Coding);
        assert!(manifest.has_artifact("plan"));
        assert!((manifest.budget().current_cost - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_failed_step_marks_task_failed() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path()).await;
        let id = engine.create_project("fern", 10.0, None).await.unwrap().project_id();

        let outcome = engine.run_now(id, TaskAction::ApproveQa).await.unwrap();
        assert_eq!(outcome.task.status, TaskStatus::Failed);
        assert!(matches!(outcome.result, Err(DomainError::PreconditionNotMet { .. })));
    }

    #[tokio::test]
    async fn test_submit_unknown_project() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path()).await;
        assert!(matches!(
            engine.submit(Uuid::new_v4(), TaskAction::Advance).await,
            Err(DomainError::ProjectNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_raise_budget_rejects_lowering_below_spend() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path()).await;
        let id = engine.create_project("fern", 1.0, None).await.unwrap().project_id();
        engine.run_now(id, TaskAction::Advance).await.unwrap();

        assert!(engine.raise_budget(id, 0.1).await.is_err());
        let raised = engine.raise_budget(id, 5.0).await.unwrap();
        assert!((raised.budget().max_cost - 5.0).abs() < f64::EPSILON);
    }
}
