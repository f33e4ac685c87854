//! Shared fixtures for integration tests.
//!
//! Every harness runs against an in-memory SQLite pool with all migrations
//! applied and an in-memory legacy document store, with dual-write enabled.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

use sdlc_engine::adapters::documents::InMemoryDocumentStore;
use sdlc_engine::adapters::sqlite::{
    create_migrated_test_pool, SqliteLedgerRepository, SqliteMissionRepository,
    SqliteTaskRepository,
};
use sdlc_engine::domain::errors::DomainResult;
use sdlc_engine::domain::models::{Phase, ProjectManifest, SpecialistResult};
use sdlc_engine::domain::ports::{
    CheckVerdict, DocumentStore, GateContext, MissionRepository, QualityCheck, Specialist,
    SpecialistContext,
};
use sdlc_engine::services::{
    Engine, GateSet, OrchestratorSettings, PersistenceLayer, PhaseOrchestrator, Scheduler,
    ShadowValidator, SpecialistRegistry, TaskLedger,
};

/// Legacy manifest document in an arbitrary phase.
pub fn document(phase: &str, cost: f64, max_cost: f64, artifacts: Value) -> Value {
    json!({
        "project_id": Uuid::new_v4(),
        "current_phase": phase,
        "current_sub_state": null,
        "artifacts": artifacts,
        "budget": {
            "max_cost": max_cost,
            "current_cost": cost,
            "alert_threshold": 0.8
        },
        "metadata": {
            "owner": "integration",
            "created_at": "2026-01-05T09:00:00Z",
            "updated_at": "2026-01-05T09:30:00Z"
        }
    })
}

/// Specialist returning the same result on every call.
pub struct Scripted {
    pub phase: Phase,
    pub result: SpecialistResult,
}

impl Scripted {
    pub fn arc(phase: Phase, result: SpecialistResult) -> Arc<dyn Specialist> {
        Arc::new(Self { phase, result })
    }
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

pub struct AlwaysPass;

#[async_trait]
impl QualityCheck for AlwaysPass {
    async fn check(&self, _ctx: GateContext<'_>) -> DomainResult<CheckVerdict> {
        Ok(CheckVerdict::pass())
    }
}

pub struct AlwaysFail;

#[async_trait]
impl QualityCheck for AlwaysFail {
    async fn check(&self, _ctx: GateContext<'_>) -> DomainResult<CheckVerdict> {
        Ok(CheckVerdict::fail("rejected by fixture"))
    }
}

pub struct Harness {
    pub pool: SqlitePool,
    pub documents: Arc<dyn DocumentStore>,
    pub missions: Arc<dyn MissionRepository>,
    pub persistence: Arc<PersistenceLayer>,
    pub engine: Engine,
}

impl Harness {
    pub async fn new(registry: SpecialistRegistry, gates: GateSet) -> Self {
        Self::with_settings(registry, gates, OrchestratorSettings::default()).await
    }

    pub async fn with_settings(
        registry: SpecialistRegistry,
        gates: GateSet,
        settings: OrchestratorSettings,
    ) -> Self {
        let pool = create_migrated_test_pool().await.unwrap();
        let documents: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
        let missions: Arc<dyn MissionRepository> =
            Arc::new(SqliteMissionRepository::new(pool.clone()));
        let persistence = Arc::new(
            PersistenceLayer::new(documents.clone()).with_projection(missions.clone()),
        );
        let ledger = TaskLedger::new(Arc::new(SqliteLedgerRepository::new(pool.clone())));
        let orchestrator =
            PhaseOrchestrator::new(persistence.clone(), registry, gates, ledger.clone(), settings);
        let scheduler = Scheduler::new(Arc::new(SqliteTaskRepository::new(pool.clone())));
        let engine = Engine::new(
            Arc::new(scheduler),
            Arc::new(orchestrator),
            persistence.clone(),
            ledger,
        );
        Self {
            pool,
            documents,
            missions,
            persistence,
            engine,
        }
    }

    /// Store a legacy document as a project and return its manifest.
    pub async fn seed(&self, document: &Value) -> ProjectManifest {
        let manifest = ProjectManifest::from_document(document).unwrap();
        self.persistence.create(&manifest).await.unwrap();
        manifest
    }

    pub async fn stored_document(&self, project_id: Uuid) -> Value {
        self.documents.get(project_id).await.unwrap().unwrap()
    }

    pub fn shadow(&self) -> ShadowValidator {
        ShadowValidator::new(self.documents.clone(), self.missions.clone())
    }
}
