//! Legacy import, dual-write and shadow validation against a real SQLite
//! schema.

mod common;

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use common::{document, Harness};
use sdlc_engine::adapters::documents::{InMemoryDocumentStore, JsonFileDocumentStore};
use sdlc_engine::adapters::sqlite::{
    all_embedded_migrations, create_migrated_test_pool, create_test_pool, MigrationError,
    Migrator, SqliteMissionRepository, SCHEMA_VERSION,
};
use sdlc_engine::domain::errors::{DomainError, DomainResult};
use sdlc_engine::domain::models::{MissionRecord, Phase, ProjectManifest, ProjectionCounts};
use sdlc_engine::domain::ports::{document_revision, DocumentStore, MissionRepository};
use sdlc_engine::services::{
    legacy_mapping, ConsistencyStatus, GateSet, PersistenceLayer, ShadowValidator,
    SpecialistRegistry,
};

/// Relational store whose writes always fail.
#[derive(Default)]
struct UnavailableMissions {
    upserts: AtomicUsize,
}

#[async_trait]
impl MissionRepository for UnavailableMissions {
    async fn upsert(&self, _record: &MissionRecord) -> DomainResult<Uuid> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        Err(DomainError::DatabaseError("database is locked".to_string()))
    }

    async fn find_by_external_id(&self, _external_id: Uuid) -> DomainResult<Option<MissionRecord>> {
        Ok(None)
    }

    async fn list_external_ids(&self) -> DomainResult<Vec<Uuid>> {
        Ok(Vec::new())
    }

    async fn counts(&self) -> DomainResult<ProjectionCounts> {
        Ok(ProjectionCounts::default())
    }
}

fn rich_document(tool_calls: serde_json::Value, artifacts: serde_json::Value, gates: serde_json::Value) -> serde_json::Value {
    let mut doc = document("TESTING", 2.0, 10.0, artifacts);
    doc["tool_calls"] = tool_calls;
    doc["quality_gates"] = gates;
    doc
}

fn artifacts() -> serde_json::Value {
    json!({
        "plan": "artifacts/plan.md",
        "code_bundle": "artifacts/code_v1",
        "code_bundle.v2": "artifacts/code_v2"
    })
}

#[tokio::test]
async fn test_reimport_is_idempotent() {
    let harness = Harness::new(SpecialistRegistry::new(), GateSet::new()).await;
    let doc = document("TESTING", 1.25, 10.0, artifacts());

    let first = harness.persistence.import_legacy(&doc).await.unwrap();
    let counts = harness.persistence.projection_counts().await.unwrap();
    let second = harness.persistence.import_legacy(&doc).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(harness.persistence.projection_counts().await.unwrap(), counts);
    assert_eq!(counts.missions, 1);
}

#[tokio::test]
async fn test_reimport_of_changed_document_replaces_child_rows() {
    let harness = Harness::new(SpecialistRegistry::new(), GateSet::new()).await;
    let original = rich_document(
        json!([
            { "tool_name": "cargo", "input": { "args": ["build"] }, "output": "ok", "called_at": "2026-01-05T09:10:00Z" },
            { "tool_name": "cargo", "input": { "args": ["test"] }, "output": "2 failed", "called_at": "2026-01-05T09:20:00Z" }
        ]),
        artifacts(),
        json!([
            { "gate_id": "compiles", "blocking": true, "passed": true, "from": "CODING", "to": "TESTING", "checked_at": "2026-01-05T09:12:00Z" }
        ]),
    );
    let mut changed = rich_document(
        json!([
            { "tool_name": "cargo", "input": { "args": ["test"] }, "output": "all passed", "called_at": "2026-01-05T10:00:00Z" }
        ]),
        json!({
            "plan": "artifacts/plan.md",
            "code_bundle": "artifacts/code_v1",
            "code_bundle.v2": "artifacts/code_v2",
            "test_report": "artifacts/report.txt"
        }),
        json!([
            { "gate_id": "compiles", "blocking": true, "passed": true, "from": "CODING", "to": "TESTING", "checked_at": "2026-01-05T09:12:00Z" },
            { "gate_id": "coverage", "blocking": false, "passed": false, "from": "CODING", "to": "TESTING", "detail": "61%", "checked_at": "2026-01-05T09:13:00Z" }
        ]),
    );
    changed["project_id"] = original["project_id"].clone();
    let id: Uuid = original["project_id"].as_str().unwrap().parse().unwrap();

    let first = harness.persistence.import_legacy(&original).await.unwrap();
    let second = harness.persistence.import_legacy(&changed).await.unwrap();
    assert_eq!(first, second);

    let stored = harness.missions.find_by_external_id(id).await.unwrap().unwrap();
    let expected = legacy_mapping::flatten(&ProjectManifest::from_document(&changed).unwrap(), first).unwrap();
    assert_eq!(stored.mission.id, first);
    assert_eq!(stored.tool_calls, expected.tool_calls);
    assert_eq!(stored.tool_calls[0].output.as_deref(), Some("all passed"));
    assert_eq!(stored.artifacts, expected.artifacts);
    assert_eq!(stored.quality_gates, expected.quality_gates);
    assert_eq!(stored.quality_gates[1].detail.as_deref(), Some("61%"));

    let counts = harness.persistence.projection_counts().await.unwrap();
    assert_eq!(counts.missions, 1);
    assert_eq!(counts.tool_calls, 1);
    assert_eq!(counts.artifacts, 4);
    assert_eq!(counts.quality_gates, 2);
}

#[tokio::test]
async fn test_relational_failure_does_not_fail_save() {
    let missions = Arc::new(UnavailableMissions::default());
    let documents: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
    let persistence = PersistenceLayer::new(documents.clone()).with_projection(missions.clone());

    let doc = document("CODING", 0.5, 5.0, artifacts());
    let mut manifest = ProjectManifest::from_document(&doc).unwrap();
    persistence.create(&manifest).await.unwrap();

    let revision = manifest.revision();
    persistence.save(&mut manifest).await.unwrap();
    assert_eq!(manifest.revision(), revision + 1);
    assert_eq!(missions.upserts.load(Ordering::SeqCst), 2);

    let loaded = persistence.load(manifest.project_id()).await.unwrap();
    assert_eq!(loaded, manifest);
    assert_eq!(loaded.phase(), Phase::Coding);
}

#[tokio::test]
async fn test_dual_write_keeps_stores_consistent() {
    let harness = Harness::new(SpecialistRegistry::new(), GateSet::new()).await;
    let seeded = harness.seed(&document("CODING", 0.5, 5.0, artifacts())).await;
    let id = seeded.project_id();

    let report = harness.shadow().validate(id).await.unwrap();
    assert_ne!(report.status, ConsistencyStatus::Mismatched);
    assert!(report.inconsistency().is_none());

    let record = harness.missions.find_by_external_id(id).await.unwrap().unwrap();
    assert_eq!(record.mission.external_id, id);
}

#[tokio::test]
async fn test_out_of_band_edit_is_reported() {
    let harness = Harness::new(SpecialistRegistry::new(), GateSet::new()).await;
    let id = harness
        .seed(&document("CODING", 0.5, 5.0, artifacts()))
        .await
        .project_id();

    let mut edited = harness.stored_document(id).await;
    let revision = document_revision(&edited);
    edited["current_phase"] = json!("DEPLOYMENT");
    harness.documents.put(id, &edited, Some(revision)).await.unwrap();

    let report = harness.shadow().validate(id).await.unwrap();
    assert_eq!(report.status, ConsistencyStatus::Mismatched);
    let fields: Vec<&str> = report.mismatches().map(|d| d.field.as_str()).collect();
    assert_eq!(fields, vec!["/current_phase"]);
}

#[tokio::test]
async fn test_backfill_from_document_directory() {
    let dir = tempfile::tempdir().unwrap();
    let documents: Arc<dyn DocumentStore> = Arc::new(JsonFileDocumentStore::new(dir.path()).unwrap());

    let good = [
        document("PLANNING", 0.0, 10.0, json!({})),
        document("AWAITING_QA_APPROVAL", 3.5, 10.0, artifacts()),
    ];
    for doc in &good {
        let id = doc["project_id"].as_str().unwrap().parse().unwrap();
        documents.put(id, doc, None).await.unwrap();
    }
    let overspent = document("CODING", 12.0, 10.0, json!({}));
    let overspent_id = overspent["project_id"].as_str().unwrap().parse().unwrap();
    documents.put(overspent_id, &overspent, None).await.unwrap();

    let pool = create_migrated_test_pool().await.unwrap();
    let missions: Arc<dyn MissionRepository> = Arc::new(SqliteMissionRepository::new(pool));
    let persistence = PersistenceLayer::new(documents.clone())
        .with_projection(missions.clone())
        .with_dual_write(false);

    let report = persistence.import_all().await.unwrap();
    assert_eq!(report.imported, 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].project_id, overspent_id);

    let shadow = ShadowValidator::new(documents, missions);
    let reports = shadow.validate_all().await.unwrap();
    assert_eq!(reports.len(), 3);
    for r in reports {
        let expected_mismatch = r.project_id == overspent_id;
        assert_eq!(r.status == ConsistencyStatus::Mismatched, expected_mismatch);
    }
}

#[tokio::test]
async fn test_newer_schema_is_refused() {
    let pool = create_test_pool().await.unwrap();
    sqlx::query("PRAGMA user_version = 99")
        .execute(&pool)
        .await
        .unwrap();

    let err = Migrator::new(pool)
        .run_embedded_migrations(all_embedded_migrations())
        .await
        .unwrap_err();
    match err {
        MigrationError::SchemaAhead { stored, expected } => {
            assert_eq!(stored, 99);
            assert_eq!(expected, SCHEMA_VERSION);
        }
        other => panic!("expected SchemaAhead, got {other:?}"),
    }
}

#[tokio::test]
async fn test_ledger_rows_cannot_be_rewritten() {
    let harness = Harness::new(SpecialistRegistry::new(), GateSet::new()).await;
    let id = harness
        .seed(&document("PLANNING", 0.0, 10.0, json!({})))
        .await
        .project_id();
    let outcome = harness
        .engine
        .run_now(id, sdlc_engine::domain::models::TaskAction::Status)
        .await
        .unwrap();
    assert!(outcome.result.is_ok());

    let update = sqlx::query("UPDATE ledger_entries SET cost_delta = 0")
        .execute(&harness.pool)
        .await;
    assert!(update.is_err());
    let delete = sqlx::query("DELETE FROM ledger_entries").execute(&harness.pool).await;
    assert!(delete.is_err());
    assert_eq!(harness.engine.ledger().history(id).await.unwrap().len(), 1);
}
