//! Mapping between the legacy manifest document and its relational projection.
//!
//! Each nested shape of the document has its own flatten function and its own
//! reverse function. Scalar fields of the `budget` and `metadata` objects are
//! promoted to mission columns; `trajectory` becomes a 1:1 row; every array
//! becomes positional child rows.

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    ArtifactRow, Budget, ConceptRow, ConcernRow, DomainConcern, GateRecord, ManifestMetadata,
    MissionRecord, MissionRow, NarrativeEntry, NarrativeRow, ProjectManifest, QualityGateRow,
    ToolCallRecord, ToolCallRow, TrajectoryRow, Trajectory, TransitionRecord,
};

/// Flatten a manifest into a mission record with internal id `mission_id`.
pub fn flatten(manifest: &ProjectManifest, mission_id: Uuid) -> DomainResult<MissionRecord> {
    Ok(MissionRecord {
        mission: mission_row(manifest, mission_id),
        tool_calls: tool_call_rows(manifest.tool_calls())?,
        narrative: narrative_rows(manifest.narrative()),
        concepts: concept_rows(&manifest.domain().concepts),
        concerns: concern_rows(&manifest.domain().concerns),
        trajectory: Some(trajectory_row(manifest.trajectory())),
        artifacts: artifact_rows(manifest.artifacts()),
        quality_gates: quality_gate_rows(manifest.quality_gates()),
    })
}

/// Promote `budget.*` and `metadata.*` scalars to mission columns.
pub fn mission_row(manifest: &ProjectManifest, mission_id: Uuid) -> MissionRow {
    let budget = manifest.budget();
    let metadata = manifest.metadata();
    MissionRow {
        id: mission_id,
        external_id: manifest.project_id(),
        current_phase: manifest.phase(),
        current_sub_state: manifest.sub_state(),
        budget_max_cost: budget.max_cost,
        budget_current_cost: budget.current_cost,
        budget_alert_threshold: budget.alert_threshold,
        owner: metadata.owner.clone(),
        revision: i64::try_from(metadata.revision).unwrap_or(i64::MAX),
        created_at: metadata.created_at,
        updated_at: metadata.updated_at,
    }
}

pub fn tool_call_rows(calls: &[ToolCallRecord]) -> DomainResult<Vec<ToolCallRow>> {
    calls
        .iter()
        .zip(0_i64..)
        .map(|(call, position)| {
            Ok(ToolCallRow {
                position,
                tool_name: call.tool_name.clone(),
                input: call.input.as_ref().map(serde_json::to_string).transpose()?,
                output: call.output.clone(),
                called_at: call.called_at,
            })
        })
        .collect()
}

pub fn narrative_rows(entries: &[NarrativeEntry]) -> Vec<NarrativeRow> {
    entries
        .iter()
        .zip(0_i64..)
        .map(|(entry, position)| NarrativeRow {
            position,
            phase: entry.phase,
            entry: entry.entry.clone(),
            recorded_at: entry.recorded_at,
        })
        .collect()
}

pub fn concept_rows(concepts: &[String]) -> Vec<ConceptRow> {
    concepts
        .iter()
        .zip(0_i64..)
        .map(|(concept, position)| ConceptRow {
            position,
            concept: concept.clone(),
        })
        .collect()
}

pub fn concern_rows(concerns: &[DomainConcern]) -> Vec<ConcernRow> {
    concerns
        .iter()
        .zip(0_i64..)
        .map(|(c, position)| ConcernRow {
            position,
            concern: c.concern.clone(),
            severity: c.severity.clone(),
        })
        .collect()
}

pub fn trajectory_row(trajectory: &Trajectory) -> TrajectoryRow {
    let last = trajectory.last_transition.as_ref();
    TrajectoryRow {
        repair_cycles: i64::from(trajectory.repair_cycles),
        last_transition_from: last.map(|t| t.from),
        last_transition_to: last.map(|t| t.to),
        last_transition_at: last.map(|t| t.at),
    }
}

pub fn artifact_rows(artifacts: &BTreeMap<String, String>) -> Vec<ArtifactRow> {
    artifacts
        .iter()
        .map(|(name, location)| ArtifactRow {
            name: name.clone(),
            location: location.clone(),
        })
        .collect()
}

pub fn quality_gate_rows(gates: &[GateRecord]) -> Vec<QualityGateRow> {
    gates
        .iter()
        .zip(0_i64..)
        .map(|(g, position)| QualityGateRow {
            position,
            gate_id: g.gate_id.clone(),
            blocking: g.blocking,
            passed: g.passed,
            from_phase: g.from,
            to_phase: g.to,
            detail: g.detail.clone(),
            checked_at: g.checked_at,
        })
        .collect()
}

/// Rebuild the legacy document shape from a mission record.
pub fn to_document(record: &MissionRecord) -> DomainResult<Value> {
    let m = &record.mission;
    let budget = Budget {
        max_cost: m.budget_max_cost,
        current_cost: m.budget_current_cost,
        alert_threshold: m.budget_alert_threshold,
    };
    let metadata = ManifestMetadata {
        owner: m.owner.clone(),
        created_at: m.created_at,
        updated_at: m.updated_at,
        revision: u64::try_from(m.revision).unwrap_or(0),
    };

    let mut doc = Map::new();
    doc.insert("project_id".into(), json!(m.external_id));
    doc.insert("current_phase".into(), json!(m.current_phase));
    doc.insert("current_sub_state".into(), json!(m.current_sub_state));
    doc.insert("artifacts".into(), artifacts_object(&record.artifacts));
    doc.insert("budget".into(), serde_json::to_value(budget)?);
    doc.insert("metadata".into(), serde_json::to_value(metadata)?);
    doc.insert(
        "trajectory".into(),
        serde_json::to_value(trajectory_from_row(record.trajectory.as_ref()))?,
    );

    let narrative = narrative_from_rows(&record.narrative);
    if !narrative.is_empty() {
        doc.insert("narrative".into(), serde_json::to_value(narrative)?);
    }
    if !record.concepts.is_empty() || !record.concerns.is_empty() {
        doc.insert(
            "domain".into(),
            json!({
                "concepts": record.concepts.iter().map(|c| c.concept.clone()).collect::<Vec<_>>(),
                "concerns": concerns_from_rows(&record.concerns),
            }),
        );
    }
    let tool_calls = tool_calls_from_rows(&record.tool_calls)?;
    if !tool_calls.is_empty() {
        doc.insert("tool_calls".into(), serde_json::to_value(tool_calls)?);
    }
    let gates = gates_from_rows(&record.quality_gates);
    if !gates.is_empty() {
        doc.insert("quality_gates".into(), serde_json::to_value(gates)?);
    }

    Ok(Value::Object(doc))
}

/// Rebuild and validate a manifest from a mission record.
pub fn to_manifest(record: &MissionRecord) -> DomainResult<ProjectManifest> {
    ProjectManifest::from_document(&to_document(record)?)
}

fn artifacts_object(rows: &[ArtifactRow]) -> Value {
    Value::Object(
        rows.iter()
            .map(|r| (r.name.clone(), Value::String(r.location.clone())))
            .collect(),
    )
}

fn trajectory_from_row(row: Option<&TrajectoryRow>) -> Trajectory {
    let Some(row) = row else {
        return Trajectory::default();
    };
    let last_transition = match (row.last_transition_from, row.last_transition_to, row.last_transition_at) {
        (Some(from), Some(to), Some(at)) => Some(TransitionRecord { from, to, at }),
        _ => None,
    };
    Trajectory {
        repair_cycles: u32::try_from(row.repair_cycles).unwrap_or(0),
        last_transition,
    }
}

fn narrative_from_rows(rows: &[NarrativeRow]) -> Vec<NarrativeEntry> {
    rows.iter()
        .map(|r| NarrativeEntry {
            phase: r.phase,
            entry: r.entry.clone(),
            recorded_at: r.recorded_at,
        })
        .collect()
}

fn concerns_from_rows(rows: &[ConcernRow]) -> Vec<DomainConcern> {
    rows.iter()
        .map(|r| DomainConcern {
            concern: r.concern.clone(),
            severity: r.severity.clone(),
        })
        .collect()
}

fn tool_calls_from_rows(rows: &[ToolCallRow]) -> DomainResult<Vec<ToolCallRecord>> {
    rows.iter()
        .map(|r| {
            Ok(ToolCallRecord {
                tool_name: r.tool_name.clone(),
                input: r.input.as_deref().map(serde_json::from_str).transpose()?,
                output: r.output.clone(),
                called_at: r.called_at,
            })
        })
        .collect()
}

fn gates_from_rows(rows: &[QualityGateRow]) -> Vec<GateRecord> {
    rows.iter()
        .map(|r| GateRecord {
            gate_id: r.gate_id.clone(),
            blocking: r.blocking,
            passed: r.passed,
            from: r.from_phase,
            to: r.to_phase,
            detail: r.detail.clone(),
            checked_at: r.checked_at,
        })
        .collect()
}
