//! Relational projection of a manifest.
//!
//! A [`MissionRecord`] is the flattened form of one [`ProjectManifest`]:
//! scalar sub-object fields promoted to mission columns, singleton
//! sub-objects as 1:1 rows, arrays as positional child rows.
//!
//! [`ProjectManifest`]: super::ProjectManifest

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::phase::{Phase, SubState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionRow {
    /// Internal row id, assigned on first import.
    pub id: Uuid,
    /// The manifest's `project_id`.
    pub external_id: Uuid,
    pub current_phase: Phase,
    pub current_sub_state: Option<SubState>,
    pub budget_max_cost: f64,
    pub budget_current_cost: f64,
    pub budget_alert_threshold: f64,
    pub owner: String,
    pub revision: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRow {
    pub position: i64,
    pub tool_name: String,
    /// JSON text of the call input.
    pub input: Option<String>,
    pub output: Option<String>,
    pub called_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrativeRow {
    pub position: i64,
    pub phase: Phase,
    pub entry: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptRow {
    pub position: i64,
    pub concept: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcernRow {
    pub position: i64,
    pub concern: String,
    pub severity: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrajectoryRow {
    pub repair_cycles: i64,
    pub last_transition_from: Option<Phase>,
    pub last_transition_to: Option<Phase>,
    pub last_transition_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRow {
    pub name: String,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityGateRow {
    pub position: i64,
    pub gate_id: String,
    pub blocking: bool,
    pub passed: bool,
    pub from_phase: Phase,
    pub to_phase: Phase,
    pub detail: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// A mission row with all of its child rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionRecord {
    pub mission: MissionRow,
    pub tool_calls: Vec<ToolCallRow>,
    pub narrative: Vec<NarrativeRow>,
    pub concepts: Vec<ConceptRow>,
    pub concerns: Vec<ConcernRow>,
    pub trajectory: Option<TrajectoryRow>,
    pub artifacts: Vec<ArtifactRow>,
    pub quality_gates: Vec<QualityGateRow>,
}

/// Per-table row counts, reported by backfill and status views.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionCounts {
    pub missions: i64,
    pub tool_calls: i64,
    pub narrative: i64,
    pub concepts: i64,
    pub concerns: i64,
    pub trajectory: i64,
    pub artifacts: i64,
    pub quality_gates: i64,
}
