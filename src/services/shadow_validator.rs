//! Shadow-mode consistency check between the legacy document and its
//! relational projection.
//!
//! Pure read: nothing is written to either store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::ProjectManifest;
use crate::domain::ports::{DocumentStore, MissionRepository};
use crate::services::legacy_mapping;

/// Largest float difference still reported as a warning rather than a mismatch.
pub const FLOAT_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyStatus {
    Consistent,
    ConsistentWithWarnings,
    Mismatched,
}

impl ConsistencyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Consistent => "consistent",
            Self::ConsistentWithWarnings => "consistent_with_warnings",
            Self::Mismatched => "mismatched",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffKind {
    /// Floats equal within [`FLOAT_TOLERANCE`].
    FloatDrift,
    /// Timestamps equal at millisecond precision only.
    TimestampPrecision,
    /// Legacy field the relational schema does not carry.
    Unprojected,
    /// Values disagree.
    Mismatch,
}

impl DiffKind {
    fn is_warning(self) -> bool {
        !matches!(self, Self::Mismatch)
    }
}

/// One field-level difference. `field` is a JSON pointer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDiff {
    pub field: String,
    pub kind: DiffKind,
    pub legacy: Value,
    pub relational: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowReport {
    pub project_id: Uuid,
    pub status: ConsistencyStatus,
    pub diffs: Vec<FieldDiff>,
}

impl ShadowReport {
    fn from_diffs(project_id: Uuid, diffs: Vec<FieldDiff>) -> Self {
        let status = if diffs.is_empty() {
            ConsistencyStatus::Consistent
        } else if diffs.iter().all(|d| d.kind.is_warning()) {
            ConsistencyStatus::ConsistentWithWarnings
        } else {
            ConsistencyStatus::Mismatched
        };
        Self {
            project_id,
            status,
            diffs,
        }
    }

    pub fn warnings(&self) -> impl Iterator<Item = &FieldDiff> {
        self.diffs.iter().filter(|d| d.kind.is_warning())
    }

    pub fn mismatches(&self) -> impl Iterator<Item = &FieldDiff> {
        self.diffs.iter().filter(|d| !d.kind.is_warning())
    }

    /// The mismatch as an error value, for callers that surface it as a warning.
    pub fn inconsistency(&self) -> Option<DomainError> {
        (self.status == ConsistencyStatus::Mismatched).then(|| DomainError::PersistenceInconsistency {
            project_id: self.project_id,
            fields: self.mismatches().map(|d| d.field.clone()).collect(),
        })
    }
}

pub struct ShadowValidator {
    documents: Arc<dyn DocumentStore>,
    missions: Arc<dyn MissionRepository>,
}

impl ShadowValidator {
    pub fn new(documents: Arc<dyn DocumentStore>, missions: Arc<dyn MissionRepository>) -> Self {
        Self { documents, missions }
    }

    /// Compare one project's document with its projection.
    #[instrument(skip(self))]
    pub async fn validate(&self, project_id: Uuid) -> DomainResult<ShadowReport> {
        let legacy = self.documents.get(project_id).await?;
        let record = self.missions.find_by_external_id(project_id).await?;

        let report = match (legacy, record) {
            (None, None) => return Err(DomainError::ProjectNotFound(project_id)),
            (Some(legacy), None) => ShadowReport::from_diffs(
                project_id,
                vec![FieldDiff {
                    field: String::new(),
                    kind: DiffKind::Mismatch,
                    legacy,
                    relational: Value::Null,
                }],
            ),
            (None, Some(record)) => ShadowReport::from_diffs(
                project_id,
                vec![FieldDiff {
                    field: String::new(),
                    kind: DiffKind::Mismatch,
                    legacy: Value::Null,
                    relational: legacy_mapping::to_document(&record)?,
                }],
            ),
            (Some(legacy), Some(record)) => {
                let relational = legacy_mapping::to_document(&record)?;
                ShadowReport::from_diffs(project_id, compare_documents(&legacy, &relational))
            }
        };

        if let Some(err) = report.inconsistency() {
            warn!(error = %err, "Shadow validation mismatch");
        }
        Ok(report)
    }

    /// Validate every project present in either store.
    pub async fn validate_all(&self) -> DomainResult<Vec<ShadowReport>> {
        let mut ids = self.documents.list_ids().await?;
        ids.extend(self.missions.list_external_ids().await?);
        ids.sort();
        ids.dedup();

        let mut reports = Vec::with_capacity(ids.len());
        for id in ids {
            reports.push(self.validate(id).await?);
        }
        Ok(reports)
    }
}

/// Field-by-field comparison of a legacy document against a relational
/// projection rendered in the same shape.
pub fn compare_documents(legacy: &Value, relational: &Value) -> Vec<FieldDiff> {
    // The normalized legacy document fills schema defaults and drops unknown
    // fields, which tells unprojected fields apart from lost ones.
    let normalized = ProjectManifest::from_document(legacy)
        .and_then(|m| m.to_document())
        .ok();
    let mut diffs = Vec::new();
    diff_value("", legacy, normalized.as_ref(), relational, &mut diffs);
    diffs
}

fn diff_value(
    path: &str,
    legacy: &Value,
    normalized: Option<&Value>,
    relational: &Value,
    out: &mut Vec<FieldDiff>,
) {
    match (legacy, relational) {
        (Value::Object(l), Value::Object(r)) => {
            for (key, lv) in l {
                let child = format!("{path}/{key}");
                let nv = normalized.and_then(|n| n.get(key));
                match r.get(key) {
                    Some(rv) => diff_value(&child, lv, nv, rv, out),
                    None if is_blank(lv) => {}
                    None => out.push(FieldDiff {
                        field: child,
                        kind: if nv.is_none() {
                            DiffKind::Unprojected
                        } else {
                            DiffKind::Mismatch
                        },
                        legacy: lv.clone(),
                        relational: Value::Null,
                    }),
                }
            }
            for (key, rv) in r {
                if l.contains_key(key) || is_blank(rv) {
                    continue;
                }
                // Defaults the legacy document left implicit.
                let nv = normalized.and_then(|n| n.get(key));
                if nv == Some(rv) {
                    continue;
                }
                out.push(FieldDiff {
                    field: format!("{path}/{key}"),
                    kind: DiffKind::Mismatch,
                    legacy: Value::Null,
                    relational: rv.clone(),
                });
            }
        }
        (Value::Array(l), Value::Array(r)) if l.len() == r.len() => {
            for (i, (lv, rv)) in l.iter().zip(r).enumerate() {
                let nv = normalized.and_then(|n| n.get(i));
                diff_value(&format!("{path}/{i}"), lv, nv, rv, out);
            }
        }
        (Value::Number(l), Value::Number(r)) => {
            let (a, b) = (l.as_f64().unwrap_or(f64::NAN), r.as_f64().unwrap_or(f64::NAN));
            if a == b {
                return;
            }
            let kind = if (a - b).abs() <= FLOAT_TOLERANCE {
                DiffKind::FloatDrift
            } else {
                DiffKind::Mismatch
            };
            push(out, path, kind, legacy, relational);
        }
        (Value::String(l), Value::String(r)) => {
            if l == r {
                return;
            }
            let kind = match (parse_timestamp(l), parse_timestamp(r)) {
                (Some(a), Some(b)) if a == b => return,
                (Some(a), Some(b)) if a.timestamp_millis() == b.timestamp_millis() => {
                    DiffKind::TimestampPrecision
                }
                _ => DiffKind::Mismatch,
            };
            push(out, path, kind, legacy, relational);
        }
        _ if legacy == relational || (is_blank(legacy) && is_blank(relational)) => {}
        _ => push(out, path, DiffKind::Mismatch, legacy, relational),
    }
}

fn push(out: &mut Vec<FieldDiff>, path: &str, kind: DiffKind, legacy: &Value, relational: &Value) {
    out.push(FieldDiff {
        field: path.to_string(),
        kind,
        legacy: legacy.clone(),
        relational: relational.clone(),
    });
}

/// Null, empty arrays and empty objects carry no data.
fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn legacy() -> Value {
        json!({
            "project_id": "6f1c8a52-4a43-4c1e-9b53-0f9e3f3d2a11",
            "current_phase": "CODING",
            "current_sub_state": null,
            "artifacts": { "plan": "store://plan" },
            "budget": { "max_cost": 10.0, "current_cost": 2.5 },
            "metadata": {
                "owner": "dana",
                "created_at": "2026-02-01T08:00:00Z",
                "updated_at": "2026-02-01T09:00:00.123456Z"
            },
            "narrative": []
        })
    }

    fn projection_of(doc: &Value) -> Value {
        let manifest = ProjectManifest::from_document(doc).unwrap();
        let record = legacy_mapping::flatten(&manifest, Uuid::new_v4()).unwrap();
        legacy_mapping::to_document(&record).unwrap()
    }

    #[test]
    fn test_faithful_projection_is_consistent() {
        let doc = legacy();
        let diffs = compare_documents(&doc, &projection_of(&doc));
        assert!(diffs.is_empty(), "{diffs:?}");
    }

    #[test]
    fn test_float_drift_is_a_warning() {
        let doc = legacy();
        let mut relational = projection_of(&doc);
        relational["budget"]["current_cost"] = json!(2.500_000_1);
        let report = ShadowReport::from_diffs(Uuid::nil(), compare_documents(&doc, &relational));
        assert_eq!(report.status, ConsistencyStatus::ConsistentWithWarnings);
        assert_eq!(report.diffs[0].field, "/budget/current_cost");
        assert_eq!(report.diffs[0].kind, DiffKind::FloatDrift);
        assert!(report.inconsistency().is_none());
    }

    #[test]
    fn test_millisecond_timestamps_are_a_warning() {
        let doc = legacy();
        let mut relational = projection_of(&doc);
        relational["metadata"]["updated_at"] = json!("2026-02-01T09:00:00.123Z");
        let diffs = compare_documents(&doc, &relational);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].kind, DiffKind::TimestampPrecision);
    }

    #[test]
    fn test_unknown_legacy_field_is_a_warning() {
        let mut doc = legacy();
        doc["budget"]["currency"] = json!("USD");
        let diffs = compare_documents(&doc, &projection_of(&doc));
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].field, "/budget/currency");
        assert_eq!(diffs[0].kind, DiffKind::Unprojected);
    }

    #[test]
    fn test_phase_disagreement_is_a_mismatch() {
        let doc = legacy();
        let mut relational = projection_of(&doc);
        relational["current_phase"] = json!("TESTING");
        let report = ShadowReport::from_diffs(Uuid::nil(), compare_documents(&doc, &relational));
        assert_eq!(report.status, ConsistencyStatus::Mismatched);
        match report.inconsistency() {
            Some(DomainError::PersistenceInconsistency { fields, .. }) => {
                assert_eq!(fields, vec!["/current_phase".to_string()]);
            }
            other => panic!("expected inconsistency, got {other:?}"),
        }
    }

    #[test]
    fn test_lost_artifact_is_a_mismatch() {
        let doc = legacy();
        let mut relational = projection_of(&doc);
        relational["artifacts"] = json!({});
        let diffs = compare_documents(&doc, &relational);
        assert_eq!(diffs[0].field, "/artifacts/plan");
        assert_eq!(diffs[0].kind, DiffKind::Mismatch);
    }
}
