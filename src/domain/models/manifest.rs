//! The project manifest: canonical persisted state of one project.
//!
//! The serialized form of [`ProjectManifest`] is the legacy document format
//! consumed and produced verbatim by the document store.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::phase::{Phase, SubState};
use super::specialist::ArtifactRef;
use crate::domain::errors::{DomainError, DomainResult};

/// Cost envelope of a project.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub max_cost: f64,
    pub current_cost: f64,
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: f64,
}

fn default_alert_threshold() -> f64 {
    0.8
}

impl Budget {
    pub fn new(max_cost: f64) -> Self {
        Self {
            max_cost,
            current_cost: 0.0,
            alert_threshold: default_alert_threshold(),
        }
    }

    pub fn with_alert_threshold(mut self, threshold: f64) -> Self {
        self.alert_threshold = threshold;
        self
    }

    /// Spend still available; never negative.
    pub fn remaining(&self) -> f64 {
        (self.max_cost - self.current_cost).max(0.0)
    }

    /// Fraction of the budget consumed.
    pub fn utilization(&self) -> f64 {
        if self.max_cost <= 0.0 {
            1.0
        } else {
            self.current_cost / self.max_cost
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() <= 0.0
    }

    pub fn is_alerting(&self) -> bool {
        self.utilization() >= self.alert_threshold
    }

    /// Add spend. Returns `true` when this charge crossed the alert threshold.
    ///
    /// A charge that would push `current_cost` over `max_cost` is rejected and
    /// leaves the budget unchanged.
    pub fn charge(&mut self, delta: f64) -> DomainResult<bool> {
        if !delta.is_finite() || delta < 0.0 {
            return Err(DomainError::ValidationFailed(format!(
                "cost delta must be a non-negative number, got {delta}"
            )));
        }
        if delta == 0.0 {
            return Ok(false);
        }
        if self.current_cost + delta > self.max_cost {
            return Err(DomainError::BudgetExceeded {
                remaining: self.remaining(),
                required: delta,
            });
        }
        let was_alerting = self.is_alerting();
        self.current_cost += delta;
        Ok(!was_alerting && self.is_alerting())
    }

    /// Book spend that has already happened.
    ///
    /// Unlike [`Budget::charge`] this never refuses: spend past `max_cost`
    /// saturates the budget at its ceiling. Returns `true` when the alert
    /// threshold was crossed.
    pub fn absorb(&mut self, delta: f64) -> DomainResult<bool> {
        if !delta.is_finite() || delta < 0.0 {
            return Err(DomainError::ValidationFailed(format!(
                "cost delta must be a non-negative number, got {delta}"
            )));
        }
        let was_alerting = self.is_alerting();
        self.current_cost = (self.current_cost + delta).min(self.max_cost);
        Ok(delta > 0.0 && !was_alerting && self.is_alerting())
    }

    pub fn validate(&self) -> DomainResult<()> {
        if !self.max_cost.is_finite() || self.max_cost < 0.0 {
            return Err(DomainError::ValidationFailed(
                "budget.max_cost must be a non-negative number".to_string(),
            ));
        }
        if !self.current_cost.is_finite() || self.current_cost < 0.0 {
            return Err(DomainError::ValidationFailed(
                "budget.current_cost must be a non-negative number".to_string(),
            ));
        }
        if self.current_cost > self.max_cost {
            return Err(DomainError::ValidationFailed(format!(
                "budget.current_cost ({}) exceeds budget.max_cost ({})",
                self.current_cost, self.max_cost
            )));
        }
        if !(self.alert_threshold > 0.0 && self.alert_threshold <= 1.0) {
            return Err(DomainError::ValidationFailed(format!(
                "budget.alert_threshold must be in (0, 1], got {}",
                self.alert_threshold
            )));
        }
        Ok(())
    }
}

/// Ownership and timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency counter, bumped on every save.
    #[serde(default)]
    pub revision: u64,
}

/// A committed phase change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: Phase,
    pub to: Phase,
    pub at: DateTime<Utc>,
}

/// Movement of the project through its phases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trajectory {
    /// TESTING -> CODING repairs since the last successful test run.
    #[serde(default)]
    pub repair_cycles: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition: Option<TransitionRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrativeEntry {
    pub phase: Phase,
    pub entry: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainConcern {
    pub concern: String,
    #[serde(default = "default_severity")]
    pub severity: String,
}

fn default_severity() -> String {
    "medium".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainKnowledge {
    #[serde(default)]
    pub concepts: Vec<String>,
    #[serde(default)]
    pub concerns: Vec<DomainConcern>,
}

impl DomainKnowledge {
    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty() && self.concerns.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub called_at: DateTime<Utc>,
}

/// Outcome of a quality gate evaluated on a committed transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateRecord {
    pub gate_id: String,
    pub blocking: bool,
    pub passed: bool,
    pub from: Phase,
    pub to: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Canonical state record for one project.
///
/// `current_phase` can only change through [`ProjectManifest::transition_to`],
/// which enforces the phase transition table. Artifacts are append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectManifest {
    project_id: Uuid,
    current_phase: Phase,
    #[serde(default)]
    current_sub_state: Option<SubState>,
    #[serde(default)]
    artifacts: BTreeMap<String, String>,
    budget: Budget,
    metadata: ManifestMetadata,
    #[serde(default)]
    trajectory: Trajectory,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    narrative: Vec<NarrativeEntry>,
    #[serde(default, skip_serializing_if = "DomainKnowledge::is_empty")]
    domain: DomainKnowledge,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ToolCallRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    quality_gates: Vec<GateRecord>,
}

impl ProjectManifest {
    /// Start a new project in PLANNING / DISCOVERY.
    pub fn new(project_id: Uuid, owner: impl Into<String>, budget: Budget) -> Self {
        let now = Utc::now();
        Self {
            project_id,
            current_phase: Phase::Planning,
            current_sub_state: Some(SubState::Discovery),
            artifacts: BTreeMap::new(),
            budget,
            metadata: ManifestMetadata {
                owner: owner.into(),
                created_at: now,
                updated_at: now,
                revision: 0,
            },
            trajectory: Trajectory::default(),
            narrative: Vec::new(),
            domain: DomainKnowledge::default(),
            tool_calls: Vec::new(),
            quality_gates: Vec::new(),
        }
    }

    /// Parse and validate a legacy document.
    pub fn from_document(document: &serde_json::Value) -> DomainResult<Self> {
        let manifest: Self = serde_json::from_value(document.clone())?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn to_document(&self) -> DomainResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.metadata.owner.trim().is_empty() {
            return Err(DomainError::ValidationFailed(
                "metadata.owner cannot be empty".to_string(),
            ));
        }
        if self.metadata.updated_at < self.metadata.created_at {
            return Err(DomainError::ValidationFailed(
                "metadata.updated_at precedes metadata.created_at".to_string(),
            ));
        }
        if let Some(sub_state) = self.current_sub_state {
            if sub_state.phase() != self.current_phase {
                return Err(DomainError::ValidationFailed(format!(
                    "sub-state {} does not belong to phase {}",
                    sub_state, self.current_phase
                )));
            }
        }
        if self.artifacts.keys().any(|k| k.trim().is_empty()) {
            return Err(DomainError::ValidationFailed(
                "artifact names cannot be empty".to_string(),
            ));
        }
        self.budget.validate()
    }

    pub fn project_id(&self) -> Uuid {
        self.project_id
    }

    pub fn phase(&self) -> Phase {
        self.current_phase
    }

    pub fn sub_state(&self) -> Option<SubState> {
        self.current_sub_state
    }

    pub fn artifacts(&self) -> &BTreeMap<String, String> {
        &self.artifacts
    }

    pub fn budget(&self) -> &Budget {
        &self.budget
    }

    pub fn metadata(&self) -> &ManifestMetadata {
        &self.metadata
    }

    pub fn revision(&self) -> u64 {
        self.metadata.revision
    }

    pub fn trajectory(&self) -> &Trajectory {
        &self.trajectory
    }

    pub fn narrative(&self) -> &[NarrativeEntry] {
        &self.narrative
    }

    pub fn domain(&self) -> &DomainKnowledge {
        &self.domain
    }

    pub fn tool_calls(&self) -> &[ToolCallRecord] {
        &self.tool_calls
    }

    pub fn quality_gates(&self) -> &[GateRecord] {
        &self.quality_gates
    }

    /// Whether an artifact with this logical name exists, in any version.
    pub fn has_artifact(&self, name: &str) -> bool {
        self.latest_artifact(name).is_some()
    }

    /// Location of the newest version of a logical artifact.
    pub fn latest_artifact(&self, name: &str) -> Option<&str> {
        let mut best: Option<(u32, &str)> = None;
        for (key, location) in &self.artifacts {
            if let Some(version) = artifact_version(key, name) {
                if best.map_or(true, |(v, _)| version > v) {
                    best = Some((version, location.as_str()));
                }
            }
        }
        best.map(|(_, location)| location)
    }

    /// Commit a phase change along the transition table.
    ///
    /// Clears the sub-state, except that entering PLANNING starts at DISCOVERY.
    pub(crate) fn transition_to(&mut self, next: Phase) -> DomainResult<()> {
        let from = self.current_phase;
        if !from.can_transition_to(next) {
            return Err(DomainError::InvalidStateTransition {
                from: from.to_string(),
                to: next.to_string(),
                reason: "not in the phase transition table".to_string(),
            });
        }
        self.current_phase = next;
        self.current_sub_state = (next == Phase::Planning).then_some(SubState::Discovery);
        self.trajectory.last_transition = Some(TransitionRecord {
            from,
            to: next,
            at: Utc::now(),
        });
        Ok(())
    }

    pub(crate) fn set_sub_state(&mut self, sub_state: Option<SubState>) -> DomainResult<()> {
        if let Some(s) = sub_state {
            if s.phase() != self.current_phase {
                return Err(DomainError::InvalidStateTransition {
                    from: self.current_phase.to_string(),
                    to: s.to_string(),
                    reason: "sub-state belongs to another phase".to_string(),
                });
            }
        }
        self.current_sub_state = sub_state;
        Ok(())
    }

    /// Merge artifact references without overwriting existing entries.
    ///
    /// Re-merging an identical reference is a no-op. A new location under an
    /// existing name is stored as the next version (`name.v2`, `name.v3`, ...).
    /// Returns the keys that were added.
    pub(crate) fn merge_artifacts(&mut self, refs: &[ArtifactRef]) -> Vec<String> {
        let mut added = Vec::new();
        for artifact in refs {
            let name = artifact.name();
            let already_recorded = self
                .artifacts
                .iter()
                .any(|(k, loc)| artifact_version(k, name).is_some() && loc == artifact.location());
            if already_recorded {
                continue;
            }
            let key = match self
                .artifacts
                .keys()
                .filter_map(|k| artifact_version(k, name))
                .max()
            {
                None => name.to_string(),
                Some(version) => format!("{name}.v{}", version + 1),
            };
            self.artifacts.insert(key.clone(), artifact.location().to_string());
            added.push(key);
        }
        added
    }

    /// Add spend to the budget. Returns `true` when the alert threshold was crossed.
    pub(crate) fn charge(&mut self, delta: f64) -> DomainResult<bool> {
        self.budget.charge(delta)
    }

    /// Book spend of a step that did not commit. See [`Budget::absorb`].
    pub(crate) fn absorb_spend(&mut self, delta: f64) -> DomainResult<bool> {
        self.budget.absorb(delta)
    }

    /// Raise the budget ceiling (operator action).
    pub fn raise_budget(&mut self, max_cost: f64) -> DomainResult<()> {
        if !max_cost.is_finite() || max_cost < self.budget.current_cost {
            return Err(DomainError::ValidationFailed(format!(
                "new max_cost {max_cost} is below current_cost {}",
                self.budget.current_cost
            )));
        }
        self.budget.max_cost = max_cost;
        self.touch();
        Ok(())
    }

    pub(crate) fn record_repair(&mut self) {
        self.trajectory.repair_cycles += 1;
    }

    pub(crate) fn reset_repairs(&mut self) {
        self.trajectory.repair_cycles = 0;
    }

    pub(crate) fn record_gate(&mut self, record: GateRecord) {
        self.quality_gates.push(record);
    }

    /// Advance `updated_at`, strictly increasing even if the clock stalls.
    pub(crate) fn touch(&mut self) {
        let now = Utc::now();
        let previous = self.metadata.updated_at;
        self.metadata.updated_at = if now > previous {
            now
        } else {
            previous + Duration::microseconds(1)
        };
    }

    pub(crate) fn bump_revision(&mut self) {
        self.metadata.revision += 1;
    }
}

/// Version of `key` as an instance of logical artifact `name`.
///
/// `name` itself is version 1, `name.vN` is version N.
fn artifact_version(key: &str, name: &str) -> Option<u32> {
    if key == name {
        return Some(1);
    }
    key.strip_prefix(name)
        .and_then(|rest| rest.strip_prefix(".v"))
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|v| *v >= 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manifest() -> ProjectManifest {
        ProjectManifest::new(Uuid::new_v4(), "alice", Budget::new(10.0))
    }

    #[test]
    fn test_new_manifest_starts_in_planning_discovery() {
        let m = manifest();
        assert_eq!(m.phase(), Phase::Planning);
        assert_eq!(m.sub_state(), Some(SubState::Discovery));
        assert_eq!(m.revision(), 0);
        assert!(m.validate().is_ok());
    }

    #[test]
    fn test_transition_outside_table_is_rejected() {
        let mut m = manifest();
        let err = m.transition_to(Phase::Testing).unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
        assert_eq!(m.phase(), Phase::Planning);
    }

    #[test]
    fn test_transition_clears_sub_state_and_records_trajectory() {
        let mut m = manifest();
        m.transition_to(Phase::Coding).unwrap();
        assert_eq!(m.phase(), Phase::Coding);
        assert_eq!(m.sub_state(), None);
        let last = m.trajectory().last_transition.clone().unwrap();
        assert_eq!((last.from, last.to), (Phase::Planning, Phase::Coding));
    }

    #[test]
    fn test_sub_state_must_match_phase() {
        let mut m = manifest();
        m.transition_to(Phase::Coding).unwrap();
        assert!(m.set_sub_state(Some(SubState::Requirements)).is_err());
        assert!(m.set_sub_state(None).is_ok());
    }

    #[test]
    fn test_artifacts_are_append_only() {
        let mut m = manifest();
        let added = m.merge_artifacts(&[ArtifactRef::new("code_bundle", "store://a")]);
        assert_eq!(added, vec!["code_bundle".to_string()]);

        // identical reference is a no-op
        assert!(m
            .merge_artifacts(&[ArtifactRef::new("code_bundle", "store://a")])
            .is_empty());

        // new location becomes a new version, the original is preserved
        let added = m.merge_artifacts(&[ArtifactRef::new("code_bundle", "store://b")]);
        assert_eq!(added, vec!["code_bundle.v2".to_string()]);
        assert_eq!(m.artifacts()["code_bundle"], "store://a");
        assert_eq!(m.latest_artifact("code_bundle"), Some("store://b"));

        let added = m.merge_artifacts(&[ArtifactRef::new("code_bundle", "store://c")]);
        assert_eq!(added, vec!["code_bundle.v3".to_string()]);
        assert_eq!(m.latest_artifact("code_bundle"), Some("store://c"));
        assert!(!m.has_artifact("code"));
    }

    #[test]
    fn test_budget_charge_never_exceeds_max() {
        let mut budget = Budget::new(10.0);
        assert!(!budget.charge(5.0).unwrap());
        assert!(budget.charge(3.5).unwrap(), "8.5/10 crosses the 0.8 alert threshold");
        let err = budget.charge(2.0).unwrap_err();
        assert!(matches!(err, DomainError::BudgetExceeded { .. }));
        assert!((budget.current_cost - 8.5).abs() < f64::EPSILON);
        assert!(budget.charge(-1.0).is_err());
    }

    #[test]
    fn test_absorb_saturates_at_ceiling() {
        let mut budget = Budget::new(1.0);
        assert!(!budget.absorb(0.6).unwrap());
        assert!(budget.absorb(0.6).unwrap());
        assert!((budget.current_cost - 1.0).abs() < f64::EPSILON);
        assert!(budget.is_exhausted());
        budget.validate().unwrap();
        assert!(!budget.absorb(0.3).unwrap(), "already alerting");
        assert!(budget.absorb(f64::NAN).is_err());
    }

    #[test]
    fn test_touch_is_strictly_increasing() {
        let mut m = manifest();
        let before = m.metadata().updated_at;
        m.touch();
        let middle = m.metadata().updated_at;
        m.touch();
        assert!(middle > before);
        assert!(m.metadata().updated_at > middle);
    }

    #[test]
    fn test_document_roundtrip_with_defaults() {
        let id = Uuid::new_v4();
        let doc = json!({
            "project_id": id,
            "current_phase": "TESTING",
            "current_sub_state": null,
            "artifacts": { "code_bundle_v1": "store://code" },
            "budget": { "max_cost": 10.0, "current_cost": 2.0 },
            "metadata": {
                "owner": "bob",
                "created_at": "2026-01-01T00:00:00Z",
                "updated_at": "2026-01-02T00:00:00Z"
            }
        });
        let m = ProjectManifest::from_document(&doc).unwrap();
        assert_eq!(m.project_id(), id);
        assert_eq!(m.phase(), Phase::Testing);
        assert!((m.budget().alert_threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(m.revision(), 0);
        assert_eq!(m.trajectory().repair_cycles, 0);
    }

    #[test]
    fn test_document_with_mismatched_sub_state_is_rejected() {
        let doc = json!({
            "project_id": Uuid::new_v4(),
            "current_phase": "CODING",
            "current_sub_state": "DISCOVERY",
            "budget": { "max_cost": 10.0, "current_cost": 0.0 },
            "metadata": {
                "owner": "bob",
                "created_at": "2026-01-01T00:00:00Z",
                "updated_at": "2026-01-01T00:00:00Z"
            }
        });
        assert!(matches!(
            ProjectManifest::from_document(&doc),
            Err(DomainError::ValidationFailed(_))
        ));
    }
}
