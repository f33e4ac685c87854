//! Quality gate configuration and outcomes.

use serde::{Deserialize, Serialize};

use super::phase::Phase;

/// The check a configured gate performs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GateKind {
    /// Passes when the manifest holds an artifact with this logical name.
    ArtifactPresent { artifact: String },
    /// Passes when at least this fraction of the budget remains.
    BudgetHeadroom { min_remaining_ratio: f64 },
    /// Passes when the shell command exits zero within the timeout.
    Command {
        command: String,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_blocking() -> bool {
    true
}

/// A gate bound to one phase transition, as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    pub id: String,
    pub from: Phase,
    pub to: Phase,
    #[serde(default = "default_blocking")]
    pub blocking: bool,
    pub kind: GateKind,
}

/// Result of evaluating one gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateOutcome {
    pub gate_id: String,
    pub blocking: bool,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_config_from_yaml() {
        let yaml = r"
- id: lint
  from: CODING
  to: TESTING
  kind:
    type: command
    command: cargo clippy
- id: qa-record
  from: AWAITING_QA_APPROVAL
  to: DEPLOYMENT
  blocking: false
  kind:
    type: artifact_present
    artifact: qa_approval
";
        let gates: Vec<GateConfig> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(gates.len(), 2);
        assert!(gates[0].blocking);
        assert_eq!(
            gates[0].kind,
            GateKind::Command {
                command: "cargo clippy".to_string(),
                timeout_secs: 60
            }
        );
        assert!(!gates[1].blocking);
        assert_eq!(gates[1].from, Phase::AwaitingQaApproval);
    }
}
