//! SDLC phases, phase-scoped sub-states, and the transition table.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle phase of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Planning,
    Coding,
    Testing,
    AwaitingQaApproval,
    Deployment,
    Production,
    Maintenance,
}

impl Phase {
    /// Every phase, in forward order.
    pub const ALL: [Phase; 7] = [
        Phase::Planning,
        Phase::Coding,
        Phase::Testing,
        Phase::AwaitingQaApproval,
        Phase::Deployment,
        Phase::Production,
        Phase::Maintenance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "PLANNING",
            Self::Coding => "CODING",
            Self::Testing => "TESTING",
            Self::AwaitingQaApproval => "AWAITING_QA_APPROVAL",
            Self::Deployment => "DEPLOYMENT",
            Self::Production => "PRODUCTION",
            Self::Maintenance => "MAINTENANCE",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().replace('-', "_").as_str() {
            "PLANNING" => Some(Self::Planning),
            "CODING" => Some(Self::Coding),
            "TESTING" => Some(Self::Testing),
            "AWAITING_QA_APPROVAL" => Some(Self::AwaitingQaApproval),
            "DEPLOYMENT" => Some(Self::Deployment),
            "PRODUCTION" => Some(Self::Production),
            "MAINTENANCE" => Some(Self::Maintenance),
            _ => None,
        }
    }

    /// Phases reachable from this one in a single committed step.
    pub fn allowed_targets(&self) -> &'static [Phase] {
        match self {
            Self::Planning => &[Phase::Coding],
            Self::Coding => &[Phase::Testing],
            Self::Testing => &[Phase::AwaitingQaApproval, Phase::Coding],
            Self::AwaitingQaApproval => &[Phase::Deployment, Phase::Coding],
            Self::Deployment => &[Phase::Production],
            Self::Production => &[Phase::Maintenance],
            Self::Maintenance => &[Phase::Coding],
        }
    }

    pub fn can_transition_to(&self, target: Phase) -> bool {
        self.allowed_targets().contains(&target)
    }

    /// The phase that automatic repair returns to when this phase fails.
    ///
    /// Only the phase immediately downstream of code generation repairs itself.
    pub fn repair_target(&self) -> Option<Phase> {
        match self {
            Self::Testing => Some(Phase::Coding),
            _ => None,
        }
    }

    /// PRODUCTION is terminal for automation; leaving it is event-driven.
    pub fn is_automation_terminal(&self) -> bool {
        matches!(self, Self::Production)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase-scoped sub-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubState {
    Discovery,
    Requirements,
    Architecture,
    TaskBreakdown,
}

impl SubState {
    /// Planning sub-states in the order the planning specialist walks them.
    pub const PLANNING: [SubState; 4] = [
        SubState::Discovery,
        SubState::Requirements,
        SubState::Architecture,
        SubState::TaskBreakdown,
    ];

    /// The phase this sub-state belongs to.
    pub fn phase(&self) -> Phase {
        match self {
            Self::Discovery | Self::Requirements | Self::Architecture | Self::TaskBreakdown => {
                Phase::Planning
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "DISCOVERY",
            Self::Requirements => "REQUIREMENTS",
            Self::Architecture => "ARCHITECTURE",
            Self::TaskBreakdown => "TASK_BREAKDOWN",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "DISCOVERY" => Some(Self::Discovery),
            "REQUIREMENTS" => Some(Self::Requirements),
            "ARCHITECTURE" => Some(Self::Architecture),
            "TASK_BREAKDOWN" => Some(Self::TaskBreakdown),
            _ => None,
        }
    }

    /// Next planning sub-state, or `None` when planning is complete.
    pub fn next(&self) -> Option<SubState> {
        let idx = Self::PLANNING.iter().position(|s| s == self)?;
        Self::PLANNING.get(idx + 1).copied()
    }
}

impl fmt::Display for SubState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_path_is_reachable() {
        let path = [
            Phase::Planning,
            Phase::Coding,
            Phase::Testing,
            Phase::AwaitingQaApproval,
            Phase::Deployment,
            Phase::Production,
            Phase::Maintenance,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_backward_transitions() {
        assert!(Phase::Testing.can_transition_to(Phase::Coding));
        assert!(Phase::AwaitingQaApproval.can_transition_to(Phase::Coding));
        assert!(Phase::Maintenance.can_transition_to(Phase::Coding));
        assert!(!Phase::Coding.can_transition_to(Phase::Planning));
        assert!(!Phase::Planning.can_transition_to(Phase::Testing));
        assert!(!Phase::Production.can_transition_to(Phase::Coding));
    }

    #[test]
    fn test_only_testing_repairs() {
        assert_eq!(Phase::Testing.repair_target(), Some(Phase::Coding));
        for phase in Phase::ALL.iter().filter(|p| **p != Phase::Testing) {
            assert_eq!(phase.repair_target(), None);
        }
    }

    #[test]
    fn test_phase_string_roundtrip() {
        for phase in Phase::ALL {
            assert_eq!(Phase::parse_str(phase.as_str()), Some(phase));
        }
        assert_eq!(Phase::parse_str("awaiting-qa-approval"), Some(Phase::AwaitingQaApproval));
        assert_eq!(Phase::parse_str("shipping"), None);
        assert_eq!(
            serde_json::to_string(&Phase::AwaitingQaApproval).unwrap(),
            "\"AWAITING_QA_APPROVAL\""
        );
    }

    #[test]
    fn test_planning_substates_walk() {
        assert_eq!(SubState::Discovery.next(), Some(SubState::Requirements));
        assert_eq!(SubState::Architecture.next(), Some(SubState::TaskBreakdown));
        assert_eq!(SubState::TaskBreakdown.next(), None);
        assert!(SubState::PLANNING.iter().all(|s| s.phase() == Phase::Planning));
    }
}
