//! Domain errors for the SDLC orchestration engine.

use thiserror::Error;
use uuid::Uuid;

use super::models::{Phase, TaskStatus};

/// Task lifecycle violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("Invalid task state transition from {from} to {to}")]
    InvalidStateTransition { from: TaskStatus, to: TaskStatus },

    #[error("Task {task_id} is already terminal ({status})")]
    AlreadyTerminal { task_id: Uuid, status: TaskStatus },

    #[error("Task {0} is not terminal and cannot be archived")]
    NotTerminal(Uuid),
}

/// Domain-level errors that can occur while driving a project through its phases.
#[derive(Debug, Error)]
pub enum DomainError {
    /// No specialist is registered for the phase. Configuration error, fatal.
    #[error("No specialist registered for phase {0}")]
    UnknownPhaseHandler(Phase),

    /// The specialist's preconditions failed; the manifest is untouched.
    #[error("Preconditions not met for phase {phase}: {reason}")]
    PreconditionNotMet { phase: Phase, reason: String },

    /// Non-repairable specialist failure; requires manual intervention.
    #[error("Phase {phase} failed: {reason}")]
    PhaseFailed { phase: Phase, reason: String },

    /// A blocking quality gate rejected the transition; the manifest is untouched.
    #[error("Quality gate(s) rejected transition {from} -> {to}: {}", .failed.join(", "))]
    QualityGateFailure {
        from: Phase,
        to: Phase,
        failed: Vec<String>,
    },

    /// The project budget cannot cover the requested spend.
    #[error("Budget exceeded: remaining {remaining:.4}, required {required:.4}")]
    BudgetExceeded { remaining: f64, required: f64 },

    /// Raised only by the shadow validator, surfaced as a warning.
    #[error("Persistence inconsistency for project {project_id}: {}", .fields.join(", "))]
    PersistenceInconsistency { project_id: Uuid, fields: Vec<String> },

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition { from: String, to: String, reason: String },

    #[error("Invalid specialist result: {0}")]
    InvalidSpecialistResult(String),

    #[error("Project not found: {0}")]
    ProjectNotFound(Uuid),

    #[error("Project already exists: {0}")]
    ProjectAlreadyExists(Uuid),

    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Project {project_id} already has in-flight task {task_id}")]
    ProjectBusy { project_id: Uuid, task_id: Uuid },

    #[error("Concurrency conflict: {entity} {id} was modified")]
    ConcurrencyConflict { entity: String, id: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error(transparent)]
    Task(#[from] TaskError),
}

impl DomainError {
    /// Whether re-running the same step can succeed once the cause is fixed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PreconditionNotMet { .. }
                | Self::QualityGateFailure { .. }
                | Self::ConcurrencyConflict { .. }
                | Self::ProjectBusy { .. }
        )
    }

    /// Short machine-readable error kind, used in ledger summaries and JSON output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownPhaseHandler(_) => "unknown_phase_handler",
            Self::PreconditionNotMet { .. } => "precondition_not_met",
            Self::PhaseFailed { .. } => "phase_failed",
            Self::QualityGateFailure { .. } => "quality_gate_failure",
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::PersistenceInconsistency { .. } => "persistence_inconsistency",
            Self::InvalidStateTransition { .. } => "invalid_state_transition",
            Self::InvalidSpecialistResult(_) => "invalid_specialist_result",
            Self::ProjectNotFound(_) => "project_not_found",
            Self::ProjectAlreadyExists(_) => "project_already_exists",
            Self::TaskNotFound(_) => "task_not_found",
            Self::ProjectBusy { .. } => "project_busy",
            Self::ConcurrencyConflict { .. } => "concurrency_conflict",
            Self::ValidationFailed(_) => "validation_failed",
            Self::DatabaseError(_) => "database_error",
            Self::SerializationError(_) => "serialization_error",
            Self::StorageError(_) => "storage_error",
            Self::Task(_) => "task_error",
        }
    }
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        DomainError::StorageError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(DomainError::PreconditionNotMet {
            phase: Phase::Coding,
            reason: "missing plan".to_string(),
        }
        .is_retryable());
        assert!(DomainError::QualityGateFailure {
            from: Phase::Coding,
            to: Phase::Testing,
            failed: vec!["lint".to_string()],
        }
        .is_retryable());
        assert!(!DomainError::UnknownPhaseHandler(Phase::Planning).is_retryable());
        assert!(!DomainError::BudgetExceeded {
            remaining: 0.0,
            required: 1.0,
        }
        .is_retryable());
    }

    #[test]
    fn test_gate_failure_message_lists_gates() {
        let err = DomainError::QualityGateFailure {
            from: Phase::Coding,
            to: Phase::Testing,
            failed: vec!["lint".to_string(), "coverage".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Quality gate(s) rejected transition CODING -> TESTING: lint, coverage"
        );
        assert_eq!(err.kind(), "quality_gate_failure");
    }
}
