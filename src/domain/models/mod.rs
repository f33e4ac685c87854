//! Domain models.

pub mod config;
pub mod ledger;
pub mod manifest;
pub mod mission;
pub mod phase;
pub mod quality_gate;
pub mod specialist;
pub mod task;

pub use config::{
    ArtifactsConfig, BudgetConfig, CircuitBreakerConfig, Config, DatabaseConfig, DocumentsConfig,
    IntelligenceConfig, LoggingConfig, OrchestratorConfig, PersistenceConfig, RetryConfig,
    TestingConfig,
};
pub use ledger::{LedgerEntry, NewLedgerEntry};
pub use manifest::{
    Budget, DomainConcern, DomainKnowledge, GateRecord, ManifestMetadata, NarrativeEntry,
    ProjectManifest, ToolCallRecord, TransitionRecord, Trajectory,
};
pub use mission::{
    ArtifactRow, ConceptRow, ConcernRow, MissionRecord, MissionRow, NarrativeRow,
    ProjectionCounts, QualityGateRow, ToolCallRow, TrajectoryRow,
};
pub use phase::{Phase, SubState};
pub use quality_gate::{GateConfig, GateKind, GateOutcome};
pub use specialist::{ArtifactRef, SpecialistResult};
pub use task::{Task, TaskAction, TaskStatus};
