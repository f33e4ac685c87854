//! Port trait definitions (Hexagonal Architecture)
//!
//! Async trait interfaces that adapters implement:
//! - DocumentStore: legacy manifest documents
//! - MissionRepository: relational projection
//! - TaskRepository / LedgerRepository: scheduler state and audit trail
//! - ArtifactStore: artifact bodies
//! - IntelligenceProvider: the external LLM capability
//! - Specialist / QualityCheck: phase handlers and gate checks

pub mod artifact_store;
pub mod document_store;
pub mod intelligence;
pub mod ledger_repository;
pub mod mission_repository;
pub mod quality_check;
pub mod specialist;
pub mod task_repository;

pub use artifact_store::ArtifactStore;
pub use document_store::{document_revision, DocumentStore};
pub use intelligence::{
    IntelligenceProvider, IntelligenceRequest, ProviderError, ProviderResponse, TokenUsage,
};
pub use ledger_repository::LedgerRepository;
pub use mission_repository::MissionRepository;
pub use quality_check::{CheckVerdict, GateContext, QualityCheck};
pub use specialist::{Specialist, SpecialistContext, SpendMeter};
pub use task_repository::{TaskFilter, TaskRepository};
