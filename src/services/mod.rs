//! Application services: persistence, orchestration, scheduling and the
//! intelligence gateway.

pub mod circuit_breaker;
pub mod command_runner;
pub mod engine;
pub mod intelligence_gateway;
pub mod legacy_mapping;
pub mod persistence;
pub mod phase_orchestrator;
pub mod quality_gates;
pub mod retry;
pub mod scheduler;
pub mod shadow_validator;
pub mod specialist_registry;
pub mod specialists;
pub mod task_ledger;

pub use circuit_breaker::{BreakerSettings, CircuitBreaker, CircuitState};
pub use engine::{Engine, TickOutcome};
pub use intelligence_gateway::{GatewayError, GatewayResponse, IntelligenceGateway};
pub use persistence::{BackfillReport, PersistenceLayer};
pub use phase_orchestrator::{OrchestratorSettings, PhaseOrchestrator, StepOutcome, StepReport};
pub use quality_gates::{GateObservation, GateObserver, GateSet, QualityGate};
pub use retry::RetryPolicy;
pub use scheduler::{RecoveryReport, Scheduler};
pub use shadow_validator::{ConsistencyStatus, ShadowReport, ShadowValidator};
pub use specialist_registry::SpecialistRegistry;
pub use specialists::{builtin_registry, PromptToolkit};
pub use task_ledger::{LedgerSummary, TaskLedger};
