//! SDLC engine: a durable, manifest-driven phase orchestrator.
//!
//! A project moves through PLANNING, CODING, TESTING, AWAITING_QA_APPROVAL,
//! DEPLOYMENT, PRODUCTION and MAINTENANCE one caller-driven step at a time.
//! Each step dispatches a phase specialist, checks the quality gates bound to
//! the transition and commits the manifest atomically. Failed tests loop back
//! to coding until a repair bound is reached.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): manifest, phases, tasks, errors and port traits
//! - **Adapters** (`adapters`): SQLite projection, JSON document store,
//!   artifact store, intelligence providers
//! - **Service Layer** (`services`): persistence, orchestration, scheduling,
//!   gateway, quality gates
//! - **Infrastructure Layer** (`infrastructure`): configuration, logging, wiring
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use sdlc_engine::infrastructure::{App, ConfigLoader};
//! use sdlc_engine::domain::models::TaskAction;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let app = App::build(ConfigLoader::load()?).await?;
//!     let project = app.engine.create_project("dana", 10.0, None).await?;
//!     app.engine.run_now(project.project_id(), TaskAction::Advance).await?;
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    Budget, Config, Phase, ProjectManifest, SpecialistResult, SubState, Task, TaskAction,
    TaskStatus,
};
pub use domain::ports::{Specialist, SpecialistContext};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{Engine, PersistenceLayer, PhaseOrchestrator, StepOutcome, StepReport};
