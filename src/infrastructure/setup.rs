//! Workspace initialization and application wiring
//!
//! Handles:
//! - `.sdlc/` directory and default config file creation
//! - Database open + schema migration (with pre-migration backup)
//! - Construction of stores, provider, gateway, specialists, gates and the engine

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::adapters::artifacts::FsArtifactStore;
use crate::adapters::documents::JsonFileDocumentStore;
use crate::adapters::intelligence::{AnthropicProvider, MockIntelligenceProvider};
use crate::adapters::sqlite::{
    initialize_database, MigrationReport, SqliteLedgerRepository, SqliteMissionRepository,
    SqliteTaskRepository,
};
use crate::domain::models::Config;
use crate::domain::ports::{DocumentStore, IntelligenceProvider, MissionRepository};
use crate::services::{
    builtin_registry, BreakerSettings, CircuitBreaker, Engine, GateSet, IntelligenceGateway,
    OrchestratorSettings, PersistenceLayer, PhaseOrchestrator, PromptToolkit, RetryPolicy,
    Scheduler, ShadowValidator, TaskLedger,
};

/// Default configuration template content
const DEFAULT_CONFIG_TEMPLATE: &str = r#"# SDLC engine configuration
# Override settings by editing this file, adding .sdlc/local.yaml, or setting
# environment variables with the SDLC_ prefix (use __ for nesting):
#   export SDLC_ORCHESTRATOR__MAX_REPAIR_CYCLES=5
#   export SDLC_LOGGING__LEVEL=debug

database:
  path: ".sdlc/sdlc.db"
  max_connections: 5

documents:
  # One JSON manifest per project
  dir: ".sdlc/manifests"

artifacts:
  dir: ".sdlc/artifacts"

persistence:
  # Mirror every manifest save into the relational store
  dual_write: true
  backup_before_migration: true

logging:
  level: "info"
  format: "pretty"
  rotation: "daily"

intelligence:
  # Falls back to ANTHROPIC_API_KEY; a mock provider is used when neither is set
  model: "claude-sonnet-4-5-20250929"
  requests_per_second: 2
  max_tokens: 4096

retry:
  max_retries: 3
  initial_backoff_ms: 2000
  max_backoff_ms: 8000

circuit_breaker:
  failure_threshold: 5
  failure_window_secs: 600
  cooldown_secs: 60

budget:
  default_max_cost: 10.0
  alert_threshold: 0.8

orchestrator:
  max_repair_cycles: 3
  # A running task older than this is treated as abandoned by its process
  task_lease_secs: 3600

testing:
  # command: "cargo test"
  timeout_secs: 600

quality_gates:
  - id: plan-present
    from: PLANNING
    to: CODING
    kind:
      type: artifact_present
      artifact: plan
"#;

/// Setup paths and directories
pub struct SetupPaths {
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
}

impl SetupPaths {
    /// Paths under the current directory
    pub fn new() -> Result<Self> {
        let current_dir = std::env::current_dir().context("Failed to get current directory")?;
        Ok(Self::at(&current_dir))
    }

    pub fn at(root: &Path) -> Self {
        let config_dir = root.join(".sdlc");
        Self {
            config_file: config_dir.join("config.yaml"),
            config_dir,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.config_file.exists()
    }
}

/// Create `.sdlc/` and the default config file. Returns whether the file was written.
pub fn initialize_workspace(paths: &SetupPaths, force: bool) -> Result<bool> {
    fs::create_dir_all(&paths.config_dir).context("Failed to create config directory")?;
    if paths.config_file.exists() && !force {
        return Ok(false);
    }
    fs::write(&paths.config_file, DEFAULT_CONFIG_TEMPLATE).context("Failed to write config file")?;
    Ok(true)
}

/// Where the pre-migration copy of the database goes.
fn backup_path(database_path: &str) -> PathBuf {
    let db = Path::new(database_path);
    let dir = db.parent().map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let stem = db.file_stem().and_then(|s| s.to_str()).unwrap_or("sdlc");
    dir.join("backups")
        .join(format!("{stem}-pre-migration-{}.db", Utc::now().format("%Y%m%dT%H%M%S")))
}

/// Open the relational store and migrate it.
pub async fn open_database(config: &Config) -> Result<(SqlitePool, MigrationReport)> {
    let backup = config
        .persistence
        .backup_before_migration
        .then(|| backup_path(&config.database.path));

    let path = Path::new(&config.database.path);
    let (pool, report) = initialize_database(path, config.database.max_connections, backup)
        .await
        .with_context(|| format!("Failed to open database at {}", config.database.path))?;
    if report.applied > 0 {
        info!(
            from = report.from_version,
            to = report.to_version,
            backup = ?report.backup,
            "Database schema migrated"
        );
    }
    Ok((pool, report))
}

/// Concrete intelligence provider for the configuration.
pub fn build_provider(config: &Config) -> Result<Arc<dyn IntelligenceProvider>> {
    match config.intelligence.resolved_api_key() {
        Some(key) => {
            let provider = AnthropicProvider::new(key, &config.intelligence)
                .context("Failed to build Anthropic provider")?;
            Ok(Arc::new(provider))
        }
        None => {
            warn!("No intelligence API key configured; using the mock provider");
            Ok(Arc::new(MockIntelligenceProvider::new()))
        }
    }
}

/// Fully wired engine and the stores behind it.
pub struct App {
    pub config: Config,
    pub pool: SqlitePool,
    pub migration: MigrationReport,
    pub engine: Engine,
    pub shadow: ShadowValidator,
}

impl App {
    /// Build with the provider chosen from configuration.
    pub async fn build(config: Config) -> Result<Self> {
        let provider = build_provider(&config)?;
        Self::build_with_provider(config, provider).await
    }

    pub async fn build_with_provider(
        config: Config,
        provider: Arc<dyn IntelligenceProvider>,
    ) -> Result<Self> {
        let (pool, migration) = open_database(&config).await?;

        let documents: Arc<dyn DocumentStore> = Arc::new(
            JsonFileDocumentStore::new(&config.documents.dir)
                .context("Failed to open the legacy document store")?,
        );
        let missions: Arc<dyn MissionRepository> = Arc::new(SqliteMissionRepository::new(pool.clone()));
        let persistence = Arc::new(
            PersistenceLayer::new(documents.clone())
                .with_projection(missions.clone())
                .with_dual_write(config.persistence.dual_write),
        );

        let gateway = IntelligenceGateway::new(
            provider,
            CircuitBreaker::new(BreakerSettings::from(&config.circuit_breaker)),
            RetryPolicy::from(&config.retry),
        );
        let toolkit = PromptToolkit::new(
            Arc::new(gateway),
            Arc::new(FsArtifactStore::new(&config.artifacts.dir)),
        );
        let registry = builtin_registry(
            toolkit,
            config.testing.command.clone(),
            Duration::from_secs(config.testing.timeout_secs),
        );

        let ledger = TaskLedger::new(Arc::new(SqliteLedgerRepository::new(pool.clone())));
        let orchestrator = PhaseOrchestrator::new(
            persistence.clone(),
            registry,
            GateSet::from_configs(&config.quality_gates),
            ledger.clone(),
            OrchestratorSettings::from(&config.orchestrator),
        );
        let scheduler = Scheduler::new(Arc::new(SqliteTaskRepository::new(pool.clone())))
            .with_lease(Duration::from_secs(config.orchestrator.task_lease_secs));

        let engine = Engine::new(Arc::new(scheduler), Arc::new(orchestrator), persistence, ledger);
        let recovery = engine.recover().await.context("Failed to recover the task queue")?;
        if recovery.interrupted > 0 {
            warn!(interrupted = recovery.interrupted, "Tasks abandoned by an earlier run were failed");
        }

        Ok(Self {
            config,
            pool,
            migration,
            engine,
            shadow: ShadowValidator::new(documents, missions),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_workspace_keeps_existing_config() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SetupPaths::at(dir.path());

        assert!(initialize_workspace(&paths, false).unwrap());
        fs::write(&paths.config_file, "logging:\n  level: warn\n").unwrap();
        assert!(!initialize_workspace(&paths, false).unwrap());
        assert_eq!(
            fs::read_to_string(&paths.config_file).unwrap(),
            "logging:\n  level: warn\n"
        );
        assert!(initialize_workspace(&paths, true).unwrap());
        assert!(paths.is_initialized());
    }

    #[test]
    fn test_default_template_is_valid_config() {
        let config: Config = serde_yaml::from_str(DEFAULT_CONFIG_TEMPLATE).unwrap();
        crate::infrastructure::config::ConfigLoader::validate(&config).unwrap();
        assert_eq!(config.quality_gates.len(), 1);
    }

    #[test]
    fn test_backup_path_sits_next_to_database() {
        let path = backup_path(".sdlc/sdlc.db");
        assert!(path.starts_with(".sdlc/backups"));
        assert!(path.to_string_lossy().contains("sdlc-pre-migration-"));
    }

    #[tokio::test]
    async fn test_app_builds_against_temp_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.database.path = dir.path().join("sdlc.db").to_string_lossy().into_owned();
        config.documents.dir = dir.path().join("manifests").to_string_lossy().into_owned();
        config.artifacts.dir = dir.path().join("artifacts").to_string_lossy().into_owned();

        let app = App::build_with_provider(config, Arc::new(MockIntelligenceProvider::new()))
            .await
            .unwrap();
        assert_eq!(app.migration.to_version, crate::adapters::sqlite::SCHEMA_VERSION);
        let project = app.engine.create_project("ivy", 5.0, None).await.unwrap();
        let report = app.shadow.validate(project.project_id()).await.unwrap();
        assert_eq!(report.mismatches().count(), 0);
    }
}
