use serde::{Deserialize, Serialize};

use super::quality_gate::GateConfig;

/// Main configuration structure for the engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Relational store
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Legacy document store
    #[serde(default)]
    pub documents: DocumentsConfig,

    /// Artifact store
    #[serde(default)]
    pub artifacts: ArtifactsConfig,

    #[serde(default)]
    pub persistence: PersistenceConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Intelligence provider
    #[serde(default)]
    pub intelligence: IntelligenceConfig,

    /// Retry policy for transient provider errors
    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Defaults for newly created projects
    #[serde(default)]
    pub budget: BudgetConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Test command run by the testing specialist
    #[serde(default)]
    pub testing: TestingConfig,

    /// Gates bound to phase transitions
    #[serde(default)]
    pub quality_gates: Vec<GateConfig>,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".sdlc/sdlc.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DocumentsConfig {
    /// Directory holding one JSON manifest per project
    #[serde(default = "default_documents_dir")]
    pub dir: String,
}

fn default_documents_dir() -> String {
    ".sdlc/manifests".to_string()
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            dir: default_documents_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ArtifactsConfig {
    #[serde(default = "default_artifacts_dir")]
    pub dir: String,
}

fn default_artifacts_dir() -> String {
    ".sdlc/artifacts".to_string()
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            dir: default_artifacts_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PersistenceConfig {
    /// Mirror every save into the relational store
    #[serde(default = "default_true")]
    pub dual_write: bool,

    /// Write a `VACUUM INTO` copy of the database before migrating it
    #[serde(default = "default_true")]
    pub backup_before_migration: bool,
}

const fn default_true() -> bool {
    true
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            dual_write: true,
            backup_before_migration: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,

    /// File rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// Intelligence provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct IntelligenceConfig {
    /// API key (can also be set via `ANTHROPIC_API_KEY`); mock provider when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,

    /// Client-side rate limit
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// USD per million input tokens
    #[serde(default = "default_input_cost")]
    pub input_cost_per_mtok: f64,

    /// USD per million output tokens
    #[serde(default = "default_output_cost")]
    pub output_cost_per_mtok: f64,
}

fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}

const fn default_request_timeout() -> u64 {
    120
}

const fn default_requests_per_second() -> u32 {
    2
}

const fn default_max_tokens() -> u32 {
    4096
}

const fn default_input_cost() -> f64 {
    3.0
}

const fn default_output_cost() -> f64 {
    15.0
}

impl IntelligenceConfig {
    /// Configured key, falling back to `ANTHROPIC_API_KEY`.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
    }
}

impl Default for IntelligenceConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            timeout_secs: default_request_timeout(),
            requests_per_second: default_requests_per_second(),
            max_tokens: default_max_tokens(),
            input_cost_per_mtok: default_input_cost(),
            output_cost_per_mtok: default_output_cost(),
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    2000
}

const fn default_max_backoff_ms() -> u64 {
    8000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CircuitBreakerConfig {
    /// Consecutive transient failures that open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Failures older than this no longer count
    #[serde(default = "default_failure_window_secs")]
    pub failure_window_secs: u64,

    /// Time spent OPEN before a trial call is allowed
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_failure_window_secs() -> u64 {
    600
}

const fn default_cooldown_secs() -> u64 {
    60
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            failure_window_secs: default_failure_window_secs(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BudgetConfig {
    #[serde(default = "default_max_cost")]
    pub default_max_cost: f64,

    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: f64,
}

const fn default_max_cost() -> f64 {
    10.0
}

const fn default_alert_threshold() -> f64 {
    0.8
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            default_max_cost: default_max_cost(),
            alert_threshold: default_alert_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OrchestratorConfig {
    /// TESTING -> CODING repairs allowed before escalating to a fatal failure
    #[serde(default = "default_max_repair_cycles")]
    pub max_repair_cycles: u32,

    /// How long a claimed task stays owned by its process; after that another
    /// process may mark it failed
    #[serde(default = "default_task_lease_secs")]
    pub task_lease_secs: u64,
}

const fn default_max_repair_cycles() -> u32 {
    3
}

const fn default_task_lease_secs() -> u64 {
    3600
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_repair_cycles: default_max_repair_cycles(),
            task_lease_secs: default_task_lease_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TestingConfig {
    /// Shell command whose exit status decides the testing phase; when unset
    /// the testing specialist only checks that a code bundle exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default = "default_test_timeout")]
    pub timeout_secs: u64,
}

const fn default_test_timeout() -> u64 {
    600
}

impl Default for TestingConfig {
    fn default() -> Self {
        Self {
            command: None,
            timeout_secs: default_test_timeout(),
        }
    }
}
