use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::Config;
use crate::domain::models::GateKind;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must not exceed max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid failure_threshold: {0}. Must be at least 1")]
    InvalidFailureThreshold(u32),

    #[error("Invalid budget alert_threshold: {0}. Must be in (0, 1]")]
    InvalidAlertThreshold(f64),

    #[error("Invalid default_max_cost: {0}. Must be a non-negative number")]
    InvalidMaxCost(f64),

    #[error("Invalid requests_per_second: {0}. Must be at least 1")]
    InvalidRateLimit(u32),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .sdlc/config.yaml (project config, created by init)
    /// 3. .sdlc/local.yaml (local overrides, optional)
    /// 4. Environment variables (SDLC_* prefix, `__` for nesting)
    pub fn load() -> Result<Config> {
        let config: Config = Self::figment()
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, still honouring env overrides
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("SDLC_").split("__"))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".sdlc/config.yaml"))
            .merge(Yaml::file(".sdlc/local.yaml"))
            .merge(Env::prefixed("SDLC_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.database.max_connections));
        }
        if config.documents.dir.trim().is_empty() || config.artifacts.dir.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "documents.dir and artifacts.dir cannot be empty".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        if !["json", "pretty"].contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }
        if !["daily", "hourly", "never"].contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        if config.intelligence.requests_per_second == 0 {
            return Err(ConfigError::InvalidRateLimit(config.intelligence.requests_per_second));
        }
        if config.retry.initial_backoff_ms > config.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry.initial_backoff_ms,
                config.retry.max_backoff_ms,
            ));
        }
        if config.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::InvalidFailureThreshold(
                config.circuit_breaker.failure_threshold,
            ));
        }

        if config.orchestrator.task_lease_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "orchestrator.task_lease_secs must be positive".to_string(),
            ));
        }

        let budget = &config.budget;
        if !(budget.alert_threshold > 0.0 && budget.alert_threshold <= 1.0) {
            return Err(ConfigError::InvalidAlertThreshold(budget.alert_threshold));
        }
        if !budget.default_max_cost.is_finite() || budget.default_max_cost < 0.0 {
            return Err(ConfigError::InvalidMaxCost(budget.default_max_cost));
        }

        let mut seen = std::collections::HashSet::new();
        for gate in &config.quality_gates {
            if gate.id.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "quality gate id cannot be empty".to_string(),
                ));
            }
            if !seen.insert(gate.id.as_str()) {
                return Err(ConfigError::ValidationFailed(format!(
                    "duplicate quality gate id '{}'",
                    gate.id
                )));
            }
            if !gate.from.can_transition_to(gate.to) {
                return Err(ConfigError::ValidationFailed(format!(
                    "quality gate '{}' is bound to {} -> {}, which is not a valid transition",
                    gate.id, gate.from, gate.to
                )));
            }
            if let GateKind::BudgetHeadroom { min_remaining_ratio } = gate.kind {
                if !(0.0..=1.0).contains(&min_remaining_ratio) {
                    return Err(ConfigError::ValidationFailed(format!(
                        "quality gate '{}': min_remaining_ratio must be in [0, 1]",
                        gate.id
                    )));
                }
            }
        }

        Ok(())
    }
}
