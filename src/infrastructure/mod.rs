//! Infrastructure layer
//!
//! - Configuration management (figment)
//! - Logging (tracing + tracing-appender)
//! - Workspace setup and application wiring

pub mod config;
pub mod logging;
pub mod setup;

pub use config::{ConfigError, ConfigLoader};
pub use logging::{LogConfig, LoggerImpl};
pub use setup::{App, SetupPaths};
