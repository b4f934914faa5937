//! Configuration management for the ledger engine
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (config/development.toml, config/production.toml)
//! 3. Environment variable overrides with LEDGER_ prefix

use config::{ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;

/// Main engine configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Batch execution settings
    pub engine: EngineConfig,

    /// Log output settings
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,

    /// Seconds to wait for a pooled connection
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Per-entity units allowed to run at the same time
    pub max_parallel_units: usize,

    /// Stop scheduling new units after the first failure
    pub fail_fast: bool,

    /// Largest money difference not reported as drift
    pub money_tolerance: Decimal,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive used when RUST_LOG is unset
    pub filter: String,

    /// Output format
    pub format: LogFormat,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            std::env::var("LEDGER_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout_secs", 30)?
            .set_default("engine.max_parallel_units", 4)?
            .set_default("engine.fail_fast", false)?
            .set_default("engine.money_tolerance", "0.01")?
            .set_default("logging.filter", "ledger_engine=info,sqlx=warn")?
            .set_default("logging.format", "pretty")?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (LEDGER_ prefix)
            .add_source(
                Environment::with_prefix("LEDGER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make a batch meaningless
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.max_parallel_units == 0 {
            return Err(ConfigError::Message(
                "engine.max_parallel_units must be at least 1".to_string(),
            ));
        }
        if self.engine.money_tolerance < Decimal::ZERO {
            return Err(ConfigError::Message(
                "engine.money_tolerance cannot be negative".to_string(),
            ));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::Message(
                "database.min_connections exceeds database.max_connections".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel_units: 4,
            fail_fast: false,
            money_tolerance: ledger_shared::MONEY_TOLERANCE,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "ledger_engine=info,sqlx=warn".to_string(),
            format: LogFormat::Pretty,
        }
    }
}
