//! Runtime configuration.
//!
//! Sources, later ones overriding earlier ones:
//! 1. Default values in code
//! 2. `config/{environment}.toml`, if present
//! 3. Environment variables with the `DEPOT__` prefix, `__` between levels
//!    (e.g. `DEPOT__DATABASE__URL`, `DEPOT__LEDGER__MAX_RETRIES`)
//!
//! A `.env` file is loaded into the process environment first.

use chrono::FixedOffset;
use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

use depot_observability::LogConfig;
use depot_products::NameMarkers;

/// Main configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct DepotConfig {
    /// Current environment (development, production)
    pub environment: String,

    pub database: DatabaseConfig,

    pub ledger: LedgerConfig,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Extra attempts after a version conflict before giving up.
    pub max_retries: u32,

    /// Offset of the depot's local day from UTC, in minutes.
    pub utc_offset_minutes: i32,

    #[serde(default)]
    pub markers: NameMarkers,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            utc_offset_minutes: 0,
            markers: NameMarkers::default(),
        }
    }
}

impl LedgerConfig {
    /// Local-day offset used to turn calendar days into windows.
    pub fn utc_offset(&self) -> Result<FixedOffset, ConfigError> {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                ConfigError::Message(format!(
                    "ledger.utc_offset_minutes out of range: {}",
                    self.utc_offset_minutes
                ))
            })
    }
}

impl DepotConfig {
    /// Load configuration from files and environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let environment = std::env::var("DEPOT_ENV").unwrap_or_else(|_| "development".into());

        let config = defaults(&environment)?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{environment}")).required(false))
            // Override with environment variables (DEPOT__ prefix)
            .add_source(
                Environment::with_prefix("DEPOT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Self::finish(config.try_deserialize()?)
    }

    /// Defaults overlaid with an inline TOML document.
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let config = defaults("development")?
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;

        Self::finish(config.try_deserialize()?)
    }

    fn finish(config: Self) -> Result<Self, ConfigError> {
        config.ledger.utc_offset()?;
        if config.database.min_connections > config.database.max_connections {
            return Err(ConfigError::Message(format!(
                "database.min_connections ({}) exceeds database.max_connections ({})",
                config.database.min_connections, config.database.max_connections
            )));
        }
        Ok(config)
    }
}

fn defaults(environment: &str) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let ledger = LedgerConfig::default();
    let log = LogConfig::default();

    config::Config::builder()
        .set_default("environment", environment)?
        .set_default("database.url", "postgres://localhost:5432/depot")?
        .set_default("database.max_connections", 10)?
        .set_default("database.min_connections", 1)?
        .set_default("ledger.max_retries", ledger.max_retries)?
        .set_default("ledger.utc_offset_minutes", ledger.utc_offset_minutes)?
        .set_default("log.filter", log.filter)?
        .set_default("log.json", log.json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_any_source() {
        let config = DepotConfig::from_toml("").unwrap();
        assert_eq!(config.environment, "development");
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.ledger, LedgerConfig::default());
        assert_eq!(config.log, LogConfig::default());
    }

    #[test]
    fn toml_overrides_defaults_and_markers() {
        let config = DepotConfig::from_toml(
            r#"
            [ledger]
            max_retries = 5
            utc_offset_minutes = -180

            [ledger.markers]
            qualifiers = ["cheio", "vazio"]

            [log]
            json = false
            "#,
        )
        .unwrap();

        assert_eq!(config.ledger.max_retries, 5);
        assert_eq!(
            config.ledger.utc_offset().unwrap(),
            FixedOffset::west_opt(3 * 3600).unwrap()
        );
        assert_eq!(config.ledger.markers.qualifiers, vec!["cheio", "vazio"]);
        assert_eq!(
            config.ledger.markers.category_prefixes,
            NameMarkers::default().category_prefixes
        );
        assert!(!config.log.json);
        assert_eq!(config.log.filter, "info");
    }

    #[test]
    fn out_of_range_offset_is_rejected() {
        let err = DepotConfig::from_toml("[ledger]\nutc_offset_minutes = 100000\n").unwrap_err();
        assert!(err.to_string().contains("utc_offset_minutes"));
    }

    #[test]
    fn inverted_pool_bounds_are_rejected() {
        let err = DepotConfig::from_toml("[database]\nmin_connections = 20\nmax_connections = 2\n").unwrap_err();
        assert!(err.to_string().contains("min_connections"));
    }
}
