//! Batch configuration

use std::collections::HashMap;
use std::time::Duration;

use chrono::NaiveDate;
use serde::Deserialize;

use domain_billing::LedgerConfig;
use infra_db::DatabaseConfig;

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Batch runner configuration
///
/// Read from `LEDGER_*` environment variables. Nested ledger settings use a
/// double underscore, e.g. `LEDGER_LEDGER__TIMEZONE=Asia/Phnom_Penh`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// PostgreSQL connection string
    pub database_url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
    /// Filter directive used when `RUST_LOG` is not set
    pub log_level: String,
    pub log_format: LogFormat,
    /// Run the sweep as of this date instead of today
    pub as_of: Option<NaiveDate>,
    pub ledger: LedgerConfig,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/tuition_ledger".to_string(),
            max_connections: 5,
            connect_timeout_secs: 30,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            as_of: None,
            ledger: LedgerConfig::default(),
        }
    }
}

impl BatchConfig {
    /// Loads configuration from the process environment
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::build(environment())
    }

    /// Loads configuration from an explicit variable map
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, config::ConfigError> {
        Self::build(environment().source(Some(vars)))
    }

    fn build(source: config::Environment) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()
    }

    pub fn database(&self) -> DatabaseConfig {
        DatabaseConfig::new(self.database_url.clone())
            .max_connections(self.max_connections)
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix("LEDGER")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_defaults_without_variables() {
        let config = BatchConfig::from_vars(HashMap::new()).unwrap();
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.ledger.max_conflict_retries, 3);
        assert!(config.as_of.is_none());
    }

    #[test]
    fn test_reads_flat_and_nested_settings() {
        let config = BatchConfig::from_vars(vars(&[
            ("LEDGER_DATABASE_URL", "postgres://db/ledger"),
            ("LEDGER_LOG_FORMAT", "json"),
            ("LEDGER_AS_OF", "2026-02-01"),
            ("LEDGER_LEDGER__MAX_CONFLICT_RETRIES", "5"),
            ("LEDGER_LEDGER__TIMEZONE", "Asia/Phnom_Penh"),
        ]))
        .unwrap();

        assert_eq!(config.database_url, "postgres://db/ledger");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.as_of, NaiveDate::from_ymd_opt(2026, 2, 1));
        assert_eq!(config.ledger.max_conflict_retries, 5);
        assert_eq!(config.ledger.timezone.0.name(), "Asia/Phnom_Penh");
        assert_eq!(config.ledger.invoice_prefix, "INV");
    }

    #[test]
    fn test_bad_timezone_is_rejected() {
        let result = BatchConfig::from_vars(vars(&[("LEDGER_LEDGER__TIMEZONE", "Mars/Olympus")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_database_settings_follow_config() {
        let config = BatchConfig {
            max_connections: 3,
            ..BatchConfig::default()
        };
        let database = config.database();
        assert_eq!(database.max_connections, 3);
        assert_eq!(database.url, "postgres://localhost/tuition_ledger");
    }
}
