//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod correlation;
mod monitor;
mod storage;

pub use correlation::{ConflictPolicy, CorrelationConfig, QueryOverride, RetryConfig};
pub use monitor::{KeySource, MonitorConfig};
pub use storage::{SqliteConfig, StorageConfig, StorageType};

use serde::Deserialize;

use crate::validation::ValidationError;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "BAM_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "BAM";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "BAM_LOG";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Unknown key property '{property}' for entity {entity}")]
    UnknownKeyProperty {
        entity: &'static str,
        property: String,
    },

    #[error("Invalid {field}: {source}")]
    InvalidIdentifier {
        field: &'static str,
        #[source]
        source: ValidationError,
    },

    #[error("No processor defined for this route")]
    NoProcessor,

    #[error("Feature '{0}' is not enabled")]
    FeatureDisabled(&'static str),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Correlator configuration.
    pub correlation: CorrelationConfig,
    /// Activity monitored by the `bam-monitor` binary.
    pub monitor: MonitorConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Parse configuration from a YAML document, without environment overrides.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, File, FileFormat};

        let config = ConfigLib::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Create config for testing: in-memory storage.
    pub fn for_test() -> Self {
        Self {
            storage: StorageConfig {
                storage_type: StorageType::Memory,
                ..StorageConfig::default()
            },
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.storage.storage_type, StorageType::Sqlite);
        assert_eq!(config.correlation.key_property, "correlation_key");
        assert_eq!(config.correlation.conflict_policy, ConflictPolicy::Retry);
        assert!(config.correlation.strict_uniqueness);
        assert!(config.correlation.find_by_key_query.is_none());
    }

    #[test]
    fn test_config_for_test() {
        let config = Config::for_test();
        assert_eq!(config.storage.storage_type, StorageType::Memory);
    }

    #[test]
    fn test_config_from_yaml() {
        let config = Config::from_yaml(
            r#"
storage:
  type: memory
correlation:
  key_property: correlation_key
  conflict_policy: lock
  strict_uniqueness: false
  find_by_key_query:
    entity: process_instances
    key_column: correlation_key
  retry:
    max_times: 3
monitor:
  process: orders
  activity: shipment
  expected_messages: 2
  key:
    body_pointer: /order/id
"#,
        )
        .unwrap();

        assert_eq!(config.storage.storage_type, StorageType::Memory);
        assert_eq!(config.correlation.conflict_policy, ConflictPolicy::Lock);
        assert!(!config.correlation.strict_uniqueness);
        assert_eq!(config.correlation.retry.max_times, 3);
        assert_eq!(config.correlation.retry.min_delay_ms, 10);
        let query = config.correlation.find_by_key_query.unwrap();
        assert_eq!(query.entity, "process_instances");
        assert_eq!(config.monitor.process, "orders");
        assert_eq!(config.monitor.activity_rules().expected_messages, 2);
        assert_eq!(
            config.monitor.key,
            KeySource::BodyPointer("/order/id".to_string())
        );
    }

    #[test]
    #[serial]
    fn test_config_load_env_override() {
        std::env::set_var("BAM__CORRELATION__CONFLICT_POLICY", "lock");
        std::env::set_var("BAM__STORAGE__TYPE", "memory");
        let config = Config::load(None);
        std::env::remove_var("BAM__CORRELATION__CONFLICT_POLICY");
        std::env::remove_var("BAM__STORAGE__TYPE");

        let config = config.unwrap();
        assert_eq!(config.correlation.conflict_policy, ConflictPolicy::Lock);
        assert_eq!(config.storage.storage_type, StorageType::Memory);
    }
}
