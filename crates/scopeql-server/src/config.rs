//! Engine configuration management.
//!
//! Configuration is loaded from multiple sources with the following precedence
//! (highest to lowest):
//! 1. Environment variables (prefixed with `SCOPEQL_`)
//! 2. Configuration file (YAML)
//! 3. Default values
//!
//! # Example Configuration File
//!
//! ```yaml
//! engine:
//!   unknown_field_policy: error
//!   default_limit: 100
//!   max_depth: 5
//!
//! cache:
//!   enabled: true
//!   max_capacity: 10000
//!   result_ttl_secs: 3600
//!   query_timeout_ms: 1000
//!
//! logging:
//!   level: info
//!   json: false
//!
//! errors:
//!   detailed: false
//! ```

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use scopeql_domain::resolver::{ResolverConfig, UnknownFieldPolicy};
use scopeql_domain::ResultCacheConfig;

/// Upper bound accepted for `engine.max_depth`.
pub const MAX_DEPTH_LIMIT: u32 = 32;

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct EngineConfig {
    /// Execution settings.
    #[serde(default)]
    pub engine: ExecutionConfig,

    /// Result cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Error rendering settings.
    #[serde(default)]
    pub errors: ErrorsConfig,
}

/// Execution settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ExecutionConfig {
    /// What to do with unknown field names: `error` or `ignore`.
    #[serde(default = "default_unknown_field_policy")]
    pub unknown_field_policy: String,

    /// Page size for list reads that give no limit. `None` means unlimited.
    #[serde(default)]
    pub default_limit: Option<u64>,

    /// Upper bound on the requested serializer depth.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            unknown_field_policy: default_unknown_field_policy(),
            default_limit: None,
            max_depth: default_max_depth(),
        }
    }
}

fn default_unknown_field_policy() -> String {
    "error".to_string()
}

fn default_max_depth() -> u32 {
    5
}

/// Result cache settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CacheConfig {
    /// Enable result caching for requests carrying a transaction id.
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,

    /// Maximum number of cached results.
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u64,

    /// Time-to-live of a cached result in seconds.
    #[serde(default = "default_result_ttl_secs")]
    pub result_ttl_secs: u64,

    /// Expected query time in milliseconds. Coalesced callers wait one
    /// second longer than this before computing on their own.
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            max_capacity: default_max_capacity(),
            result_ttl_secs: default_result_ttl_secs(),
            query_timeout_ms: default_query_timeout_ms(),
        }
    }
}

fn default_cache_enabled() -> bool {
    true
}

fn default_max_capacity() -> u64 {
    10_000
}

fn default_result_ttl_secs() -> u64 {
    3600
}

fn default_query_timeout_ms() -> u64 {
    1000
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Enable JSON formatted logs.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Error rendering settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ErrorsConfig {
    /// Show internal error details to callers. Leave off in production.
    #[serde(default)]
    pub detailed: bool,
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

impl EngineConfig {
    /// Load configuration from a YAML file with environment variable overrides.
    ///
    /// Environment variables are prefixed with `SCOPEQL_` and use `__` as separator.
    /// For example:
    /// - `SCOPEQL_ENGINE__MAX_DEPTH=3` overrides `engine.max_depth`
    /// - `SCOPEQL_CACHE__QUERY_TIMEOUT_MS=500` overrides `cache.query_timeout_ms`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigLoadError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let config = Config::builder()
            .add_source(Config::try_from(&EngineConfig::default())?)
            .add_source(File::from(path).format(FileFormat::Yaml))
            // SCOPEQL_CACHE__ENABLED -> cache.enabled
            .add_source(
                Environment::with_prefix("SCOPEQL")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let engine_config: EngineConfig = config.try_deserialize()?;
        engine_config.validate()?;

        Ok(engine_config)
    }

    /// Load configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let config = Config::builder()
            .add_source(Config::try_from(&EngineConfig::default())?)
            .add_source(
                Environment::with_prefix("SCOPEQL")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let engine_config: EngineConfig = config.try_deserialize()?;
        engine_config.validate()?;

        Ok(engine_config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        self.unknown_field_policy()?;

        if self.engine.max_depth == 0 || self.engine.max_depth > MAX_DEPTH_LIMIT {
            return Err(ConfigLoadError::Invalid {
                message: format!(
                    "engine.max_depth must be between 1 and {MAX_DEPTH_LIMIT}, got: {}",
                    self.engine.max_depth
                ),
            });
        }

        if self.cache.max_capacity == 0 {
            return Err(ConfigLoadError::Invalid {
                message: "cache.max_capacity must be greater than 0".to_string(),
            });
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigLoadError::Invalid {
                message: format!(
                    "logging.level must be one of: {:?}, got: {}",
                    valid_levels, self.logging.level
                ),
            });
        }

        Ok(())
    }

    /// Parsed `engine.unknown_field_policy`.
    pub fn unknown_field_policy(&self) -> Result<UnknownFieldPolicy, ConfigLoadError> {
        self.engine
            .unknown_field_policy
            .parse()
            .map_err(|message: String| ConfigLoadError::Invalid {
                message: format!("engine.unknown_field_policy: {message}"),
            })
    }

    /// Resolver settings derived from the `engine` section.
    pub fn resolver_config(&self) -> Result<ResolverConfig, ConfigLoadError> {
        Ok(ResolverConfig::default()
            .with_unknown_fields(self.unknown_field_policy()?)
            .with_max_depth(self.engine.max_depth))
    }

    /// Result cache settings derived from the `cache` section.
    pub fn result_cache_config(&self) -> ResultCacheConfig {
        ResultCacheConfig::default()
            .with_enabled(self.cache.enabled)
            .with_max_capacity(self.cache.max_capacity)
            .with_ttl(Duration::from_secs(self.cache.result_ttl_secs))
            .with_query_timeout(Duration::from_millis(self.cache.query_timeout_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Test: Can load config from YAML file
    #[test]
    #[serial]
    fn test_can_load_config_from_yaml_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
engine:
  unknown_field_policy: ignore
  default_limit: 50
  max_depth: 3

cache:
  enabled: false
  max_capacity: 500
  result_ttl_secs: 60
  query_timeout_ms: 250

logging:
  level: debug
  json: true

errors:
  detailed: true
"#
        )
        .unwrap();

        let config = EngineConfig::load(file.path()).unwrap();

        assert_eq!(config.engine.unknown_field_policy, "ignore");
        assert_eq!(config.engine.default_limit, Some(50));
        assert_eq!(config.engine.max_depth, 3);
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.max_capacity, 500);
        assert_eq!(config.cache.result_ttl_secs, 60);
        assert_eq!(config.cache.query_timeout_ms, 250);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
        assert!(config.errors.detailed);
    }

    /// Test: Can override config with env vars
    #[test]
    #[serial]
    fn test_can_override_config_with_env_vars() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
engine:
  max_depth: 2

cache:
  query_timeout_ms: 1000
"#
        )
        .unwrap();

        std::env::set_var("SCOPEQL_CACHE__QUERY_TIMEOUT_MS", "500");
        std::env::set_var("SCOPEQL_LOGGING__LEVEL", "warn");

        let config = EngineConfig::load(file.path());

        std::env::remove_var("SCOPEQL_CACHE__QUERY_TIMEOUT_MS");
        std::env::remove_var("SCOPEQL_LOGGING__LEVEL");

        let config = config.unwrap();
        assert_eq!(config.cache.query_timeout_ms, 500); // Overridden by env
        assert_eq!(config.engine.max_depth, 2); // From file
        assert_eq!(config.logging.level, "warn"); // Overridden by env
    }

    /// Test: Config validation catches errors
    #[test]
    fn test_config_validation_catches_errors() {
        let mut config = EngineConfig::default();
        config.engine.unknown_field_policy = "warn".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("unknown_field_policy"));

        let mut config = EngineConfig::default();
        config.cache.max_capacity = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cache.max_capacity"));

        for depth in [0, MAX_DEPTH_LIMIT + 1] {
            let mut config = EngineConfig::default();
            config.engine.max_depth = depth;
            let err = config.validate().unwrap_err();
            assert!(
                err.to_string().contains("engine.max_depth"),
                "Expected max_depth error for {depth}"
            );
        }

        let mut config = EngineConfig::default();
        config.logging.level = "loud".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("logging.level"));
    }

    /// Test: Invalid config returns clear error
    #[test]
    fn test_invalid_config_returns_clear_error() {
        let result = EngineConfig::load("/nonexistent/path/scopeql.yaml");
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigLoadError::FileNotFound { .. }));
        assert!(err.to_string().contains("not found"));

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "invalid: yaml: syntax: [").unwrap();

        let err = EngineConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigLoadError::Load(_)));
    }

    /// Test: Default config is valid
    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());

        assert_eq!(config.engine.unknown_field_policy, "error");
        assert_eq!(config.engine.default_limit, None);
        assert_eq!(config.engine.max_depth, 5);
        assert!(config.cache.enabled);
        assert_eq!(config.cache.max_capacity, 10_000);
        assert_eq!(config.logging.level, "info");
        assert!(!config.errors.detailed);
    }

    /// Test: from_env loads defaults with env overrides
    #[test]
    #[serial]
    fn test_from_env_loads_defaults_with_env_overrides() {
        std::env::set_var("SCOPEQL_ENGINE__UNKNOWN_FIELD_POLICY", "ignore");

        let config = EngineConfig::from_env();

        std::env::remove_var("SCOPEQL_ENGINE__UNKNOWN_FIELD_POLICY");

        let config = config.unwrap();
        assert_eq!(
            config.unknown_field_policy().unwrap(),
            UnknownFieldPolicy::Ignore
        );
        assert_eq!(config.engine.max_depth, 5); // default
    }

    #[test]
    fn test_converts_into_domain_configs() {
        let mut config = EngineConfig::default();
        config.engine.max_depth = 3;
        config.cache.query_timeout_ms = 200;
        config.cache.enabled = false;

        let resolver = config.resolver_config().unwrap();
        assert_eq!(resolver.max_depth, 3);
        assert_eq!(resolver.unknown_fields, UnknownFieldPolicy::Error);

        let cache = config.result_cache_config();
        assert!(!cache.enabled);
        assert_eq!(cache.lock_wait(), Duration::from_millis(1200));
    }
}
