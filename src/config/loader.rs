//! Configuration Loader
//!
//! Environment-aware loading built on the `config` crate: a base TOML file,
//! an optional per-environment overlay and `DOCFLOW__` prefixed environment
//! variables, merged in that order.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use config::{Config, Environment, File, FileFormat};
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::DocflowConfig;

const BASE_FILE_STEM: &str = "docflow";
const ENV_PREFIX: &str = "DOCFLOW";

/// Loaded, validated configuration shared by every component of a replica
#[derive(Debug)]
pub struct ConfigManager {
    config: DocflowConfig,
    environment: String,
    config_directory: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(None, &environment)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    ///
    /// Useful for tests that must not touch process environment variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        if !config_directory.is_dir() {
            return Err(ConfigurationError::directory_not_found(config_directory));
        }

        debug!(
            "Loading configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let mut config = Self::build(&config_directory, environment)?;
        if config.environment.is_empty() {
            config.environment = environment.to_string();
        }
        config.validate()?;

        info!(
            environment = %environment,
            messaging_provider = ?config.messaging.provider,
            saga_store = ?config.engine.store,
            server_namespace = %config.messaging.server_namespace,
            validation_pipelines = config.pipelines.validation.len(),
            "⚙️ Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: Some(config_directory),
        }))
    }

    /// Wrap an already-built configuration (tests, embedding applications)
    pub fn from_config(config: DocflowConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        let environment = if config.environment.is_empty() {
            Self::detect_environment()
        } else {
            config.environment.clone()
        };
        Ok(Arc::new(ConfigManager {
            config,
            environment,
            config_directory: None,
        }))
    }

    pub fn config(&self) -> &DocflowConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> Option<&Path> {
        self.config_directory.as_deref()
    }

    /// Re-read the same sources this manager was loaded from
    pub fn reload(&self) -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory_with_env(self.config_directory.clone(), &self.environment)
    }

    /// Detect the current environment from `DOCFLOW_ENV`, then `APP_ENV`
    pub fn detect_environment() -> String {
        std::env::var("DOCFLOW_ENV")
            .or_else(|_| std::env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    fn default_config_directory() -> PathBuf {
        std::env::var("DOCFLOW_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }

    fn build(config_directory: &Path, environment: &str) -> ConfigResult<DocflowConfig> {
        let base = config_directory.join(format!("{BASE_FILE_STEM}.toml"));
        let overlay = config_directory.join(format!("{BASE_FILE_STEM}.{environment}.toml"));

        let merged = Config::builder()
            .add_source(File::from(base).format(FileFormat::Toml).required(false))
            .add_source(File::from(overlay).format(FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigurationError::load_failed(environment, e))?;

        merged
            .try_deserialize::<DocflowConfig>()
            .map_err(ConfigurationError::deserialization)
    }
}
