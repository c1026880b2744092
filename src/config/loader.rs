//! Configuration Loader
//!
//! Environment-aware loading: `dispatch.toml`, then `dispatch.{env}.toml`,
//! then `DELEGATE_DISPATCH__*` environment variables, each layer overriding
//! the previous one.

use super::error::ConfigResult;
use super::DispatchConfig;
use config::{Config, Environment, File, FileFormat};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const ENV_PREFIX: &str = "DELEGATE_DISPATCH";
const ENV_SEPARATOR: &str = "__";
const BASE_FILE_STEM: &str = "dispatch";

#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: DispatchConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load with an explicit environment, without touching process-wide
    /// environment detection
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        Self::load_with_sources(config_dir, environment, None)
    }

    /// Same as [`Self::load_from_directory_with_env`] but reads overrides from
    /// `variables` instead of the process environment
    pub fn load_with_overrides(
        config_dir: Option<PathBuf>,
        environment: &str,
        variables: HashMap<String, String>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        Self::load_with_sources(config_dir, environment, Some(variables))
    }

    fn load_with_sources(
        config_dir: Option<PathBuf>,
        environment: &str,
        variables: Option<HashMap<String, String>>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            "Loading configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let config = Self::build_config(&config_directory, environment, variables)?;
        config.validate()?;

        info!(
            environment = %environment,
            default_timeout_ms = config.default_timeout_ms,
            sweep_interval_ms = config.sweep_interval_ms,
            selection = ?config.delegate_selection,
            "⚙️ CONFIG: Dispatch configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    fn build_config(
        config_directory: &Path,
        environment: &str,
        variables: Option<HashMap<String, String>>,
    ) -> ConfigResult<DispatchConfig> {
        let base_file = config_directory.join(format!("{BASE_FILE_STEM}.toml"));
        let env_file = config_directory.join(format!("{BASE_FILE_STEM}.{environment}.toml"));

        let environment_source = Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true)
            .source(variables);

        let config = Config::builder()
            .add_source(File::from(base_file).format(FileFormat::Toml).required(false))
            .add_source(File::from(env_file).format(FileFormat::Toml).required(false))
            .add_source(environment_source)
            .build()?;

        Ok(config.try_deserialize::<DispatchConfig>()?)
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    fn detect_environment() -> String {
        env::var("DELEGATE_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    fn default_config_directory() -> PathBuf {
        env::var("DELEGATE_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SelectionStrategy;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_files_fall_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let manager = ConfigManager::load_with_overrides(
            Some(dir.path().to_path_buf()),
            "test",
            HashMap::new(),
        )
        .unwrap();

        assert_eq!(manager.config(), &DispatchConfig::default());
        assert_eq!(manager.environment(), "test");
        assert_eq!(manager.config_directory(), dir.path());
    }

    #[test]
    fn test_environment_file_overrides_base_file() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("dispatch.toml"),
            "default_timeout_ms = 5000\nsweep_interval_ms = 200\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("dispatch.production.toml"),
            "sweep_interval_ms = 2000\ndelegate_selection = \"capacity_based\"\n",
        )
        .unwrap();

        let manager = ConfigManager::load_with_overrides(
            Some(dir.path().to_path_buf()),
            "production",
            HashMap::new(),
        )
        .unwrap();

        let config = manager.config();
        assert_eq!(config.default_timeout_ms, 5000);
        assert_eq!(config.sweep_interval_ms, 2000);
        assert_eq!(config.delegate_selection, SelectionStrategy::CapacityBased);
        assert_eq!(config.status_poll_interval_ms, 250);
    }

    #[test]
    fn test_environment_variables_override_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("dispatch.toml"), "max_timeout_ms = 60000\n").unwrap();

        let variables = HashMap::from([(
            "DELEGATE_DISPATCH__MAX_TIMEOUT_MS".to_string(),
            "90000".to_string(),
        )]);
        let manager =
            ConfigManager::load_with_overrides(Some(dir.path().to_path_buf()), "test", variables)
                .unwrap();

        assert_eq!(manager.config().max_timeout_ms, 90000);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("dispatch.toml"), "sweep_interval_ms = 0\n").unwrap();

        let result =
            ConfigManager::load_with_overrides(Some(dir.path().to_path_buf()), "test", HashMap::new());
        assert!(result.is_err());
    }
}
