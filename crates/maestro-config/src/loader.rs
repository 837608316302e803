//! Configuration loader.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::ConfigError;
use crate::schema::Config;

static ENV_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid"));

/// Configuration loader with environment variable substitution.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = fs::read_to_string(path)?;
        Self::load_str(&content)
    }

    /// Load configuration from a string.
    pub fn load_str(content: &str) -> Result<Config, ConfigError> {
        let expanded = Self::expand_env_vars(content)?;
        let mut config: Config = toml::from_str(&expanded)?;
        Self::expand_paths(&mut config);
        Ok(config)
    }

    /// Load `path` if given, otherwise `~/.maestro/config.toml` when present,
    /// otherwise built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Config, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default = Self::default_path();
                if default.exists() {
                    Self::load(&default)
                } else {
                    Ok(Config::default())
                }
            }
        }
    }

    /// Default config file location.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".maestro")
            .join("config.toml")
    }

    /// Expand environment variables in the format `${VAR}`.
    fn expand_env_vars(content: &str) -> Result<String, ConfigError> {
        let mut result = content.to_string();

        for cap in ENV_VAR.captures_iter(content) {
            let var_name = &cap[1];
            let var_value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotSet(var_name.to_string()))?;
            result = result.replace(&cap[0], &var_value);
        }

        Ok(result)
    }

    fn expand_paths(config: &mut Config) {
        let store = &mut config.checkpoint.store;
        store.base_path = Self::expand_path_buf(&store.base_path);
        config.logging.directory = Self::expand_path_buf(&config.logging.directory);
    }

    fn expand_path_buf(path: &Path) -> PathBuf {
        match path.to_str() {
            Some(s) => PathBuf::from(Self::expand_path(s)),
            None => path.to_path_buf(),
        }
    }

    /// Expand shell-style paths (e.g., `~/.maestro`).
    pub fn expand_path(path: &str) -> String {
        shellexpand::tilde(path).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_empty_config() {
        let config = ConfigLoader::load_str("").unwrap();
        assert!(config.checkpoint.store.compression);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_checkpoint_sections() {
        let content = r#"
            [checkpoint.store]
            base_path = "/var/lib/maestro/checkpoints"
            max_compression_ratio = 50.0

            [checkpoint.manager]
            max_agent_attempts = 5
            terminal_states = ["ERROR"]

            [checkpoint.recovery]
            auto_recover = false
        "#;
        let config = ConfigLoader::load_str(content).unwrap();
        assert_eq!(
            config.checkpoint.store.base_path,
            PathBuf::from("/var/lib/maestro/checkpoints")
        );
        assert_eq!(config.checkpoint.store.max_compression_ratio, 50.0);
        assert_eq!(config.checkpoint.manager.max_agent_attempts, 5);
        assert!(!config.checkpoint.manager.is_terminal_state("ABORTED"));
        assert!(!config.checkpoint.recovery.auto_recover);
    }

    #[test]
    fn test_load_expands_tilde_paths() {
        let content = r#"
            [checkpoint.store]
            base_path = "~/maestro-test/checkpoints"

            [logging]
            directory = "~/maestro-test/logs"
        "#;
        let config = ConfigLoader::load_str(content).unwrap();
        assert!(!config.checkpoint.store.base_path.starts_with("~"));
        assert!(config.checkpoint.store.base_path.ends_with("maestro-test/checkpoints"));
        assert!(!config.logging.directory.starts_with("~"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[logging]").unwrap();
        writeln!(file, "level = \"debug\"").unwrap();

        let config = ConfigLoader::load(file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = ConfigLoader::load(Path::new("/nonexistent/path/config.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_or_default_explicit_missing() {
        let result = ConfigLoader::load_or_default(Some(Path::new("/nonexistent/maestro.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_invalid_toml() {
        let result = ConfigLoader::load_str("invalid = [unclosed");
        assert!(matches!(result, Err(ConfigError::TomlParse(_))));
    }

    #[test]
    fn test_load_wrong_type() {
        let content = r#"
            [checkpoint.store]
            compression = "yes"
        "#;
        assert!(ConfigLoader::load_str(content).is_err());
    }

    #[test]
    fn test_expand_env_vars() {
        // SAFETY: This test runs in isolation and sets a unique test-only env var
        unsafe {
            std::env::set_var("MAESTRO_TEST_CHECKPOINT_DIR", "/srv/checkpoints");
        }
        let content = r#"
            [checkpoint.store]
            base_path = "${MAESTRO_TEST_CHECKPOINT_DIR}"
        "#;
        let config = ConfigLoader::load_str(content).unwrap();
        assert_eq!(config.checkpoint.store.base_path, PathBuf::from("/srv/checkpoints"));
        unsafe {
            std::env::remove_var("MAESTRO_TEST_CHECKPOINT_DIR");
        }
    }

    #[test]
    fn test_expand_env_vars_not_set() {
        let content = "value = \"${NONEXISTENT_TEST_VAR_12345}\"";
        let result = ConfigLoader::expand_env_vars(content);
        assert!(matches!(result, Err(ConfigError::EnvVarNotSet(_))));
    }

    #[test]
    fn test_expand_env_vars_no_vars() {
        let content = "value = \"no variables here\"";
        let expanded = ConfigLoader::expand_env_vars(content).unwrap();
        assert_eq!(expanded, content);
    }

    #[test]
    fn test_expand_path_no_tilde() {
        let path = "/usr/local/bin";
        assert_eq!(ConfigLoader::expand_path(path), path);
    }

    #[test]
    fn test_default_path() {
        assert!(ConfigLoader::default_path().ends_with(".maestro/config.toml"));
    }
}
