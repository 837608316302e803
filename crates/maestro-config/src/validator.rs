//! Configuration validation.

use crate::error::ConfigError;
use crate::schema::Config;

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Convert the first error, if any, into a [`ConfigError`].
    pub fn ensure_valid(&self) -> Result<(), ConfigError> {
        match self.errors.first() {
            Some(e) => Err(ConfigError::InvalidValue {
                field: e.path.clone(),
                message: e.message.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> Result<ValidationResult, ConfigError> {
        let mut result = ValidationResult::default();

        Self::validate_store(config, &mut result);
        Self::validate_manager(config, &mut result);
        Self::validate_logging(config, &mut result);

        Ok(result)
    }

    fn validate_store(config: &Config, result: &mut ValidationResult) {
        let store = &config.checkpoint.store;

        if store.base_path.as_os_str().is_empty() {
            result.add_error(ValidationError::new(
                "checkpoint.store.base_path",
                "base_path cannot be empty",
            ));
        } else if store.base_path.is_relative() {
            result.add_warning(ValidationWarning::new(
                "checkpoint.store.base_path",
                "base_path is relative and will resolve against the working directory",
            ));
        }

        if store.max_checkpoint_size == 0 {
            result.add_error(ValidationError::new(
                "checkpoint.store.max_checkpoint_size",
                "max_checkpoint_size must be greater than 0",
            ));
        }

        if store.max_decompressed_size < store.max_checkpoint_size {
            result.add_error(ValidationError::new(
                "checkpoint.store.max_decompressed_size",
                "max_decompressed_size must not be smaller than max_checkpoint_size",
            ));
        }

        if !store.max_compression_ratio.is_finite() || store.max_compression_ratio < 1.0 {
            result.add_error(ValidationError::new(
                "checkpoint.store.max_compression_ratio",
                "max_compression_ratio must be a finite value of at least 1",
            ));
        } else if store.max_compression_ratio > 1000.0 {
            result.add_warning(ValidationWarning::new(
                "checkpoint.store.max_compression_ratio",
                "max_compression_ratio is very high (>1000), the compression-bomb guard is weak",
            ));
        }

        if !store.index_enabled {
            result.add_warning(ValidationWarning::new(
                "checkpoint.store.index_enabled",
                "Index disabled, every listing scans the checkpoint directory",
            ));
        }
    }

    fn validate_manager(config: &Config, result: &mut ValidationResult) {
        let manager = &config.checkpoint.manager;

        if !manager.enabled {
            result.add_warning(ValidationWarning::new(
                "checkpoint.manager.enabled",
                "Checkpointing is disabled, crashes will lose workflow progress",
            ));
        }

        if manager.max_agent_attempts == 0 {
            result.add_error(ValidationError::new(
                "checkpoint.manager.max_agent_attempts",
                "max_agent_attempts must be greater than 0",
            ));
        }

        let mut zero_limits: Vec<_> = manager
            .agent_attempt_limits
            .iter()
            .filter(|(_, limit)| **limit == 0)
            .map(|(agent, _)| agent.as_str())
            .collect();
        zero_limits.sort_unstable();
        for agent in zero_limits {
            result.add_error(ValidationError::new(
                format!("checkpoint.manager.agent_attempt_limits.{}", agent),
                "attempt limit must be greater than 0",
            ));
        }

        if manager.complete_state.is_empty() {
            result.add_error(ValidationError::new(
                "checkpoint.manager.complete_state",
                "complete_state cannot be empty",
            ));
        } else if manager.is_terminal_state(&manager.complete_state) {
            result.add_error(ValidationError::new(
                "checkpoint.manager.complete_state",
                format!(
                    "complete_state '{}' is also listed as a terminal state",
                    manager.complete_state
                ),
            ));
        }

        if manager.max_checkpoints == 0 {
            result.add_error(ValidationError::new(
                "checkpoint.manager.max_checkpoints",
                "max_checkpoints must be greater than 0",
            ));
        }

        if manager.retention_days == 0 {
            result.add_warning(ValidationWarning::new(
                "checkpoint.manager.retention_days",
                "retention_days is 0, every retention sweep removes all checkpoints",
            ));
        }
    }

    fn validate_logging(config: &Config, result: &mut ValidationResult) {
        let level = config.logging.level.as_str();
        let known = ["trace", "debug", "info", "warn", "error", "off"];

        if level.is_empty() {
            result.add_error(ValidationError::new("logging.level", "level cannot be empty"));
        } else if !level.contains('=') && !known.contains(&level.to_ascii_lowercase().as_str()) {
            result.add_warning(ValidationWarning::new(
                "logging.level",
                format!("Unknown log level '{}', valid values: {:?}", level, known),
            ));
        }

        if config.logging.file && config.logging.directory.as_os_str().is_empty() {
            result.add_error(ValidationError::new(
                "logging.directory",
                "directory cannot be empty when file logging is enabled",
            ));
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
