//! Process configuration for a benchmark run.
//!
//! Values come from a TOML file (every key optional), then environment
//! overrides, then CLI flags applied by the binary. The config is read-only
//! once an episode starts.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::model::retry::RetryPolicy;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "leakbench.toml";

/// Environment variable overriding the model identifier.
pub const MODEL_ENV: &str = "MODEL";

/// Errors produced while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Which leak channels the synthetic provider plants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LeakToggles {
    pub future_signal: bool,
    pub global_target_mean: bool,
    pub cat0_rate_full: bool,
}

impl Default for LeakToggles {
    fn default() -> Self {
        Self {
            future_signal: true,
            global_target_mean: true,
            cat0_rate_full: true,
        }
    }
}

/// Full harness configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HarnessConfig {
    /// Training rows per problem.
    pub n_train: usize,
    /// Test rows per problem.
    pub n_test: usize,
    /// Minimum AUROC for an episode to pass. Written back by calibration.
    pub pass_threshold: f64,
    /// Episodes per run.
    pub num_runs: u32,
    /// Model identifier sent to the provider.
    pub model: String,
    /// Step bound for the agent loop.
    pub max_steps: u32,
    /// Surface steps, assistant text and code output at info level.
    pub verbose: bool,
    /// Character cap on captured fragment output.
    pub stdout_max_chars: usize,
    /// Print quota = factor × train column count.
    pub print_values_factor: usize,
    /// Print quota when the train table has no columns.
    pub print_fallback_quota: usize,
    /// Completion budget per model call.
    pub max_tokens: u32,
    /// Interpreter used for the Python kernel.
    pub python_command: String,
    pub leaks: LeakToggles,
    pub retry: RetryPolicy,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            n_train: 800,
            n_test: 200,
            pass_threshold: 0.9471,
            num_runs: 10,
            model: "claude-haiku-4-5".to_string(),
            max_steps: 20,
            verbose: true,
            stdout_max_chars: 8000,
            print_values_factor: 2,
            print_fallback_quota: 100,
            max_tokens: 1000,
            python_command: "python3".to_string(),
            leaks: LeakToggles::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl HarnessConfig {
    /// Load from `path` if it exists, otherwise start from defaults; then
    /// apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file without applying overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(model) = std::env::var(MODEL_ENV) {
            if !model.trim().is_empty() {
                self.model = model;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_steps == 0 {
            return Err(ConfigError::Invalid("max_steps must be at least 1".into()));
        }
        if self.n_test == 0 {
            return Err(ConfigError::Invalid("n_test must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.pass_threshold) {
            return Err(ConfigError::Invalid(format!(
                "pass_threshold {} outside [0, 1]",
                self.pass_threshold
            )));
        }
        if self.stdout_max_chars == 0 {
            return Err(ConfigError::Invalid(
                "stdout_max_chars must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Number of values the agent may print in one episode.
    pub fn print_quota(&self, train_columns: usize) -> usize {
        if train_columns == 0 {
            self.print_fallback_quota
        } else {
            self.print_values_factor * train_columns
        }
    }
}
