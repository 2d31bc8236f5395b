//! Run configuration.
//!
//! Loaded from YAML, with durations written as humantime strings:
//!
//! ```yaml
//! concurrency: 4
//! job_timeout: 30s
//! inter_job_delay: 0s
//! max_failures: 100000
//! max_rounds: 5
//! rule_copies: 1
//! result_pattern: '[a-z]\d'
//! completion:
//!   model: pro-001
//!   max_tokens: 64
//!   temperature: 0.0
//!   timeout: 60s
//! ```

use recall_core::{RuleError, Validator};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::dispatch::DispatchConfig;
use crate::providers::CompletionConfig;

/// Default per-job deadline before a call is aborted and resubmitted.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Pattern(#[from] RuleError),
}

/// Settings for a recall evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Parallel model calls; 0 runs sequentially
    pub concurrency: usize,

    /// Deadline for one model call in concurrent mode
    #[serde(with = "duration_str")]
    pub job_timeout: Duration,

    /// Pause between jobs in sequential mode
    #[serde(with = "duration_str")]
    pub inter_job_delay: Duration,

    /// A run stops once failures exceed this
    pub max_failures: usize,

    /// Round limit for the retry-until-clean loop; unlimited when absent
    pub max_rounds: Option<usize>,

    /// Times the selected rules are repeated in the prompt
    pub rule_copies: usize,

    /// Fallback extraction pattern for validation
    pub result_pattern: Option<String>,

    /// Completion settings passed to the provider
    pub completion: CompletionConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            job_timeout: DEFAULT_JOB_TIMEOUT,
            inter_job_delay: Duration::ZERO,
            max_failures: 100_000,
            max_rounds: None,
            rule_copies: 1,
            result_pattern: None,
            completion: CompletionConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Parse and validate YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Check value ranges and compile the result pattern.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.job_timeout.is_zero() {
            return Err(ConfigError::Invalid("job_timeout must be positive".to_string()));
        }

        if self.max_rounds == Some(0) {
            return Err(ConfigError::Invalid("max_rounds must be at least 1".to_string()));
        }

        if self.rule_copies == 0 {
            return Err(ConfigError::Invalid("rule_copies must be at least 1".to_string()));
        }

        self.validator()?;
        Ok(())
    }

    /// Validator for this config's result pattern.
    pub fn validator(&self) -> Result<Validator, ConfigError> {
        match &self.result_pattern {
            Some(pattern) => Ok(Validator::from_pattern_str(pattern)?),
            None => Ok(Validator::new()),
        }
    }

    /// Dispatcher settings.
    pub fn dispatch(&self) -> DispatchConfig {
        DispatchConfig {
            concurrency: self.concurrency,
            job_timeout: self.job_timeout,
            inter_job_delay: self.inter_job_delay,
            max_failures: self.max_failures,
        }
    }
}

/// Serde adapter for durations written as `"30s"`, `"1m 30s"`, `"250ms"`.
pub(crate) mod duration_str {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(D::Error::custom)
    }
}
