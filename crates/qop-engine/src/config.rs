//! Engine configuration.
//!
//! Supports loading configuration from:
//! 1. Configuration files (YAML)
//! 2. Environment variables (with QOP_ prefix)
//! 3. .env files
//!
//! Configuration precedence (highest to lowest):
//! 1. Environment variables
//! 2. Configuration file
//! 3. Default values

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Complete operator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Reconciliation engine settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Reconciliation engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base URL of the circuit validation service.
    #[serde(default = "default_validation_url")]
    pub validation_url: String,

    /// Container image for execution pods.
    #[serde(default = "default_executor_image")]
    pub executor_image: String,

    /// Number of reconcile workers.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Maximum retry attempts for failed executions.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Poll interval while a job is Running, in seconds.
    #[serde(default = "default_running_poll")]
    pub running_poll_secs: u64,

    /// Requeue delay after a transient error, in seconds.
    #[serde(default = "default_error_requeue")]
    pub error_requeue_secs: u64,

    /// Retry backoff baseline, in seconds.
    #[serde(default = "default_backoff_base")]
    pub retry_backoff_base_secs: u64,

    /// Retry backoff ceiling, in seconds.
    #[serde(default = "default_backoff_cap")]
    pub retry_backoff_cap_secs: u64,

    /// Deadline applied to each outbound RPC, in seconds.
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "console" or "json".
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions

fn default_validation_url() -> String {
    "http://validation-service:8000".to_string()
}

fn default_executor_image() -> String {
    "python:3.11-slim".to_string()
}

fn default_workers() -> usize {
    1
}

fn default_max_retries() -> u32 {
    3
}

fn default_running_poll() -> u64 {
    5
}

fn default_error_requeue() -> u64 {
    10
}

fn default_backoff_base() -> u64 {
    10
}

fn default_backoff_cap() -> u64 {
    600 // 10 minutes
}

fn default_rpc_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "console".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            validation_url: default_validation_url(),
            executor_image: default_executor_image(),
            workers: default_workers(),
            max_retries: default_max_retries(),
            running_poll_secs: default_running_poll(),
            error_requeue_secs: default_error_requeue(),
            retry_backoff_base_secs: default_backoff_base(),
            retry_backoff_cap_secs: default_backoff_cap(),
            rpc_timeout_secs: default_rpc_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl EngineConfig {
    /// Poll interval while a job is Running.
    pub fn running_poll(&self) -> Duration {
        Duration::from_secs(self.running_poll_secs)
    }

    /// Requeue delay after a transient error.
    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.error_requeue_secs)
    }

    /// Per-RPC deadline.
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    /// Exponential retry backoff for the given attempt number (1-based):
    /// `base * 2^(attempt-1)`, capped.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let base = self.retry_backoff_base_secs;
        let cap = self.retry_backoff_cap_secs;
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_secs(base.saturating_mul(factor).min(cap))
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| EngineError::Configuration(format!("cannot read config file: {e}")))?;

        let config: Config = serde_yml::from_str(&contents)
            .map_err(|e| EngineError::Configuration(format!("cannot parse config file: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration with the following precedence:
    /// 1. Load from file if provided
    /// 2. Apply environment variable overrides
    /// 3. Load .env file if it exists
    pub fn load(config_file: Option<&str>) -> EngineResult<Self> {
        dotenvy::dotenv().ok();

        let mut config = match config_file {
            Some(path) => Self::from_file(path)?,
            None => Config::default(),
        };

        config = config.merge_env();
        config.validate()?;
        Ok(config)
    }

    /// Merge environment variables into this configuration.
    ///
    /// Only variables that are explicitly set override the file-loaded (or
    /// default) values.
    fn merge_env(mut self) -> Self {
        if let Ok(v) = std::env::var("QOP_VALIDATION_URL") {
            self.engine.validation_url = v;
        }
        if let Ok(v) = std::env::var("QOP_EXECUTOR_IMAGE") {
            self.engine.executor_image = v;
        }
        if let Ok(v) = std::env::var("QOP_WORKERS") {
            if let Ok(val) = v.parse() {
                self.engine.workers = val;
            }
        }
        if let Ok(v) = std::env::var("QOP_MAX_RETRIES") {
            if let Ok(val) = v.parse() {
                self.engine.max_retries = val;
            }
        }
        if let Ok(v) = std::env::var("QOP_RUNNING_POLL_SECS") {
            if let Ok(val) = v.parse() {
                self.engine.running_poll_secs = val;
            }
        }
        if let Ok(v) = std::env::var("QOP_RETRY_BACKOFF_SECS") {
            if let Ok(val) = v.parse() {
                self.engine.retry_backoff_base_secs = val;
            }
        }
        if let Ok(v) = std::env::var("QOP_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Ok(v) = std::env::var("QOP_LOG_FORMAT") {
            self.logging.format = v;
        }
        self
    }

    /// Validate configuration values.
    pub fn validate(&self) -> EngineResult<()> {
        if self.engine.workers == 0 {
            return Err(EngineError::Configuration(
                "workers must be greater than 0".to_string(),
            ));
        }
        if self.engine.validation_url.is_empty() {
            return Err(EngineError::Configuration(
                "validation_url must not be empty".to_string(),
            ));
        }
        if self.engine.retry_backoff_cap_secs < self.engine.retry_backoff_base_secs {
            return Err(EngineError::Configuration(
                "retry backoff cap must be at least the baseline".to_string(),
            ));
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(EngineError::Configuration(format!(
                    "invalid log level: {other}"
                )));
            }
        }
        match self.logging.format.as_str() {
            "console" | "json" => {}
            other => {
                return Err(EngineError::Configuration(format!(
                    "invalid log format: {other}"
                )));
            }
        }

        Ok(())
    }
}
