//! Configuration types and loading
//!
//! Two sources, both read once at startup and passed down as immutable values:
//! - [`ExperimentConfig`] comes from the environment the platform sets up for
//!   each container (session id, broker host, parameter models).
//! - [`Config`] holds tunables (retry policy, timeouts, worker pool sizing) and
//!   is loaded from YAML with a fallback chain, defaulting every field.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::codec::SessionId;

/// Platform-wide broadcast exchange for commands
pub const COMMAND_EXCHANGE: &str = "hobbit.command";

/// Prefix of the queue carrying training data to the system
pub const TRAIN_QUEUE_PREFIX: &str = "hobbit.datagen-system.";

/// Prefix of the queue carrying tasks to the system
pub const TASK_QUEUE_PREFIX: &str = "hobbit.taskgen-system.";

/// Prefix of the queue carrying answers back to the controller
pub const ANSWER_QUEUE_PREFIX: &str = "hobbit.system-evalstore.";

/// Main configuration of a participant process
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Broker connection retry policy
    pub connection: ConnectionConfig,

    /// Channel setup
    pub setup: SetupConfig,

    /// Worker pool sizing
    pub workers: WorkerConfig,

    /// Benchmark controller settings
    pub benchmark: BenchmarkConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .hobbit.yml
        let local_config = PathBuf::from(".hobbit.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/hobbit/hobbit.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("hobbit").join("hobbit.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Peek at the configured log level before logging is initialized
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let path = config_path?;
        let content = fs::read_to_string(path).ok()?;
        let config: Self = serde_yaml::from_str(&content).ok()?;
        config.log_level
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Broker connection retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Attempts before giving up
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Pause between attempts in milliseconds
    #[serde(rename = "retry-interval-ms")]
    pub retry_interval_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_interval_ms: 5_000,
        }
    }
}

impl ConnectionConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

/// Channel setup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SetupConfig {
    /// How long to wait for every channel to become ready, in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self { timeout_ms: 120_000 }
    }
}

impl SetupConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Worker pool sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of concurrent workers
    pub count: usize,

    /// Jobs that may wait for a worker before submitters are held back
    #[serde(rename = "queue-depth")]
    pub queue_depth: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 4,
            queue_depth: 64,
        }
    }
}

/// Benchmark controller settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    /// Pause between publishing the result and exiting, in milliseconds
    #[serde(rename = "grace-period-ms")]
    pub grace_period_ms: u64,

    /// How long a task may stay unanswered before it counts as an error, in milliseconds
    #[serde(rename = "task-timeout-ms")]
    pub task_timeout_ms: u64,

    /// Directory holding the dataset files
    #[serde(rename = "data-dir")]
    pub data_dir: PathBuf,

    /// IRI namespace of the benchmark's parameters and KPIs
    pub namespace: String,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 20_000,
            task_timeout_ms: 60_000,
            data_dir: PathBuf::from("/data/"),
            namespace: "http://example.org/sail-winter-school-2024/benchmark/".to_string(),
        }
    }
}

impl BenchmarkConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }
}

/// Per-run settings handed to every container by the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentConfig {
    pub session_id: SessionId,
    pub broker_host: String,
    pub broker_port: u16,
    pub experiment_uri: String,
    pub benchmark_parameters: String,
    pub system_parameters: String,
}

impl ExperimentConfig {
    /// Build from explicit values with default broker location and empty models
    pub fn new(session_id: impl Into<SessionId>) -> Self {
        Self {
            session_id: session_id.into(),
            broker_host: "localhost".to_string(),
            broker_port: 5672,
            experiment_uri: String::new(),
            benchmark_parameters: String::new(),
            system_parameters: String::new(),
        }
    }

    /// Read from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let session_id = lookup("HOBBIT_SESSION_ID")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| eyre::eyre!("HOBBIT_SESSION_ID is not set"))?;

        let broker_port = match lookup("RABBITMQ_PORT") {
            Some(port) => port
                .parse()
                .with_context(|| format!("RABBITMQ_PORT is not a port number: {port}"))?,
            None => 5672,
        };

        let config = Self {
            session_id: SessionId::from(session_id),
            broker_host: lookup("HOBBIT_RABBIT_HOST").unwrap_or_else(|| "localhost".to_string()),
            broker_port,
            experiment_uri: lookup("HOBBIT_EXPERIMENT_URI").unwrap_or_default(),
            benchmark_parameters: lookup("BENCHMARK_PARAMETERS_MODEL").unwrap_or_default(),
            system_parameters: lookup("SYSTEM_PARAMETERS_MODEL").unwrap_or_default(),
        };
        debug!(?config, "ExperimentConfig::from_lookup: loaded");
        Ok(config)
    }

    /// AMQP URI of the broker
    pub fn broker_address(&self) -> String {
        format!("amqp://{}:{}/%2f", self.broker_host, self.broker_port)
    }

    pub fn train_queue(&self) -> String {
        format!("{TRAIN_QUEUE_PREFIX}{}", self.session_id)
    }

    pub fn task_queue(&self) -> String {
        format!("{TASK_QUEUE_PREFIX}{}", self.session_id)
    }

    pub fn answer_queue(&self) -> String {
        format!("{ANSWER_QUEUE_PREFIX}{}", self.session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.connection.max_attempts, 5);
        assert_eq!(config.connection.retry_interval(), Duration::from_secs(5));
        assert_eq!(config.setup.timeout(), Duration::from_secs(120));
        assert_eq!(config.benchmark.grace_period(), Duration::from_secs(20));
        assert_eq!(config.workers.count, 4);
        assert!(config.log_level.is_none());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "connection:\n  retry-interval-ms: 10\nbenchmark:\n  grace-period-ms: 0\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.connection.retry_interval_ms, 10);
        assert_eq!(config.connection.max_attempts, 5);
        assert_eq!(config.benchmark.grace_period_ms, 0);
        assert_eq!(config.benchmark.task_timeout_ms, 60_000);
    }

    #[test]
    fn test_load_explicit_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("hobbit.yml");
        fs::write(&path, "log-level: debug\nworkers:\n  count: 2\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.workers.count, 2);
        assert_eq!(Config::load_log_level(Some(&path)), Some("debug".to_string()));
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let path = PathBuf::from("/nonexistent/hobbit.yml");
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_experiment_from_lookup() {
        let config = ExperimentConfig::from_lookup(lookup(&[
            ("HOBBIT_SESSION_ID", "s1"),
            ("HOBBIT_RABBIT_HOST", "rabbit"),
            ("RABBITMQ_PORT", "5673"),
            ("HOBBIT_EXPERIMENT_URI", "http://w3id.org/hobbit/experiments#1"),
        ]))
        .unwrap();

        assert_eq!(config.session_id.as_str(), "s1");
        assert_eq!(config.broker_address(), "amqp://rabbit:5673/%2f");
        assert_eq!(config.train_queue(), "hobbit.datagen-system.s1");
        assert_eq!(config.task_queue(), "hobbit.taskgen-system.s1");
        assert_eq!(config.answer_queue(), "hobbit.system-evalstore.s1");
        assert_eq!(config.experiment_uri, "http://w3id.org/hobbit/experiments#1");
    }

    #[test]
    fn test_experiment_requires_session_id() {
        assert!(ExperimentConfig::from_lookup(lookup(&[])).is_err());
        assert!(ExperimentConfig::from_lookup(lookup(&[("HOBBIT_SESSION_ID", "")])).is_err());
    }

    #[test]
    fn test_experiment_rejects_bad_port() {
        let result = ExperimentConfig::from_lookup(lookup(&[("HOBBIT_SESSION_ID", "s1"), ("RABBITMQ_PORT", "rabbit")]));
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn test_experiment_from_env() {
        // SAFETY: serialized with every other test touching the environment
        unsafe {
            std::env::set_var("HOBBIT_SESSION_ID", "env-session");
            std::env::remove_var("HOBBIT_RABBIT_HOST");
            std::env::remove_var("RABBITMQ_PORT");
        }
        let config = ExperimentConfig::from_env().unwrap();
        assert_eq!(config.session_id.as_str(), "env-session");
        assert_eq!(config.broker_address(), "amqp://localhost:5672/%2f");
        unsafe {
            std::env::remove_var("HOBBIT_SESSION_ID");
        }
    }
}
