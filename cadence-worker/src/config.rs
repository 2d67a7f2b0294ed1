//! Worker configuration
//!
//! Defines the execution parameters of the worker pool: concurrency,
//! subprocess timeout, runtime command and staging location.

use std::path::PathBuf;
use std::time::Duration;

/// Upper bound on concurrent executions
pub const MAX_POOL_SIZE: usize = 64;

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of concurrent execution slots
    pub pool_size: usize,

    /// Hard limit on a single execution; the process is killed when exceeded
    pub execution_timeout: Duration,

    /// Program that runs an artifact (e.g., "java")
    pub runtime_program: String,

    /// Arguments placed between the program and the artifact path (e.g., "-jar")
    pub runtime_args: Vec<String>,

    /// Directory artifacts are staged into before execution
    pub staging_dir: PathBuf,

    /// Attempts at publishing a result before giving up
    pub result_publish_retries: u32,
}

impl WorkerConfig {
    /// Creates a new configuration with defaults
    pub fn new() -> Self {
        Self {
            pool_size: 5,
            execution_timeout: Duration::from_secs(60),
            runtime_program: "java".to_string(),
            runtime_args: vec!["-jar".to_string()],
            staging_dir: std::env::temp_dir(),
            result_publish_retries: 5,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - WORKER_POOL_SIZE (default: 5)
    /// - EXECUTION_TIMEOUT (seconds, default: 60)
    /// - RUNTIME_PROGRAM (default: java)
    /// - RUNTIME_ARGS (space separated, default: -jar)
    /// - STAGING_DIR (default: OS temp dir)
    /// - RESULT_PUBLISH_RETRIES (default: 5)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Creates configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::new();

        let pool_size = lookup("WORKER_POOL_SIZE")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.pool_size);

        let execution_timeout = lookup("EXECUTION_TIMEOUT")
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.execution_timeout);

        let runtime_program = lookup("RUNTIME_PROGRAM").unwrap_or(defaults.runtime_program);

        let runtime_args = lookup("RUNTIME_ARGS")
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or(defaults.runtime_args);

        let staging_dir = lookup("STAGING_DIR")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.staging_dir);

        let result_publish_retries = lookup("RESULT_PUBLISH_RETRIES")
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(defaults.result_publish_retries);

        Self {
            pool_size,
            execution_timeout,
            runtime_program,
            runtime_args,
            staging_dir,
            result_publish_retries,
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.pool_size == 0 || self.pool_size > MAX_POOL_SIZE {
            anyhow::bail!("pool_size must be between 1 and {}", MAX_POOL_SIZE);
        }

        if self.execution_timeout.is_zero() {
            anyhow::bail!("execution_timeout must be greater than 0");
        }

        if self.runtime_program.trim().is_empty() {
            anyhow::bail!("runtime_program cannot be empty");
        }

        if self.result_publish_retries == 0 {
            anyhow::bail!("result_publish_retries must be at least 1");
        }

        Ok(())
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::new()
    }
}
