//! Scheduler configuration
//!
//! Defines polling and retention intervals, the artifact directory and the
//! optional database connection.

use std::path::PathBuf;
use std::time::Duration;

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// How often due jobs are polled
    pub poll_interval: Duration,

    /// Age after which terminal jobs are deleted
    pub retention_days: u32,

    /// How often the retention sweep runs
    pub retention_interval: Duration,

    /// Directory holding runnable artifacts
    pub artifact_dir: PathBuf,

    /// Extension listed by the artifact store; `None` lists every file
    pub artifact_extension: Option<String>,

    /// Postgres connection string; in-memory stores are used when unset
    pub database_url: Option<String>,

    pub database_max_connections: u32,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            retention_days: 30,
            retention_interval: Duration::from_secs(24 * 60 * 60),
            artifact_dir: PathBuf::from("./artifacts"),
            artifact_extension: Some("jar".to_string()),
            database_url: None,
            database_max_connections: 10,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - POLL_INTERVAL (seconds, default: 30)
    /// - RETENTION_DAYS (default: 30)
    /// - RETENTION_INTERVAL (seconds, default: 86400)
    /// - ARTIFACT_DIR (default: ./artifacts)
    /// - ARTIFACT_EXTENSION (default: jar, empty lists every file)
    /// - DATABASE_URL (default: unset)
    /// - DATABASE_MAX_CONNECTIONS (default: 10)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Creates configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::new();

        let poll_interval = lookup("POLL_INTERVAL")
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.poll_interval);

        let retention_days = lookup("RETENTION_DAYS")
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(defaults.retention_days);

        let retention_interval = lookup("RETENTION_INTERVAL")
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.retention_interval);

        let artifact_dir = lookup("ARTIFACT_DIR")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.artifact_dir);

        let artifact_extension = match lookup("ARTIFACT_EXTENSION") {
            Some(ext) if ext.trim().is_empty() => None,
            Some(ext) => Some(ext.trim().trim_start_matches('.').to_string()),
            None => defaults.artifact_extension,
        };

        let database_url = lookup("DATABASE_URL").filter(|s| !s.is_empty());

        let database_max_connections = lookup("DATABASE_MAX_CONNECTIONS")
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(defaults.database_max_connections);

        Self {
            poll_interval,
            retention_days,
            retention_interval,
            artifact_dir,
            artifact_extension,
            database_url,
            database_max_connections,
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.retention_days == 0 {
            anyhow::bail!("retention_days must be greater than 0");
        }

        if self.retention_interval.is_zero() {
            anyhow::bail!("retention_interval must be greater than 0");
        }

        if let Some(url) = &self.database_url {
            if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                anyhow::bail!("database_url must start with postgres:// or postgresql://");
            }
            if self.database_max_connections == 0 {
                anyhow::bail!("database_max_connections must be greater than 0");
            }
        }

        Ok(())
    }

    /// Retention horizon as a calendar duration
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
