//! Configuration management with YAML support

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub poll: PollConfig,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

/// Long-poll timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Used when a request names no timeout
    #[serde(default = "default_poll_timeout")]
    pub default_timeout_secs: u64,

    /// Upper bound on any requested timeout
    #[serde(default = "default_max_poll_timeout")]
    pub max_timeout_secs: u64,

    /// How often a waiting poll re-reads the counter, to catch commits from
    /// other processes sharing the database file
    #[serde(default = "default_recheck_interval")]
    pub recheck_interval_ms: u64,
}

/// Change-log retention
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Keep at least this many most recent versions of log history.
    /// None keeps everything.
    #[serde(default)]
    pub keep_versions: Option<u64>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// tracing-subscriber filter directive; RUST_LOG wins when set
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

// Default value functions
fn default_database_path() -> String {
    "~/.local/share/chatsync/chatsync.db".to_string()
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_poll_timeout() -> u64 {
    25
}

fn default_max_poll_timeout() -> u64 {
    60
}

fn default_recheck_interval() -> u64 {
    1000
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_poll_timeout(),
            max_timeout_secs: default_max_poll_timeout(),
            recheck_interval_ms: default_recheck_interval(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl PollConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs).min(self.max_timeout())
    }

    pub fn max_timeout(&self) -> Duration {
        Duration::from_secs(self.max_timeout_secs)
    }

    pub fn recheck_interval(&self) -> Duration {
        Duration::from_millis(self.recheck_interval_ms.max(10))
    }
}

impl RetentionConfig {
    /// Version through which history may be pruned, given the current one
    pub fn prune_point(&self, current: u64) -> Option<u64> {
        self.keep_versions.map(|keep| current.saturating_sub(keep))
    }
}

impl Config {
    /// Load configuration from a YAML file
    /// Searches in order:
    /// 1. Provided path
    /// 2. ./chatsync.yaml (current directory)
    /// 3. <config dir>/chatsync/chatsync.yaml
    pub fn load(path: &str) -> Result<Self> {
        let mut search_paths = vec![
            PathBuf::from(shellexpand::tilde(path).to_string()),
            PathBuf::from("chatsync.yaml"),
        ];
        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("chatsync/chatsync.yaml"));
        }

        for search_path in &search_paths {
            if search_path.exists() {
                let content = std::fs::read_to_string(search_path)?;
                let config: Config = serde_yaml::from_str(&content)?;
                return Ok(config);
            }
        }

        // No config file found, use defaults
        Ok(Config::default())
    }

    /// Get the database path, expanding ~ to home directory
    pub fn database_path(&self) -> PathBuf {
        let expanded = shellexpand::tilde(&self.database.path).to_string();
        PathBuf::from(expanded)
    }
}
