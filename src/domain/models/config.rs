use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Main configuration structure for keel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Directory holding the state database, layers, volumes and logs
    #[serde(default = "default_state_dir")]
    pub state_dir: String,

    /// Manifest file used when `--manifest` is not given
    #[serde(default = "default_manifest")]
    pub manifest: String,

    /// State database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Image build configuration
    #[serde(default)]
    pub build: BuildConfig,

    /// Process runtime configuration
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

fn default_state_dir() -> String {
    ".keel".to_string()
}

fn default_manifest() -> String {
    "keel.yaml".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            manifest: default_manifest(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            build: BuildConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl Config {
    pub fn state_dir(&self) -> PathBuf {
        PathBuf::from(&self.state_dir)
    }

    /// State database file; defaults to `<state_dir>/keel.db`.
    pub fn database_path(&self) -> PathBuf {
        self.database
            .path
            .as_ref()
            .map_or_else(|| self.state_dir().join("keel.db"), PathBuf::from)
    }

    pub fn layers_dir(&self) -> PathBuf {
        self.state_dir().join("layers")
    }

    pub fn volumes_dir(&self) -> PathBuf {
        self.state_dir().join("volumes")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.state_dir().join("logs")
    }
}

/// State database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to the `SQLite` state database (defaults under `state_dir`)
    #[serde(default)]
    pub path: Option<String>,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Also write JSON logs under `<state_dir>/logs`
    #[serde(default)]
    pub file: bool,

    /// File rotation: daily, hourly, never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: false,
            rotation: default_rotation(),
        }
    }
}

/// Image build configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BuildConfig {
    /// Images of one topological wave built concurrently
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
}

const fn default_max_parallel() -> usize {
    4
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
        }
    }
}

/// Process runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RuntimeConfig {
    /// Grace period between SIGTERM and SIGKILL
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
}

const fn default_stop_timeout_secs() -> u64 {
    10
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stop_timeout_secs: default_stop_timeout_secs(),
        }
    }
}
