//! Configuration management.
//!
//! hatchway configuration is loaded from multiple sources with the following priority:
//!
//! 1. Environment variables (HATCHWAY_*, nested keys separated by `__`)
//! 2. Configuration file (~/.config/hatchway/config.toml)
//! 3. Default values
//!
//! ## Example Configuration File
//!
//! ```toml
//! data_dir = "~/.hatchway"
//!
//! [docker]
//! socket_path = "~/.hatchway/docker.sock"
//!
//! [stream]
//! read_chunk_size = 8192
//! idle_poll_ms = 50
//!
//! [logging]
//! level = "info"
//!
//! [[containers]]
//! id = "web"
//! cmd = ["sh", "-c", "while true; do date; sleep 1; done"]
//! autostart = true
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// hatchway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory.
    pub data_dir: PathBuf,
    /// Docker API configuration.
    pub docker: DockerConfig,
    /// Stream pump tunables.
    pub stream: StreamConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
    /// Containers managed by the host runtime.
    pub containers: Vec<ContainerDefinition>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            docker: DockerConfig::default(),
            stream: StreamConfig::default(),
            logging: LoggingConfig::default(),
            containers: Vec::new(),
        }
    }
}

impl Config {
    /// Loads configuration from files and environment.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (HATCHWAY_*)
    /// 2. User config file (~/.config/hatchway/config.toml)
    /// 3. System config file (/etc/hatchway/config.toml)
    /// 4. Default values
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(system_config_path()))
            .merge(Toml::file(user_config_path()))
            .merge(Env::prefixed("HATCHWAY_").split("__"))
            .extract()
    }

    /// Loads configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: impl AsRef<std::path::Path>) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("HATCHWAY_").split("__"))
            .extract()
    }

    /// Returns the path to the containers directory.
    #[must_use]
    pub fn containers_dir(&self) -> PathBuf {
        self.data_dir.join("containers")
    }
}

/// Docker API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Unix socket path.
    pub socket_path: PathBuf,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            socket_path: default_data_dir().join("docker.sock"),
        }
    }
}

/// Tunables for the attach/exec stream pumps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Maximum bytes read from a pipe or log per chunk.
    pub read_chunk_size: usize,
    /// Retry interval after an empty read while output is flowing.
    pub active_poll_ms: u64,
    /// Retry interval once reads start coming back empty.
    pub idle_poll_ms: u64,
    /// Retry interval for a long-idle stream.
    pub keepalive_poll_ms: u64,
    /// Consecutive empty reads before switching to the keepalive interval.
    pub idle_reads_before_keepalive: u32,
    /// How long readers may drain after the process exits.
    pub drain_grace_ms: u64,
    /// Container status polling interval for the log-tail path.
    pub log_poll_ms: u64,
    /// Frames buffered between readers and the transport writer.
    pub frame_queue_depth: usize,
    /// Idle time after which an empty frame is written to a hijacked
    /// multiplexed connection to detect a vanished client.
    pub keepalive_frame_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: 8192,
            active_poll_ms: 5,
            idle_poll_ms: 50,
            keepalive_poll_ms: 500,
            idle_reads_before_keepalive: 50,
            drain_grace_ms: 200,
            log_poll_ms: 200,
            frame_queue_depth: 64,
            keepalive_frame_ms: 1000,
        }
    }
}

impl StreamConfig {
    /// Grace period readers get after process exit.
    #[must_use]
    pub const fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }

    /// Status polling interval for the log-tail path.
    #[must_use]
    pub const fn log_poll(&self) -> Duration {
        Duration::from_millis(self.log_poll_ms)
    }

    /// Idle time before a keepalive frame goes out on a hijacked stream.
    #[must_use]
    pub const fn keepalive_frame(&self) -> Duration {
        Duration::from_millis(self.keepalive_frame_ms)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
    /// Log format (text, json).
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// A container the host runtime knows about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerDefinition {
    /// Container ID.
    pub id: String,
    /// Main process command line.
    pub cmd: Vec<String>,
    /// Whether the container was created with a terminal.
    #[serde(default)]
    pub tty: bool,
    /// Start the main process when the daemon starts.
    #[serde(default)]
    pub autostart: bool,
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/var/lib"))
        .join(".hatchway")
}

fn user_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("hatchway")
        .join("config.toml")
}

fn system_config_path() -> PathBuf {
    PathBuf::from("/etc/hatchway/config.toml")
}
