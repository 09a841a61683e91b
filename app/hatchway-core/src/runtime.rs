//! Runtime collaborator boundary.
//!
//! The Docker gateway never manages containers itself. It consumes a
//! [`ContainerProvider`] that can look up containers, create processes
//! inside them, and hand out their persisted output logs.

use crate::error::{CoreError, Result};
use crate::process::ProcessHandle;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncSeek};

/// Container lifecycle status as seen by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// Registered but never started.
    Created,
    /// Main process is running.
    Running,
    /// Main process has exited.
    Stopped,
}

impl ContainerStatus {
    /// Returns true if the main process is running.
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Snapshot of a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    /// Container ID.
    pub id: String,
    /// Current status.
    pub status: ContainerStatus,
    /// Whether the container's main process runs with a terminal.
    pub tty: bool,
}

/// Which standard streams get a dedicated pipe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StdioConfig {
    /// Pipe stdin.
    pub stdin: bool,
    /// Pipe stdout.
    pub stdout: bool,
    /// Pipe stderr.
    pub stderr: bool,
}

impl StdioConfig {
    /// No pipes at all (detached launch).
    #[must_use]
    pub const fn none() -> Self {
        Self {
            stdin: false,
            stdout: false,
            stderr: false,
        }
    }
}

/// What to run inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Executable (first element of the command vector).
    pub executable: String,
    /// Remaining arguments.
    pub args: Vec<String>,
    /// Terminal mode.
    pub tty: bool,
    /// Requested pipes.
    pub stdio: StdioConfig,
    /// Extra environment as `KEY=VALUE`.
    pub env: Vec<String>,
    /// Working directory, the backend's default if unset.
    pub working_dir: Option<String>,
}

impl ProcessSpec {
    /// Builds a spec from a command vector.
    ///
    /// # Errors
    ///
    /// Returns an error if the command is empty.
    pub fn from_command(cmd: &[String], tty: bool, stdio: StdioConfig) -> Result<Self> {
        let (executable, args) = cmd
            .split_first()
            .ok_or_else(|| CoreError::invalid_state("command must not be empty"))?;
        Ok(Self {
            executable: executable.clone(),
            args: args.to_vec(),
            tty,
            stdio,
            env: Vec::new(),
            working_dir: None,
        })
    }

    /// Adds environment entries.
    #[must_use]
    pub fn with_env(mut self, env: Vec<String>) -> Self {
        self.env = env;
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn with_working_dir(mut self, dir: Option<String>) -> Self {
        self.working_dir = dir;
        self
    }

    /// Returns the full command vector.
    #[must_use]
    pub fn command(&self) -> Vec<String> {
        std::iter::once(self.executable.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

/// A readable, seekable persisted log.
pub trait LogSource: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin> LogSource for T {}

/// Persisted output logs of a container's main process.
#[derive(Default)]
pub struct ContainerLogs {
    /// Stdout log, if the backend keeps one.
    pub stdout: Option<Box<dyn LogSource>>,
    /// Stderr log, if the backend keeps one.
    pub stderr: Option<Box<dyn LogSource>>,
}

/// A created but not yet started process.
#[async_trait]
pub trait ContainerProcess: Send {
    /// Backend process ID.
    fn id(&self) -> &str;

    /// Starts the process. May only be called once.
    async fn start(&mut self) -> Result<ProcessHandle>;
}

/// Container runtime consumed by the gateway.
#[async_trait]
pub trait ContainerProvider: Send + Sync {
    /// Looks up a container.
    async fn get(&self, id: &str) -> Option<ContainerInfo>;

    /// Creates an additional process inside a running container.
    async fn create_process(
        &self,
        container: &str,
        spec: ProcessSpec,
    ) -> Result<Box<dyn ContainerProcess>>;

    /// Creates the main process of a stopped container with caller-owned
    /// pipes.
    async fn bootstrap(
        &self,
        container: &str,
        stdio: StdioConfig,
    ) -> Result<Box<dyn ContainerProcess>>;

    /// Opens the persisted output logs of a container.
    async fn logs(&self, container: &str) -> Result<ContainerLogs>;

    /// Resizes the terminal of a process. `process` is `None` for the
    /// container's main process. Backends without live resize accept and
    /// ignore the request.
    async fn resize(
        &self,
        container: &str,
        process: Option<&str>,
        height: u16,
        width: u16,
    ) -> Result<()> {
        tracing::debug!(
            container,
            process,
            height,
            width,
            "resize not supported by backend, ignoring"
        );
        Ok(())
    }
}
