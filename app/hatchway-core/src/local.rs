//! Host-process container backend.
//!
//! Each container is a named command line run directly on the host. The
//! main process writes to `<root>/<id>/stdout.log` and `stderr.log`, which
//! back the log-tail attach path. Exec processes are plain child processes
//! and are killed together with the main process.
//!
//! No pseudo terminal is allocated: in terminal mode stderr is folded into
//! the stdout log for the main process and discarded for exec processes.

use crate::config::{Config, ContainerDefinition};
use crate::error::{CoreError, Result};
use crate::process::{exit_channel, ExitNotifier, ExitWatch, ProcessHandle, UNKNOWN_EXIT_CODE};
use crate::runtime::{
    ContainerInfo, ContainerLogs, ContainerProcess, ContainerProvider, ContainerStatus,
    ProcessSpec, StdioConfig,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

const STDOUT_LOG: &str = "stdout.log";
const STDERR_LOG: &str = "stderr.log";

struct ContainerEntry {
    definition: ContainerDefinition,
    status: ContainerStatus,
    /// Cancelled to kill the main process and every exec process.
    kill: CancellationToken,
    exit: Option<ExitWatch>,
    generation: u64,
}

struct Inner {
    root: PathBuf,
    containers: RwLock<HashMap<String, ContainerEntry>>,
    next_process: AtomicU64,
}

impl Inner {
    fn log_path(&self, id: &str, name: &str) -> PathBuf {
        self.root.join(id).join(name)
    }

    fn process_id(&self, container: &str) -> String {
        let n = self.next_process.fetch_add(1, Ordering::Relaxed);
        format!("{container}-{n}")
    }

    fn mark_stopped(&self, id: &str, generation: u64, code: i32) {
        let mut containers = self.containers.write();
        if let Some(entry) = containers.get_mut(id) {
            if entry.generation == generation {
                entry.status = ContainerStatus::Stopped;
                tracing::info!(container = id, exit_code = code, "container stopped");
            }
        }
    }
}

/// Host-process implementation of [`ContainerProvider`].
#[derive(Clone)]
pub struct LocalRuntime {
    inner: Arc<Inner>,
}

impl LocalRuntime {
    /// Creates a runtime storing container logs under `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                root: root.into(),
                containers: RwLock::new(HashMap::new()),
                next_process: AtomicU64::new(1),
            }),
        }
    }

    /// Creates a runtime from configuration and registers its containers.
    ///
    /// # Errors
    ///
    /// Returns an error if a container definition is invalid.
    pub fn from_config(config: &Config) -> Result<Self> {
        let runtime = Self::new(config.containers_dir());
        for definition in &config.containers {
            runtime.register(definition.clone())?;
        }
        Ok(runtime)
    }

    /// Returns the log root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Registers a container in the created state.
    ///
    /// # Errors
    ///
    /// Returns an error if the ID is taken, the command is empty, or the
    /// log directory cannot be created.
    pub fn register(&self, definition: ContainerDefinition) -> Result<()> {
        if definition.cmd.is_empty() {
            return Err(CoreError::config(format!(
                "container {} has an empty command",
                definition.id
            )));
        }

        let dir = self.inner.root.join(&definition.id);
        std::fs::create_dir_all(&dir)?;
        for name in [STDOUT_LOG, STDERR_LOG] {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join(name))?;
        }

        let mut containers = self.inner.containers.write();
        if containers.contains_key(&definition.id) {
            return Err(CoreError::already_exists(format!(
                "container {}",
                definition.id
            )));
        }
        tracing::debug!(container = %definition.id, "registered container");
        containers.insert(
            definition.id.clone(),
            ContainerEntry {
                definition,
                status: ContainerStatus::Created,
                kill: CancellationToken::new(),
                exit: None,
                generation: 0,
            },
        );
        Ok(())
    }

    /// Starts a container's main process with output going to its logs.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is unknown, already running, or
    /// the process cannot be spawned.
    pub async fn start(&self, id: &str) -> Result<()> {
        let mut process = self.main_process(id, StdioConfig::none())?;
        process.start().await.map(drop)
    }

    /// Stops a container's main process and waits for it to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is unknown.
    pub async fn stop(&self, id: &str) -> Result<()> {
        let exit = {
            let containers = self.inner.containers.read();
            let entry = containers
                .get(id)
                .ok_or_else(|| CoreError::not_found(format!("container {id}")))?;
            if !entry.status.is_running() {
                return Ok(());
            }
            entry.kill.cancel();
            entry.exit.clone()
        };
        if let Some(exit) = exit {
            exit.wait().await;
        }
        Ok(())
    }

    /// Stops and forgets a container. Its logs stay on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is unknown.
    pub async fn remove(&self, id: &str) -> Result<()> {
        self.stop(id).await?;
        self.inner
            .containers
            .write()
            .remove(id)
            .map(drop)
            .ok_or_else(|| CoreError::not_found(format!("container {id}")))
    }

    /// Returns the IDs of all registered containers.
    #[must_use]
    pub fn container_ids(&self) -> Vec<String> {
        self.inner.containers.read().keys().cloned().collect()
    }

    fn main_process(&self, id: &str, stdio: StdioConfig) -> Result<LocalProcess> {
        let containers = self.inner.containers.read();
        let entry = containers
            .get(id)
            .ok_or_else(|| CoreError::not_found(format!("container {id}")))?;
        if entry.status.is_running() {
            return Err(CoreError::invalid_state(format!(
                "container {id} is already running"
            )));
        }
        let spec = ProcessSpec::from_command(&entry.definition.cmd, entry.definition.tty, stdio)?;
        Ok(LocalProcess {
            id: self.inner.process_id(id),
            container: id.to_string(),
            spec,
            kind: ProcessKind::Main,
            inner: Arc::clone(&self.inner),
            started: false,
        })
    }
}

#[async_trait]
impl ContainerProvider for LocalRuntime {
    async fn get(&self, id: &str) -> Option<ContainerInfo> {
        self.inner.containers.read().get(id).map(|entry| ContainerInfo {
            id: entry.definition.id.clone(),
            status: entry.status,
            tty: entry.definition.tty,
        })
    }

    async fn create_process(
        &self,
        container: &str,
        spec: ProcessSpec,
    ) -> Result<Box<dyn ContainerProcess>> {
        let running = self
            .inner
            .containers
            .read()
            .get(container)
            .map(|entry| entry.status.is_running())
            .ok_or_else(|| CoreError::not_found(format!("container {container}")))?;
        if !running {
            return Err(CoreError::invalid_state(format!(
                "container {container} is not running"
            )));
        }
        Ok(Box::new(LocalProcess {
            id: self.inner.process_id(container),
            container: container.to_string(),
            spec,
            kind: ProcessKind::Exec,
            inner: Arc::clone(&self.inner),
            started: false,
        }))
    }

    async fn bootstrap(
        &self,
        container: &str,
        stdio: StdioConfig,
    ) -> Result<Box<dyn ContainerProcess>> {
        Ok(Box::new(self.main_process(container, stdio)?))
    }

    async fn logs(&self, container: &str) -> Result<ContainerLogs> {
        if !self.inner.containers.read().contains_key(container) {
            return Err(CoreError::not_found(format!("container {container}")));
        }
        let stdout = open_log(&self.inner.log_path(container, STDOUT_LOG)).await?;
        let stderr = open_log(&self.inner.log_path(container, STDERR_LOG)).await?;
        Ok(ContainerLogs {
            stdout: stdout.map(|f| Box::new(f) as _),
            stderr: stderr.map(|f| Box::new(f) as _),
        })
    }
}

async fn open_log(path: &Path) -> Result<Option<tokio::fs::File>> {
    match tokio::fs::File::open(path).await {
        Ok(file) => Ok(Some(file)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessKind {
    /// The container's main process.
    Main,
    /// An additional process inside a running container.
    Exec,
}

struct LocalProcess {
    id: String,
    container: String,
    spec: ProcessSpec,
    kind: ProcessKind,
    inner: Arc<Inner>,
    started: bool,
}

impl LocalProcess {
    fn output_stdio(&self, piped: bool, log: &str) -> Result<Stdio> {
        if piped {
            return Ok(Stdio::piped());
        }
        match self.kind {
            ProcessKind::Exec => Ok(Stdio::null()),
            ProcessKind::Main => {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(self.inner.log_path(&self.container, log))?;
                Ok(Stdio::from(file))
            }
        }
    }

    /// Reserves the container for a main process and returns the kill
    /// token and generation the monitor reports back with.
    fn claim_main(&self, exit: &ExitWatch) -> Result<(CancellationToken, u64)> {
        let mut containers = self.inner.containers.write();
        let entry = containers
            .get_mut(&self.container)
            .ok_or_else(|| CoreError::not_found(format!("container {}", self.container)))?;
        if entry.status.is_running() {
            return Err(CoreError::invalid_state(format!(
                "container {} is already running",
                self.container
            )));
        }
        entry.status = ContainerStatus::Running;
        entry.kill = CancellationToken::new();
        entry.exit = Some(exit.clone());
        entry.generation += 1;
        Ok((entry.kill.clone(), entry.generation))
    }

    fn exec_kill_token(&self) -> Result<CancellationToken> {
        let containers = self.inner.containers.read();
        containers
            .get(&self.container)
            .map(|entry| entry.kill.child_token())
            .ok_or_else(|| CoreError::not_found(format!("container {}", self.container)))
    }

    fn command(&self) -> Result<Command> {
        let stdio = self.spec.stdio;
        let mut command = Command::new(&self.spec.executable);
        command.args(&self.spec.args);
        // Processes die with the runtime that monitors them.
        command.kill_on_drop(true);
        for entry in &self.spec.env {
            match entry.split_once('=') {
                Some((key, value)) => command.env(key, value),
                None => command.env_remove(entry),
            };
        }
        if let Some(dir) = &self.spec.working_dir {
            command.current_dir(dir);
        }
        command.stdin(if stdio.stdin {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        command.stdout(self.output_stdio(stdio.stdout, STDOUT_LOG)?);
        let stderr_log = if self.spec.tty { STDOUT_LOG } else { STDERR_LOG };
        if self.spec.tty && self.kind == ProcessKind::Exec {
            command.stderr(Stdio::null());
        } else {
            command.stderr(self.output_stdio(stdio.stderr && !self.spec.tty, stderr_log)?);
        }
        Ok(command)
    }
}

#[async_trait]
impl ContainerProcess for LocalProcess {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start(&mut self) -> Result<ProcessHandle> {
        if self.started {
            return Err(CoreError::invalid_state(format!(
                "process {} already started",
                self.id
            )));
        }
        self.started = true;

        let mut command = self.command()?;
        let (notifier, exit) = exit_channel();

        let (kill, generation) = match self.kind {
            ProcessKind::Main => {
                let (kill, generation) = self.claim_main(&exit)?;
                (kill, Some(generation))
            }
            ProcessKind::Exec => (self.exec_kill_token()?, None),
        };

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                notifier.notify(UNKNOWN_EXIT_CODE);
                if let Some(generation) = generation {
                    self.inner
                        .mark_stopped(&self.container, generation, UNKNOWN_EXIT_CODE);
                }
                return Err(CoreError::runtime(format!(
                    "failed to spawn {}: {e}",
                    self.spec.executable
                )));
            }
        };

        let pid = child.id();
        tracing::debug!(
            container = %self.container,
            process = %self.id,
            pid,
            cmd = ?self.spec.command(),
            "process started"
        );

        let mut handle = ProcessHandle::new(self.id.clone(), exit).with_pid(pid);
        if let Some(stdin) = child.stdin.take() {
            handle = handle.with_stdin(Box::new(stdin));
        }
        if let Some(stdout) = child.stdout.take() {
            handle = handle.with_stdout(Box::new(stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            handle = handle.with_stderr(Box::new(stderr));
        }

        let inner = Arc::clone(&self.inner);
        let container = self.container.clone();
        tokio::spawn(async move {
            let code = monitor(child, kill, &notifier).await;
            if let Some(generation) = generation {
                inner.mark_stopped(&container, generation, code);
            }
        });

        Ok(handle)
    }
}

async fn monitor(mut child: Child, kill: CancellationToken, notifier: &ExitNotifier) -> i32 {
    let status = tokio::select! {
        status = child.wait() => status,
        () = kill.cancelled() => {
            if let Err(e) = child.kill().await {
                tracing::warn!("failed to kill process: {}", e);
            }
            child.wait().await
        }
    };
    let code = status.map_or(UNKNOWN_EXIT_CODE, exit_code);
    notifier.notify(code);
    code
}

fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(UNKNOWN_EXIT_CODE)
}
