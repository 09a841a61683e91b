//! Process handles handed from a runtime backend to the stream bridge.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;

/// Write end of a process's stdin pipe.
pub type PipeWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Read end of a process's stdout or stderr pipe.
pub type PipeReader = Box<dyn AsyncRead + Send + Unpin>;

/// Exit code reported when a process ends without a status (e.g. the
/// backend lost track of it).
pub const UNKNOWN_EXIT_CODE: i32 = -1;

/// Creates a linked exit notifier and watcher.
#[must_use]
pub fn exit_channel() -> (ExitNotifier, ExitWatch) {
    let (tx, rx) = watch::channel(None);
    (ExitNotifier(tx), ExitWatch(rx))
}

/// Producer side of a process exit notification. Held by the backend's
/// process monitor.
#[derive(Debug)]
pub struct ExitNotifier(watch::Sender<Option<i32>>);

impl ExitNotifier {
    /// Publishes the exit code. Later calls are ignored.
    pub fn notify(&self, code: i32) {
        self.0.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(code);
            true
        });
    }
}

/// Consumer side of a process exit notification. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ExitWatch(watch::Receiver<Option<i32>>);

impl ExitWatch {
    /// Returns the exit code if the process has exited.
    #[must_use]
    pub fn code(&self) -> Option<i32> {
        *self.0.borrow()
    }

    /// Returns true once the process has exited.
    #[must_use]
    pub fn has_exited(&self) -> bool {
        self.code().is_some()
    }

    /// Waits for the process to exit and returns its exit code.
    ///
    /// If the notifier is dropped without publishing, resolves to
    /// [`UNKNOWN_EXIT_CODE`].
    pub async fn wait(&self) -> i32 {
        let mut rx = self.0.clone();
        let result = rx.wait_for(Option::is_some).await.map(|code| *code);
        match result {
            Ok(code) => code.unwrap_or(UNKNOWN_EXIT_CODE),
            Err(_) => self.code().unwrap_or(UNKNOWN_EXIT_CODE),
        }
    }
}

/// A started process and its attached pipe endpoints.
///
/// Each pipe is present only if it was requested when the process was
/// created. The bridge takes ownership of the pipes it drives.
pub struct ProcessHandle {
    id: String,
    pid: Option<u32>,
    stdin: Option<PipeWriter>,
    stdout: Option<PipeReader>,
    stderr: Option<PipeReader>,
    exit: ExitWatch,
}

impl ProcessHandle {
    /// Creates a handle with no pipes attached.
    #[must_use]
    pub fn new(id: impl Into<String>, exit: ExitWatch) -> Self {
        Self {
            id: id.into(),
            pid: None,
            stdin: None,
            stdout: None,
            stderr: None,
            exit,
        }
    }

    /// Sets the OS process ID.
    #[must_use]
    pub const fn with_pid(mut self, pid: Option<u32>) -> Self {
        self.pid = pid;
        self
    }

    /// Attaches a stdin pipe.
    #[must_use]
    pub fn with_stdin(mut self, stdin: PipeWriter) -> Self {
        self.stdin = Some(stdin);
        self
    }

    /// Attaches a stdout pipe.
    #[must_use]
    pub fn with_stdout(mut self, stdout: PipeReader) -> Self {
        self.stdout = Some(stdout);
        self
    }

    /// Attaches a stderr pipe.
    #[must_use]
    pub fn with_stderr(mut self, stderr: PipeReader) -> Self {
        self.stderr = Some(stderr);
        self
    }

    /// Returns the process ID assigned by the backend.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the OS process ID, if known.
    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Takes the stdin pipe.
    pub fn take_stdin(&mut self) -> Option<PipeWriter> {
        self.stdin.take()
    }

    /// Takes the stdout pipe.
    pub fn take_stdout(&mut self) -> Option<PipeReader> {
        self.stdout.take()
    }

    /// Takes the stderr pipe.
    pub fn take_stderr(&mut self) -> Option<PipeReader> {
        self.stderr.take()
    }

    /// Returns a watcher for the process exit.
    #[must_use]
    pub fn exit_watch(&self) -> ExitWatch {
        self.exit.clone()
    }

    /// Waits for the process to exit.
    pub async fn wait(&self) -> i32 {
        self.exit.wait().await
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .field("exit", &self.exit.code())
            .finish()
    }
}
