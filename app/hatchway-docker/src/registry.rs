//! Exec session registry.
//!
//! `exec create` stores a session here, `exec start` claims it once. The
//! registry is injected through application state rather than being a
//! global, so every test gets its own table.

use hatchway_core::ExitWatch;
use parking_lot::RwLock;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

/// What an exec session will run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecConfig {
    /// Command vector. Never empty.
    pub cmd: Vec<String>,
    /// Attach stdin.
    pub attach_stdin: bool,
    /// Attach stdout.
    pub attach_stdout: bool,
    /// Attach stderr. Always false with a TTY.
    pub attach_stderr: bool,
    /// Terminal mode.
    pub tty: bool,
    /// Detach key sequence, recorded but not acted on.
    pub detach_keys: Option<String>,
    /// Privileged mode, reported by inspect.
    pub privileged: bool,
    /// User, reported by inspect.
    pub user: Option<String>,
    /// Extra environment as `KEY=VALUE`.
    pub env: Vec<String>,
    /// Working directory for the process.
    pub working_dir: Option<String>,
}

/// A created exec session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecSession {
    /// Session ID.
    pub id: String,
    /// Container the command runs in.
    pub container_id: String,
    /// Exec configuration.
    pub config: ExecConfig,
}

/// Lifecycle of a session inside the registry.
#[derive(Debug, Clone)]
pub enum SessionState {
    /// Created, waiting for `exec start`.
    Pending,
    /// Claimed by `exec start`, process not launched yet.
    Starting,
    /// Process launched.
    Running {
        /// Backend process ID.
        process_id: String,
        /// OS process ID.
        pid: Option<u32>,
        /// Exit notification.
        exit: ExitWatch,
    },
}

/// Point-in-time view of a session.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    /// The session.
    pub session: Arc<ExecSession>,
    /// Its state at the time of the read.
    pub state: SessionState,
}

impl SessionSnapshot {
    /// Returns true while the launched process has not exited.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(&self.state, SessionState::Running { exit, .. } if !exit.has_exited())
    }

    /// Exit code, once the launched process has exited.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match &self.state {
            SessionState::Running { exit, .. } => exit.code(),
            _ => None,
        }
    }

    /// OS process ID, once launched.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        match &self.state {
            SessionState::Running { pid, .. } => *pid,
            _ => None,
        }
    }

    /// Backend process ID, once launched.
    #[must_use]
    pub fn process_id(&self) -> Option<&str> {
        match &self.state {
            SessionState::Running { process_id, .. } => Some(process_id),
            _ => None,
        }
    }
}

struct SessionEntry {
    session: Arc<ExecSession>,
    state: SessionState,
}

/// Process-wide table of exec sessions.
#[derive(Default)]
pub struct ExecSessionRegistry {
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl ExecSessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a new pending session under a fresh ID.
    pub fn create(&self, container_id: impl Into<String>, config: ExecConfig) -> Arc<ExecSession> {
        let container_id = container_id.into();
        let mut sessions = self.sessions.write();
        loop {
            let id = new_session_id();
            if let Entry::Vacant(slot) = sessions.entry(id.clone()) {
                let session = Arc::new(ExecSession {
                    id,
                    container_id,
                    config,
                });
                slot.insert(SessionEntry {
                    session: Arc::clone(&session),
                    state: SessionState::Pending,
                });
                return session;
            }
        }
    }

    /// Reads a session without consuming it.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<SessionSnapshot> {
        self.sessions.read().get(id).map(|entry| SessionSnapshot {
            session: Arc::clone(&entry.session),
            state: entry.state.clone(),
        })
    }

    /// Takes a pending session for starting.
    ///
    /// Succeeds at most once per session. Returns `None` if the session is
    /// unknown or was already claimed.
    #[must_use]
    pub fn claim(&self, id: &str) -> Option<Arc<ExecSession>> {
        let mut sessions = self.sessions.write();
        let entry = sessions.get_mut(id)?;
        match entry.state {
            SessionState::Pending => {
                entry.state = SessionState::Starting;
                Some(Arc::clone(&entry.session))
            }
            SessionState::Starting | SessionState::Running { .. } => None,
        }
    }

    /// Records the launched process of a claimed session.
    pub fn mark_running(&self, id: &str, process_id: String, pid: Option<u32>, exit: ExitWatch) {
        if let Some(entry) = self.sessions.write().get_mut(id) {
            entry.state = SessionState::Running {
                process_id,
                pid,
                exit,
            };
        }
    }

    /// Removes a session. Returns true if it existed.
    pub fn remove(&self, id: &str) -> bool {
        self.sessions.write().remove(id).is_some()
    }

    /// Number of stored sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Returns true if no sessions are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

/// 64 hex characters, the shape of Docker exec IDs.
fn new_session_id() -> String {
    format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    )
}
