//! Docker API request and response types.

use serde::{Deserialize, Serialize};

// ============================================================================
// Exec Types
// ============================================================================

/// Exec create request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecCreateRequest {
    /// Attach stdin.
    pub attach_stdin: Option<bool>,
    /// Attach stdout.
    pub attach_stdout: Option<bool>,
    /// Attach stderr.
    pub attach_stderr: Option<bool>,
    /// Detach keys.
    pub detach_keys: Option<String>,
    /// Allocate a TTY.
    pub tty: Option<bool>,
    /// Environment variables.
    pub env: Option<Vec<String>>,
    /// Command to run.
    pub cmd: Option<Vec<String>>,
    /// Privileged mode.
    pub privileged: Option<bool>,
    /// User.
    pub user: Option<String>,
    /// Working directory.
    pub working_dir: Option<String>,
}

/// Exec create response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecCreateResponse {
    /// Exec ID.
    pub id: String,
}

/// Exec start request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecStartRequest {
    /// Detach from exec.
    #[serde(default)]
    pub detach: bool,
    /// Allocate a TTY. Falls back to the value given at create time.
    pub tty: Option<bool>,
    /// Initial console size as `[height, width]`.
    pub console_size: Option<Vec<u16>>,
}

/// Exec inspect response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecInspectResponse {
    /// Exec ID.
    #[serde(rename = "ID")]
    pub id: String,
    /// Whether the process is running.
    pub running: bool,
    /// Exit code, once the process has exited.
    pub exit_code: Option<i32>,
    /// Process configuration.
    pub process_config: ProcessConfig,
    /// Stdin attached.
    pub open_stdin: bool,
    /// Stdout attached.
    pub open_stdout: bool,
    /// Stderr attached.
    pub open_stderr: bool,
    /// Whether the exec can be removed.
    pub can_remove: bool,
    /// Container ID.
    #[serde(rename = "ContainerID")]
    pub container_id: String,
    /// Detach keys.
    pub detach_keys: String,
    /// Process ID.
    pub pid: u32,
}

/// Process configuration.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessConfig {
    /// Privileged mode.
    pub privileged: bool,
    /// User.
    pub user: String,
    /// TTY enabled.
    pub tty: bool,
    /// Entrypoint.
    pub entrypoint: String,
    /// Arguments.
    pub arguments: Vec<String>,
}

// ============================================================================
// System Types
// ============================================================================

/// Version response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct VersionResponse {
    /// Version.
    pub version: String,
    /// API version.
    pub api_version: String,
    /// Minimum API version.
    #[serde(rename = "MinAPIVersion")]
    pub min_api_version: String,
    /// Git commit.
    pub git_commit: String,
    /// Go version (for compatibility).
    pub go_version: String,
    /// OS.
    pub os: String,
    /// Architecture.
    pub arch: String,
    /// Kernel version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel_version: Option<String>,
    /// Build time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_time: Option<String>,
}
