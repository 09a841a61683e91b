//! Stream mode resolution.
//!
//! Every attach or exec start request is reduced once to a
//! [`StreamRequest`], and from that to a [`StreamMode`]: how output is
//! framed, how it is carried, and where it comes from.

use crate::error::{DockerError, Result};
use crate::registry::ExecSession;
use axum::http::header::{CONNECTION, UPGRADE};
use axum::http::HeaderMap;
use hatchway_core::{ContainerInfo, StdioConfig};
use std::collections::HashMap;

/// Content type of a raw (TTY) stream.
pub const RAW_STREAM: &str = "application/vnd.docker.raw-stream";

/// Content type of a multiplexed (non-TTY) stream.
pub const MULTIPLEXED_STREAM: &str = "application/vnd.docker.multiplexed-stream";

/// What a stream is attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTarget {
    /// A container's main process.
    Container(String),
    /// An exec session inside a container.
    Exec {
        /// Session ID.
        session: String,
        /// Container ID.
        container: String,
    },
}

impl StreamTarget {
    /// Container the stream belongs to.
    #[must_use]
    pub fn container(&self) -> &str {
        match self {
            Self::Container(id) | Self::Exec { container: id, .. } => id,
        }
    }
}

/// Stream parameters derived once per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    /// Target.
    pub target: StreamTarget,
    /// Forward client input to stdin.
    pub stdin: bool,
    /// Forward stdout.
    pub stdout: bool,
    /// Forward stderr.
    pub stderr: bool,
    /// Terminal mode.
    pub tty: bool,
    /// Replay output produced before the request.
    pub logs: bool,
    /// Follow live output.
    pub stream: bool,
    /// Launch without holding the connection.
    pub detach: bool,
    /// Detach key sequence.
    pub detach_keys: Option<String>,
}

impl StreamRequest {
    /// Builds an attach request from query parameters.
    ///
    /// # Errors
    ///
    /// Returns [`DockerError::InvalidParameter`] if a flag is malformed or
    /// neither `logs` nor `stream` is set.
    pub fn attach(container: &ContainerInfo, params: &HashMap<String, String>) -> Result<Self> {
        let flag = |name: &str| -> Result<bool> {
            params
                .get(name)
                .map_or(Ok(false), |value| parse_docker_bool(name, value))
        };

        let logs = flag("logs")?;
        let stream = flag("stream")?;
        if !logs && !stream {
            return Err(DockerError::InvalidParameter(
                "at least one of logs or stream must be set".to_string(),
            ));
        }

        let detach_keys = params.get("detachKeys").filter(|keys| !keys.is_empty()).cloned();
        if let Some(keys) = &detach_keys {
            validate_detach_keys(keys)?;
        }

        let stdin = flag("stdin")?;
        let given = |name: &str| -> Result<Option<bool>> {
            params
                .get(name)
                .map(|value| parse_docker_bool(name, value))
                .transpose()
        };
        let (stdout, stderr) = match (given("stdout")?, given("stderr")?) {
            // A fresh process: each missing flag takes its own default.
            (stdout, stderr) if stdin => {
                (stdout.unwrap_or(true), stderr.unwrap_or(!container.tty))
            }
            (Some(false) | None, Some(false) | None) => (true, true),
            (stdout, stderr) => (stdout.unwrap_or(false), stderr.unwrap_or(false)),
        };
        let stderr = stderr && !container.tty;

        Ok(Self {
            target: StreamTarget::Container(container.id.clone()),
            stdin,
            stdout,
            stderr,
            tty: container.tty,
            logs,
            stream,
            detach: false,
            detach_keys,
        })
    }

    /// Builds the stream request for starting an exec session.
    #[must_use]
    pub fn exec(session: &ExecSession, tty: bool, detach: bool) -> Self {
        let config = &session.config;
        Self {
            target: StreamTarget::Exec {
                session: session.id.clone(),
                container: session.container_id.clone(),
            },
            stdin: config.attach_stdin,
            stdout: config.attach_stdout,
            stderr: config.attach_stderr && !tty,
            tty,
            logs: false,
            stream: true,
            detach,
            detach_keys: config.detach_keys.clone(),
        }
    }

    /// Pipes to request from the runtime.
    #[must_use]
    pub const fn stdio(&self) -> StdioConfig {
        if self.detach {
            return StdioConfig::none();
        }
        StdioConfig {
            stdin: self.stdin,
            stdout: self.stdout,
            stderr: self.stderr,
        }
    }
}

/// Parses a Docker query boolean.
///
/// # Errors
///
/// Returns [`DockerError::InvalidParameter`] for anything but the accepted
/// spellings.
pub fn parse_docker_bool(name: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "" | "0" | "false" | "no" => Ok(false),
        _ => Err(DockerError::InvalidParameter(format!(
            "invalid boolean value for {name}: {value}"
        ))),
    }
}

/// Checks a detach key sequence such as `ctrl-p,ctrl-q`.
///
/// # Errors
///
/// Returns [`DockerError::InvalidParameter`] if any key is malformed.
pub fn validate_detach_keys(keys: &str) -> Result<()> {
    for key in keys.split(',') {
        let valid = match key.strip_prefix("ctrl-") {
            Some(rest) => {
                rest.len() == 1
                    && rest
                        .chars()
                        .all(|c| c.is_ascii_lowercase() || "@[\\]^_".contains(c))
            }
            None => key.chars().count() == 1,
        };
        if !valid {
            return Err(DockerError::InvalidParameter(format!(
                "invalid detach keys: {keys}"
            )));
        }
    }
    Ok(())
}

/// How output bytes are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// TTY: bytes are forwarded unchanged.
    Raw,
    /// No TTY: each chunk carries a stream header.
    Multiplexed,
}

impl Framing {
    /// Framing for a terminal mode.
    #[must_use]
    pub const fn for_tty(tty: bool) -> Self {
        if tty {
            Self::Raw
        } else {
            Self::Multiplexed
        }
    }

    /// Returns true for raw passthrough.
    #[must_use]
    pub const fn is_raw(self) -> bool {
        matches!(self, Self::Raw)
    }

    /// Content type announced on a plain HTTP response.
    #[must_use]
    pub const fn content_type(self) -> &'static str {
        match self {
            Self::Raw => RAW_STREAM,
            Self::Multiplexed => MULTIPLEXED_STREAM,
        }
    }
}

/// How the stream is carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Envelope {
    /// `101 Switching Protocols`, then raw bytes.
    Upgrade,
    /// `200 OK` with a chunked body.
    Chunked,
}

impl Envelope {
    /// Decides the envelope from request headers.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        if wants_upgrade(headers) {
            Self::Upgrade
        } else {
            Self::Chunked
        }
    }
}

/// Returns true if the request carries `Connection: Upgrade` and
/// `Upgrade: tcp`.
#[must_use]
pub fn wants_upgrade(headers: &HeaderMap) -> bool {
    let connection_upgrade = headers.get_all(CONNECTION).iter().any(|value| {
        value.to_str().is_ok_and(|value| {
            value
                .split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
        })
    });
    let upgrade_tcp = headers
        .get(UPGRADE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim().eq_ignore_ascii_case("tcp"));
    connection_upgrade && upgrade_tcp
}

/// Where output comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataPath {
    /// Poll the container's persisted logs.
    LogTail {
        /// Start from the beginning of the logs instead of the end.
        replay: bool,
        /// Keep polling for new output until the container stops.
        follow: bool,
    },
    /// Own fresh process pipes.
    DirectPipe,
}

/// Fully resolved stream mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamMode {
    /// Output framing.
    pub framing: Framing,
    /// Transport envelope.
    pub envelope: Envelope,
    /// Output source.
    pub data_path: DataPath,
}

impl StreamMode {
    /// Resolves a request. The envelope is decided by the caller from the
    /// request headers before anything is written.
    #[must_use]
    pub fn resolve(request: &StreamRequest, envelope: Envelope) -> Self {
        let data_path = match request.target {
            StreamTarget::Container(_) if !request.stdin => DataPath::LogTail {
                replay: request.logs,
                follow: request.stream,
            },
            _ => DataPath::DirectPipe,
        };
        Self {
            framing: Framing::for_tty(request.tty),
            envelope,
            data_path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ExecConfig;
    use axum::http::HeaderValue;
    use hatchway_core::ContainerStatus;

    fn container(tty: bool) -> ContainerInfo {
        ContainerInfo {
            id: "c1".to_string(),
            status: ContainerStatus::Running,
            tty,
        }
    }

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_attach_requires_logs_or_stream() {
        let err = StreamRequest::attach(&container(false), &params(&[("stdout", "1")])).unwrap_err();
        assert!(matches!(err, DockerError::InvalidParameter(_)));

        let err = StreamRequest::attach(&container(false), &params(&[("logs", "0"), ("stream", "false")]))
            .unwrap_err();
        assert!(matches!(err, DockerError::InvalidParameter(_)));
    }

    #[test]
    fn test_attach_defaults_output_streams() {
        let request = StreamRequest::attach(&container(false), &params(&[("stream", "1")])).unwrap();
        assert!(request.stdout);
        assert!(request.stderr);
        assert!(!request.stdin);
        assert_eq!(request.target, StreamTarget::Container("c1".to_string()));
    }

    #[test]
    fn test_attach_keeps_explicit_selection() {
        let request =
            StreamRequest::attach(&container(false), &params(&[("stream", "1"), ("stderr", "true")]))
                .unwrap();
        assert!(!request.stdout);
        assert!(request.stderr);
    }

    #[test]
    fn test_attach_with_stdin_defaults_each_stream() {
        let stdin_only = StreamRequest::attach(&container(false), &params(&[("stream", "1"), ("stdin", "1")]))
            .unwrap();
        assert!(stdin_only.stdout);
        assert!(stdin_only.stderr);

        let with_stderr = StreamRequest::attach(
            &container(false),
            &params(&[("stream", "1"), ("stdin", "1"), ("stderr", "1")]),
        )
        .unwrap();
        assert!(with_stderr.stdout);
        assert!(with_stderr.stderr);

        let with_stdout = StreamRequest::attach(
            &container(false),
            &params(&[("stream", "1"), ("stdin", "1"), ("stdout", "1")]),
        )
        .unwrap();
        assert!(with_stdout.stdout);
        assert!(with_stdout.stderr);

        let explicit_off = StreamRequest::attach(
            &container(false),
            &params(&[("stream", "1"), ("stdin", "1"), ("stdout", "0")]),
        )
        .unwrap();
        assert!(!explicit_off.stdout);
        assert!(explicit_off.stderr);

        let tty = StreamRequest::attach(&container(true), &params(&[("stream", "1"), ("stdin", "1")]))
            .unwrap();
        assert!(tty.stdout);
        assert!(!tty.stderr);
    }

    #[test]
    fn test_tty_drops_stderr() {
        let request = StreamRequest::attach(
            &container(true),
            &params(&[("stream", "1"), ("stdout", "1"), ("stderr", "1")]),
        )
        .unwrap();
        assert!(request.tty);
        assert!(request.stdout);
        assert!(!request.stderr);
    }

    #[test]
    fn test_attach_rejects_bad_bool() {
        let err = StreamRequest::attach(&container(false), &params(&[("stream", "maybe")])).unwrap_err();
        assert!(matches!(err, DockerError::InvalidParameter(_)));
    }

    #[test]
    fn test_parse_docker_bool() {
        for value in ["1", "true", "TRUE", "yes"] {
            assert!(parse_docker_bool("x", value).unwrap());
        }
        for value in ["", "0", "false", "No"] {
            assert!(!parse_docker_bool("x", value).unwrap());
        }
        assert!(parse_docker_bool("x", "2").is_err());
    }

    #[test]
    fn test_detach_keys() {
        assert!(validate_detach_keys("ctrl-p,ctrl-q").is_ok());
        assert!(validate_detach_keys("a,ctrl-@").is_ok());
        assert!(validate_detach_keys("ctrl-").is_err());
        assert!(validate_detach_keys("ctrl-pq").is_err());
        assert!(validate_detach_keys("ab").is_err());

        let err = StreamRequest::attach(
            &container(false),
            &params(&[("stream", "1"), ("detachKeys", "bogus")]),
        )
        .unwrap_err();
        assert!(matches!(err, DockerError::InvalidParameter(_)));
    }

    #[test]
    fn test_exec_request() {
        let session = ExecSession {
            id: "e1".to_string(),
            container_id: "c1".to_string(),
            config: ExecConfig {
                cmd: vec!["sh".to_string()],
                attach_stdin: true,
                attach_stdout: true,
                attach_stderr: true,
                ..ExecConfig::default()
            },
        };

        let request = StreamRequest::exec(&session, true, false);
        assert!(request.stdin);
        assert!(!request.stderr);
        assert_eq!(request.target.container(), "c1");

        let detached = StreamRequest::exec(&session, false, true);
        assert_eq!(detached.stdio(), StdioConfig::none());
    }

    #[test]
    fn test_wants_upgrade() {
        let mut headers = HeaderMap::new();
        assert!(!wants_upgrade(&headers));

        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive, Upgrade"));
        assert!(!wants_upgrade(&headers));

        headers.insert(UPGRADE, HeaderValue::from_static("tcp"));
        assert!(wants_upgrade(&headers));
        assert_eq!(Envelope::from_headers(&headers), Envelope::Upgrade);

        headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
        assert!(!wants_upgrade(&headers));
        assert_eq!(Envelope::from_headers(&headers), Envelope::Chunked);
    }

    #[test]
    fn test_resolve_data_path() {
        let live = StreamRequest::attach(&container(false), &params(&[("stream", "1")])).unwrap();
        let mode = StreamMode::resolve(&live, Envelope::Chunked);
        assert_eq!(mode.framing, Framing::Multiplexed);
        assert_eq!(
            mode.data_path,
            DataPath::LogTail {
                replay: false,
                follow: true
            }
        );

        let interactive =
            StreamRequest::attach(&container(true), &params(&[("stream", "1"), ("stdin", "1")]))
                .unwrap();
        let mode = StreamMode::resolve(&interactive, Envelope::Upgrade);
        assert_eq!(mode.framing, Framing::Raw);
        assert_eq!(mode.data_path, DataPath::DirectPipe);
        assert_eq!(mode.framing.content_type(), RAW_STREAM);
    }
}
