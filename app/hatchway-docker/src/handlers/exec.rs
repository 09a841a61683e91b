use super::{parse_json_body, parse_size};
use crate::api::AppState;
use crate::error::{DockerError, Result};
use crate::registry::{ExecConfig, ExecSessionRegistry};
use crate::stream::{
    Envelope, ProcessBridge, StreamMode, StreamRequest, StreamResponder, StreamSource,
};
use crate::types::{
    ExecCreateRequest, ExecCreateResponse, ExecInspectResponse, ExecStartRequest, ProcessConfig,
};
use axum::body::{to_bytes, Bytes};
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use hatchway_core::{ContainerInfo, ProcessHandle, ProcessSpec};
use std::collections::HashMap;
use std::sync::Arc;

/// Largest accepted exec start body.
const START_BODY_LIMIT: usize = 1 << 20;

/// Create exec instance.
///
/// # Errors
///
/// Returns 404 for an unknown container, 400 for a missing command, 409 if
/// the container is not running.
pub async fn exec_create(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<ExecCreateResponse>)> {
    let body: ExecCreateRequest = parse_json_body(&body)?;
    let container = running_container(&state, &id).await?;

    let cmd = body.cmd.unwrap_or_default();
    if cmd.is_empty() {
        return Err(DockerError::InvalidParameter(
            "No exec command specified".to_string(),
        ));
    }
    if let Some(keys) = body.detach_keys.as_deref().filter(|keys| !keys.is_empty()) {
        crate::stream::mode::validate_detach_keys(keys)?;
    }

    let tty = body.tty.unwrap_or(false);
    let config = ExecConfig {
        cmd,
        attach_stdin: body.attach_stdin.unwrap_or(false),
        attach_stdout: body.attach_stdout.unwrap_or(true),
        attach_stderr: body.attach_stderr.unwrap_or(true) && !tty,
        tty,
        detach_keys: body.detach_keys.filter(|keys| !keys.is_empty()),
        privileged: body.privileged.unwrap_or(false),
        user: body.user.filter(|user| !user.is_empty()),
        env: body.env.unwrap_or_default(),
        working_dir: body.working_dir.filter(|dir| !dir.is_empty()),
    };

    let session = state.exec_sessions.create(container.id, config);
    tracing::debug!(exec_id = %session.id, container = %session.container_id, cmd = ?session.config.cmd, "exec created");

    Ok((
        StatusCode::CREATED,
        Json(ExecCreateResponse {
            id: session.id.clone(),
        }),
    ))
}

/// Start exec instance.
///
/// Detached starts return 200 once the process is launched. Attached
/// starts answer with a stream that ends when the process exits.
///
/// # Errors
///
/// Returns 404 for an unknown or already started session, 409 if the
/// container is not running, 500 if the process cannot be launched.
pub async fn exec_start(
    State(state): State<AppState>,
    Path(id): Path<String>,
    mut req: Request,
) -> Result<Response> {
    // Taken before the body is consumed: the upgrade handle lives in the
    // request extensions.
    let responder = StreamResponder::from_request(&mut req);
    let body = to_bytes(req.into_body(), START_BODY_LIMIT)
        .await
        .map_err(|e| DockerError::InvalidParameter(format!("failed to read request body: {e}")))?;
    let start: ExecStartRequest = parse_json_body(&body)?;

    let snapshot = state
        .exec_sessions
        .get(&id)
        .ok_or_else(|| DockerError::ExecNotFound(id.clone()))?;
    running_container(&state, &snapshot.session.container_id).await?;

    let session = state
        .exec_sessions
        .claim(&id)
        .ok_or_else(|| DockerError::ExecNotFound(id.clone()))?;
    let guard = SessionGuard {
        registry: Arc::clone(&state.exec_sessions),
        id: id.clone(),
    };

    let tty = start.tty.unwrap_or(session.config.tty);
    let request = StreamRequest::exec(&session, tty, start.detach);
    let handle = launch(&state, &request, &session.config).await?;

    let console_size = start
        .console_size
        .as_deref()
        .and_then(|size| <[u16; 2]>::try_from(size).ok());
    if let Some([height, width]) = console_size {
        if let Err(e) = state
            .runtime
            .resize(&session.container_id, Some(handle.id()), height, width)
            .await
        {
            tracing::warn!(exec_id = %id, "initial resize failed: {}", e);
        }
    }

    if request.detach {
        tracing::info!(exec_id = %id, pid = handle.pid(), "exec started detached");
        drop(guard);
        return Ok(StatusCode::OK.into_response());
    }

    state
        .exec_sessions
        .mark_running(&id, handle.id().to_string(), handle.pid(), handle.exit_watch());
    tracing::info!(exec_id = %id, pid = handle.pid(), tty, "exec started");

    let mode = StreamMode::resolve(&request, responder.envelope());
    if request.stdin && mode.envelope == Envelope::Chunked {
        tracing::warn!(exec_id = %id, "stdin attached without a connection upgrade, input is closed");
    }
    let source = StreamSource::DirectPipe {
        bridge: ProcessBridge::new(&state.stream, mode.framing),
        process: handle,
    };
    responder.respond(
        mode.framing,
        None,
        state.stream.frame_queue_depth,
        move |transport| async move {
            let outcome = source.run(transport).await;
            drop(guard);
            outcome
        },
    )
}

/// Resize exec instance. Best effort.
///
/// # Errors
///
/// Returns 404 for an unknown session, 400 for a malformed size, 409 if the
/// container is not running.
pub async fn exec_resize(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<StatusCode> {
    let snapshot = state
        .exec_sessions
        .get(&id)
        .ok_or_else(|| DockerError::ExecNotFound(id.clone()))?;
    let (height, width) = parse_size(&params)?;
    running_container(&state, &snapshot.session.container_id).await?;

    if let Err(e) = state
        .runtime
        .resize(
            &snapshot.session.container_id,
            snapshot.process_id(),
            height,
            width,
        )
        .await
    {
        tracing::warn!(exec_id = %id, "resize failed: {}", e);
    }
    Ok(StatusCode::OK)
}

/// Inspect exec instance.
///
/// # Errors
///
/// Returns 404 for an unknown session.
pub async fn exec_inspect(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExecInspectResponse>> {
    let snapshot = state
        .exec_sessions
        .get(&id)
        .ok_or_else(|| DockerError::ExecNotFound(id.clone()))?;
    let session = &snapshot.session;
    let config = &session.config;
    let (entrypoint, arguments) = config
        .cmd
        .split_first()
        .map(|(first, rest)| (first.clone(), rest.to_vec()))
        .unwrap_or_default();

    Ok(Json(ExecInspectResponse {
        id: session.id.clone(),
        running: snapshot.is_running(),
        exit_code: snapshot.exit_code(),
        process_config: ProcessConfig {
            privileged: config.privileged,
            user: config.user.clone().unwrap_or_default(),
            tty: config.tty,
            entrypoint,
            arguments,
        },
        open_stdin: config.attach_stdin,
        open_stdout: config.attach_stdout,
        open_stderr: config.attach_stderr,
        can_remove: true,
        container_id: session.container_id.clone(),
        detach_keys: config.detach_keys.clone().unwrap_or_default(),
        pid: snapshot.pid().unwrap_or(0),
    }))
}

/// Removes a claimed session when the start attempt is over, however it
/// ends: launch failure, detached launch, stream end, or an upgrade that
/// never completed.
struct SessionGuard {
    registry: Arc<ExecSessionRegistry>,
    id: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.registry.remove(&self.id) {
            tracing::debug!(exec_id = %self.id, "exec session removed");
        }
    }
}

async fn running_container(state: &AppState, id: &str) -> Result<ContainerInfo> {
    let container = state
        .runtime
        .get(id)
        .await
        .ok_or_else(|| DockerError::ContainerNotFound(id.to_string()))?;
    if !container.status.is_running() {
        return Err(DockerError::Conflict(format!("Container {id} is not running")));
    }
    Ok(container)
}

async fn launch(state: &AppState, request: &StreamRequest, config: &ExecConfig) -> Result<ProcessHandle> {
    let container = request.target.container();
    let spec = ProcessSpec::from_command(&config.cmd, request.tty, request.stdio())
        .map_err(|e| DockerError::InvalidParameter(e.to_string()))?
        .with_env(config.env.clone())
        .with_working_dir(config.working_dir.clone());
    let mut process = state.runtime.create_process(container, spec).await?;
    process
        .start()
        .await
        .map_err(|e| DockerError::Server(format!("failed to start exec process: {e}")))
}
