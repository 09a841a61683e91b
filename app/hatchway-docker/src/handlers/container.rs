use super::parse_size;
use crate::api::AppState;
use crate::error::{DockerError, Result};
use crate::stream::{
    DataPath, Envelope, LogTail, ProcessBridge, StreamMode, StreamRequest, StreamResponder,
    StreamSource,
};
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::response::Response;
use std::collections::HashMap;
use std::sync::Arc;

/// Attach to a container.
///
/// Without stdin the stream tails the container's logs. With stdin the
/// container must be stopped: its main process is created fresh with pipes
/// owned by this stream.
///
/// # Errors
///
/// Returns 404 for an unknown container, 400 for bad parameters, 409 if
/// stdin is requested on a running container, 500 if the process cannot be
/// started.
pub async fn attach_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    mut req: Request,
) -> Result<Response> {
    let container = state
        .runtime
        .get(&id)
        .await
        .ok_or_else(|| DockerError::ContainerNotFound(id.clone()))?;
    let request = StreamRequest::attach(&container, &params)?;

    let responder = StreamResponder::from_request(&mut req);
    let mode = StreamMode::resolve(&request, responder.envelope());

    let source = match mode.data_path {
        DataPath::LogTail { replay, follow } => {
            tracing::debug!(container = %id, replay, follow, "attach via log tail");
            StreamSource::LogTail(LogTail::new(
                Arc::clone(&state.runtime),
                &id,
                request.stdout,
                request.stderr,
                replay,
                follow,
                mode.framing,
                &state.stream,
            ))
        }
        DataPath::DirectPipe => {
            if container.status.is_running() {
                return Err(DockerError::Conflict(format!(
                    "container {id} is running; attaching stdin requires a stopped container"
                )));
            }
            let mut process = state.runtime.bootstrap(&id, request.stdio()).await?;
            let handle = process.start().await.map_err(|e| {
                DockerError::Server(format!("failed to start container {id}: {e}"))
            })?;
            tracing::info!(container = %id, process = handle.id(), pid = handle.pid(), "attached to new main process");
            StreamSource::DirectPipe {
                bridge: ProcessBridge::new(&state.stream, mode.framing),
                process: handle,
            }
        }
    };

    // With an upgrade the raw connection carries stdin instead.
    let inbound = (request.stdin && mode.envelope == Envelope::Chunked).then(|| req.into_body());
    responder.respond(
        mode.framing,
        inbound,
        state.stream.frame_queue_depth,
        move |transport| source.run(transport),
    )
}

/// Resize a container's terminal. Best effort.
///
/// # Errors
///
/// Returns 404 for an unknown container, 400 for a malformed size.
pub async fn resize_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<StatusCode> {
    if state.runtime.get(&id).await.is_none() {
        return Err(DockerError::ContainerNotFound(id));
    }
    let (height, width) = parse_size(&params)?;
    if let Err(e) = state.runtime.resize(&id, None, height, width).await {
        tracing::warn!(container = %id, "resize failed: {}", e);
    }
    Ok(StatusCode::OK)
}
