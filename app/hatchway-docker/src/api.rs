//! Docker API router.
//!
//! Serves the attach/exec subset of Docker Engine API v1.43 plus the
//! handshake endpoints clients probe first. Everything else answers 501.
//! See: https://docs.docker.com/engine/api/v1.43/

use crate::handlers;
use crate::registry::ExecSessionRegistry;
use crate::trace::trace_id_middleware;
use axum::{
    middleware,
    routing::{get, head, post},
    Router,
};
use hatchway_core::{ContainerProvider, StreamConfig};
use std::sync::Arc;

/// Application state shared with handlers.
#[derive(Clone)]
pub struct AppState {
    /// Container runtime.
    pub runtime: Arc<dyn ContainerProvider>,
    /// Pending and running exec sessions.
    pub exec_sessions: Arc<ExecSessionRegistry>,
    /// Stream pump tunables.
    pub stream: Arc<StreamConfig>,
}

impl AppState {
    /// Creates state with an empty exec session registry.
    #[must_use]
    pub fn new(runtime: Arc<dyn ContainerProvider>, stream: StreamConfig) -> Self {
        Self {
            runtime,
            exec_sessions: Arc::new(ExecSessionRegistry::new()),
            stream: Arc::new(stream),
        }
    }
}

/// Creates the Docker API router with all endpoints.
#[must_use]
pub fn create_router(state: AppState) -> Router {
    let mut router = api_routes();
    for minor in 24..=43 {
        router = router.nest(&format!("/v1.{minor}"), api_routes());
    }

    router
        .fallback(handlers::not_implemented)
        .layer(middleware::from_fn(trace_id_middleware))
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/version", get(handlers::get_version))
        .route("/_ping", get(handlers::ping))
        .route("/_ping", head(handlers::ping))
        .route("/containers/:id/attach", post(handlers::attach_container))
        .route("/containers/:id/resize", post(handlers::resize_container))
        .route("/containers/:id/exec", post(handlers::exec_create))
        .route("/exec/:id/start", post(handlers::exec_start))
        .route("/exec/:id/resize", post(handlers::exec_resize))
        .route("/exec/:id/json", get(handlers::exec_inspect))
}
