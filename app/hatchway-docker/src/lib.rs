//! # hatchway-docker
//!
//! Docker Engine API attach/exec gateway.
//!
//! This crate turns a single Docker API request into a live, framed,
//! bidirectional byte stream between a client and a container process's
//! standard streams.
//!
//! ## Compatibility
//!
//! Routing supports Docker Engine API compatibility paths `v1.24..v1.43`
//! (plus unversioned endpoints). Served endpoints:
//!
//! - `POST /containers/{id}/attach`, `POST /containers/{id}/resize`
//! - `POST /containers/{id}/exec`
//! - `POST /exec/{id}/start`, `POST /exec/{id}/resize`, `GET /exec/{id}/json`
//! - `GET|HEAD /_ping`, `GET /version`
//!
//! Every other endpoint answers `501 Not Implemented`.
//!
//! ## Architecture
//!
//! ```text
//! docker CLI ──► Unix Socket ──► hatchway-docker ──► ContainerProvider
//!                                     │
//!                        ┌────────────┴────────────┐
//!                        ▼                         ▼
//!                 200 chunked body          101 raw connection
//! ```
//!
//! ## Usage
//!
//! ```bash
//! docker -H unix://$HOME/.hatchway/docker.sock exec -it web sh
//! ```

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod error;
pub mod handlers;
pub mod registry;
pub mod server;
pub mod stream;
pub mod trace;
// Request types carry fields that are only deserialized.
#[allow(dead_code)]
pub mod types;

pub use api::{create_router, AppState};
pub use error::{DockerError, Result};
pub use registry::ExecSessionRegistry;
pub use server::{DockerApiServer, ServerConfig};

/// Docker Engine API version served.
pub const API_VERSION: &str = "1.43";

/// Oldest Docker Engine API version accepted.
pub const MIN_API_VERSION: &str = "1.24";
