//! Request handlers for Docker API endpoints.
//!
//! Attach and exec start answer with a stream; the remaining handlers are
//! plain JSON request/response.

use crate::error::{DockerError, Result};
use axum::body::Bytes;
use axum::http::{Method, Uri};
use serde::de::DeserializeOwned;
use std::collections::HashMap;

mod container;
mod exec;
mod system;

pub use container::{attach_container, resize_container};
pub use exec::{exec_create, exec_inspect, exec_resize, exec_start};
pub use system::{get_version, ping};

/// Default terminal height when `h` is omitted.
const DEFAULT_HEIGHT: u16 = 24;
/// Default terminal width when `w` is omitted.
const DEFAULT_WIDTH: u16 = 80;

/// Answers every route this server does not serve.
pub async fn not_implemented(method: Method, uri: Uri) -> DockerError {
    DockerError::NotImplemented(format!("{method} {}", uri.path()))
}

/// Parses a JSON request body. An empty body yields the default value.
pub(crate) fn parse_json_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| DockerError::InvalidParameter(format!("invalid request body: {e}")))
}

/// Reads `h` and `w` from resize query parameters.
pub(crate) fn parse_size(params: &HashMap<String, String>) -> Result<(u16, u16)> {
    let dimension = |name: &str, default: u16| -> Result<u16> {
        params.get(name).map_or(Ok(default), |value| {
            value.parse().map_err(|_| {
                DockerError::InvalidParameter(format!("invalid {name} value: {value}"))
            })
        })
    };
    Ok((
        dimension("h", DEFAULT_HEIGHT)?,
        dimension("w", DEFAULT_WIDTH)?,
    ))
}
