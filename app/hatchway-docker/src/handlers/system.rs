use crate::types::VersionResponse;
use axum::response::IntoResponse;
use axum::Json;

/// Get version.
pub async fn get_version() -> Json<VersionResponse> {
    Json(VersionResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        api_version: crate::API_VERSION.to_string(),
        min_api_version: crate::MIN_API_VERSION.to_string(),
        git_commit: option_env!("GIT_COMMIT").unwrap_or("unknown").to_string(),
        go_version: "N/A (Rust)".to_string(),
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        kernel_version: None,
        build_time: None,
    })
}

/// Ping handler.
pub async fn ping() -> impl IntoResponse {
    (
        [
            ("Api-Version", crate::API_VERSION),
            ("Cache-Control", "no-cache, no-store, must-revalidate"),
        ],
        "OK",
    )
}
