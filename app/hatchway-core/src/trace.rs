//! Task-local trace ID for cross-layer propagation.
//!
//! The Docker API middleware sets the trace ID via [`CURRENT_TRACE_ID`];
//! stream tasks spawned for attach and exec copy it into their spans so
//! every log line of a long-lived stream carries the originating request's
//! trace ID.

tokio::task_local! {
    /// Task-local trace ID.  Set by the HTTP middleware.
    pub static CURRENT_TRACE_ID: String;
}

/// Returns the current trace ID from task-local storage, or an empty string
/// if none is set (e.g. when called outside an HTTP request context).
pub fn current_trace_id() -> String {
    CURRENT_TRACE_ID
        .try_with(|id| id.clone())
        .unwrap_or_default()
}
