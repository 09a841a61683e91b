//! Connection upgrade manager.
//!
//! Decides, before any byte is written, whether a stream answers with
//! `101 Switching Protocols` and then owns the raw connection, or with a
//! `200` chunked body. The choice is never revisited.
//!
//! ```text
//! Idle ──► AwaitingUpgrade ──► Upgraded ──► Closed
//!   │                                         ▲
//!   └──────────── (chunked) ──────────────────┘
//! ```

use super::bridge::StreamOutcome;
use super::mode::{Envelope, Framing};
use super::transport::DuplexTransport;
use crate::error::{DockerError, Result};
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use hatchway_core::trace::current_trace_id;
use hyper::upgrade::OnUpgrade;
use std::future::Future;
use tracing::Instrument;

/// Connection states of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Request received, nothing written.
    Idle,
    /// `101` sent, waiting for the HTTP layer to release the connection.
    AwaitingUpgrade,
    /// Raw duplex established.
    Upgraded,
    /// Stream finished.
    Closed,
}

impl ConnectionPhase {
    /// Returns true if `next` is a legal successor.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::AwaitingUpgrade | Self::Closed)
                | (Self::AwaitingUpgrade, Self::Upgraded | Self::Closed)
                | (Self::Upgraded, Self::Closed)
        )
    }
}

struct PhaseTracker {
    phase: ConnectionPhase,
}

impl PhaseTracker {
    const fn new() -> Self {
        Self {
            phase: ConnectionPhase::Idle,
        }
    }

    fn advance(&mut self, next: ConnectionPhase) {
        if !self.phase.can_advance_to(next) {
            tracing::warn!(from = ?self.phase, to = ?next, "unexpected connection phase change");
        }
        tracing::trace!(from = ?self.phase, to = ?next, "connection phase");
        self.phase = next;
    }
}

enum Pending {
    Chunked,
    Upgrade(OnUpgrade),
}

/// Answers a streaming request in the envelope its headers asked for.
pub struct StreamResponder {
    pending: Pending,
    span: tracing::Span,
}

impl StreamResponder {
    /// Inspects the request headers and, for an upgrade, takes the
    /// connection's upgrade handle.
    pub fn from_request<B>(req: &mut Request<B>) -> Self {
        let envelope = Envelope::from_headers(req.headers());
        let pending = match envelope {
            Envelope::Upgrade => Pending::Upgrade(hyper::upgrade::on(&mut *req)),
            Envelope::Chunked => Pending::Chunked,
        };
        let span = tracing::info_span!(
            "stream",
            trace_id = %current_trace_id(),
            path = %req.uri().path(),
            envelope = ?envelope,
        );
        Self { pending, span }
    }

    /// The envelope this request will be answered in.
    #[must_use]
    pub const fn envelope(&self) -> Envelope {
        match self.pending {
            Pending::Chunked => Envelope::Chunked,
            Pending::Upgrade(_) => Envelope::Upgrade,
        }
    }

    /// Builds the response and spawns `drive` to run the stream over the
    /// resulting transport.
    ///
    /// `request_body` is the inbound side for chunked responses. With an
    /// upgrade the raw connection is both sides and the body is ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the response cannot be built. Nothing has been
    /// spawned in that case.
    pub fn respond<F, Fut>(
        self,
        framing: Framing,
        request_body: Option<Body>,
        queue_depth: usize,
        drive: F,
    ) -> Result<Response>
    where
        F: FnOnce(DuplexTransport) -> Fut + Send + 'static,
        Fut: Future<Output = StreamOutcome> + Send + 'static,
    {
        let Self { pending, span } = self;
        match pending {
            Pending::Chunked => {
                let (transport, body) = DuplexTransport::chunked(request_body, queue_depth);
                let response = Response::builder()
                    .status(StatusCode::OK)
                    .header(header::CONTENT_TYPE, framing.content_type())
                    .body(body)
                    .map_err(|e| DockerError::Server(format!("failed to build response: {e}")))?;

                tokio::spawn(
                    async move {
                        let mut phase = PhaseTracker::new();
                        let outcome = drive(transport).await;
                        phase.advance(ConnectionPhase::Closed);
                        log_outcome(&outcome);
                    }
                    .instrument(span),
                );
                Ok(response)
            }
            Pending::Upgrade(on_upgrade) => {
                let response = Response::builder()
                    .status(StatusCode::SWITCHING_PROTOCOLS)
                    .header(header::CONNECTION, "Upgrade")
                    .header(header::UPGRADE, "tcp")
                    .body(Body::empty())
                    .map_err(|e| {
                        DockerError::Server(format!("failed to build upgrade response: {e}"))
                    })?;

                tokio::spawn(
                    async move {
                        let mut phase = PhaseTracker::new();
                        phase.advance(ConnectionPhase::AwaitingUpgrade);
                        let upgraded = match on_upgrade.await {
                            Ok(upgraded) => upgraded,
                            Err(e) => {
                                tracing::debug!("connection upgrade failed: {}", e);
                                phase.advance(ConnectionPhase::Closed);
                                return;
                            }
                        };
                        phase.advance(ConnectionPhase::Upgraded);
                        let outcome = drive(DuplexTransport::upgraded(upgraded)).await;
                        phase.advance(ConnectionPhase::Closed);
                        log_outcome(&outcome);
                    }
                    .instrument(span),
                );
                Ok(response)
            }
        }
    }
}

fn log_outcome(outcome: &StreamOutcome) {
    tracing::info!(
        reason = outcome.reason.as_str(),
        exit_code = outcome.exit_code,
        frames = outcome.frames,
        "stream finished"
    );
}
