//! Log-tail stream source.
//!
//! Attach without stdin does not touch the process's pipes. It polls the
//! container's persisted logs instead, and uses the container status to
//! decide when the stream is over.

use super::bridge::{Backoff, FinishReason, StreamOutcome};
use super::frame::{self, StreamType};
use super::mode::Framing;
use super::transport::{discard_inbound, DuplexTransport, FrameSink};
use bytes::Bytes;
use hatchway_core::{ContainerProvider, LogSource, StreamConfig};
use std::io::{self, SeekFrom};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Polls a container's logs and forwards them as frames.
pub struct LogTail {
    runtime: Arc<dyn ContainerProvider>,
    container: String,
    stdout: bool,
    stderr: bool,
    replay: bool,
    follow: bool,
    framing: Framing,
    config: StreamConfig,
}

impl LogTail {
    /// Creates a log tail for a container.
    #[must_use]
    #[allow(clippy::too_many_arguments, clippy::fn_params_excessive_bools)]
    pub fn new(
        runtime: Arc<dyn ContainerProvider>,
        container: impl Into<String>,
        stdout: bool,
        stderr: bool,
        replay: bool,
        follow: bool,
        framing: Framing,
        config: &StreamConfig,
    ) -> Self {
        Self {
            runtime,
            container: container.into(),
            stdout,
            stderr,
            replay,
            follow,
            framing,
            config: config.clone(),
        }
    }

    /// Runs until the container stops, disappears, the client leaves, or
    /// (without follow) the logs run dry.
    pub async fn run(self, transport: DuplexTransport) -> StreamOutcome {
        let DuplexTransport { mut sink, inbound } = transport;
        // Nothing is read from the client, but a failed read means it left.
        let client_gone = CancellationToken::new();
        let mut watcher = JoinSet::new();
        if let Some(inbound) = inbound {
            let client_gone = client_gone.clone();
            watcher.spawn(async move {
                if let Err(e) = discard_inbound(inbound).await {
                    tracing::debug!("client read failed: {}", e);
                    client_gone.cancel();
                }
            });
        }
        let probe = (!self.framing.is_raw() && sink.needs_probe())
            .then(|| self.config.keepalive_frame());

        let mut outcome = StreamOutcome {
            exit_code: None,
            reason: FinishReason::SetupFailed,
            frames: 0,
        };

        let mut sources = match self.open_sources().await {
            Ok(sources) => sources,
            Err(e) => {
                tracing::warn!(container = %self.container, "failed to open logs: {}", e);
                close(sink).await;
                return outcome;
            }
        };

        let mut buf = vec![0u8; self.config.read_chunk_size.max(1)];
        let mut backoff = Backoff::new(&self.config);
        let mut seen_running = false;
        let mut last_status: Option<Instant> = None;
        let mut last_write = Instant::now();

        loop {
            let sent = match self.pass(&mut sources, &mut sink, &mut buf).await {
                Ok(sent) => sent,
                Err(e) => {
                    tracing::debug!(container = %self.container, "log tail write failed: {}", e);
                    outcome.reason = FinishReason::TransportClosed;
                    return outcome;
                }
            };
            outcome.frames += sent;

            if !self.follow {
                if sent == 0 {
                    outcome.reason = FinishReason::LogsExhausted;
                    break;
                }
                continue;
            }

            if last_status.map_or(true, |at| at.elapsed() >= self.config.log_poll()) {
                last_status = Some(Instant::now());
                match self.runtime.get(&self.container).await {
                    None => {
                        outcome.reason = FinishReason::ContainerRemoved;
                        break;
                    }
                    Some(info) if info.status.is_running() => seen_running = true,
                    Some(_) if seen_running => {
                        match self.drain(&mut sources, &mut sink, &mut buf).await {
                            Ok(sent) => outcome.frames += sent,
                            Err(_) => {
                                outcome.reason = FinishReason::TransportClosed;
                                return outcome;
                            }
                        }
                        outcome.reason = FinishReason::ProcessExited;
                        break;
                    }
                    // Not started yet: keep waiting.
                    Some(_) => {}
                }
            }

            if sent > 0 {
                backoff.reset();
                last_write = Instant::now();
                continue;
            }
            if probe.is_some_and(|period| last_write.elapsed() >= period) {
                if let Err(e) = sink.send(frame::keepalive()).await {
                    tracing::debug!(container = %self.container, "keepalive write failed: {}", e);
                    outcome.reason = FinishReason::TransportClosed;
                    return outcome;
                }
                last_write = Instant::now();
            }
            let delay = backoff.next_delay();
            tokio::select! {
                biased;
                () = sink.closed() => {
                    outcome.reason = FinishReason::TransportClosed;
                    return outcome;
                }
                () = client_gone.cancelled() => {
                    outcome.reason = FinishReason::TransportClosed;
                    return outcome;
                }
                () = tokio::time::sleep(delay) => {}
            }
        }

        close(sink).await;
        outcome
    }

    async fn open_sources(&self) -> io::Result<Vec<(StreamType, Box<dyn LogSource>)>> {
        let logs = self
            .runtime
            .logs(&self.container)
            .await
            .map_err(io::Error::other)?;

        let mut sources = Vec::with_capacity(2);
        if self.stdout {
            if let Some(log) = logs.stdout {
                sources.push((StreamType::Stdout, log));
            }
        }
        if self.stderr {
            if let Some(log) = logs.stderr {
                sources.push((StreamType::Stderr, log));
            }
        }
        if !self.replay {
            for (_, log) in &mut sources {
                log.seek(SeekFrom::End(0)).await?;
            }
        }
        Ok(sources)
    }

    /// Reads at most one chunk from every source. Returns frames sent.
    async fn pass(
        &self,
        sources: &mut [(StreamType, Box<dyn LogSource>)],
        sink: &mut FrameSink,
        buf: &mut [u8],
    ) -> io::Result<u64> {
        let mut sent = 0;
        for (stream, log) in sources.iter_mut() {
            let n = match log.read(buf).await {
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!(stream = stream.as_str(), "log read failed: {}", e);
                    0
                }
            };
            if n == 0 {
                continue;
            }
            let frame = frame::encode(*stream, Bytes::copy_from_slice(&buf[..n]), self.framing.is_raw())
                .map_err(io::Error::other)?;
            sink.send(frame).await?;
            sent += 1;
        }
        Ok(sent)
    }

    /// Passes until every source is dry.
    async fn drain(
        &self,
        sources: &mut [(StreamType, Box<dyn LogSource>)],
        sink: &mut FrameSink,
        buf: &mut [u8],
    ) -> io::Result<u64> {
        let mut total = 0;
        loop {
            let sent = self.pass(sources, sink, buf).await?;
            if sent == 0 {
                return Ok(total);
            }
            total += sent;
        }
    }
}

async fn close(sink: FrameSink) {
    if let Err(e) = sink.close().await {
        tracing::debug!("transport close failed: {}", e);
    }
}
