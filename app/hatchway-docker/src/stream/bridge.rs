//! Process I/O bridge.
//!
//! Moves bytes between a [`ProcessHandle`] and a [`DuplexTransport`]:
//!
//! ```text
//!  stdout pipe ──► reader ──┐
//!                           ├──► frame queue ──► writer ──► transport
//!  stderr pipe ──► reader ──┘
//!
//!  transport inbound ──► stdin pump ──► stdin pipe
//!
//!  supervisor: process exit ─► drain readers (bounded) ─► close transport
//! ```
//!
//! All frames go through a single writer so frames never interleave
//! mid-frame. Readers run concurrently, so stdout and stderr frames
//! interleave at the scheduler's discretion while each keeps its own order.

use super::frame::{self, StreamType};
use super::mode::Framing;
use super::transport::{discard_inbound, DuplexTransport, FrameSink, Inbound};
use bytes::Bytes;
use hatchway_core::{ExitWatch, PipeReader, PipeWriter, ProcessHandle, StreamConfig};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Why a stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// The process (or the container's main process) exited.
    ProcessExited,
    /// The client went away or a transport write failed.
    TransportClosed,
    /// A non-follow log replay ran out of data.
    LogsExhausted,
    /// The container disappeared.
    ContainerRemoved,
    /// The stream could not be set up after the status line was sent.
    SetupFailed,
}

impl FinishReason {
    /// Name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ProcessExited => "process_exited",
            Self::TransportClosed => "transport_closed",
            Self::LogsExhausted => "logs_exhausted",
            Self::ContainerRemoved => "container_removed",
            Self::SetupFailed => "setup_failed",
        }
    }
}

/// Result of driving one stream to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOutcome {
    /// Exit code, if the process exited while the stream was open.
    pub exit_code: Option<i32>,
    /// Why the stream ended.
    pub reason: FinishReason,
    /// Number of frames written to the transport.
    pub frames: u64,
}

/// Empty-read retry policy.
///
/// The first empty read after output retries quickly, later ones settle on
/// the idle interval, and a long run of empty reads drops to the keepalive
/// interval until output resumes.
#[derive(Debug, Clone)]
pub struct Backoff {
    active: Duration,
    idle: Duration,
    keepalive: Duration,
    threshold: u32,
    empty_reads: u32,
}

impl Backoff {
    /// Creates a backoff from stream tunables.
    #[must_use]
    pub const fn new(config: &StreamConfig) -> Self {
        Self {
            active: Duration::from_millis(config.active_poll_ms),
            idle: Duration::from_millis(config.idle_poll_ms),
            keepalive: Duration::from_millis(config.keepalive_poll_ms),
            threshold: config.idle_reads_before_keepalive,
            empty_reads: 0,
        }
    }

    /// Call after a read that returned data.
    pub fn reset(&mut self) {
        self.empty_reads = 0;
    }

    /// Call after an empty read. Returns how long to wait before retrying.
    pub fn next_delay(&mut self) -> Duration {
        self.empty_reads = self.empty_reads.saturating_add(1);
        if self.empty_reads == 1 {
            self.active
        } else if self.empty_reads < self.threshold {
            self.idle
        } else {
            self.keepalive
        }
    }
}

/// Single-shot close guard.
///
/// Several paths can decide a stream is over. Only the first one to
/// trigger records its reason; a transport failure also aborts every task
/// of the stream.
#[derive(Debug, Default)]
struct Termination {
    finishing: AtomicBool,
    reason: Mutex<Option<FinishReason>>,
    abort: CancellationToken,
}

impl Termination {
    fn trigger(&self, reason: FinishReason) -> bool {
        if self
            .finishing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        *self.reason.lock() = Some(reason);
        if reason == FinishReason::TransportClosed {
            self.abort.cancel();
        }
        true
    }

    fn reason(&self) -> Option<FinishReason> {
        *self.reason.lock()
    }
}

/// Bridges one process to one transport.
#[derive(Debug, Clone)]
pub struct ProcessBridge {
    framing: Framing,
    config: StreamConfig,
}

impl ProcessBridge {
    /// Creates a bridge.
    #[must_use]
    pub fn new(config: &StreamConfig, framing: Framing) -> Self {
        Self {
            framing,
            config: config.clone(),
        }
    }

    /// Runs until the process has exited and its output is flushed, or the
    /// transport goes away.
    pub async fn run(&self, mut process: ProcessHandle, transport: DuplexTransport) -> StreamOutcome {
        let DuplexTransport { sink, inbound } = transport;
        let termination = Arc::new(Termination::default());
        let exit = process.exit_watch();
        let (tx, rx) = mpsc::channel(self.config.frame_queue_depth.max(1));

        let mut readers = JoinSet::new();
        for (stream, pipe) in [
            (StreamType::Stdout, process.take_stdout()),
            (StreamType::Stderr, process.take_stderr()),
        ] {
            if let Some(pipe) = pipe {
                readers.spawn(pump_output(OutputPump {
                    stream,
                    pipe,
                    frames: tx.clone(),
                    raw: self.framing.is_raw(),
                    chunk_size: self.config.read_chunk_size.max(1),
                    backoff: Backoff::new(&self.config),
                    exit: exit.clone(),
                    abort: termination.abort.clone(),
                }));
            }
        }
        drop(tx);

        let stdin_task = match (process.take_stdin(), inbound) {
            (Some(stdin), Some(inbound)) => Some(tokio::spawn(pump_input(
                inbound,
                stdin,
                termination.abort.clone(),
            ))),
            // No client input: close stdin right away so the process sees EOF.
            (Some(stdin), None) => {
                tracing::debug!("stdin attached but the transport carries no input, closing stdin");
                drop(stdin);
                None
            }
            // Input with nowhere to go is still read so a dead client is noticed.
            (None, Some(inbound)) => Some(tokio::spawn(watch_client(
                inbound,
                Arc::clone(&termination),
            ))),
            (None, None) => None,
        };

        let probe = (!self.framing.is_raw() && sink.needs_probe())
            .then(|| self.config.keepalive_frame());
        let writer = tokio::spawn(forward_frames(sink, rx, probe, Arc::clone(&termination)));

        let exit_code = tokio::select! {
            code = exit.wait() => Some(code),
            () = termination.abort.cancelled() => None,
        };

        if let Some(task) = &stdin_task {
            task.abort();
        }

        if let Some(code) = exit_code {
            termination.trigger(FinishReason::ProcessExited);
            tracing::debug!(exit_code = code, "process exited, draining output");
            let grace = self.config.drain_grace();
            let drained = tokio::time::timeout(grace, async {
                while readers.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                tracing::debug!(grace_ms = self.config.drain_grace_ms, "drain grace elapsed");
                readers.abort_all();
            }
        } else {
            readers.abort_all();
        }
        while let Some(result) = readers.join_next().await {
            if let Ok(Err(e)) = result {
                tracing::debug!("output pump ended with error: {}", e);
            }
        }

        let frames = writer.await.unwrap_or_default();
        if let Some(task) = stdin_task {
            let _ = task.await;
        }

        StreamOutcome {
            exit_code: exit_code.or_else(|| exit.code()),
            reason: termination.reason().unwrap_or(FinishReason::TransportClosed),
            frames,
        }
    }
}

struct OutputPump {
    stream: StreamType,
    pipe: PipeReader,
    frames: mpsc::Sender<Bytes>,
    raw: bool,
    chunk_size: usize,
    backoff: Backoff,
    exit: ExitWatch,
    abort: CancellationToken,
}

/// Reads one output pipe in bounded chunks and queues encoded frames.
///
/// An empty read is only final once the process has exited; before that
/// the pipe is retried with backoff.
async fn pump_output(mut pump: OutputPump) -> io::Result<()> {
    let mut buf = vec![0u8; pump.chunk_size];
    loop {
        let read = tokio::select! {
            biased;
            () = pump.abort.cancelled() => return Ok(()),
            read = pump.pipe.read(&mut buf) => read,
        };

        match read {
            Ok(0) => {
                if pump.exit.has_exited() {
                    tracing::debug!(stream = pump.stream.as_str(), "pipe drained");
                    return Ok(());
                }
                let delay = pump.backoff.next_delay();
                tokio::select! {
                    biased;
                    () = pump.abort.cancelled() => return Ok(()),
                    () = tokio::time::sleep(delay) => {}
                }
            }
            Ok(n) => {
                pump.backoff.reset();
                let frame = frame::encode(pump.stream, Bytes::copy_from_slice(&buf[..n]), pump.raw)
                    .map_err(io::Error::other)?;
                if pump.frames.send(frame).await.is_err() {
                    // Writer is gone, nobody to deliver to.
                    return Ok(());
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

/// Copies client input to stdin verbatim, then closes stdin.
async fn pump_input(
    mut inbound: Inbound,
    mut stdin: PipeWriter,
    abort: CancellationToken,
) -> io::Result<u64> {
    let copied = tokio::select! {
        biased;
        () = abort.cancelled() => return Ok(0),
        copied = tokio::io::copy(&mut inbound, &mut stdin) => copied?,
    };
    tracing::debug!(bytes = copied, "client input ended, closing stdin");
    stdin.shutdown().await?;
    Ok(copied)
}

/// Reads client input that has no stdin to go to. A read error ends the
/// stream; EOF is only a half-close.
async fn watch_client(inbound: Inbound, termination: Arc<Termination>) -> io::Result<u64> {
    let abort = termination.abort.clone();
    tokio::select! {
        biased;
        () = abort.cancelled() => Ok(0),
        result = discard_inbound(inbound) => {
            if let Err(e) = &result {
                tracing::debug!("client read failed: {}", e);
                termination.trigger(FinishReason::TransportClosed);
            }
            result
        }
    }
}

/// Resolves after `period` of inactivity, or never.
async fn idle(period: Option<Duration>) {
    match period {
        Some(period) => tokio::time::sleep(period).await,
        None => std::future::pending().await,
    }
}

enum WriterEvent {
    Frame(Bytes),
    Drained,
    ClientGone,
    Idle,
}

/// The only task that writes to the transport.
///
/// With `probe` set, a keepalive frame goes out after that much silence,
/// so a hijacked connection whose client vanished fails a write.
async fn forward_frames(
    mut sink: FrameSink,
    mut frames: mpsc::Receiver<Bytes>,
    probe: Option<Duration>,
    termination: Arc<Termination>,
) -> u64 {
    let mut sent = 0;
    loop {
        let event = tokio::select! {
            biased;
            () = sink.closed() => WriterEvent::ClientGone,
            frame = frames.recv() => frame.map_or(WriterEvent::Drained, WriterEvent::Frame),
            () = idle(probe) => WriterEvent::Idle,
        };

        let (frame, counted) = match event {
            WriterEvent::Frame(frame) => (frame, true),
            WriterEvent::Idle => (frame::keepalive(), false),
            WriterEvent::Drained => break,
            WriterEvent::ClientGone => {
                tracing::debug!("client gone");
                termination.trigger(FinishReason::TransportClosed);
                return sent;
            }
        };
        if let Err(e) = sink.send(frame).await {
            tracing::debug!("transport write failed: {}", e);
            termination.trigger(FinishReason::TransportClosed);
            return sent;
        }
        if counted {
            sent += 1;
        }
    }

    if let Err(e) = sink.close().await {
        tracing::debug!("transport close failed: {}", e);
    }
    sent
}
