//! Interactive process I/O gateway.
//!
//! ```text
//! handler ──► StreamRequest ──► StreamMode
//!                                  │
//!                 ┌────────────────┴───────────────┐
//!                 ▼                                ▼
//!          StreamResponder                   StreamSource
//!   (200 chunked | 101 upgrade)      (LogTail | DirectPipe bridge)
//!                 └──────────► DuplexTransport ◄───┘
//!                                  │
//!                                  ▼
//!                             frame codec
//! ```

pub mod bridge;
pub mod frame;
pub mod logtail;
pub mod mode;
pub mod transport;
pub mod upgrade;

pub use bridge::{Backoff, FinishReason, ProcessBridge, StreamOutcome};
pub use frame::{Frame, FrameError, StreamType};
pub use logtail::LogTail;
pub use mode::{DataPath, Envelope, Framing, StreamMode, StreamRequest, StreamTarget};
pub use transport::{DuplexTransport, FrameSink};
pub use upgrade::{ConnectionPhase, StreamResponder};

use hatchway_core::ProcessHandle;

/// Where a stream's output comes from. Chosen once per request.
pub enum StreamSource {
    /// Poll persisted logs.
    LogTail(LogTail),
    /// Bridge the pipes of a freshly created process.
    DirectPipe {
        /// Bridge settings.
        bridge: ProcessBridge,
        /// The started process.
        process: ProcessHandle,
    },
}

impl StreamSource {
    /// Produces frames into `transport` until the source is done.
    pub async fn run(self, transport: DuplexTransport) -> StreamOutcome {
        match self {
            Self::LogTail(tail) => tail.run(transport).await,
            Self::DirectPipe { bridge, process } => bridge.run(process, transport).await,
        }
    }
}
