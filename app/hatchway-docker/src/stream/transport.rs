//! Duplex transport between a stream source and the client.
//!
//! A stream either rides in a chunked HTTP response body (with the request
//! body as inbound side) or owns an upgraded raw connection. Sources are
//! written once against [`DuplexTransport`] and work under both.

use axum::body::Body;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;

/// Inbound (client to process) byte stream.
pub type Inbound = Box<dyn AsyncRead + Send + Unpin>;

enum SinkKind {
    /// Chunks of a streaming response body.
    Body(mpsc::Sender<Bytes>),
    /// Write half of a raw connection.
    Raw(Box<dyn AsyncWrite + Send + Unpin>),
}

/// Outbound side of a transport. Every `send` carries whole frames.
pub struct FrameSink {
    kind: SinkKind,
}

impl FrameSink {
    /// Wraps a raw writer.
    #[must_use]
    pub fn raw(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            kind: SinkKind::Raw(Box::new(writer)),
        }
    }

    /// Writes one encoded frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer is gone.
    pub async fn send(&mut self, frame: Bytes) -> io::Result<()> {
        match &mut self.kind {
            SinkKind::Body(tx) => tx
                .send(frame)
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "response body dropped")),
            SinkKind::Raw(writer) => {
                writer.write_all(&frame).await?;
                writer.flush().await
            }
        }
    }

    /// Resolves once the peer is known to be gone without a write.
    ///
    /// A dropped response body is observable right away. A raw connection
    /// only reports a dead peer on the next write, so this never resolves
    /// for it.
    ///
    /// The returned future owns what it watches, so it can be raced against
    /// other work on the sink.
    pub fn closed(&self) -> impl Future<Output = ()> + Send + 'static {
        let tx = match &self.kind {
            SinkKind::Body(tx) => Some(tx.clone()),
            SinkKind::Raw(_) => None,
        };
        async move {
            match tx {
                Some(tx) => tx.closed().await,
                None => std::future::pending().await,
            }
        }
    }

    /// Whether a dead peer can only be found by writing to it.
    #[must_use]
    pub const fn needs_probe(&self) -> bool {
        matches!(self.kind, SinkKind::Raw(_))
    }

    /// Ends the stream: finishes the chunked body or shuts down the write
    /// half of the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the raw shutdown fails.
    pub async fn close(self) -> io::Result<()> {
        match self.kind {
            SinkKind::Body(tx) => {
                drop(tx);
                Ok(())
            }
            SinkKind::Raw(mut writer) => writer.shutdown().await,
        }
    }
}

/// Reads and discards client input that has nowhere to go.
///
/// Returns at EOF, which may be a half-close, so it says nothing about
/// the peer. A read error means the connection is gone.
///
/// # Errors
///
/// Returns the read error.
pub async fn discard_inbound(mut inbound: Inbound) -> io::Result<u64> {
    let discarded = tokio::io::copy(&mut inbound, &mut tokio::io::sink()).await?;
    tracing::debug!(bytes = discarded, "client closed its write side");
    Ok(discarded)
}

/// A client connection a stream is driven over.
pub struct DuplexTransport {
    /// Outbound side.
    pub sink: FrameSink,
    /// Inbound side, if the client can send.
    pub inbound: Option<Inbound>,
}

impl DuplexTransport {
    /// Creates a transport from its halves.
    #[must_use]
    pub const fn new(sink: FrameSink, inbound: Option<Inbound>) -> Self {
        Self { sink, inbound }
    }

    /// Creates a transport that streams into a response body.
    ///
    /// Returns the transport and the body to hand to the HTTP layer. The
    /// optional request body becomes the inbound side.
    #[must_use]
    pub fn chunked(request_body: Option<Body>, queue_depth: usize) -> (Self, Body) {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, io::Error>));

        let inbound = request_body.map(|body| {
            let stream = body.into_data_stream().map_err(io::Error::other);
            Box::new(StreamReader::new(stream)) as Inbound
        });

        let transport = Self {
            sink: FrameSink {
                kind: SinkKind::Body(tx),
            },
            inbound,
        };
        (transport, body)
    }

    /// Creates a transport over an upgraded connection.
    #[must_use]
    pub fn upgraded(upgraded: Upgraded) -> Self {
        let (read, write) = tokio::io::split(TokioIo::new(upgraded));
        Self {
            sink: FrameSink::raw(write),
            inbound: Some(Box::new(read)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_chunked_body_carries_frames() {
        let (mut transport, body) = DuplexTransport::chunked(None, 4);
        assert!(transport.inbound.is_none());

        transport.sink.send(Bytes::from_static(b"one")).await.unwrap();
        transport.sink.send(Bytes::from_static(b"two")).await.unwrap();
        transport.sink.close().await.unwrap();

        let collected = body.collect().await.unwrap().to_bytes();
        assert_eq!(&collected[..], b"onetwo");
    }

    #[tokio::test]
    async fn test_chunked_body_reports_dropped_client() {
        let (mut transport, body) = DuplexTransport::chunked(None, 4);
        drop(body);

        tokio::time::timeout(std::time::Duration::from_secs(1), transport.sink.closed())
            .await
            .unwrap();
        let err = transport.sink.send(Bytes::from_static(b"x")).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_chunked_inbound_reads_request_body() {
        let (transport, _body) = DuplexTransport::chunked(Some(Body::from("input\n")), 4);
        let mut inbound = transport.inbound.unwrap();
        let mut buf = String::new();
        inbound.read_to_string(&mut buf).await.unwrap();
        assert_eq!(buf, "input\n");
    }

    #[tokio::test]
    async fn test_raw_sink_writes_and_shuts_down() {
        let (client, server) = tokio::io::duplex(64);
        let mut sink = FrameSink::raw(server);
        sink.send(Bytes::from_static(b"raw")).await.unwrap();
        sink.close().await.unwrap();

        let mut client = client;
        let mut buf = Vec::new();
        client.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"raw");
    }

    #[tokio::test]
    async fn test_only_raw_sink_needs_probe() {
        let (transport, _body) = DuplexTransport::chunked(None, 4);
        assert!(!transport.sink.needs_probe());

        let (_client, server) = tokio::io::duplex(64);
        assert!(FrameSink::raw(server).needs_probe());
    }

    #[tokio::test]
    async fn test_discard_inbound_reads_to_eof() {
        let inbound: Inbound = Box::new(&b"ignored input"[..]);
        assert_eq!(discard_inbound(inbound).await.unwrap(), 13);
    }
}
