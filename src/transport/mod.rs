//! # Transport Adapters
//!
//! Binds concrete connections to the stream engine.
//!
//! Every adapter implements [`Transport`]: decode one packet, encode one
//! packet, release the connection. The engine calls `decode` from its reader
//! task and `encode` from its writer task, never concurrently with
//! themselves, and `close` exactly once after both have stopped.
//!
//! ## Adapters
//! - [`FramedTransport::tcp`]: byte-stream connection, framed by [`PacketCodec`]
//! - [`FramedTransport::buffered`]: any reader/writer pair owned by the caller
//! - [`websocket::WsTransport`]: one packet per WebSocket binary message
//!
//! The [`proxy`] module strips PROXY protocol headers before a connection
//! reaches an adapter.

pub mod proxy;
pub mod websocket;

use futures::{SinkExt, StreamExt};
use std::future::Future;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::debug;

use crate::core::codec::PacketCodec;
use crate::core::packet::Packet;
use crate::error::{constants, ProtocolError, Result};

pub use websocket::WsTransport;

/// Per-transport behaviour driven by the stream engine.
///
/// `decode` returns [`ProtocolError::ConnectionClosed`] when the peer ended
/// the exchange in an orderly way; any other error is a transport failure.
/// Both `decode` and `encode` must be safe to cancel at an await point.
pub trait Transport: Send + Sync + 'static {
    /// Wait for and return the next packet
    fn decode(&self) -> impl Future<Output = Result<Packet>> + Send;

    /// Write one packet and flush it
    fn encode(&self, packet: Packet) -> impl Future<Output = Result<()>> + Send;

    /// Release the underlying connection
    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// Byte-stream adapter over a framed reader/writer pair
pub struct FramedTransport<R, W> {
    reader: Mutex<Option<FramedRead<R, PacketCodec>>>,
    writer: Mutex<Option<FramedWrite<W, PacketCodec>>>,
    release_on_close: bool,
}

/// Byte-stream adapter for TCP connections
pub type TcpTransport = FramedTransport<OwnedReadHalf, OwnedWriteHalf>;

impl FramedTransport<OwnedReadHalf, OwnedWriteHalf> {
    /// Wrap a TCP connection; closing the transport closes the socket
    pub fn tcp(stream: TcpStream, codec: PacketCodec) -> Self {
        let (reader, writer) = stream.into_split();
        Self::new(reader, writer, codec, true)
    }
}

impl<R, W> FramedTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap a reader/writer pair whose lifecycle stays with the caller.
    /// Closing the transport leaves both halves untouched.
    pub fn buffered(reader: R, writer: W, codec: PacketCodec) -> Self {
        Self::new(reader, writer, codec, false)
    }

    fn new(reader: R, writer: W, codec: PacketCodec, release_on_close: bool) -> Self {
        Self {
            reader: Mutex::new(Some(FramedRead::new(reader, codec))),
            writer: Mutex::new(Some(FramedWrite::new(writer, codec))),
            release_on_close,
        }
    }
}

fn released() -> ProtocolError {
    ProtocolError::TransportError(constants::ERR_TRANSPORT_RELEASED.to_string())
}

impl<R, W> Transport for FramedTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn decode(&self) -> Result<Packet> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or_else(released)?;

        match reader.next().await {
            Some(result) => result,
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    async fn encode(&self, packet: Packet) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(released)?;
        writer.send(packet).await
    }

    async fn close(&self) {
        if !self.release_on_close {
            return;
        }

        // Dropping the halves closes the socket without waiting on the peer
        let writer = self.writer.lock().await.take();
        let reader = self.reader.lock().await.take();
        debug!(
            released = writer.is_some() || reader.is_some(),
            "Byte-stream transport closed"
        );
    }
}
