//! Handler contract for accepted connections.

use std::future::Future;
use std::net::SocketAddr;
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

use crate::config::TransportKind;
use crate::error::ProtocolError;
use crate::stream::PacketStream;

/// Channel receiving failures the server cannot hand to a stream
pub type ErrorSink = UnboundedSender<ProtocolError>;

/// Connection details handed to the [`Handler`] alongside the stream.
#[derive(Debug, Clone)]
pub struct ConnInfo {
    /// Listener kind that accepted the connection
    pub kind: TransportKind,
    /// Address of the directly connected peer (the proxy, when one is in front)
    pub peer_addr: SocketAddr,
    /// Local address the connection was accepted on
    pub local_addr: SocketAddr,
    /// Client address forwarded in a PROXY header
    pub source_addr: Option<SocketAddr>,
    errors: Option<ErrorSink>,
}

impl ConnInfo {
    pub(crate) fn new(
        kind: TransportKind,
        peer_addr: SocketAddr,
        local_addr: SocketAddr,
        errors: Option<ErrorSink>,
    ) -> Self {
        Self {
            kind,
            peer_addr,
            local_addr,
            source_addr: None,
            errors,
        }
    }

    /// Address of the client: the forwarded source when known, otherwise the peer
    pub fn client_addr(&self) -> SocketAddr {
        self.source_addr.unwrap_or(self.peer_addr)
    }

    /// Send `err` to the server's error sink. Without a sink it is only logged.
    pub fn report(&self, err: ProtocolError) {
        report(self.errors.as_ref(), err);
    }
}

pub(crate) fn report(sink: Option<&ErrorSink>, err: ProtocolError) {
    match sink {
        Some(sink) => {
            if let Err(unsent) = sink.send(err) {
                warn!(error = %unsent.0, "Error sink closed, dropping report");
            }
        }
        None => warn!(error = %err, "Unreported server error"),
    }
}

/// Receives every accepted connection as a running [`PacketStream`].
///
/// `serve` runs on its own task, so a slow handler only delays its own
/// connection. The stream keeps running after `serve` returns until it is
/// closed or its last handle is dropped.
pub trait Handler: Send + Sync + 'static {
    fn serve(&self, info: ConnInfo, stream: PacketStream) -> impl Future<Output = ()> + Send;
}

impl<F, Fut> Handler for F
where
    F: Fn(ConnInfo, PacketStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send,
{
    fn serve(&self, info: ConnInfo, stream: PacketStream) -> impl Future<Output = ()> + Send {
        self(info, stream)
    }
}
