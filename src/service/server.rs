//! Listener management and connection dispatch.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

use crate::config::{ListenerConfig, ServerConfig, TransportKind, DEFAULT_PROXY_HEADER_TIMEOUT};
use crate::core::codec::PacketCodec;
use crate::core::packet::MAX_PACKET_SIZE;
use crate::error::{ProtocolError, Result};
use crate::service::handler::{report, ConnInfo, ErrorSink, Handler};
use crate::stream::PacketStream;
use crate::transport::proxy::read_proxy_header;
use crate::transport::websocket::{negotiate_subprotocol, WsTransport};
use crate::transport::FramedTransport;
use crate::utils::metrics::global_metrics;

#[derive(Debug, Clone)]
struct Settings {
    proxy_protocol: bool,
    proxy_header_timeout: Duration,
    max_packet_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            proxy_protocol: false,
            proxy_header_timeout: DEFAULT_PROXY_HEADER_TIMEOUT,
            max_packet_size: MAX_PACKET_SIZE,
        }
    }
}

/// State shared by one listener's accept loop and its connection tasks
struct Acceptor<H> {
    handler: Arc<H>,
    kind: TransportKind,
    settings: Settings,
    errors: Option<ErrorSink>,
}

struct Listener {
    kind: TransportKind,
    addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

/// Accepts connections on any number of listeners and hands each one to
/// the handler as a [`PacketStream`].
///
/// Options set with the `with_*` builders apply to listeners launched
/// afterwards. Dropping the server stops its listeners; streams that were
/// already dispatched keep running.
pub struct Server<H> {
    handler: Arc<H>,
    settings: Settings,
    errors: Option<ErrorSink>,
    listeners: Vec<Listener>,
}

impl<H: Handler> Server<H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
            settings: Settings::default(),
            errors: None,
            listeners: Vec::new(),
        }
    }

    /// Build a server with the options from `config`. Listeners are not started.
    pub fn from_config(handler: H, config: &ServerConfig) -> Self {
        Self::new(handler)
            .with_proxy_protocol(config.proxy_protocol)
            .with_proxy_header_timeout(config.proxy_header_timeout)
            .with_max_packet_size(config.max_packet_size)
    }

    /// Build a server from `config` and launch every configured listener.
    pub async fn start(handler: H, config: &ServerConfig) -> Result<Self> {
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(ProtocolError::ConfigError(errors.join("; ")));
        }
        let mut server = Self::from_config(handler, config);
        server.launch_all(&config.listeners).await?;
        Ok(server)
    }

    /// Expect a PROXY protocol header at the start of every connection
    pub fn with_proxy_protocol(mut self, enabled: bool) -> Self {
        self.settings.proxy_protocol = enabled;
        self
    }

    /// How long a connection may take to deliver its PROXY header
    pub fn with_proxy_header_timeout(mut self, timeout: Duration) -> Self {
        self.settings.proxy_header_timeout = timeout;
        self
    }

    /// Reject packets larger than `max_packet_size` bytes
    pub fn with_max_packet_size(mut self, max_packet_size: usize) -> Self {
        self.settings.max_packet_size = max_packet_size;
        self
    }

    /// Report accept and handshake failures on `sink`
    pub fn with_error_sink(mut self, sink: ErrorSink) -> Self {
        self.errors = Some(sink);
        self
    }

    /// Bind `addr` and start accepting connections of `kind`.
    ///
    /// Returns the bound address, which differs from `addr` when port 0 was
    /// requested.
    #[instrument(skip_all, fields(%kind))]
    pub async fn launch(
        &mut self,
        kind: TransportKind,
        addr: impl ToSocketAddrs,
    ) -> Result<SocketAddr> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let acceptor = Arc::new(Acceptor {
            handler: self.handler.clone(),
            kind,
            settings: self.settings.clone(),
            errors: self.errors.clone(),
        });
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(
            accept_loop(listener, acceptor, shutdown.clone())
                .instrument(info_span!("listener", %kind, address = %local_addr)),
        );

        info!(address = %local_addr, proxy_protocol = self.settings.proxy_protocol, "Listening");
        self.listeners.push(Listener {
            kind,
            addr: local_addr,
            shutdown,
            task,
        });

        Ok(local_addr)
    }

    pub async fn launch_tcp(&mut self, addr: impl ToSocketAddrs) -> Result<SocketAddr> {
        self.launch(TransportKind::Tcp, addr).await
    }

    pub async fn launch_websocket(&mut self, addr: impl ToSocketAddrs) -> Result<SocketAddr> {
        self.launch(TransportKind::WebSocket, addr).await
    }

    /// Start a TCP listener on `addr`. Returns as soon as the socket is
    /// bound; connections are served in the background until [`stop`].
    ///
    /// [`stop`]: Server::stop
    pub async fn listen_and_serve(&mut self, addr: impl ToSocketAddrs) -> Result<SocketAddr> {
        self.launch_tcp(addr).await
    }

    /// Launch one listener per entry, stopping at the first bind failure.
    /// Listeners launched before the failure keep running.
    pub async fn launch_all(&mut self, listeners: &[ListenerConfig]) -> Result<Vec<SocketAddr>> {
        let mut bound = Vec::with_capacity(listeners.len());
        for listener in listeners {
            bound.push(self.launch(listener.protocol, listener.address.as_str()).await?);
        }
        Ok(bound)
    }

    /// Kind and bound address of every running listener
    pub fn local_addrs(&self) -> Vec<(TransportKind, SocketAddr)> {
        self.listeners.iter().map(|l| (l.kind, l.addr)).collect()
    }

    /// Close every listening socket.
    ///
    /// Waits until each accept loop has exited, so the addresses refuse new
    /// connections once this returns. Streams already handed to the handler
    /// are not affected.
    pub async fn stop(&mut self) -> Result<()> {
        let mut first_error = None;

        for listener in self.listeners.drain(..) {
            listener.shutdown.cancel();
            if let Err(e) = listener.task.await {
                error!(address = %listener.addr, error = %e, "Listener task failed");
                first_error.get_or_insert(ProtocolError::TransportError(format!(
                    "Listener on {} failed: {e}",
                    listener.addr
                )));
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<H> Drop for Server<H> {
    fn drop(&mut self) {
        for listener in &self.listeners {
            listener.shutdown.cancel();
        }
    }
}

async fn accept_loop<H: Handler>(
    listener: TcpListener,
    acceptor: Arc<Acceptor<H>>,
    shutdown: CancellationToken,
) {
    global_metrics().listener_started();

    loop {
        let accepted = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("Listener stopped");
                break;
            }
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((socket, peer_addr)) => {
                let local_addr = match socket.local_addr() {
                    Ok(addr) => addr,
                    Err(e) => {
                        debug!(%peer_addr, error = %e, "Connection dropped before dispatch");
                        continue;
                    }
                };

                let acceptor = acceptor.clone();
                let span = info_span!("connection", peer = %peer_addr);
                tokio::spawn(
                    async move {
                        acceptor
                            .serve_connection(socket, peer_addr, local_addr)
                            .await
                    }
                    .instrument(span),
                );
            }
            Err(e) => {
                accept_failed(acceptor.errors.as_ref(), e);
                break;
            }
        }
    }

    global_metrics().listener_stopped();
}

/// An accept error ends the listener; it is counted and handed to the sink
fn accept_failed(errors: Option<&ErrorSink>, e: std::io::Error) {
    error!(error = %e, "Accept failed, listener shutting down");
    global_metrics().connection_error();
    report(errors, e.into());
}

impl<H: Handler> Acceptor<H> {
    async fn serve_connection(
        &self,
        socket: TcpStream,
        peer_addr: SocketAddr,
        local_addr: SocketAddr,
    ) {
        global_metrics().connection_established();
        debug!("Connection accepted");

        let info = ConnInfo::new(self.kind, peer_addr, local_addr, self.errors.clone());
        if let Err(e) = self.dispatch(socket, info).await {
            warn!(error = %e, "Connection setup failed");
            global_metrics().connection_error();
            report(self.errors.as_ref(), e);
        }

        global_metrics().connection_closed();
    }

    async fn dispatch(&self, mut socket: TcpStream, mut info: ConnInfo) -> Result<()> {
        if let Err(e) = socket.set_nodelay(true) {
            debug!(error = %e, "Failed to disable Nagle's algorithm");
        }

        if self.settings.proxy_protocol {
            let header = tokio::time::timeout(
                self.settings.proxy_header_timeout,
                read_proxy_header(&mut socket),
            )
            .await
            .map_err(|_| ProtocolError::Timeout)??;

            info.source_addr = header.source();
            debug!(source = ?info.source_addr, "PROXY header stripped");
        }

        let max_packet_size = self.settings.max_packet_size;
        let stream = match self.kind {
            TransportKind::Tcp => {
                let codec = PacketCodec::with_max_packet_size(max_packet_size);
                PacketStream::new(FramedTransport::tcp(socket, codec)).await
            }
            TransportKind::WebSocket => {
                let ws = tokio_tungstenite::accept_hdr_async(socket, negotiate_subprotocol).await?;
                PacketStream::new(WsTransport::with_max_packet_size(ws, max_packet_size)).await
            }
        };

        debug!(stream = stream.id(), "Dispatching stream to handler");
        self.handler.serve(info, stream).await;
        Ok(())
    }
}
