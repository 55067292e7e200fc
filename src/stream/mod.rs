//! # Packet Stream
//!
//! The bidirectional conduit handed to connection handlers.
//!
//! A [`PacketStream`] owns one [`Transport`] and drives it with two tasks:
//! a reader that decodes packets into the incoming queue, and a writer that
//! encodes packets taken from the outgoing queue. Both queues hold a single
//! packet, so the reader waits for the consumer. `send` waits until the writer
//! has taken its packet and flushed it to the transport; a packet is never
//! reported as sent and then dropped by a close.
//!
//! ## Shutdown
//! Shutdown runs once no matter how many callers or tasks trigger it:
//! - the stream is marked closed and the first failure, if any, is latched
//! - the shared cancellation token wakes both tasks
//! - the writer task releases the transport as its last step
//!
//! An orderly close by the peer shuts the stream down without recording an
//! error. Failures that occur after shutdown has begun are logged and
//! discarded.
//!
//! ## Example
//! ```rust,no_run
//! use mqtt_transport::core::codec::PacketCodec;
//! use mqtt_transport::core::packet::Packet;
//! use mqtt_transport::stream::PacketStream;
//! use mqtt_transport::transport::FramedTransport;
//! use tokio::net::TcpStream;
//!
//! # async fn run() -> mqtt_transport::error::Result<()> {
//! let socket = TcpStream::connect("127.0.0.1:1883").await?;
//! let stream = PacketStream::new(FramedTransport::tcp(socket, PacketCodec::new())).await;
//!
//! stream.send(Packet::pingreq()).await;
//! if let Some(reply) = stream.recv().await {
//!     println!("received {}", reply.kind());
//! }
//! stream.close().await;
//! # Ok(())
//! # }
//! ```


use futures::Stream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info_span, trace, warn, Instrument, Span};

use crate::core::packet::Packet;
use crate::error::ProtocolError;
use crate::transport::Transport;
use crate::utils::metrics::global_metrics;

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Default)]
struct State {
    closed: bool,
    error: Option<Arc<ProtocolError>>,
}

/// Shutdown bookkeeping shared by the handle and both tasks
struct Core {
    id: u64,
    state: StdMutex<State>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    span: Span,
}

impl Core {
    fn new() -> Self {
        let id = NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            id,
            state: StdMutex::new(State::default()),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
            span: info_span!("stream", id),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        // State stays consistent across a panic; every update is a single assignment
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Begin shutdown. Only the first call has any effect; its cause is
    /// latched unless it is an orderly close.
    fn terminate(&self, cause: Option<ProtocolError>) {
        let cause = cause.filter(|e| !e.is_expected_close());

        let mut state = self.state();
        if state.closed {
            if let Some(e) = cause {
                debug!(parent: &self.span, error = %e, "Discarding error raised during shutdown");
            }
            return;
        }

        state.closed = true;
        match cause {
            Some(e) => {
                warn!(parent: &self.span, error = %e, "Stream failed");
                state.error = Some(Arc::new(e));
            }
            None => debug!(parent: &self.span, "Stream closing"),
        }
        self.shutdown.cancel();
    }

    fn closed(&self) -> bool {
        self.state().closed
    }

    fn error(&self) -> Option<Arc<ProtocolError>> {
        self.state().error.clone()
    }
}

/// A queued packet and the signal fired once it has been written
struct Outgoing {
    packet: Packet,
    written: oneshot::Sender<()>,
}

struct Inner {
    core: Arc<Core>,
    incoming: Mutex<mpsc::Receiver<Packet>>,
    outgoing: mpsc::Sender<Outgoing>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Last handle gone; the tasks release the transport on their own
        self.core.terminate(None);
    }
}

/// Handle to a running packet stream.
///
/// Cloning the handle is cheap; the stream shuts down when [`close`] is
/// called, when the transport fails or closes, or when the last handle is
/// dropped.
///
/// [`close`]: PacketStream::close
#[derive(Clone)]
pub struct PacketStream {
    inner: Arc<Inner>,
}

impl PacketStream {
    /// Start a stream over `transport`.
    ///
    /// Returns once both the reader and writer tasks are running.
    pub async fn new<T: Transport>(transport: T) -> Self {
        let core = Arc::new(Core::new());
        let transport = Arc::new(transport);

        let (incoming_tx, incoming_rx) = mpsc::channel(1);
        let (outgoing_tx, outgoing_rx) = mpsc::channel(1);
        let (ready_tx, mut ready_rx) = mpsc::channel(2);

        core.tasks.spawn(
            read_loop(transport.clone(), core.clone(), incoming_tx, ready_tx.clone())
                .instrument(core.span.clone()),
        );
        core.tasks.spawn(
            write_loop(transport, core.clone(), outgoing_rx, ready_tx)
                .instrument(core.span.clone()),
        );
        core.tasks.close();

        global_metrics().stream_opened();

        let stream = Self {
            inner: Arc::new(Inner {
                core,
                incoming: Mutex::new(incoming_rx),
                outgoing: outgoing_tx,
            }),
        };

        for _ in 0..2 {
            if ready_rx.recv().await.is_none() {
                break;
            }
        }
        trace!(parent: &stream.inner.core.span, "Stream started");

        stream
    }

    /// Process-unique identifier, also recorded on the stream's tracing span
    pub fn id(&self) -> u64 {
        self.inner.core.id
    }

    /// Hand `packet` to the writer and wait until it has been encoded.
    ///
    /// Returns `true` only once the packet is flushed to the transport, so a
    /// `close` issued afterwards never discards it. Returns `false` without
    /// waiting if the stream is closed, and `false` if the stream shuts down
    /// or the encode fails before the packet was written.
    pub async fn send(&self, packet: Packet) -> bool {
        let core = &self.inner.core;
        if core.closed() {
            return false;
        }

        let (written, done) = oneshot::channel();
        let queued = tokio::select! {
            biased;
            _ = core.shutdown.cancelled() => false,
            result = self.inner.outgoing.send(Outgoing { packet, written }) => result.is_ok(),
        };

        // The writer drops the signal unfired when it exits without writing
        queued && done.await.is_ok()
    }

    /// Next incoming packet, or `None` once the reader has stopped.
    ///
    /// A packet decoded before shutdown is still returned.
    pub async fn recv(&self) -> Option<Packet> {
        self.inner.incoming.lock().await.recv().await
    }

    /// Incoming packets as a [`Stream`] that ends when the reader stops
    pub fn incoming(&self) -> impl Stream<Item = Packet> + Send + 'static {
        futures::stream::unfold(self.clone(), |stream| async move {
            let packet = stream.recv().await?;
            Some((packet, stream))
        })
    }

    /// The failure that shut the stream down, if it was not an orderly close
    pub fn error(&self) -> Option<Arc<ProtocolError>> {
        self.inner.core.error()
    }

    pub fn closed(&self) -> bool {
        self.inner.core.closed()
    }

    /// Shut the stream down and wait until both tasks have exited and the
    /// transport has been released.
    pub async fn close(&self) {
        let core = &self.inner.core;
        core.terminate(None);
        core.tasks.wait().await;
    }
}

impl std::fmt::Debug for PacketStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.core.state();
        f.debug_struct("PacketStream")
            .field("id", &self.inner.core.id)
            .field("closed", &state.closed)
            .field("error", &state.error)
            .finish()
    }
}

async fn read_loop<T: Transport>(
    transport: Arc<T>,
    core: Arc<Core>,
    incoming: mpsc::Sender<Packet>,
    ready: mpsc::Sender<()>,
) {
    let _ = ready.try_send(());
    drop(ready);

    loop {
        let result = tokio::select! {
            biased;
            _ = core.shutdown.cancelled() => break,
            result = transport.decode() => result,
        };

        match result {
            Ok(packet) => {
                let len = packet.len() as u64;
                trace!(kind = %packet.kind(), len, "Packet decoded");

                let delivered = tokio::select! {
                    biased;
                    _ = core.shutdown.cancelled() => false,
                    result = incoming.send(packet) => result.is_ok(),
                };
                if !delivered {
                    break;
                }
                global_metrics().packet_received(len);
            }
            Err(e) if e.is_expected_close() => {
                core.terminate(None);
                break;
            }
            Err(e) => {
                global_metrics().decode_error();
                core.terminate(Some(e));
                break;
            }
        }
    }

    trace!("Reader stopped");
}

async fn write_loop<T: Transport>(
    transport: Arc<T>,
    core: Arc<Core>,
    mut outgoing: mpsc::Receiver<Outgoing>,
    ready: mpsc::Sender<()>,
) {
    let _ = ready.try_send(());
    drop(ready);

    loop {
        let Outgoing { packet, written } = tokio::select! {
            biased;
            _ = core.shutdown.cancelled() => break,
            next = outgoing.recv() => match next {
                Some(next) => next,
                None => break,
            },
        };

        let len = packet.len() as u64;
        let kind = packet.kind();

        let result = tokio::select! {
            biased;
            _ = core.shutdown.cancelled() => break,
            result = transport.encode(packet) => result,
        };

        match result {
            Ok(()) => {
                trace!(%kind, len, "Packet encoded");
                global_metrics().packet_sent(len);
                // The sender may have given up waiting
                let _ = written.send(());
            }
            Err(e) => {
                global_metrics().encode_error();
                core.terminate(Some(e));
                break;
            }
        }
    }

    // Covers the case where every handle was dropped without a close
    core.terminate(None);
    transport.close().await;
    global_metrics().stream_closed();
    trace!("Writer stopped, transport released");
}
