//! WebSocket transport.
//!
//! Message-oriented adapter over `tokio-tungstenite`: every binary message
//! carries exactly one packet, so no byte-stream framing is involved. The
//! packet is still classified from its prefix, and its detected length must
//! match the message size.
//!
//! Close frames and the end of the message stream are orderly closes. Text
//! frames are rejected. Ping and pong frames are answered by tungstenite and
//! skipped here.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, trace};

use crate::core::codec::{decode_message, encode_message};
use crate::core::packet::{Packet, MAX_PACKET_SIZE};
use crate::error::{constants, ProtocolError, Result};
use crate::transport::Transport;

/// Subprotocol registered for MQTT over WebSocket
pub const MQTT_SUBPROTOCOL: &str = "mqtt";

/// Upper bound on the closing handshake when the stream shuts down
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

const SUBPROTOCOL_HEADER: &str = "Sec-WebSocket-Protocol";

/// WebSocket adapter for the stream engine
pub struct WsTransport<S> {
    reader: Mutex<Option<SplitStream<WebSocketStream<S>>>>,
    writer: Mutex<Option<SplitSink<WebSocketStream<S>, Message>>>,
    max_packet_size: usize,
}

impl<S> WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap an upgraded WebSocket stream
    pub fn new(stream: WebSocketStream<S>) -> Self {
        Self::with_max_packet_size(stream, MAX_PACKET_SIZE)
    }

    /// Wrap an upgraded WebSocket stream, rejecting packets above `max_packet_size`
    pub fn with_max_packet_size(stream: WebSocketStream<S>, max_packet_size: usize) -> Self {
        let (writer, reader) = stream.split();
        Self {
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            max_packet_size,
        }
    }
}

impl<S> Transport for WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn decode(&self) -> Result<Packet> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or_else(|| {
            ProtocolError::TransportError(constants::ERR_TRANSPORT_RELEASED.to_string())
        })?;

        loop {
            match reader.next().await {
                Some(Ok(Message::Binary(data))) => {
                    return decode_message(&data, self.max_packet_size);
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "WebSocket close frame received");
                    return Err(ProtocolError::ConnectionClosed);
                }
                Some(Ok(Message::Text(_))) => {
                    return Err(ProtocolError::WebSocket(
                        constants::ERR_TEXT_FRAME.to_string(),
                    ));
                }
                Some(Ok(other)) => {
                    trace!(len = other.len(), "Skipping control frame");
                    continue;
                }
                Some(Err(e)) => return Err(e.into()),
                None => return Err(ProtocolError::ConnectionClosed),
            }
        }
    }

    async fn encode(&self, packet: Packet) -> Result<()> {
        let buf = encode_message(&packet)?;

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(|| {
            ProtocolError::TransportError(constants::ERR_TRANSPORT_RELEASED.to_string())
        })?;

        writer.send(Message::Binary(buf.into())).await?;
        Ok(())
    }

    async fn close(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            match tokio::time::timeout(CLOSE_TIMEOUT, writer.close()).await {
                Ok(Ok(())) => debug!("WebSocket closing handshake sent"),
                Ok(Err(e)) => debug!(error = %e, "WebSocket close failed"),
                Err(_) => debug!("WebSocket close timed out"),
            }
        }
        self.reader.lock().await.take();
    }
}

/// Handshake callback that accepts the `mqtt` subprotocol when the client offers it
#[allow(clippy::result_large_err)]
pub fn negotiate_subprotocol(
    request: &Request,
    mut response: Response,
) -> std::result::Result<Response, ErrorResponse> {
    let offered = request
        .headers()
        .get_all(SUBPROTOCOL_HEADER)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|protocol| protocol.trim().eq_ignore_ascii_case(MQTT_SUBPROTOCOL));

    if offered {
        response.headers_mut().insert(
            SUBPROTOCOL_HEADER,
            HeaderValue::from_static(MQTT_SUBPROTOCOL),
        );
    }

    Ok(response)
}
