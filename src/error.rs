//! # Error Types
//!
//! Error handling for the packet transport.
//!
//! This module defines every error variant the framing helper, the stream
//! engine, the adapters and the server can produce.
//!
//! ## Error Categories
//! - **Expected close**: the peer ended the exchange in an orderly way
//!   ([`ProtocolError::ConnectionClosed`]). Streams never surface it through
//!   `error()`.
//! - **I/O Errors**: read, write and accept failures
//! - **Framing Errors**: undetectable headers, oversized or malformed packets,
//!   reserved packet types
//! - **Transport Errors**: WebSocket and PROXY header failures
//! - **Configuration Errors**: invalid or unreadable configuration
//!
//! All errors implement `std::error::Error` for interoperability.
//!
//! ## Example Usage
//! ```rust
//! use mqtt_transport::error::{ProtocolError, Result};
//! use mqtt_transport::core::packet::detect;
//!
//! fn total_length(prefix: &[u8]) -> Result<usize> {
//!     detect(prefix)
//!         .map(|(len, _)| len)
//!         .ok_or(ProtocolError::MalformedHeader)
//! }
//!
//! assert_eq!(total_length(&[0xC0, 0x00]).unwrap(), 2);
//! assert!(total_length(&[0x30]).is_err());
//! ```

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Framing errors
    pub const ERR_TRUNCATED_PACKET: &str = "Stream ended in the middle of a packet";
    pub const ERR_PACKET_SIZE_MISMATCH: &str = "Message size does not match the packet length";

    /// Stream errors
    pub const ERR_TRANSPORT_RELEASED: &str = "Transport has already been released";

    /// WebSocket errors
    pub const ERR_TEXT_FRAME: &str = "Text frames are not allowed for MQTT over WebSocket";

    /// PROXY protocol errors
    pub const ERR_PROXY_SIGNATURE: &str = "Missing PROXY protocol signature";
    pub const ERR_PROXY_LINE_TOO_LONG: &str = "PROXY v1 header exceeds 107 bytes";
    pub const ERR_PROXY_VERSION: &str = "Unsupported PROXY protocol version";
}

// ProtocolError is the primary error type for all transport operations
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    #[serde(skip_serializing, skip_deserializing)]
    Io(#[from] io::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Malformed fixed header: no packet length detected within 5 bytes")]
    MalformedHeader,

    #[error("Unknown packet type: {0}")]
    UnknownPacketType(u8),

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("PROXY header error: {0}")]
    ProxyHeader(String),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Whether this is the orderly end of an exchange rather than a failure.
    pub fn is_expected_close(&self) -> bool {
        matches!(self, ProtocolError::ConnectionClosed)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ProtocolError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;

        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => ProtocolError::ConnectionClosed,
            WsError::Io(e) => ProtocolError::Io(e),
            other => ProtocolError::WebSocket(other.to_string()),
        }
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
