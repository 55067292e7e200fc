//! # MQTT Transport
//!
//! Packet-stream transport for MQTT: frames discrete packets over TCP byte
//! streams and WebSocket messages, and accepts connections on any number of
//! listeners, handing each one to an application handler as a bidirectional
//! [`PacketStream`].
//!
//! ## Layers
//! - [`core`]: packet classification and the byte-stream framing codec
//! - [`transport`]: adapters binding a connection to the stream engine
//! - [`stream`]: the reader/writer engine with race-free shutdown
//! - [`service`]: listener management and connection dispatch
//!
//! ## Example
//! ```rust,no_run
//! use mqtt_transport::{ConnInfo, PacketStream, Server};
//!
//! # async fn run() -> mqtt_transport::Result<()> {
//! let mut server = Server::new(|info: ConnInfo, stream: PacketStream| async move {
//!     while let Some(packet) = stream.recv().await {
//!         println!("{} sent {}", info.client_addr(), packet.kind());
//!     }
//! });
//!
//! server.launch_tcp("0.0.0.0:1883").await?;
//! server.launch_websocket("0.0.0.0:8080").await?;
//!
//! tokio::signal::ctrl_c().await?;
//! server.stop().await
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod service;
pub mod stream;
pub mod transport;
pub mod utils;

pub use crate::core::codec::PacketCodec;
pub use crate::core::packet::{Packet, PacketType};
pub use crate::error::{ProtocolError, Result};
pub use crate::service::{ConnInfo, Handler, Server};
pub use crate::stream::PacketStream;
pub use crate::transport::Transport;
