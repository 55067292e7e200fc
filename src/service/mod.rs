//! # Connection Service
//!
//! Accepts inbound connections and dispatches each one to a [`Handler`].
//!
//! ## Components
//! - **Server**: owns the listeners, performs PROXY stripping and WebSocket
//!   upgrades, builds one [`PacketStream`](crate::stream::PacketStream) per
//!   connection
//! - **Handler**: application callback receiving `(ConnInfo, PacketStream)`
//!
//! Stopping the server closes the listening sockets only. Streams already
//! handed to the handler run until they are closed individually.

pub mod handler;
pub mod server;

pub use handler::{ConnInfo, ErrorSink, Handler};
pub use server::Server;
