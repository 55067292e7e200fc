//! # Core Protocol Components
//!
//! Low-level packet handling and framing.
//!
//! This module provides the foundation for the transport: the packet model
//! and the codec that finds packet boundaries in byte streams.
//!
//! ## Components
//! - **Packet**: MQTT 3.1.1 control packets with type detection from a prefix
//! - **Codec**: Tokio codec for framing over byte streams, plus helpers for
//!   message-oriented transports
//!
//! ## Wire Format
//! ```text
//! [Type|Flags(1)] [Remaining Length(1-4)] [Body(N)]
//! ```
//!
//! ## Security
//! - Maximum packet size: 256MB (configurable lower)
//! - Length detection bounded to 5 header bytes
//! - Length validation before allocation

pub mod codec;
pub mod packet;
