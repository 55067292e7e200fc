//! # Packet Framing
//!
//! Locates packet boundaries in an unstructured byte stream.
//!
//! [`PacketCodec`] plugs into `tokio_util::codec::{FramedRead, FramedWrite}`.
//! The framed reader's buffer serves as a non-consuming look-ahead window:
//! detection starts with 2 bytes and grows one byte at a time up to 5 (one
//! fixed header byte and at most four length bytes). Until the window is
//! filled the decoder asks for more data. Once a total length is known,
//! exactly that many bytes are split off and decoded.
//!
//! ## End of Data
//! - Before a length is detected: orderly close, no packet and no error
//! - After a length is detected but before the body is complete: hard error
//!
//! ## Security
//! - Detection never looks past 5 bytes
//! - Detected lengths are checked against the configured maximum before the
//!   body is buffered
//! - Buffer growth for a partial body is bounded by [`MAX_RESERVE_CHUNK`], so a
//!   header alone never commits memory for the whole announced length

use bytes::BytesMut;
use std::io;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::core::packet::{detect, Packet, PacketType, MAX_PACKET_SIZE};
use crate::error::{constants, ProtocolError, Result};

/// Initial size of the detection window
pub const MIN_DETECTION_WINDOW: usize = 2;

/// Fixed header byte plus the longest remaining-length field
pub const MAX_DETECTION_WINDOW: usize = 5;

/// Largest up-front reservation for a partially received body
pub const MAX_RESERVE_CHUNK: usize = 64 * 1024;

/// Framing codec for MQTT packets over byte streams
#[derive(Debug, Clone, Copy)]
pub struct PacketCodec {
    max_packet_size: usize,
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketCodec {
    pub fn new() -> Self {
        Self {
            max_packet_size: MAX_PACKET_SIZE,
        }
    }

    /// Reject packets whose detected length exceeds `max_packet_size`
    pub fn with_max_packet_size(max_packet_size: usize) -> Self {
        Self {
            max_packet_size: max_packet_size.min(MAX_PACKET_SIZE),
        }
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    /// Grow the detection window over `src` until a length is known.
    /// `Ok(None)` means more bytes are needed.
    fn detect_frame(&self, src: &BytesMut) -> Result<Option<(usize, PacketType)>> {
        let mut window = MIN_DETECTION_WINDOW;

        loop {
            if window > MAX_DETECTION_WINDOW {
                return Err(ProtocolError::MalformedHeader);
            }

            if src.len() < window {
                return Ok(None);
            }

            match detect(&src[..window]) {
                Some((total, kind)) => {
                    if total > self.max_packet_size {
                        return Err(ProtocolError::OversizedPacket(total));
                    }
                    return Ok(Some((total, kind)));
                }
                None => window += 1,
            }
        }
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let Some((total, kind)) = self.detect_frame(src)? else {
            return Ok(None);
        };

        if src.len() < total {
            // Grow with the data actually arriving, not the announced length
            src.reserve((total - src.len()).min(MAX_RESERVE_CHUNK));
            return Ok(None);
        }

        let frame = src.split_to(total);
        let mut packet = kind.instantiate()?;
        packet.decode(&frame)?;

        trace!(kind = %kind, bytes = total, "Packet decoded");
        Ok(Some(packet))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(packet) = self.decode(buf)? {
            return Ok(Some(packet));
        }

        if buf.is_empty() {
            return Ok(None);
        }

        match self.detect_frame(buf)? {
            // Header cut short: the peer went away between packets
            None => {
                trace!(bytes = buf.len(), "Discarding partial header at end of stream");
                buf.clear();
                Ok(None)
            }
            Some(_) => Err(ProtocolError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                constants::ERR_TRUNCATED_PACKET,
            ))),
        }
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<()> {
        let len = packet.len();
        if len > self.max_packet_size {
            return Err(ProtocolError::OversizedPacket(len));
        }

        let start = dst.len();
        dst.resize(start + len, 0);
        let written = packet.encode(&mut dst[start..])?;
        dst.truncate(start + written);

        trace!(kind = %packet.kind(), bytes = written, "Packet encoded");
        Ok(())
    }
}

/// Decode a packet that arrived as one transport message.
///
/// The message must hold exactly one packet: its detected length has to match
/// the message size.
pub fn decode_message(message: &[u8], max_packet_size: usize) -> Result<Packet> {
    let (total, kind) = detect(message).ok_or(ProtocolError::MalformedHeader)?;

    if total > max_packet_size {
        return Err(ProtocolError::OversizedPacket(total));
    }

    if total != message.len() {
        return Err(ProtocolError::MalformedPacket(format!(
            "{} ({} vs {})",
            constants::ERR_PACKET_SIZE_MISMATCH,
            total,
            message.len()
        )));
    }

    let mut packet = kind.instantiate()?;
    packet.decode(message)?;
    Ok(packet)
}

/// Encode a packet into a freshly allocated buffer of exactly `len()` bytes
pub fn encode_message(packet: &Packet) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; packet.len()];
    let written = packet.encode(&mut buf)?;
    buf.truncate(written);
    Ok(buf)
}
