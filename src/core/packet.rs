//! # MQTT Control Packets
//!
//! Minimal MQTT 3.1.1 control packet model used by the transport.
//!
//! Only the fixed header is interpreted: the packet type, the four flag bits
//! and the variable-length "remaining length". The variable header and payload
//! are carried as an opaque body, so any well-formed packet survives a
//! decode/encode cycle byte for byte.
//!
//! ## Fixed Header
//! ```text
//! [Type(4 bits) | Flags(4 bits)] [Remaining Length (1-4 bytes)] [Body(N)]
//! ```
//!
//! The remaining length uses 7 bits per byte with the high bit as a
//! continuation marker, so the whole fixed header is 2 to 5 bytes long.

use bytes::Bytes;
use std::fmt;

use crate::error::{ProtocolError, Result};

/// Largest value the remaining-length field can express (256 MB - 1)
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Maximum number of bytes in the remaining-length field
pub const MAX_LENGTH_BYTES: usize = 4;

/// Largest possible packet on the wire: fixed header byte, 4 length bytes, body
pub const MAX_PACKET_SIZE: usize = 1 + MAX_LENGTH_BYTES + MAX_REMAINING_LENGTH;

/// MQTT 3.1.1 control packet types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Connect,
    Connack,
    Publish,
    Puback,
    Pubrec,
    Pubrel,
    Pubcomp,
    Subscribe,
    Suback,
    Unsubscribe,
    Unsuback,
    Pingreq,
    Pingresp,
    Disconnect,
    /// Reserved values (0 and 15); cannot be instantiated
    Reserved(u8),
}

impl PacketType {
    /// Map the upper nibble of a fixed header byte to a packet type
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => PacketType::Connect,
            2 => PacketType::Connack,
            3 => PacketType::Publish,
            4 => PacketType::Puback,
            5 => PacketType::Pubrec,
            6 => PacketType::Pubrel,
            7 => PacketType::Pubcomp,
            8 => PacketType::Subscribe,
            9 => PacketType::Suback,
            10 => PacketType::Unsubscribe,
            11 => PacketType::Unsuback,
            12 => PacketType::Pingreq,
            13 => PacketType::Pingresp,
            14 => PacketType::Disconnect,
            other => PacketType::Reserved(other),
        }
    }

    /// Numeric packet type as it appears in the upper nibble
    pub fn as_u8(self) -> u8 {
        match self {
            PacketType::Connect => 1,
            PacketType::Connack => 2,
            PacketType::Publish => 3,
            PacketType::Puback => 4,
            PacketType::Pubrec => 5,
            PacketType::Pubrel => 6,
            PacketType::Pubcomp => 7,
            PacketType::Subscribe => 8,
            PacketType::Suback => 9,
            PacketType::Unsubscribe => 10,
            PacketType::Unsuback => 11,
            PacketType::Pingreq => 12,
            PacketType::Pingresp => 13,
            PacketType::Disconnect => 14,
            PacketType::Reserved(v) => v,
        }
    }

    /// Create an empty packet of this type, ready to be decoded into
    pub fn instantiate(self) -> Result<Packet> {
        match self {
            PacketType::Reserved(v) => Err(ProtocolError::UnknownPacketType(v)),
            kind => Ok(Packet {
                kind,
                flags: kind.required_flags().unwrap_or(0),
                body: Bytes::new(),
            }),
        }
    }

    /// Flag bits required by MQTT 3.1.1, `None` when any value is allowed
    fn required_flags(self) -> Option<u8> {
        match self {
            PacketType::Publish => None,
            PacketType::Pubrel | PacketType::Subscribe | PacketType::Unsubscribe => Some(0b0010),
            _ => Some(0),
        }
    }

    /// Body length required by MQTT 3.1.1, `None` when variable
    fn fixed_body_len(self) -> Option<usize> {
        match self {
            PacketType::Connack
            | PacketType::Puback
            | PacketType::Pubrec
            | PacketType::Pubrel
            | PacketType::Pubcomp
            | PacketType::Unsuback => Some(2),
            PacketType::Pingreq | PacketType::Pingresp | PacketType::Disconnect => Some(0),
            _ => None,
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PacketType::Connect => "CONNECT",
            PacketType::Connack => "CONNACK",
            PacketType::Publish => "PUBLISH",
            PacketType::Puback => "PUBACK",
            PacketType::Pubrec => "PUBREC",
            PacketType::Pubrel => "PUBREL",
            PacketType::Pubcomp => "PUBCOMP",
            PacketType::Subscribe => "SUBSCRIBE",
            PacketType::Suback => "SUBACK",
            PacketType::Unsubscribe => "UNSUBSCRIBE",
            PacketType::Unsuback => "UNSUBACK",
            PacketType::Pingreq => "PINGREQ",
            PacketType::Pingresp => "PINGRESP",
            PacketType::Disconnect => "DISCONNECT",
            PacketType::Reserved(v) => return write!(f, "RESERVED({v})"),
        };
        f.write_str(name)
    }
}

/// Detect the type and total length of the packet starting at `prefix`.
///
/// Returns `None` when the prefix is too short to decide: fewer than two
/// bytes, or a remaining-length field that continues past the end of the
/// prefix. A length field with a continuation bit on its fourth byte never
/// resolves.
pub fn detect(prefix: &[u8]) -> Option<(usize, PacketType)> {
    if prefix.len() < 2 {
        return None;
    }

    let kind = PacketType::from_u8(prefix[0] >> 4);
    let (remaining, length_bytes) = read_remaining_length(&prefix[1..])?;

    Some((1 + length_bytes + remaining, kind))
}

/// Decode a variable-length integer, returning the value and bytes consumed
fn read_remaining_length(buf: &[u8]) -> Option<(usize, usize)> {
    let mut value = 0usize;

    for (i, &byte) in buf.iter().take(MAX_LENGTH_BYTES).enumerate() {
        value |= ((byte & 0x7F) as usize) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }

    None
}

/// Number of bytes needed to encode `len` as a remaining length
fn remaining_length_size(len: usize) -> usize {
    match len {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    }
}

/// A single MQTT control packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    kind: PacketType,
    flags: u8,
    body: Bytes,
}

impl Packet {
    /// Build a packet from its parts, validating flags and body length
    pub fn new(kind: PacketType, flags: u8, body: impl Into<Bytes>) -> Result<Self> {
        let body = body.into();
        validate(kind, flags, body.len())?;
        Ok(Self { kind, flags, body })
    }

    /// PINGREQ (`C0 00`)
    pub fn pingreq() -> Self {
        Self::control(PacketType::Pingreq)
    }

    /// PINGRESP (`D0 00`)
    pub fn pingresp() -> Self {
        Self::control(PacketType::Pingresp)
    }

    /// DISCONNECT (`E0 00`)
    pub fn disconnect() -> Self {
        Self::control(PacketType::Disconnect)
    }

    /// Two-byte acknowledgement carrying a packet identifier
    /// (PUBACK, PUBREC, PUBREL, PUBCOMP or UNSUBACK)
    pub fn ack(kind: PacketType, packet_id: u16) -> Result<Self> {
        let flags = kind.required_flags().unwrap_or(0);
        Self::new(kind, flags, packet_id.to_be_bytes().to_vec())
    }

    fn control(kind: PacketType) -> Self {
        Self {
            kind,
            flags: 0,
            body: Bytes::new(),
        }
    }

    pub fn kind(&self) -> PacketType {
        self.kind
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    /// Variable header and payload
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Serialized length, including the fixed header
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        1 + remaining_length_size(self.body.len()) + self.body.len()
    }

    /// Encode into `dst`, which must hold at least [`Packet::len`] bytes.
    /// Returns the number of bytes written.
    pub fn encode(&self, dst: &mut [u8]) -> Result<usize> {
        let total = self.len();
        if dst.len() < total {
            return Err(ProtocolError::BufferTooSmall {
                needed: total,
                available: dst.len(),
            });
        }

        dst[0] = (self.kind.as_u8() << 4) | (self.flags & 0x0F);

        let mut remaining = self.body.len();
        let mut pos = 1;
        loop {
            let mut byte = (remaining % 128) as u8;
            remaining /= 128;
            if remaining > 0 {
                byte |= 0x80;
            }
            dst[pos] = byte;
            pos += 1;
            if remaining == 0 {
                break;
            }
        }

        dst[pos..total].copy_from_slice(&self.body);
        Ok(total)
    }

    /// Decode a complete packet from `src` into this instance.
    /// Returns the number of bytes consumed.
    pub fn decode(&mut self, src: &[u8]) -> Result<usize> {
        let (total, kind) = detect(src).ok_or(ProtocolError::MalformedHeader)?;

        if kind != self.kind {
            return Err(ProtocolError::MalformedPacket(format!(
                "expected {} but header announces {}",
                self.kind, kind
            )));
        }

        if src.len() < total {
            return Err(ProtocolError::BufferTooSmall {
                needed: total,
                available: src.len(),
            });
        }

        let flags = src[0] & 0x0F;
        // Length fields may be overlong (e.g. 0x80 0x00); the body starts
        // after however many bytes the sender actually used.
        let (remaining, length_bytes) =
            read_remaining_length(&src[1..]).ok_or(ProtocolError::MalformedHeader)?;
        let header_len = 1 + length_bytes;
        validate(kind, flags, remaining)?;

        self.flags = flags;
        self.body = Bytes::copy_from_slice(&src[header_len..total]);
        Ok(total)
    }
}

fn validate(kind: PacketType, flags: u8, body_len: usize) -> Result<()> {
    if let PacketType::Reserved(v) = kind {
        return Err(ProtocolError::UnknownPacketType(v));
    }

    if flags > 0x0F {
        return Err(ProtocolError::MalformedPacket(format!(
            "flags {flags:#x} do not fit in four bits"
        )));
    }

    if let Some(required) = kind.required_flags() {
        if flags != required {
            return Err(ProtocolError::MalformedPacket(format!(
                "{kind} requires flags {required:#06b}, got {flags:#06b}"
            )));
        }
    } else if flags & 0b0110 == 0b0110 {
        return Err(ProtocolError::MalformedPacket(format!(
            "{kind} with QoS 3 is not allowed"
        )));
    }

    if let Some(expected) = kind.fixed_body_len() {
        if body_len != expected {
            return Err(ProtocolError::MalformedPacket(format!(
                "{kind} requires a remaining length of {expected}, got {body_len}"
            )));
        }
    }

    if body_len > MAX_REMAINING_LENGTH {
        return Err(ProtocolError::OversizedPacket(body_len));
    }

    Ok(())
}
