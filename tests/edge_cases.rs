//! Edge case tests for packet boundaries and error reporting
//!
//! Covers remaining-length encoding boundaries, empty bodies, the protocol
//! maximum and error formatting.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use mqtt_transport::core::codec::{decode_message, encode_message};
use mqtt_transport::core::packet::{
    detect, Packet, PacketType, MAX_PACKET_SIZE, MAX_REMAINING_LENGTH,
};
use mqtt_transport::error::ProtocolError;

// ============================================================================
// PACKET EDGE CASES
// ============================================================================

#[test]
fn test_packet_empty_body() {
    let packet = Packet::new(PacketType::Publish, 0, Vec::new()).unwrap();
    assert_eq!(packet.len(), 2);

    let bytes = encode_message(&packet).unwrap();
    assert_eq!(bytes, vec![0x30, 0x00]);
    assert_eq!(decode_message(&bytes, MAX_PACKET_SIZE).unwrap(), packet);
}

#[test]
fn test_remaining_length_boundaries() {
    // (body length, length field bytes)
    let boundaries = [
        (127usize, 1usize),
        (128, 2),
        (16_383, 2),
        (16_384, 3),
        (2_097_151, 3),
        (2_097_152, 4),
    ];

    for (body_len, field_len) in boundaries {
        let packet = Packet::new(PacketType::Publish, 0, vec![0u8; body_len]).unwrap();
        assert_eq!(packet.len(), 1 + field_len + body_len, "body {body_len}");

        let bytes = encode_message(&packet).unwrap();
        let (total, kind) = detect(&bytes[..1 + field_len]).unwrap();
        assert_eq!(total, bytes.len());
        assert_eq!(kind, PacketType::Publish);
        assert_eq!(detect(&bytes[..field_len]), None, "body {body_len}");
    }
}

#[test]
fn test_detect_at_protocol_maximum() {
    let (total, _) = detect(&[0x30, 0xFF, 0xFF, 0xFF, 0x7F]).unwrap();
    assert_eq!(total, MAX_PACKET_SIZE);
    assert_eq!(MAX_PACKET_SIZE, 1 + 4 + MAX_REMAINING_LENGTH);
}

#[test]
fn test_overlong_length_field_accepted() {
    // Zero remaining length padded to two bytes
    let mut packet = PacketType::Pingreq.instantiate().unwrap();
    assert_eq!(packet.decode(&[0xC0, 0x80, 0x00]).unwrap(), 3);
    assert_eq!(packet, Packet::pingreq());
}

#[test]
fn test_every_reserved_nibble_rejected() {
    for byte in [0x00u8, 0x0F, 0xF0, 0xFF] {
        let err = decode_message(&[byte, 0x00], MAX_PACKET_SIZE).unwrap_err();
        assert!(
            matches!(err, ProtocolError::UnknownPacketType(_)),
            "{byte:#x}: {err}"
        );
    }
}

#[test]
fn test_control_packets_with_flags_rejected() {
    for bytes in [[0xC1u8, 0x00], [0xD8, 0x00], [0xE2, 0x00]] {
        assert!(matches!(
            decode_message(&bytes, MAX_PACKET_SIZE),
            Err(ProtocolError::MalformedPacket(_))
        ));
    }
}

#[test]
fn test_ack_types() {
    let pubrel = Packet::ack(PacketType::Pubrel, 0xBEEF).unwrap();
    assert_eq!(pubrel.flags(), 0b0010);
    assert_eq!(encode_message(&pubrel).unwrap(), vec![0x62, 0x02, 0xBE, 0xEF]);

    // Types with a fixed empty body cannot carry an identifier
    assert!(Packet::ack(PacketType::Pingreq, 1).is_err());
}

#[test]
fn test_packet_type_display() {
    assert_eq!(PacketType::Connect.to_string(), "CONNECT");
    assert_eq!(PacketType::Unsubscribe.to_string(), "UNSUBSCRIBE");
    assert_eq!(PacketType::from_u8(15).to_string(), "RESERVED(15)");
}

// ============================================================================
// ERROR PROPAGATION EDGE CASES
// ============================================================================

#[test]
fn test_error_display_formatting() {
    let errors = vec![
        ProtocolError::ConnectionClosed,
        ProtocolError::MalformedHeader,
        ProtocolError::UnknownPacketType(0),
        ProtocolError::MalformedPacket("bad".into()),
        ProtocolError::OversizedPacket(999),
        ProtocolError::BufferTooSmall {
            needed: 4,
            available: 2,
        },
        ProtocolError::WebSocket("closed".into()),
        ProtocolError::ProxyHeader("bad".into()),
        ProtocolError::Timeout,
        ProtocolError::Io(std::io::Error::other("test error")),
    ];

    for err in errors {
        let display_str = format!("{err}");
        assert!(!display_str.is_empty(), "Error should have display format");
    }
}

#[test]
fn test_only_connection_closed_is_expected() {
    assert!(ProtocolError::ConnectionClosed.is_expected_close());
    assert!(!ProtocolError::MalformedHeader.is_expected_close());
    assert!(!ProtocolError::Io(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        "eof"
    ))
    .is_expected_close());
}

#[test]
fn test_websocket_errors_map_to_protocol_errors() {
    use tokio_tungstenite::tungstenite::error::CapacityError;
    use tokio_tungstenite::tungstenite::Error as WsError;

    assert!(ProtocolError::from(WsError::ConnectionClosed).is_expected_close());
    assert!(ProtocolError::from(WsError::AlreadyClosed).is_expected_close());
    assert!(matches!(
        ProtocolError::from(WsError::Io(std::io::Error::other("reset"))),
        ProtocolError::Io(_)
    ));
    assert!(matches!(
        ProtocolError::from(WsError::Capacity(CapacityError::MessageTooLong {
            size: 10,
            max_size: 5
        })),
        ProtocolError::WebSocket(_)
    ));
}
