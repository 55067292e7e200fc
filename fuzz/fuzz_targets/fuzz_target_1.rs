#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use mqtt_transport::PacketCodec;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Drive the framing decoder to exhaustion - test for panics and runaway buffering
    let mut codec = PacketCodec::with_max_packet_size(64 * 1024);
    let mut buf = BytesMut::from(data);

    while let Ok(Some(packet)) = codec.decode(&mut buf) {
        assert!(packet.len() <= 64 * 1024);
    }
    let _ = codec.decode_eof(&mut buf);
});
