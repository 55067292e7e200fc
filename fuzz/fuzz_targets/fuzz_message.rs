#![no_main]

use libfuzzer_sys::fuzz_target;
use mqtt_transport::core::codec::{decode_message, encode_message};

fuzz_target!(|data: &[u8]| {
    // Anything accepted as a message must re-encode cleanly
    if let Ok(packet) = decode_message(data, data.len().max(2)) {
        let encoded = encode_message(&packet).expect("decoded packet re-encodes");
        assert_eq!(encoded.len(), packet.len());
    }
});
