use bytes::BytesMut;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use mqtt_transport::core::codec::{decode_message, encode_message, PacketCodec};
use mqtt_transport::core::packet::{Packet, PacketType, MAX_PACKET_SIZE};
use tokio_util::codec::{Decoder, Encoder};

#[allow(clippy::unwrap_used)]
fn bench_packet_encode_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("packet_encode_decode");
    let body_sizes = [0usize, 64, 512, 4096, 65536, 1024 * 1024];

    for &size in &body_sizes {
        let packet = Packet::new(PacketType::Publish, 0b0010, vec![0u8; size]).unwrap();
        group.throughput(Throughput::Bytes(packet.len() as u64));

        group.bench_function(format!("encode_{size}b"), |b| {
            b.iter_batched(
                || packet.clone(),
                |p| {
                    let mut buf = BytesMut::with_capacity(size + 8);
                    let mut codec = PacketCodec::new();
                    codec.encode(p, &mut buf).unwrap();
                },
                BatchSize::SmallInput,
            )
        });

        group.bench_function(format!("decode_{size}b"), |b| {
            let mut wire = BytesMut::new();
            PacketCodec::new().encode(packet.clone(), &mut wire).unwrap();
            b.iter_batched(
                || wire.clone(),
                |mut buf| {
                    let decoded = PacketCodec::new().decode(&mut buf).unwrap();
                    assert!(decoded.is_some());
                },
                BatchSize::SmallInput,
            )
        });

        group.bench_function(format!("message_roundtrip_{size}b"), |b| {
            b.iter(|| {
                let bytes = encode_message(&packet).unwrap();
                decode_message(&bytes, MAX_PACKET_SIZE).unwrap()
            })
        });
    }

    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_small_packet_burst(c: &mut Criterion) {
    let mut group = c.benchmark_group("small_packet_burst");
    let mut wire = BytesMut::new();
    let mut codec = PacketCodec::new();
    for id in 0..1000u16 {
        codec
            .encode(Packet::ack(PacketType::Puback, id).unwrap(), &mut wire)
            .unwrap();
        codec.encode(Packet::pingreq(), &mut wire).unwrap();
    }

    group.throughput(Throughput::Elements(2000));
    group.bench_function("decode_2000_control_packets", |b| {
        b.iter_batched(
            || wire.clone(),
            |mut buf| {
                let mut codec = PacketCodec::new();
                let mut count = 0;
                while let Some(_packet) = codec.decode(&mut buf).unwrap() {
                    count += 1;
                }
                assert_eq!(count, 2000);
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(benches, bench_packet_encode_decode, bench_small_packet_burst);
criterion_main!(benches);
