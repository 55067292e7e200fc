use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use mqtt_transport::core::codec::PacketCodec;
use mqtt_transport::core::packet::{Packet, PacketType};
use mqtt_transport::stream::PacketStream;
use mqtt_transport::transport::FramedTransport;
use tokio::runtime::Runtime;

async fn pipe(packets: usize, body: usize) {
    let (a, b) = tokio::io::duplex(64 * 1024);
    let (a_read, a_write) = tokio::io::split(a);
    let (b_read, b_write) = tokio::io::split(b);

    let left =
        PacketStream::new(FramedTransport::buffered(a_read, a_write, PacketCodec::new())).await;
    let right =
        PacketStream::new(FramedTransport::buffered(b_read, b_write, PacketCodec::new())).await;

    #[allow(clippy::unwrap_used)]
    let packet = Packet::new(PacketType::Publish, 0, vec![0u8; body]).unwrap();

    let producer = {
        let left = left.clone();
        tokio::spawn(async move {
            for _ in 0..packets {
                left.send(packet.clone()).await;
            }
        })
    };

    for _ in 0..packets {
        right.recv().await;
    }

    let _ = producer.await;
    left.close().await;
    right.close().await;
}

fn bench_stream_throughput(c: &mut Criterion) {
    #[allow(clippy::expect_used)]
    let rt = Runtime::new().expect("tokio runtime");
    let mut group = c.benchmark_group("stream_throughput");
    group.sample_size(20);

    for &body in &[0usize, 256, 4096] {
        let packets = 1000;
        group.throughput(Throughput::Elements(packets as u64));
        group.bench_function(format!("{packets}_packets_{body}b"), |b| {
            b.iter(|| rt.block_on(pipe(packets, body)))
        });
    }

    group.finish();
}

fn bench_stream_lifecycle(c: &mut Criterion) {
    #[allow(clippy::expect_used)]
    let rt = Runtime::new().expect("tokio runtime");

    c.bench_function("stream_open_close", |b| {
        b.iter(|| {
            rt.block_on(async {
                let (a, _b) = tokio::io::duplex(1024);
                let (read, write) = tokio::io::split(a);
                let stream =
                    PacketStream::new(FramedTransport::buffered(read, write, PacketCodec::new()))
                        .await;
                stream.close().await;
            })
        })
    });
}

criterion_group!(benches, bench_stream_throughput, bench_stream_lifecycle);
criterion_main!(benches);
