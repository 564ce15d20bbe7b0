//! Codec benchmarks for tether-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use tether_protocol::{codec, ChannelType, Frame};

fn bench_encode_publish(c: &mut Criterion) {
    let frame = Frame::publish(1, "room1", ChannelType::Message, vec![0u8; 64]);

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(64));
    group.bench_function("publish_64B", |b| b.iter(|| codec::encode(black_box(&frame))));
    group.finish();
}

fn bench_decode_message(c: &mut Criterion) {
    let frame = Frame::message("u1", "room1", ChannelType::Message, vec![0u8; 64]);
    let encoded = codec::encode(&frame).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("message_64B", |b| {
        b.iter(|| codec::decode(black_box(&encoded)))
    });
    group.finish();
}

fn bench_directed_send(c: &mut Criterion) {
    let frame = Frame::publish(9, "peer42", ChannelType::User, vec![0u8; 256]);

    c.bench_function("directed_256B", |b| {
        b.iter(|| {
            let encoded = codec::encode(black_box(&frame)).unwrap();
            codec::decode(black_box(&encoded)).unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_encode_publish,
    bench_decode_message,
    bench_directed_send
);
criterion_main!(benches);
