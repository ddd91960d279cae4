//! Codec benchmarks for murmur-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use murmur_protocol::{codec, ClientFrame};

fn bench_encode_small(c: &mut Criterion) {
    let frame = ClientFrame::chat("alice", "x".repeat(64));

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(64));
    group.bench_function("msgpack_64B", |b| {
        b.iter(|| codec::encode(black_box(&frame)))
    });
    group.bench_function("json_64B", |b| {
        b.iter(|| codec::encode_json(black_box(&frame)))
    });
    group.finish();
}

fn bench_decode_small(c: &mut Criterion) {
    let frame = ClientFrame::chat("alice", "x".repeat(64));
    let binary = codec::encode(&frame).unwrap();
    let text = codec::encode_json(&frame).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(binary.len() as u64));
    group.bench_function("msgpack_64B", |b| {
        b.iter(|| codec::decode::<ClientFrame>(black_box(&binary)))
    });
    group.throughput(Throughput::Bytes(text.len() as u64));
    group.bench_function("json_64B", |b| {
        b.iter(|| codec::decode_json::<ClientFrame>(black_box(&text)))
    });
    group.finish();
}

fn bench_roundtrip(c: &mut Criterion) {
    let frame = ClientFrame::private("alice", "bob", "x".repeat(256));

    c.bench_function("roundtrip_private_256B", |b| {
        b.iter(|| {
            let encoded = codec::encode(black_box(&frame)).unwrap();
            codec::decode::<ClientFrame>(black_box(&encoded)).unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_encode_small,
    bench_decode_small,
    bench_roundtrip
);
criterion_main!(benches);
