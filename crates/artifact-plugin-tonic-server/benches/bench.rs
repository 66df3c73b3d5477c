use artifact_plugin_tonic_server::server::streaming::encoder::{CHUNK_SIZE, encode_stream};
use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use std::io::Cursor;
use tokio::{runtime::Builder, sync::mpsc};

#[derive(Clone, Copy, Debug)]
struct EncodeBenchParams {
    object_size: usize,
    buffer: usize,
}

fn encode_bench(c: &mut Criterion) {
    let object_size_cases = [64 * 1024, CHUNK_SIZE, 16 * CHUNK_SIZE, 64 * CHUNK_SIZE];
    let buffer_cases = [1, 4, 16];

    let mut cases = Vec::new();
    for &object_size in &object_size_cases {
        for &buffer in &buffer_cases {
            cases.push(EncodeBenchParams {
                object_size,
                buffer,
            });
        }
    }
    let rt = Builder::new_multi_thread().enable_all().build().unwrap();

    for params in &cases {
        let body = vec![0xA5_u8; params.object_size];

        let mut group = c.benchmark_group("streaming/encode_stream");
        group.throughput(Throughput::Bytes(params.object_size as u64));

        group.bench_function(
            format!("bytes/{}/buffer/{}", params.object_size, params.buffer),
            |b| {
                b.to_async(&rt).iter(|| run_encode_bench(&body, params.buffer));
            },
        );

        group.finish();
    }
}

/// Encodes `body` while a separate task drains the channel, the way the gRPC
/// transport does.
async fn run_encode_bench(body: &[u8], buffer: usize) {
    let (tx, mut rx) = mpsc::channel(buffer);
    let consumer = tokio::spawn(async move {
        let mut received = 0;
        while let Some(message) = rx.recv().await {
            let message = message.expect("stream error");
            received += message.data.len();
            black_box(message);
        }
        received
    });

    let summary = encode_stream(Cursor::new(body.to_vec()), tx, CHUNK_SIZE)
        .await
        .expect("encode failed");
    let received = consumer.await.expect("consumer panicked");
    assert_eq!(received as u64, summary.bytes);
}

criterion_group!(encode_benches, encode_bench);
criterion_main!(encode_benches);
