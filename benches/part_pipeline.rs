use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use futures::executor::block_on;
use futures::stream::{self, StreamExt};
use std::io;

use upflow_core::stream::{ByteCounter, PartBuffer};

const PART_SIZE: usize = 4 * 1024 * 1024;

fn chunked(chunk_size: usize) -> Vec<Bytes> {
    let data = Bytes::from(vec![0xA5u8; PART_SIZE]);
    (0..PART_SIZE)
        .step_by(chunk_size)
        .map(|start| data.slice(start..(start + chunk_size).min(PART_SIZE)))
        .collect()
}

fn bench_count_and_buffer(c: &mut Criterion) {
    let mut group = c.benchmark_group("part_pipeline");
    group.throughput(Throughput::Bytes(PART_SIZE as u64));

    for chunk_size in [8 * 1024, 64 * 1024, 1024 * 1024] {
        let chunks = chunked(chunk_size);

        group.bench_with_input(
            BenchmarkId::new("count_and_hash", chunk_size),
            &chunks,
            |b, chunks| {
                b.iter(|| {
                    let body = stream::iter(chunks.iter().cloned().map(Ok::<_, io::Error>));
                    let mut counter = ByteCounter::new(body);
                    block_on(async {
                        while let Some(chunk) = counter.next().await {
                            black_box(chunk.ok());
                        }
                    });
                    black_box(counter.digest())
                })
            },
        );

        group.bench_with_input(
            BenchmarkId::new("buffer_and_take", chunk_size),
            &chunks,
            |b, chunks| {
                b.iter(|| {
                    let mut buffer = PartBuffer::new();
                    for chunk in chunks {
                        buffer.push(chunk.clone());
                    }
                    black_box(buffer.take().map(|body| body.len()))
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_count_and_buffer);
criterion_main!(benches);
