//! Performance benchmarks for line framing.
//!
//! Run benchmarks with:
//! ```sh
//! cargo bench --bench framing_bench
//! ```

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use walrus_protocol::{Charset, Framer, FramingEngine, LineFramer};

fn crlf_framer() -> LineFramer {
    LineFramer::new("\r\n", Charset::Iso8859_1)
}

/// A burst of reader responses, as seen during a scan.
fn response_stream(lines: usize) -> Vec<u8> {
    let mut stream = Vec::new();
    for i in 0..lines {
        stream.extend_from_slice(b"101:OK WITH TEXT\r\n");
        stream.extend_from_slice(format!("2004A3C1{:02X}\r\n", i % 256).as_bytes());
    }
    stream
}

fn bench_extract_single(c: &mut Criterion) {
    let mut group = c.benchmark_group("extract_single");
    group.throughput(Throughput::Elements(1));

    group.bench_function("extract_single_line", |b| {
        b.iter(|| {
            let mut engine = FramingEngine::new(crlf_framer());
            engine.feed(black_box(b"101:OK WITH TEXT\r\n"));
            black_box(engine.try_extract_next());
        });
    });

    group.finish();
}

fn bench_format_outgoing(c: &mut Criterion) {
    let mut group = c.benchmark_group("format_outgoing");
    group.throughput(Throughput::Elements(1));

    let framer = crlf_framer();
    let command = "CONFIG?".to_string();

    group.bench_function("format_command", |b| {
        b.iter(|| black_box(framer.format_outgoing(black_box(&command)).unwrap()));
    });

    group.finish();
}

fn bench_chunked_stream(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunked_stream");
    let stream = response_stream(50);
    group.throughput(Throughput::Bytes(stream.len() as u64));

    for chunk_size in [1, 8, 64, 512] {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("chunk_{chunk_size}_bytes")),
            &chunk_size,
            |b, &chunk_size| {
                b.iter(|| {
                    let mut engine = FramingEngine::new(crlf_framer());
                    let mut count = 0;
                    for chunk in stream.chunks(chunk_size) {
                        engine.feed(chunk);
                        while engine.try_extract_next().is_some() {
                            count += 1;
                        }
                    }
                    black_box(count)
                });
            },
        );
    }

    group.finish();
}

fn bench_bytewise(c: &mut Criterion) {
    let mut group = c.benchmark_group("bytewise");
    let bytes: Vec<u8> = (0..=255).collect();
    group.throughput(Throughput::Bytes(bytes.len() as u64));

    group.bench_function("bytewise_256_bytes", |b| {
        b.iter(|| {
            let mut framer = crlf_framer();
            framer.set_bytewise(true);
            let mut engine = FramingEngine::new(framer);
            engine.feed(&bytes);
            while let Some(message) = engine.try_extract_next() {
                black_box(message);
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_extract_single,
    bench_format_outgoing,
    bench_chunked_stream,
    bench_bytewise,
);

criterion_main!(benches);
