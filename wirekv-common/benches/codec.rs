//! Codec Benchmark for wirekv
//!
//! Measures frame encoding and reply decoding on the hot paths the
//! pipeline exercises.

use std::io::Cursor;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use wirekv_common::{encode_frame, read_reply, CommandFrame};

/// Benchmark command encoding
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_small", |b| {
        let frame = CommandFrame::new("SET").arg("key:1").arg("small_value");
        let mut out = Vec::with_capacity(64);
        b.iter(|| {
            out.clear();
            encode_frame(black_box(&frame), &mut out);
        });
    });

    group.bench_function("set_large", |b| {
        let frame = CommandFrame::new("SET").arg("key:1").arg(vec![b'x'; 64 * 1024]);
        let mut out = Vec::with_capacity(70 * 1024);
        b.iter(|| {
            out.clear();
            encode_frame(black_box(&frame), &mut out);
        });
    });

    group.finish();
}

/// Benchmark reply decoding
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    let bulk = b"$11\r\nhello world\r\n".to_vec();
    group.bench_function("bulk", |b| {
        let mut line = Vec::with_capacity(128);
        b.iter(|| {
            let mut reader = Cursor::new(black_box(&bulk[..]));
            read_reply(&mut reader, &mut line).unwrap()
        });
    });

    // A scan page: cursor plus 100 keys.
    let mut page = b"*2\r\n$3\r\n100\r\n*100\r\n".to_vec();
    for i in 0..100 {
        let key = format!("key:{:05}", i);
        page.extend_from_slice(format!("${}\r\n{}\r\n", key.len(), key).as_bytes());
    }
    group.throughput(Throughput::Elements(100));
    group.bench_function("scan_page", |b| {
        let mut line = Vec::with_capacity(128);
        b.iter(|| {
            let mut reader = Cursor::new(black_box(&page[..]));
            read_reply(&mut reader, &mut line).unwrap()
        });
    });

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
