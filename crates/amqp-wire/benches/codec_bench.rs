//! Criterion benchmarks for the AMQP wire codec and frame reassembler.
//!
//! Run with:
//! ```bash
//! cargo bench --package amqp-wire --bench codec_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use amqp_wire::protocol::codec::{read_table, write_table};
use amqp_wire::protocol::frame::{write_body_frame, write_content_header_frame, write_method_frame};
use amqp_wire::{decode_method, BasicProperties, FieldTable, FieldValue, FrameReassembler, Method};

// ── Fixtures ──────────────────────────────────────────────────────────────────

fn make_client_properties() -> FieldTable {
    let mut caps = FieldTable::new();
    for key in [
        "authentication_failure_close",
        "basic.nack",
        "connection.blocked",
        "consumer_cancel_notify",
        "exchange_exchange_bindings",
        "per_consumer_qos",
        "publisher_confirms",
    ] {
        caps.insert(key.to_string(), FieldValue::Bool(true));
    }
    let mut table = FieldTable::new();
    table.insert("product".into(), FieldValue::Str("amqp-client".into()));
    table.insert("version".into(), FieldValue::Str("0.1.0".into()));
    table.insert("platform".into(), FieldValue::Str("Rust".into()));
    table.insert("capabilities".into(), FieldValue::Table(caps));
    table
}

fn make_deliver() -> Method {
    Method::BasicDeliver {
        consumer_tag: "amq.ctag-bench".into(),
        delivery_tag: 42,
        redelivered: false,
        exchange: "events".into(),
        routing_key: "order.created".into(),
    }
}

/// A delivery of `body_len` bytes split into frames of at most `frame_max`.
fn make_delivery_stream(body_len: usize, frame_max: usize) -> Vec<u8> {
    let body = vec![0xAB; body_len];
    let mut buf = Vec::new();
    write_method_frame(&mut buf, 1, &make_deliver()).unwrap();
    write_content_header_frame(&mut buf, 1, body_len as u64, &BasicProperties::default()).unwrap();
    for chunk in body.chunks(frame_max - 8) {
        write_body_frame(&mut buf, 1, chunk);
    }
    buf
}

// ── Benchmarks ────────────────────────────────────────────────────────────────

fn bench_table(c: &mut Criterion) {
    let table = make_client_properties();
    let mut encoded = Vec::new();
    write_table(&mut encoded, &table).unwrap();

    c.bench_function("table/encode", |b| {
        b.iter(|| {
            let mut buf = Vec::with_capacity(512);
            write_table(&mut buf, black_box(&table)).unwrap();
            buf
        })
    });
    c.bench_function("table/decode", |b| {
        b.iter(|| read_table(black_box(&encoded), 0).unwrap())
    });
}

fn bench_method(c: &mut Criterion) {
    let method = make_deliver();
    let mut frame = Vec::new();
    write_method_frame(&mut frame, 1, &method).unwrap();
    let payload = frame[7..frame.len() - 1].to_vec();

    c.bench_function("method/encode_deliver", |b| {
        b.iter(|| {
            let mut buf = Vec::with_capacity(128);
            write_method_frame(&mut buf, 1, black_box(&method)).unwrap();
            buf
        })
    });
    c.bench_function("method/decode_deliver", |b| {
        b.iter(|| decode_method(black_box(&payload)).unwrap())
    });
}

fn bench_reassembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("reassembler");
    let stream = make_delivery_stream(64 * 1024, 4096);

    for chunk_size in [64usize, 1500, 16 * 1024] {
        group.bench_with_input(
            BenchmarkId::new("chunked_delivery", chunk_size),
            &chunk_size,
            |b, &size| {
                b.iter(|| {
                    let mut r = FrameReassembler::default();
                    let mut frames = 0usize;
                    for chunk in stream.chunks(size) {
                        r.push(chunk, |_| frames += 1).unwrap();
                    }
                    frames
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_table, bench_method, bench_reassembly);
criterion_main!(benches);
