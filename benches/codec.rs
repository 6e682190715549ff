//! Codec benchmark suite.
//!
//! Measures payload formatting and parsing for typical notification sizes,
//! plus a full publish through the in-memory broker.
//!
//! Run with: cargo bench --bench codec
//! Results saved to: target/criterion/

use std::hint::black_box;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use serde_json::{Value, json};
use tokio::runtime::Runtime;

use resilient_notifier::{BrokerDriver, ExchangeKind, MemoryBroker, codec};

// ============================================================================
// Benchmark Parameters
// ============================================================================

const FIELD_COUNTS: &[usize] = &[1, 16, 256];

fn payload(fields: usize) -> Value {
    let map = (0..fields)
        .map(|i| (format!("field_{i}"), json!({"id": i, "label": "notification"})))
        .collect();
    Value::Object(map)
}

// ============================================================================
// Benchmark: Format / Parse
// ============================================================================

fn bench_format(c: &mut Criterion) {
    let mut group = c.benchmark_group("format");

    for &fields in FIELD_COUNTS {
        let value = payload(fields);
        group.bench_with_input(BenchmarkId::new("object", fields), &value, |b, v| {
            b.iter(|| codec::format(black_box(v)));
        });
    }

    let text = Value::String("plain notification text".into());
    group.bench_function("string", |b| b.iter(|| codec::format(black_box(&text))));

    group.finish();
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");

    for &fields in FIELD_COUNTS {
        let text = codec::format(&payload(fields));
        group.bench_with_input(BenchmarkId::new("object", fields), &text, |b, t| {
            b.iter(|| codec::parse(black_box(t)));
        });
    }

    group.bench_function("invalid_json", |b| {
        b.iter(|| codec::parse(black_box("not json at all")));
    });

    group.finish();
}

// ============================================================================
// Benchmark: Publish Round Trip
// ============================================================================

fn bench_memory_publish(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let broker = MemoryBroker::new();

    let driver = rt.block_on(async {
        let driver = BrokerDriver::builder()
            .transport(broker.transport())
            .build()
            .expect("driver");
        driver.connect().await.expect("connect");
        driver
            .create_channel("bench", ExchangeKind::Fanout)
            .await
            .expect("channel");
        driver
            .subscribe("bench", Arc::new(|msg| drop(black_box(msg))))
            .await
            .expect("subscribe");
        driver
    });

    let message = payload(16);
    c.bench_function("memory_publish", |b| {
        b.to_async(&rt)
            .iter(|| async { driver.publish("bench", &message).await.expect("publish") });
    });
}

criterion_group!(benches, bench_format, bench_parse, bench_memory_publish);
criterion_main!(benches);
