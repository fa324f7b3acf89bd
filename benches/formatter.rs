//! Benchmark suite for the gateway JSON formatter.
//!
//! Isolates formatter performance from decoding and async runtime overhead.

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use hci_sensor_agent::alias::resolve_name;
use hci_sensor_agent::{AliasMap, JsonFormatter, MacAddress, OutputFormatter, SensorEvent};
use std::time::SystemTime;

const TEST_MAC: MacAddress = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
const DEFAULT_NAME: &str = "Sensor display name";

fn event(payload: &[u8]) -> SensorEvent {
    SensorEvent {
        address: TEST_MAC,
        payload: payload.to_vec(),
        timestamp: SystemTime::UNIX_EPOCH,
    }
}

fn bench_format_values(c: &mut Criterion) {
    let mut group = c.benchmark_group("format_value");
    let formatter = JsonFormatter::default();

    group.throughput(Throughput::Elements(1));

    let numeric = event(b"0.48243200");
    group.bench_function("numeric", |b| {
        b.iter(|| black_box(formatter.format(black_box(&numeric), black_box(DEFAULT_NAME))))
    });

    // Falls back to a JSON string and goes through delimiter escaping.
    let text = event(b"<err:42>");
    group.bench_function("text", |b| {
        b.iter(|| black_box(formatter.format(black_box(&text), black_box(DEFAULT_NAME))))
    });

    group.finish();
}

fn bench_alias_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("alias_resolution");

    group.throughput(Throughput::Elements(1));

    let empty_aliases = AliasMap::new();
    group.bench_function("no_alias", |b| {
        b.iter(|| {
            black_box(resolve_name(
                black_box(&TEST_MAC),
                black_box(&empty_aliases),
                DEFAULT_NAME,
            ))
        })
    });

    let mut many_aliases = AliasMap::new();
    for i in 0..100u8 {
        let mac = MacAddress([0x00, 0x00, 0x00, 0x00, 0x00, i]);
        many_aliases.insert(mac, format!("Bed_{}", i));
    }
    many_aliases.insert(TEST_MAC, "Greenhouse".to_string());
    group.bench_function("hit_in_101", |b| {
        b.iter(|| {
            black_box(resolve_name(
                black_box(&TEST_MAC),
                black_box(&many_aliases),
                DEFAULT_NAME,
            ))
        })
    });

    group.finish();
}

criterion_group!(benches, bench_format_values, bench_alias_resolution);
criterion_main!(benches);
