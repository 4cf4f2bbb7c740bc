//! Benchmark suite for the advertisement encoders.
//!
//! Isolates binary reconstruction and the two output formats from async
//! runtime overhead to enable precise measurement of the encoding logic.

use ble_gateway::packet::{reconstruct_advertising_data, uuid_from_u16};
use ble_gateway::{AdvertisementEvent, EventFormatter, GprpFormatter, JsonFormatter, MacAddress};
use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::collections::BTreeMap;

const TEST_MAC: MacAddress = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
const GATEWAY_MAC: MacAddress = MacAddress([0xA1, 0xB2, 0xC3, 0xD4, 0xE5, 0xF6]);

/// Advertisement with no payloads (beacon with nothing but an RSSI).
fn minimal_event() -> AdvertisementEvent {
    AdvertisementEvent {
        timestamp_ms: 1_700_000_000_000,
        source_address: TEST_MAC,
        source_name: None,
        signal_strength: -67,
        vendor_data: BTreeMap::new(),
        service_data: BTreeMap::new(),
        service_ids: Vec::new(),
        tx_power: None,
    }
}

/// Advertisement carrying every payload kind at once.
fn rich_event() -> AdvertisementEvent {
    let mut vendor_data = BTreeMap::new();
    vendor_data.insert(0x004C, vec![0x02, 0x15, 0xF7, 0x82, 0x6D, 0xA6]);
    vendor_data.insert(0x0499, vec![0x05, 0x12, 0xFC, 0x53, 0x94, 0xC3, 0x7C]);

    let mut service_data = BTreeMap::new();
    service_data.insert(uuid_from_u16(0x180F), vec![0x64]);
    service_data.insert(uuid_from_u16(0xFE95), vec![0x30, 0x58, 0x5B, 0x05]);

    AdvertisementEvent {
        timestamp_ms: 1_700_000_000_123,
        source_address: TEST_MAC,
        source_name: Some("Sensor-01".to_string()),
        signal_strength: -58,
        vendor_data,
        service_data,
        service_ids: vec![uuid_from_u16(0x180F), uuid_from_u16(0x181A)],
        tx_power: Some(4),
    }
}

/// Benchmark binary advertising-data reconstruction
fn bench_reconstruct(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconstruct_advertising_data");

    group.throughput(Throughput::Elements(1));

    let minimal = minimal_event();
    group.bench_function("minimal", |b| {
        b.iter(|| {
            let blob = reconstruct_advertising_data(black_box(&minimal));
            black_box(blob)
        })
    });

    let rich = rich_event();
    group.bench_function("rich", |b| {
        b.iter(|| {
            let blob = reconstruct_advertising_data(black_box(&rich));
            black_box(blob)
        })
    });

    group.finish();
}

/// Benchmark the two wire formats over the same event
fn bench_output_formats(c: &mut Criterion) {
    let mut group = c.benchmark_group("output_format");
    let gprp = GprpFormatter::new(GATEWAY_MAC, "ble/gateway/data".to_string());
    let json = JsonFormatter;

    group.throughput(Throughput::Elements(1));

    let rich = rich_event();
    group.bench_function("csv_envelope", |b| {
        b.iter(|| {
            let payload = gprp.format(black_box(&rich));
            black_box(payload)
        })
    });

    group.bench_function("full_json", |b| {
        b.iter(|| {
            let payload = json.format(black_box(&rich));
            black_box(payload)
        })
    });

    let minimal = minimal_event();
    group.bench_function("csv_envelope_minimal", |b| {
        b.iter(|| {
            let payload = gprp.format(black_box(&minimal));
            black_box(payload)
        })
    });

    group.finish();
}

criterion_group!(benches, bench_reconstruct, bench_output_formats);
criterion_main!(benches);
