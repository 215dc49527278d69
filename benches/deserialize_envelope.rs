/// Benchmarks for inbound envelope parsing, the per-frame hot path of the client.
///
/// Covers single envelopes of typical telemetry shapes, batched frames of growing size,
/// and the malformed frames that are parsed and then dropped.
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use fleet_realtime::Message;
use fleet_realtime::types::parse_messages;

fn bench_single_envelope(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope/single");

    let location_msg = r#"{
        "type": "vehicle_location",
        "payload": {
            "vehicleId": "TRK-1042",
            "lat": 52.520008,
            "lng": 13.404954,
            "heading": 271.5,
            "speedKph": 63.2
        },
        "timestamp": "2026-01-01T12:00:00Z"
    }"#;
    group.throughput(Throughput::Bytes(location_msg.len() as u64));
    group.bench_function("Message::VehicleLocation", |b| {
        b.iter(|| {
            let _: Message = serde_json::from_str(std::hint::black_box(location_msg))
                .expect("Deserialization should succeed");
        });
    });

    let alert_msg = r#"{
        "type": "geofence_alert",
        "payload": {
            "vehicleId": "TRK-1042",
            "zone": { "id": "depot-north", "name": "North depot" },
            "transition": "exit",
            "driver": { "id": "D-77", "name": "Sam Driver" }
        },
        "timestamp": "2026-01-01T12:00:05.250Z"
    }"#;
    group.throughput(Throughput::Bytes(alert_msg.len() as u64));
    group.bench_function("Message::GeofenceAlert", |b| {
        b.iter(|| {
            let _: Message = serde_json::from_str(std::hint::black_box(alert_msg))
                .expect("Deserialization should succeed");
        });
    });

    let pong_msg = r#"{"type":"pong","payload":null,"timestamp":"2026-01-01T12:00:00Z"}"#;
    group.throughput(Throughput::Bytes(pong_msg.len() as u64));
    group.bench_function("parse_messages::Pong", |b| {
        b.iter(|| {
            parse_messages(std::hint::black_box(pong_msg.as_bytes()))
                .expect("Deserialization should succeed")
        });
    });

    group.finish();
}

fn bench_batched_envelopes(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope/batched");

    for size in [1_usize, 10, 100] {
        let batch = format!(
            "[{}]",
            (0..size)
                .map(|index| {
                    format!(
                        r#"{{"type":"vehicle_location","payload":{{"vehicleId":"TRK-{index}","lat":52.52,"lng":13.40}},"timestamp":"2026-01-01T12:00:00Z"}}"#
                    )
                })
                .collect::<Vec<_>>()
                .join(",")
        );

        group.throughput(Throughput::Bytes(batch.len() as u64));
        group.bench_with_input(BenchmarkId::new("parse_messages", size), &batch, |b, batch| {
            b.iter(|| {
                parse_messages(std::hint::black_box(batch.as_bytes()))
                    .expect("Deserialization should succeed")
            });
        });
    }

    group.finish();
}

fn bench_malformed(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope/malformed");

    let cases = [
        ("truncated", r#"{"type":"vehicle_location","payload":{"lat":52"#),
        ("missing_type", r#"{"payload":{},"timestamp":"2026-01-01T12:00:00Z"}"#),
        ("not_json", "invalid json {"),
    ];

    for (name, frame) in cases {
        group.bench_with_input(BenchmarkId::new("parse_messages", name), &frame, |b, frame| {
            b.iter(|| parse_messages(std::hint::black_box(frame.as_bytes())).is_err());
        });
    }

    group.finish();
}

criterion_group!(
    envelope_benches,
    bench_single_envelope,
    bench_batched_envelopes,
    bench_malformed
);
criterion_main!(envelope_benches);
