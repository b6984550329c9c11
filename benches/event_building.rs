//! Criterion benchmarks for the event-building hot path.
//!
//! Streams are synthesised once with a seeded `MockHitSource` so every iteration
//! sorts identical data.
//!
//! Key metrics:
//! - Stream throughput (records/sec) for increasing run lengths
//! - Cost of the legacy addback pass relative to the clustered one
//!
//! Run with: cargo bench --bench event_building

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rust_mbsort::builder::EventBuilder;
use rust_mbsort::config::{AddbackMode, SortConfig};
use rust_mbsort::gamma::{addback_clustered, addback_legacy, find_singles};
use rust_mbsort::hit::{GammaCandidate, HitRecord};
use rust_mbsort::source::{HitSource, MockHitSource};

fn bench_config() -> SortConfig {
    SortConfig::load_from(concat!(env!("CARGO_MANIFEST_DIR"), "/config/mb_sort.toml")).unwrap()
}

fn mock_stream(config: &SortConfig, events: usize) -> Vec<HitRecord> {
    let mut source = MockHitSource::new(config, Some(42)).with_events_per_poll(events);
    source.poll().unwrap()
}

/// Whole-builder throughput over runs of increasing length.
fn event_builder_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_builder");
    let config = bench_config();

    for events in [1_000, 10_000, 100_000] {
        let records = mock_stream(&config, events);
        group.throughput(Throughput::Elements(records.len() as u64));
        group.bench_with_input(BenchmarkId::new("build", events), &records, |b, records| {
            let mut builder = EventBuilder::new(&config).unwrap();
            b.iter(|| {
                let built = builder.build(records.iter().cloned()).count();
                black_box(built);
            });
        });
    }

    group.finish();
}

/// Addback on a single busy window: every crystal of two clusters fired.
fn addback_modes(c: &mut Criterion) {
    let mut group = c.benchmark_group("addback");

    let hits: Vec<GammaCandidate> = (0..2u8)
        .flat_map(|cluster| {
            (0..3u8).flat_map(move |crystal| {
                (0..7u8).map(move |segment| GammaCandidate {
                    energy: 100.0 + f32::from(cluster * 21 + crystal * 7 + segment),
                    timestamp: 1_000 + u64::from(segment),
                    cluster,
                    crystal,
                    segment,
                })
            })
        })
        .collect();
    let singles = find_singles(&hits);

    group.bench_function("find_singles", |b| b.iter(|| find_singles(black_box(&hits))));
    group.bench_function("clustered", |b| b.iter(|| addback_clustered(black_box(&singles))));
    group.bench_function("legacy", |b| b.iter(|| addback_legacy(black_box(&singles))));

    group.finish();
}

/// Legacy and clustered modes through the full builder.
fn builder_addback_mode(c: &mut Criterion) {
    let mut group = c.benchmark_group("builder_addback_mode");
    let records = mock_stream(&bench_config(), 20_000);

    for mode in [AddbackMode::Clustered, AddbackMode::Legacy] {
        let mut config = bench_config();
        config.builder.addback_mode = mode;
        group.throughput(Throughput::Elements(records.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("build", format!("{mode:?}")),
            &records,
            |b, records| {
                let mut builder = EventBuilder::new(&config).unwrap();
                b.iter(|| black_box(builder.build(records.iter().cloned()).count()));
            },
        );
    }

    group.finish();
}

criterion_group!(benches, event_builder_throughput, addback_modes, builder_addback_mode);
criterion_main!(benches);
