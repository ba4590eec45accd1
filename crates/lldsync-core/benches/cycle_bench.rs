//! # Cycle Benchmarks
//!
//! Discovery cycles against the in-memory store.
//!
//! Run with: `cargo bench -p lldsync-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use lldsync_core::storage::HostRecord;
use lldsync_core::storage::catalog::{ItemPrototypeConfig, RuleConfig};
use lldsync_core::{
    ApplicationPrototype, ApplicationPrototypeId, CycleRequest, DiscoveryConfig, ErrorReport,
    HostId, ItemConfig, ItemText, Lifetime, LldMacros, MemoryStore, Reconciler, Row, RuleId,
    catalog_from_bytes, catalog_to_bytes,
};
use std::hint::black_box;

const HOST: HostId = HostId(1);
const RULE: RuleId = RuleId(10);
const T0: i64 = 1_700_000_000;

/// Three item prototypes sharing one application prototype.
fn store() -> MemoryStore {
    let prototype = |id: u64, name: &str, key: &str| ItemPrototypeConfig {
        id,
        rule_id: RULE.0,
        templates: ItemText {
            name: name.into(),
            key: key.into(),
            ..ItemText::default()
        },
        status: 0,
        config: ItemConfig::default(),
        application_prototypes: vec![200],
        applications: Vec::new(),
    };
    MemoryStore::from_config(&DiscoveryConfig {
        hosts: vec![HostRecord {
            id: HOST,
            name: "bench".into(),
        }],
        rules: vec![RuleConfig {
            id: RULE.0,
            host_id: HOST.0,
            name: "Filesystems".into(),
            lifetime_days: Some(30),
        }],
        item_prototypes: vec![
            prototype(100, "Free on {#FSNAME}", "vfs.fs.size[{#FSNAME},free]"),
            prototype(101, "Used on {#FSNAME}", "vfs.fs.size[{#FSNAME},used]"),
            prototype(102, "Inodes on {#FSNAME}", "vfs.fs.inode[{#FSNAME},pfree]"),
        ],
        application_prototypes: vec![ApplicationPrototype {
            id: ApplicationPrototypeId(200),
            rule_id: RULE,
            name: "Filesystem {#FSNAME}".into(),
        }],
        ..DiscoveryConfig::default()
    })
    .expect("seed")
}

fn rows(count: usize) -> Vec<Row> {
    (0..count)
        .map(|i| Row::new().with("{#FSNAME}", format!("/mnt/vol{i}")))
        .collect()
}

fn run(store: &mut MemoryStore, rows: &mut [Row]) {
    run_at(store, rows, T0);
}

fn run_at(store: &mut MemoryStore, rows: &mut [Row], now: i64) {
    let request = CycleRequest {
        host_id: HOST,
        rule_id: RULE,
        lifetime: Lifetime::days(30),
        now,
    };
    let mut report = ErrorReport::new();
    let _ = Reconciler::run(store, &LldMacros, &request, rows, &mut report);
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_first_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("first_cycle");

    for size in [10, 100, 1000].iter() {
        let seeded = store();
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let mut store = seeded.clone();
                run(&mut store, &mut rows(size));
                black_box(store)
            });
        });
    }

    group.finish();
}

fn bench_steady_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("steady_cycle");

    for size in [10, 100, 1000].iter() {
        let mut seeded = store();
        run(&mut seeded, &mut rows(*size));

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let mut store = seeded.clone();
                run(&mut store, &mut rows(size));
                black_box(store)
            });
        });
    }

    group.finish();
}

/// Half of a link-heavy rule expires: every item carries one link, and the
/// sweep deletes items, applications and links in bulk.
fn bench_link_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("link_churn");
    group.sample_size(10);

    for size in [1000, 5000].iter() {
        let mut seeded = store();
        run(&mut seeded, &mut rows(*size));

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let mut store = seeded.clone();
                run_at(&mut store, &mut rows(size / 2), T0 + 31 * 86_400);
                black_box(store)
            });
        });
    }

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");

    for size in [100, 1000].iter() {
        let mut store = store();
        run(&mut store, &mut rows(*size));
        let bytes = catalog_to_bytes(store.catalog()).expect("encode");

        group.bench_with_input(BenchmarkId::new("encode", size), size, |b, _| {
            b.iter(|| black_box(catalog_to_bytes(store.catalog())));
        });
        group.bench_with_input(BenchmarkId::new("decode", size), size, |b, _| {
            b.iter(|| black_box(catalog_from_bytes(&bytes)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_first_cycle,
    bench_steady_cycle,
    bench_link_churn,
    bench_snapshot
);
criterion_main!(benches);
