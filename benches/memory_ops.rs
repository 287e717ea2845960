//! Performance benchmarks for core memory operations.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use stratum::memory::{create_memory, get_children, get_memory_by_path};
use stratum::storage::{queries, Store};

fn bench_memory_create(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory_create");
    group.throughput(Throughput::Elements(1));

    group.bench_function("root_note", |b| {
        let store = Store::open_in_memory().unwrap();
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            create_memory(
                &store,
                black_box(""),
                black_box("Test content for benchmarking purposes"),
                0,
                &format!("note-{i}"),
                "core",
            )
            .unwrap()
        })
    });

    group.finish();
}

fn bench_memory_get(c: &mut Criterion) {
    let store = Store::open_in_memory().unwrap();
    for i in 0..1000 {
        create_memory(&store, "", &format!("Memory content number {i}"), 0, &format!("note-{i}"), "core").unwrap();
    }

    let mut group = c.benchmark_group("memory_get");
    group.throughput(Throughput::Elements(1));

    group.bench_function("by_path", |b| {
        let mut i = 0;
        b.iter(|| {
            let path = format!("note-{}", i % 1000);
            i += 1;
            get_memory_by_path(&store, black_box(&path), "core").unwrap()
        })
    });

    group.finish();
}

fn bench_get_children(c: &mut Criterion) {
    let store = Store::open_in_memory().unwrap();
    create_memory(&store, "", "parent content", 0, "parent", "core").unwrap();
    for i in 0..200 {
        create_memory(&store, "parent", &format!("child {i}"), 0, &format!("child-{i}"), "core").unwrap();
    }
    let parent_id = get_memory_by_path(&store, "parent", "core").unwrap().unwrap().id;

    let mut group = c.benchmark_group("get_children");
    for limit_name in ["under_parent"] {
        group.bench_with_input(BenchmarkId::new("scope", limit_name), &parent_id, |b, &id| {
            b.iter(|| get_children(&store, black_box(Some(id)), Some("core")).unwrap())
        });
    }
    group.finish();
}

fn bench_scan_addressable_memories(c: &mut Criterion) {
    let store = Store::open_in_memory().unwrap();
    for i in 0..2000 {
        create_memory(&store, "", &format!("Memory {i} with some longer text to simulate real usage"), 0, &format!("m-{i}"), "core").unwrap();
    }

    c.bench_function("scan_addressable_memories", |b| {
        b.iter(|| {
            store
                .with_connection(|conn| queries::scan_addressable_memories(conn, None, None, None, None))
                .unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_memory_create,
    bench_memory_get,
    bench_get_children,
    bench_scan_addressable_memories,
);

criterion_main!(benches);
