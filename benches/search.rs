//! Performance benchmarks for the tiered retrieval pipeline.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use stratum::embedding::FallbackEmbedder;
use stratum::memory::create_memory;
use stratum::retrieval::{search_advanced, SearchFilters, SearchMode};
use stratum::storage::Store;

fn setup_store_with_data(count: usize) -> Store {
    let store = Store::open_in_memory().unwrap();

    let sample_contents = [
        "Authentication using JWT tokens and refresh mechanism",
        "Database migration strategy for PostgreSQL",
        "React component lifecycle and hooks optimization",
        "API rate limiting implementation with Redis",
        "Docker container orchestration with Kubernetes",
        "GraphQL schema design best practices",
        "Microservices communication patterns",
        "CI/CD pipeline configuration with GitHub Actions",
        "Memory leak detection in Node.js applications",
        "Rust ownership and borrowing concepts",
    ];

    for i in 0..count {
        let content = format!(
            "{} - variation {i} with additional context about software development",
            sample_contents[i % sample_contents.len()],
        );
        create_memory(&store, "", &content, 0, &format!("m-{i}"), "core").unwrap();
    }

    store
}

fn bench_keyword_search(c: &mut Criterion) {
    let store = setup_store_with_data(1000);

    let mut group = c.benchmark_group("keyword_search");
    let queries = [
        "authentication",
        "database migration",
        "React hooks optimization",
        "API rate limiting Redis",
    ];

    for query in queries {
        group.bench_with_input(BenchmarkId::new("query", query), &query, |b, query| {
            b.iter(|| {
                search_advanced(
                    &store,
                    None,
                    None,
                    black_box(query),
                    SearchMode::Keyword,
                    10,
                    3,
                    &SearchFilters::default(),
                    None,
                )
            })
        });
    }

    group.finish();
}

fn bench_hybrid_search(c: &mut Criterion) {
    let store = setup_store_with_data(1000);
    let embedder = FallbackEmbedder::hash_only(384);

    let mut group = c.benchmark_group("hybrid_search");
    let queries = [
        ("short", "auth"),
        ("medium", "database migration strategy"),
        ("long", "how to implement authentication with JWT tokens and refresh mechanism"),
    ];

    for (name, query) in queries {
        group.bench_with_input(BenchmarkId::new("query_type", name), &query, |b, query| {
            b.iter(|| {
                search_advanced(
                    &store,
                    Some(&embedder),
                    None,
                    black_box(query),
                    SearchMode::Hybrid,
                    10,
                    3,
                    &SearchFilters::default(),
                    None,
                )
            })
        });
    }

    group.finish();
}

fn bench_hash_embedding(c: &mut Criterion) {
    let embedder = FallbackEmbedder::hash_only(384);

    let mut group = c.benchmark_group("hash_embedding");
    let texts = [
        ("short", "hello world"),
        ("medium", "The quick brown fox jumps over the lazy dog"),
        (
            "long",
            "Authentication using JWT tokens requires careful consideration of security best \
             practices including token expiration, refresh token rotation, and secure storage",
        ),
    ];

    for (name, text) in texts {
        group.bench_with_input(BenchmarkId::new("text_length", name), &text, |b, text| {
            b.iter(|| embedder.embed_with_degrade(black_box(text)))
        });
    }

    group.finish();
}

fn bench_search_at_scale(c: &mut Criterion) {
    let mut group = c.benchmark_group("search_scale");
    group.sample_size(20);

    for &size in &[100, 1000, 5000] {
        let store = setup_store_with_data(size);
        let embedder = FallbackEmbedder::hash_only(384);
        let query = "authentication JWT tokens";

        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("memories", size), &query, |b, query| {
            b.iter(|| {
                search_advanced(
                    &store,
                    Some(&embedder),
                    None,
                    black_box(query),
                    SearchMode::Hybrid,
                    10,
                    3,
                    &SearchFilters::default(),
                    None,
                )
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_keyword_search, bench_hybrid_search, bench_hash_embedding, bench_search_at_scale);

criterion_main!(benches);
