//! Canonicalization throughput for representative path shapes.

use criterion::{Criterion, criterion_group, criterion_main};
use serde_json::{Value, json};
use std::hint::black_box;
use tether_core::Path;

fn ident_descriptor() -> Value {
    json!("session/current")
}

fn query_descriptor() -> Value {
    json!({ "what": "user", "id": 7, "fields": ["name", "email"] })
}

fn deep_descriptor() -> Value {
    json!({
        "what": "search",
        "args": {
            "filters": { "status": "published", "author": { "id": 7 } },
            "sort": [{ "field": "createdAt", "dir": "desc" }],
            "page": { "limit": 50, "offset": 100 },
        },
    })
}

fn bench_canonicalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("canonicalize");

    group.bench_function("ident", |b| {
        let descriptor = ident_descriptor();
        b.iter(|| Path::new(black_box(descriptor.clone())).expect("valid"));
    });

    group.bench_function("query", |b| {
        let descriptor = query_descriptor();
        b.iter(|| Path::new(black_box(descriptor.clone())).expect("valid"));
    });

    group.bench_function("deep", |b| {
        let descriptor = deep_descriptor();
        b.iter(|| Path::new(black_box(descriptor.clone())).expect("valid"));
    });

    group.finish();
}

fn bench_key_compare(c: &mut Criterion) {
    let a = Path::new(deep_descriptor()).expect("valid");
    let b = Path::new(deep_descriptor()).expect("valid");

    c.bench_function("key_compare", |bench| {
        bench.iter(|| black_box(&a) == black_box(&b));
    });
}

criterion_group!(benches, bench_canonicalize, bench_key_compare);
criterion_main!(benches);
