//! Benchmark for fields-map construction over a cyclic schema.
//!
//! Run with: cargo bench -p scopeql-domain

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use scopeql_domain::model::{ModelConfig, ModelSchema, Registry};
use scopeql_domain::resolver::{
    AllowAllPermission, FieldOperation, PermissionResolver, RequestContext, ResolverConfig,
};

/// Ring of `size` models, each pointing at the next and back at itself.
fn ring_registry(size: usize) -> Arc<Registry> {
    let mut builder = Registry::builder();
    for i in 0..size {
        let schema = ModelSchema::new(format!("m{i}"), "id")
            .scalar("name")
            .scalar("created")
            .json("meta")
            .to_one("next", format!("m{}", (i + 1) % size))
            .to_one("parent", format!("m{i}"))
            .to_many("peers", format!("m{}", (i + size - 1) % size));
        builder = match builder.register(schema, ModelConfig::new().with_provider(AllowAllPermission)) {
            Ok(builder) => builder,
            Err(err) => panic!("registration failed: {err}"),
        };
    }
    match builder.build() {
        Ok(registry) => Arc::new(registry),
        Err(err) => panic!("build failed: {err}"),
    }
}

fn fields_map_benchmark(c: &mut Criterion) {
    let registry = ring_registry(16);
    let mut group = c.benchmark_group("fields_map");

    for depth in [0u32, 2, 5] {
        group.bench_with_input(BenchmarkId::new("bfs", depth), &depth, |b, &depth| {
            b.iter(|| {
                // Fresh resolver per iteration so memoization does not hide the work.
                let resolver = PermissionResolver::new(
                    Arc::clone(&registry),
                    Arc::new(RequestContext::anonymous()),
                    ResolverConfig::default(),
                );
                black_box(resolver.fields_map("m0", FieldOperation::Read, depth, &[]))
            })
        });
    }

    let paths = vec!["next__next__next__next__next__next__name".to_string()];
    group.bench_function("explicit_path", |b| {
        b.iter(|| {
            let resolver = PermissionResolver::new(
                Arc::clone(&registry),
                Arc::new(RequestContext::anonymous()),
                ResolverConfig::default(),
            );
            black_box(resolver.fields_map("m0", FieldOperation::Read, 0, &paths))
        })
    });

    group.finish();
}

criterion_group!(benches, fields_map_benchmark);
criterion_main!(benches);
