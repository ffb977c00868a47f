/*!
 * Construction Benchmarks
 *
 * Compare the separate-allocation, combined-allocation and pooled construction paths
 */

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sharedptr::{allocate_shared, make_shared, Global, Pool, SharedPtr};

static POOL: Pool = Pool::new();

fn bench_construct(c: &mut Criterion) {
    let mut group = c.benchmark_group("construct");

    group.bench_function("from_box", |b| {
        b.iter(|| black_box(SharedPtr::from_box(Box::new(black_box([0u64; 4])))))
    });

    group.bench_function("make_shared", |b| {
        b.iter(|| black_box(make_shared(black_box([0u64; 4]))))
    });

    group.bench_function("allocate_shared_global", |b| {
        b.iter(|| black_box(allocate_shared(Global, black_box([0u64; 4])).ok()))
    });

    group.bench_function("allocate_shared_pool", |b| {
        b.iter(|| black_box(allocate_shared(&POOL, black_box([0u64; 4])).ok()))
    });

    group.finish();
}

fn bench_clone_lock(c: &mut Criterion) {
    let mut group = c.benchmark_group("clone_lock");
    let s = make_shared(0u64);
    let w = s.downgrade();

    group.bench_function("clone_drop", |b| b.iter(|| black_box(s.clone())));
    group.bench_function("lock_drop", |b| b.iter(|| black_box(w.lock())));

    group.finish();
}

criterion_group!(benches, bench_construct, bench_clone_lock);
criterion_main!(benches);
