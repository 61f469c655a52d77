//! Benchmarks for the commit/notify path.
//!
//! Run with: cargo bench -p fieldstore --bench notify_bench

use std::cell::Cell;
use std::hint::black_box;
use std::rc::Rc;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use fieldstore::{Middleware, Patch, Store, Subscription, store_state};

store_state! {
    #[derive(Clone, Debug)]
    struct Bench {
        hot: u64 => HOT,
        cold: u64 => COLD,
        label: String => LABEL,
    }
}

fn bench_state() -> Bench {
    Bench {
        hot: 0,
        cold: 0,
        label: String::new(),
    }
}

/// `n` listeners on `hot`, `n` on `cold`.
fn populated(n: usize) -> (Store<Bench>, Vec<Subscription>, Rc<Cell<u64>>) {
    let store = Store::new(bench_state());
    let hits = Rc::new(Cell::new(0));
    let mut subs = Vec::with_capacity(n * 2);
    for _ in 0..n {
        let h = Rc::clone(&hits);
        subs.push(store.subscribe(&[Bench::HOT.id()], move || h.set(h.get() + 1)));
        subs.push(store.subscribe(&[Bench::COLD.id()], || {}));
    }
    (store, subs, hits)
}

fn bench_set_key(c: &mut Criterion) {
    let mut group = c.benchmark_group("store/set_key");

    for n in [1usize, 16, 256] {
        group.throughput(Throughput::Elements(n as u64));
        let (store, _subs, hits) = populated(n);
        let mut next = 0u64;
        group.bench_with_input(BenchmarkId::new("listeners", n), &(), |b, _| {
            b.iter(|| {
                next += 1;
                store.set_key(Bench::HOT, black_box(next));
            });
        });
        black_box(hits.get());
    }

    group.finish();
}

fn bench_identity_no_op(c: &mut Criterion) {
    let (store, _subs, _) = populated(64);
    c.bench_function("store/set_key_unchanged", |b| {
        b.iter(|| store.set_key(Bench::HOT, black_box(0)));
    });
}

fn bench_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("store/batch");

    for writes in [4u64, 64] {
        group.throughput(Throughput::Elements(writes));
        let (store, _subs, _) = populated(16);
        let mut base = 0u64;
        group.bench_with_input(BenchmarkId::new("writes", writes), &writes, |b, &writes| {
            b.iter(|| {
                store.batch(|| {
                    for i in 0..writes {
                        base += 1;
                        store.set_key(Bench::HOT, base + i);
                    }
                });
            });
        });
    }

    group.finish();
}

fn bench_middleware_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("store/middleware");

    for stages in [0usize, 1, 8] {
        let store = Store::new(bench_state());
        let handles: Vec<_> = (0..stages)
            .map(|_| {
                store.add_middleware(Middleware::new(|_, _, next| {
                    next.proceed();
                    Ok(())
                }))
            })
            .collect();
        let mut next = 0u64;
        group.bench_with_input(BenchmarkId::new("stages", stages), &(), |b, _| {
            b.iter(|| {
                next += 1;
                store.set(
                    Patch::new()
                        .with(Bench::HOT, next)
                        .with(Bench::LABEL, String::from("x")),
                );
            });
        });
        drop(handles);
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_set_key,
    bench_identity_no_op,
    bench_batch,
    bench_middleware_chain
);
criterion_main!(benches);
