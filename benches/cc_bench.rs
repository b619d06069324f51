use std::cell::RefCell;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use recycle::{Cc, CollectorContext, SliceBudget, Trace, Tracer};

struct Node {
    next: RefCell<Option<Cc<Node>>>,
}

unsafe impl Trace for Node {
    fn trace(&self, t: &mut Tracer<'_>) {
        self.next.trace(t);
    }
}

fn ring(ctx: &CollectorContext, len: usize) {
    let first = ctx.allocate(Node { next: RefCell::new(None) });
    let mut prev = first.clone();
    for _ in 1..len {
        let n = ctx.allocate(Node { next: RefCell::new(None) });
        *prev.next.borrow_mut() = Some(n.clone());
        prev = n;
    }
    *prev.next.borrow_mut() = Some(first);
}

fn bench_snow_white(c: &mut Criterion) {
    c.bench_function("alloc_drop_100k_ints", |b| {
        b.iter(|| {
            let ctx = CollectorContext::new();
            for i in 0..100_000 {
                let _ = ctx.allocate(i);
            }
            ctx.collector().free_snow_white(true);
        });
    });
}

fn bench_full_collection(c: &mut Criterion) {
    let ctx = CollectorContext::new();
    c.bench_function("collect_ring_10k", |b| {
        b.iter_batched(
            || ring(&ctx, 10_000),
            |()| ctx.collect().unwrap(),
            BatchSize::PerIteration,
        );
    });
}

fn bench_incremental_collection(c: &mut Criterion) {
    let ctx = CollectorContext::new();
    c.bench_function("collect_ring_10k_sliced", |b| {
        b.iter_batched(
            || ring(&ctx, 10_000),
            |()| loop {
                ctx.collect_slice(SliceBudget::time(Duration::from_micros(500)))
                    .unwrap();
                if ctx.collector().is_idle() {
                    break;
                }
            },
            BatchSize::PerIteration,
        );
    });
}

fn bench_live_graph(c: &mut Criterion) {
    c.bench_function("scan_live_ring_10k", |b| {
        let ctx = CollectorContext::new();
        let first = ctx.allocate(Node { next: RefCell::new(None) });
        let mut prev = first.clone();
        for _ in 1..10_000 {
            let n = ctx.allocate(Node { next: RefCell::new(None) });
            *prev.next.borrow_mut() = Some(n.clone());
            prev = n;
        }
        *prev.next.borrow_mut() = Some(first.clone());
        drop(prev);
        b.iter(|| {
            // re-suspect the ring head so every collection rebuilds the graph
            drop(first.clone());
            ctx.collect().unwrap();
        });
    });
}

criterion_group!(
    cc,
    bench_snow_white,
    bench_full_collection,
    bench_incremental_collection,
    bench_live_graph
);
criterion_main!(cc);
