//! Benchmarks for change fan-out and dirty-element flush.
//!
//! Run with: cargo bench -p statemgmt-core

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use statemgmt_core::{HeadlessNativeView, ObservedProperty, StateContext, View};
use std::hint::black_box;
use std::rc::Rc;

fn bench_link_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("property/link_fan_out");

    for n in [1, 8, 64, 256] {
        let ctx = StateContext::default();
        let source = ObservedProperty::new(&ctx, 0_u64, None, Some("source"));
        let links: Vec<_> = (0..n)
            .map(|_| source.create_link(None, None).expect("link from state"))
            .collect();
        let mut next = 0_u64;
        group.bench_with_input(BenchmarkId::new("set", n), &links, |b, _links| {
            b.iter(|| {
                next += 1;
                source.set(black_box(next));
            })
        });
    }

    group.finish();
}

fn bench_rerender(c: &mut Criterion) {
    let mut group = c.benchmark_group("view/rerender");

    for elements in [10, 100, 1000] {
        let ctx = StateContext::default();
        let view = View::new(&ctx, "Bench", Rc::new(HeadlessNativeView::new()), None);
        let count = view.create_state(0_u64, "count");
        for _ in 0..elements {
            let count = count.clone();
            view.observe_component_creation(move |_, _| {
                black_box(count.get());
            });
        }
        let mut next = 0_u64;
        group.bench_function(BenchmarkId::new("all_dependent", elements), |b| {
            b.iter(|| {
                next += 1;
                count.set(next);
                view.rerender();
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_link_fan_out, bench_rerender);
criterion_main!(benches);
