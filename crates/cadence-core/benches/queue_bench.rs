//! Criterion benchmarks for the Cadence kernel.
//!
//! Two benchmark groups:
//! - `euler_chain`: 200 stocks in a non-negative chain, 100 Euler steps
//! - `rk4_decay`: 50 independent decaying stocks, 100 RK4 steps

use criterion::{Criterion, criterion_group, criterion_main};
use cadence_core::config::Algorithm;
use cadence_core::model::{FlowDef, Model, StockDef};
use cadence_core::sim::Simulation;
use cadence_core::test_utils::*;

// ===========================================================================
// Model builders
// ===========================================================================

/// `s0 -> s1 -> ... -> s199`, each link draining 10% of its source.
fn build_chain(stocks: usize) -> Simulation {
    let mut ev = FnEvaluator::new();
    let mut model = Model::new(years_config(100.0, 1.0)).unwrap();
    for i in 0..stocks {
        let initial = ev.constant(if i == 0 { 1000.0 } else { 0.0 });
        model
            .add_stock(StockDef::new(format!("s{i}"), initial).non_negative())
            .unwrap();
    }
    for i in 1..stocks {
        let rate = ev.scaled(&format!("s{}", i - 1), 0.1);
        model
            .add_flow(
                FlowDef::new(format!("f{i}"), rate)
                    .from(format!("s{}", i - 1))
                    .to(format!("s{i}")),
            )
            .unwrap();
    }
    Simulation::new(model, ev).unwrap()
}

fn build_decay(stocks: usize) -> Simulation {
    let mut ev = FnEvaluator::new();
    let mut model = Model::new(years_config(100.0, 1.0).with_algorithm(Algorithm::Rk4)).unwrap();
    for i in 0..stocks {
        model
            .add_stock(StockDef::new(format!("s{i}"), ev.constant(100.0)))
            .unwrap();
        let rate = ev.scaled(&format!("s{i}"), 0.05);
        model
            .add_flow(FlowDef::new(format!("f{i}"), rate).from(format!("s{i}")))
            .unwrap();
    }
    Simulation::new(model, ev).unwrap()
}

// ===========================================================================
// Benchmarks
// ===========================================================================

fn bench_euler_chain(c: &mut Criterion) {
    c.bench_function("euler_chain_200x100", |b| {
        b.iter_batched(
            || build_chain(200),
            |mut sim| sim.run().unwrap(),
            criterion::BatchSize::LargeInput,
        );
    });
}

fn bench_rk4_decay(c: &mut Criterion) {
    c.bench_function("rk4_decay_50x100", |b| {
        b.iter_batched(
            || build_decay(50),
            |mut sim| sim.run().unwrap(),
            criterion::BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, bench_euler_chain, bench_rk4_decay);
criterion_main!(benches);
