//! Benchmarks for the factor algebra and a full WMB propagation.
//!
//! Run with `cargo bench --bench propagation`.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use merlin_core::infer::wmb::{Wmb, WmbConfig};
use merlin_core::infer::Engine;
use merlin_core::model::{Factor, GraphicalModel, ModelKind, Variable, VariableSet};
use merlin_core::options::Task;

fn splitmix(state: &mut u64) -> f64 {
    *state = state
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
    0.05 + ((*state >> 11) as f64) / ((u64::MAX >> 11) as f64)
}

fn random_factor(labels: &[usize], states: usize, seed: u64) -> Factor {
    let scope: VariableSet = labels.iter().map(|&l| Variable::new(l, states)).collect();
    let mut state = seed;
    let values = (0..scope.num_states())
        .map(|_| splitmix(&mut state))
        .collect();
    Factor::new(scope, values).unwrap()
}

fn grid_model(side: usize) -> GraphicalModel {
    let n = side * side;
    let vars: Vec<Variable> = (0..n).map(|i| Variable::new(i, 2)).collect();
    let mut factors = Vec::new();
    let mut seed = 1u64;
    for r in 0..side {
        for c in 0..side {
            let i = r * side + c;
            if c + 1 < side {
                factors.push(random_factor(&[i, i + 1], 2, seed));
                seed += 1;
            }
            if r + 1 < side {
                factors.push(random_factor(&[i, i + side], 2, seed));
                seed += 1;
            }
        }
    }
    GraphicalModel::new(ModelKind::Markov, vars, factors).unwrap()
}

fn bench_factor_product(c: &mut Criterion) {
    let mut group = c.benchmark_group("factor_product");
    for arity in [2usize, 4, 6] {
        let a: Vec<usize> = (0..arity).collect();
        let b: Vec<usize> = (arity / 2..arity + arity / 2).collect();
        let fa = random_factor(&a, 3, 11);
        let fb = random_factor(&b, 3, 23);
        group.bench_with_input(BenchmarkId::from_parameter(arity), &arity, |bench, _| {
            bench.iter(|| black_box(fa.product(black_box(&fb))));
        });
    }
    group.finish();
}

fn bench_wmb_grid(c: &mut Criterion) {
    let mut group = c.benchmark_group("wmb_grid");
    for side in [3usize, 4, 5] {
        let model = grid_model(side);
        group.bench_with_input(BenchmarkId::from_parameter(side), &side, |bench, _| {
            bench.iter(|| {
                let mut engine = Wmb::new(
                    model.clone(),
                    WmbConfig {
                        task: Task::Pr,
                        ibound: Some(2),
                        iterations: 3,
                        ..Default::default()
                    },
                )
                .unwrap();
                engine.run().unwrap();
                black_box(engine.logz())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_factor_product, bench_wmb_grid);
criterion_main!(benches);
