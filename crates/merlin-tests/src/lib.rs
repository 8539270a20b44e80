//! Shared model builders for the integration tests.

use merlin_core::model::{Factor, GraphicalModel, ModelKind, Variable, VariableSet};

/// The three-variable chain A → B → C with the usual CPTs:
/// P(A) = (0.6, 0.4), P(B|A) = [[0.7, 0.3], [0.2, 0.8]],
/// P(C|B) = [[0.9, 0.1], [0.4, 0.6]].
pub fn chain_bayes() -> GraphicalModel {
    let a = Variable::new(0, 2);
    let b = Variable::new(1, 2);
    let c = Variable::new(2, 2);
    let pa = Factor::new(VariableSet::singleton(a), vec![0.6, 0.4])
        .unwrap()
        .with_child(0);
    // canonical layout: lower label iterates fastest
    let pb = Factor::new([a, b].into_iter().collect(), vec![0.7, 0.2, 0.3, 0.8])
        .unwrap()
        .with_child(1);
    let pc = Factor::new([b, c].into_iter().collect(), vec![0.9, 0.4, 0.1, 0.6])
        .unwrap()
        .with_child(2);
    GraphicalModel::new(ModelKind::Bayes, vec![a, b, c], vec![pa, pb, pc]).unwrap()
}

/// The XOR collider B → A ← C: uniform priors on B and C, and
/// P(A = b ⊕ c | B = b, C = c) = 1. A is variable 0, B is 1, C is 2.
pub fn xor_collider() -> GraphicalModel {
    let a = Variable::new(0, 2);
    let b = Variable::new(1, 2);
    let c = Variable::new(2, 2);
    let pb = Factor::new(VariableSet::singleton(b), vec![0.5, 0.5])
        .unwrap()
        .with_child(1);
    let pc = Factor::new(VariableSet::singleton(c), vec![0.5, 0.5])
        .unwrap()
        .with_child(2);
    let scope: VariableSet = [a, b, c].into_iter().collect();
    let mut pa = Factor::constant(scope, 0.0);
    // index = a + 2b + 4c
    for bv in 0..2usize {
        for cv in 0..2usize {
            let av = bv ^ cv;
            pa.set(av + 2 * bv + 4 * cv, 1.0);
        }
    }
    GraphicalModel::new(ModelKind::Bayes, vec![a, b, c], vec![pb, pc, pa.with_child(0)]).unwrap()
}

/// A pairwise chain X1 – X2 – X3 with potentials `exp(θ·x_i·x_j)`.
pub fn pairwise_chain(theta: f64) -> GraphicalModel {
    let vars: Vec<Variable> = (0..3).map(|i| Variable::new(i, 2)).collect();
    let e = theta.exp();
    let mk = |u: Variable, w: Variable| {
        Factor::new([u, w].into_iter().collect(), vec![1.0, 1.0, 1.0, e]).unwrap()
    };
    let factors = vec![mk(vars[0], vars[1]), mk(vars[1], vars[2])];
    GraphicalModel::new(ModelKind::Markov, vars, factors).unwrap()
}

/// An Ising cycle of `n` binary variables with couplings `exp(β·x_i·x_j)`.
pub fn ising_cycle(n: usize, beta: f64) -> GraphicalModel {
    let vars: Vec<Variable> = (0..n).map(|i| Variable::new(i, 2)).collect();
    let e = beta.exp();
    let mut factors = Vec::new();
    for i in 0..n {
        let j = (i + 1) % n;
        let scope: VariableSet = [vars[i], vars[j]].into_iter().collect();
        factors.push(Factor::new(scope, vec![1.0, 1.0, 1.0, e]).unwrap());
    }
    GraphicalModel::new(ModelKind::Markov, vars, factors).unwrap()
}

/// Brute-force log partition function by enumerating the joint table.
pub fn brute_force_logz(model: &GraphicalModel) -> f64 {
    let total: usize = model.variables().iter().map(|v| v.states()).product();
    let mut z = 0.0;
    for idx in 0..total {
        let mut config = Vec::with_capacity(model.num_vars());
        let mut rest = idx;
        for v in model.variables() {
            config.push(rest % v.states());
            rest /= v.states();
        }
        z += model.log_p(&config).exp();
    }
    z.ln()
}

/// Brute-force MAP: the best full assignment and its log value.
pub fn brute_force_map(model: &GraphicalModel) -> (Vec<usize>, f64) {
    let total: usize = model.variables().iter().map(|v| v.states()).product();
    let mut best_config = Vec::new();
    let mut best = f64::NEG_INFINITY;
    for idx in 0..total {
        let mut config = Vec::with_capacity(model.num_vars());
        let mut rest = idx;
        for v in model.variables() {
            config.push(rest % v.states());
            rest /= v.states();
        }
        let lp = model.log_p(&config);
        if lp > best {
            best = lp;
            best_config = config;
        }
    }
    (best_config, best)
}
