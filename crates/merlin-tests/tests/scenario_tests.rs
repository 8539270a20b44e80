//! End-to-end scenarios over small hand-checked models.

use approx::assert_abs_diff_eq;
use rustc_hash::FxHashMap;

use merlin_core::infer::bte::{Bte, BteConfig};
use merlin_core::infer::wmb::{Wmb, WmbConfig};
use merlin_core::infer::Engine;
use merlin_core::options::{Algorithm, Task};
use merlin_core::solver::{Outcome, Solver, SolverOptions};
use merlin_tests::{brute_force_logz, chain_bayes, ising_cycle, pairwise_chain, xor_collider};

fn fx_map(pairs: &[(usize, usize)]) -> FxHashMap<usize, usize> {
    pairs.iter().copied().collect()
}

#[test]
fn chain_pr_of_a_normalized_net_is_zero() {
    let solver = Solver::new(
        chain_bayes(),
        SolverOptions {
            algorithm: Algorithm::Bte,
            task: Task::Pr,
            ..Default::default()
        },
    );
    let Outcome::Inference(solution) = solver.run().unwrap() else {
        panic!("expected an inference outcome");
    };
    assert!(solution.status);
    assert_abs_diff_eq!(solution.value, 0.0, epsilon = 1e-9);
}

#[test]
fn chain_marginals_under_evidence() {
    // observing C = 1 gives P(A=0 | C=1) = 0.6·0.25 / 0.35
    for algorithm in [Algorithm::Bte, Algorithm::Cte, Algorithm::Wmb] {
        let mut solver = Solver::new(
            chain_bayes(),
            SolverOptions {
                algorithm,
                task: Task::Mar,
                ibound: 8,
                ..Default::default()
            },
        );
        solver.set_evidence(fx_map(&[(2, 1)]));
        let Outcome::Inference(solution) = solver.run().unwrap() else {
            panic!("expected an inference outcome");
        };
        assert!(solution.status, "{algorithm} reported failure");
        assert_abs_diff_eq!(solution.value, 0.35f64.ln(), epsilon = 1e-6);
        let marginals = solution.marginals.unwrap();
        assert_abs_diff_eq!(
            marginals[0].probabilities[0],
            0.6 * 0.25 / 0.35,
            epsilon = 1e-6
        );
        assert_abs_diff_eq!(
            marginals[0].probabilities[1],
            0.4 * 0.5 / 0.35,
            epsilon = 1e-6
        );
        assert_eq!(marginals[2].probabilities, vec![0.0, 1.0]);
    }
}

#[test]
fn xor_collider_map_under_evidence() {
    // with A = 1 observed the two optima tie at 0.25; the sequential decode
    // with lowest-linear-index argmax settles on B = 1, C = 0
    let mut solver = Solver::new(
        xor_collider(),
        SolverOptions {
            algorithm: Algorithm::Bte,
            task: Task::Map,
            ..Default::default()
        },
    );
    solver.set_evidence(fx_map(&[(0, 1)]));
    let Outcome::Inference(solution) = solver.run().unwrap() else {
        panic!("expected an inference outcome");
    };
    assert_abs_diff_eq!(solution.value, 0.25f64.ln(), epsilon = 1e-9);
    let assignment = solution.solution.unwrap();
    assert_eq!(assignment.len(), 3);
    assert_eq!(assignment[0].value, 1); // the evidence value
    let (b, c) = (assignment[1].value, assignment[2].value);
    assert_eq!(b ^ c, 1, "the decoded pair must satisfy the XOR");
    assert_eq!((b, c), (1, 0));
}

#[test]
fn mmap_over_the_pairwise_chain() {
    // query {X1, X3}, θ = ln 2: max over the query of Σ_{X2} yields the
    // all-ones assignment with value 1·1 + 2·2 = 5
    let mut solver = Solver::new(
        pairwise_chain(2.0f64.ln()),
        SolverOptions {
            algorithm: Algorithm::Bte,
            task: Task::Mmap,
            ..Default::default()
        },
    );
    solver.set_query(vec![0, 2]);
    let Outcome::Inference(solution) = solver.run().unwrap() else {
        panic!("expected an inference outcome");
    };
    assert_abs_diff_eq!(solution.value, 5.0f64.ln(), epsilon = 1e-9);
    let assignment = solution.solution.unwrap();
    assert_eq!(assignment.len(), 2);
    assert_eq!(assignment[0].variable, 0);
    assert_eq!(assignment[0].value, 1);
    assert_eq!(assignment[1].variable, 2);
    assert_eq!(assignment[1].value, 1);
}

#[test]
fn wmb_upper_bounds_the_ising_cycle() {
    let model = ising_cycle(4, 0.5);
    let exact = brute_force_logz(&model);

    let mut bte = Bte::new(
        model.clone(),
        BteConfig {
            task: Task::Pr,
            ..Default::default()
        },
    )
    .unwrap();
    bte.run().unwrap();
    assert_abs_diff_eq!(bte.logz(), exact, epsilon = 1e-6);

    let mut wmb = Wmb::new(
        model,
        WmbConfig {
            task: Task::Pr,
            ibound: Some(2),
            iterations: 10,
            ..Default::default()
        },
    )
    .unwrap();
    wmb.run().unwrap();
    assert!(wmb.logz() >= exact - 1e-9);
    assert!(wmb.logz() - exact < 0.05);
}

#[test]
fn inconsistent_evidence_is_reported_as_data() {
    // force P(evidence) = 0: the collider cannot produce A = 1 when both
    // parents are 0
    let mut solver = Solver::new(
        xor_collider(),
        SolverOptions {
            algorithm: Algorithm::Bte,
            task: Task::Pr,
            ..Default::default()
        },
    );
    solver.set_evidence(fx_map(&[(0, 1), (1, 0), (2, 0)]));
    let Outcome::Inference(solution) = solver.run().unwrap() else {
        panic!("expected an inference outcome");
    };
    assert!(!solution.status);
    assert_eq!(solution.message, "Inconsistent evidence or underflow");
}

#[test]
fn lbp_marginal_estimates_on_the_cycle() {
    let model = ising_cycle(4, 0.5);
    let mut exact = Bte::new(
        model.clone(),
        BteConfig {
            task: Task::Mar,
            ..Default::default()
        },
    )
    .unwrap();
    exact.run().unwrap();
    let reference = exact.marginals().unwrap();

    let mut solver = Solver::new(
        model,
        SolverOptions {
            algorithm: Algorithm::Lbp,
            task: Task::Mar,
            iterations: 50,
            ..Default::default()
        },
    );
    let Outcome::Inference(solution) = solver.run().unwrap() else {
        panic!("expected an inference outcome");
    };
    assert!(solution.status);
    let marginals = solution.marginals.unwrap();
    // a single short loop: the fixed point is biased but close to exact
    for (m, r) in marginals.iter().zip(reference) {
        assert_abs_diff_eq!(m.probabilities[0] + m.probabilities[1], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(m.probabilities[0], r.get(0), epsilon = 0.05);
    }
}

#[test]
fn jglp_map_on_the_cycle_brackets_the_optimum() {
    let mut solver = Solver::new(
        ising_cycle(4, 0.5),
        SolverOptions {
            algorithm: Algorithm::Jglp,
            task: Task::Map,
            ibound: 2,
            iterations: 10,
            ..Default::default()
        },
    );
    solver.set_query(Vec::new());
    let Outcome::Inference(solution) = solver.run().unwrap() else {
        panic!("expected an inference outcome");
    };
    // MAP value: all spins agree on 1, four couplings of e^{0.5}
    let best = merlin_tests::brute_force_map(&ising_cycle(4, 0.5)).1;
    assert!(solution.value >= best - 1e-9);
    let assignment = solution.solution.unwrap();
    let values: Vec<usize> = assignment.iter().map(|a| a.value).collect();
    let decoded = ising_cycle(4, 0.5).log_p(&values);
    assert_abs_diff_eq!(decoded, best, epsilon = 1e-9);
}
