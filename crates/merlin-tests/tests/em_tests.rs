//! EM learning scenarios: missing data, virtual evidence, convergence.

use approx::assert_abs_diff_eq;

use merlin_core::learn::{EmConfig, EmLearner, Example, Observation};
use merlin_core::model::{Factor, GraphicalModel, ModelKind, Variable, VariableSet};
use merlin_core::options::InitMethod;

/// A → B, both binary.
fn two_node_net() -> GraphicalModel {
    let a = Variable::new(0, 2);
    let b = Variable::new(1, 2);
    let pa = Factor::new(VariableSet::singleton(a), vec![0.5, 0.5])
        .unwrap()
        .with_child(0);
    let pb = Factor::new([a, b].into_iter().collect(), vec![0.5, 0.5, 0.5, 0.5])
        .unwrap()
        .with_child(1);
    GraphicalModel::new(ModelKind::Bayes, vec![a, b], vec![pa, pb]).unwrap()
}

fn observed(values: &[usize]) -> Example {
    values.iter().map(|&v| Observation::Observed(v)).collect()
}

#[test]
fn em_with_missing_data_converges_monotonically() {
    // the incomplete-data scenario: (0,0), (0,1), (1,?), (?,1)
    let dataset: Vec<Example> = vec![
        observed(&[0, 0]),
        observed(&[0, 1]),
        vec![Observation::Observed(1), Observation::Missing],
        vec![Observation::Missing, Observation::Observed(1)],
    ];
    let mut learner = EmLearner::new(
        two_node_net(),
        dataset,
        EmConfig {
            iterations: 10,
            threshold: 0.0,
            ..Default::default()
        },
    )
    .unwrap();
    learner.run().unwrap();

    // the log-likelihood never decreases across epochs
    let trace = learner.trace();
    assert!(trace.len() >= 2);
    for pair in trace.windows(2) {
        assert!(
            pair[1] >= pair[0] - 1e-9,
            "log-likelihood decreased: {pair:?}"
        );
    }

    // and the parameters have settled well below the scenario tolerance
    let last = trace[trace.len() - 1];
    let prev = trace[trace.len() - 2];
    assert!((last - prev).abs() < 1e-4);

    // starting from uniform CPTs the posterior for the missing values stays
    // symmetric, so the fixed point is the empirical mixture
    let model = learner.model();
    let pa0 = model.factor(0).get(0);
    assert!(pa0 > 0.5 && pa0 < 0.8, "P(A=0) drifted to {pa0}");
}

#[test]
fn em_on_complete_data_is_one_shot() {
    let dataset: Vec<Example> = vec![
        observed(&[0, 0]),
        observed(&[0, 1]),
        observed(&[1, 1]),
        observed(&[1, 1]),
    ];
    let mut learner = EmLearner::new(
        two_node_net(),
        dataset,
        EmConfig {
            iterations: 10,
            ..Default::default()
        },
    )
    .unwrap();
    learner.run().unwrap();
    let model = learner.model();
    assert_abs_diff_eq!(model.factor(0).get(0), 0.5, epsilon = 1e-9);
    // P(B=0|A=0) = 1/2, P(B=1|A=1) = 1
    assert_abs_diff_eq!(model.factor(1).get(0), 0.5, epsilon = 1e-9);
    assert_abs_diff_eq!(model.factor(1).get(3), 1.0, epsilon = 1e-9);
}

#[test]
fn virtual_and_hard_evidence_agree() {
    // property 8: a degenerate likelihood vector equals hard evidence, so
    // learning from either dataset lands on the same parameters
    let hard: Vec<Example> = vec![
        observed(&[0, 0]),
        observed(&[1, 1]),
        vec![Observation::Missing, Observation::Observed(1)],
    ];
    let soft: Vec<Example> = vec![
        vec![
            Observation::Observed(0),
            Observation::Virtual(vec![1.0, 0.0]),
        ],
        observed(&[1, 1]),
        vec![Observation::Missing, Observation::Observed(1)],
    ];

    let config = EmConfig {
        iterations: 8,
        init: InitMethod::Uniform,
        ..Default::default()
    };
    let mut a = EmLearner::new(two_node_net(), hard, config.clone()).unwrap();
    a.run().unwrap();
    let mut b = EmLearner::new(two_node_net(), soft, config).unwrap();
    b.run().unwrap();

    for (fa, fb) in a.model().factors().iter().zip(b.model().factors()) {
        for (x, y) in fa.values().iter().zip(fb.values()) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-9);
        }
    }
}

#[test]
fn zero_probability_examples_are_skipped() {
    // a deterministic CPT makes (0, 1) impossible; EM must not abort
    let a = Variable::new(0, 2);
    let b = Variable::new(1, 2);
    let pa = Factor::new(VariableSet::singleton(a), vec![0.5, 0.5])
        .unwrap()
        .with_child(0);
    // B = A exactly
    let pb = Factor::new([a, b].into_iter().collect(), vec![1.0, 0.0, 0.0, 1.0])
        .unwrap()
        .with_child(1);
    let model = GraphicalModel::new(ModelKind::Bayes, vec![a, b], vec![pa, pb]).unwrap();

    let dataset: Vec<Example> = vec![observed(&[0, 1]), observed(&[1, 1])];
    let mut learner = EmLearner::new(
        model,
        dataset,
        EmConfig {
            iterations: 3,
            init: InitMethod::None,
            ..Default::default()
        },
    )
    .unwrap();
    learner.run().unwrap();
    // only the consistent example contributes: P(A=1) row dominates
    assert_abs_diff_eq!(learner.model().factor(0).get(1), 1.0, epsilon = 1e-9);
}
