//! The inference driver.
//!
//! A [`Solver`] owns the original model plus the evidence, query and
//! dataset inputs, validates the task/algorithm matrix, packages virtual
//! evidence into auxiliary indicator variables, conditions the model, runs
//! the selected engine and assembles the [`Solution`] in the original
//! label space (auxiliary indicators filtered out, observed variables
//! reported as point masses).

use std::collections::BTreeSet;

use log::info;
use rustc_hash::FxHashMap;

use crate::errors::MerlinError;
use crate::infer::bte::{Bte, BteConfig};
use crate::infer::cte::{Cte, CteConfig};
use crate::infer::ijgp::{Ijgp, IjgpConfig};
use crate::infer::jglp::{Jglp, JglpConfig};
use crate::infer::lbp::{Lbp, LbpConfig};
use crate::infer::wmb::{Wmb, WmbConfig};
use crate::infer::Engine;
use crate::learn::{EmConfig, EmLearner, Example};
use crate::model::{Factor, GraphicalModel, OrderMethod, VariableSet};
use crate::options::{check_compatibility, Algorithm, InitMethod, OutputFormat, Task};
use crate::solution::{
    JointEntry, JointMarginal, Solution, VariableAssignment, VariableMarginal,
};
use crate::Result;

/// Driver-level options, typically filled from the command line.
#[derive(Debug, Clone)]
pub struct SolverOptions {
    /// Inference algorithm.
    pub algorithm: Algorithm,
    /// Inference task.
    pub task: Task,
    /// Mini-bucket i-bound (0 means unbounded).
    pub ibound: usize,
    /// Iteration cap for the iterative engines and EM.
    pub iterations: usize,
    /// Sample count (accepted for compatibility with sampling builds).
    pub samples: usize,
    /// Wall-clock limit in seconds.
    pub time_limit: Option<f64>,
    /// RNG seed.
    pub seed: u64,
    /// Objective tolerance (EM convergence threshold).
    pub threshold: f64,
    /// Dirichlet equivalent sample size (accepted for compatibility; the
    /// M-step is a plain maximum-likelihood update).
    pub alpha: f64,
    /// CPT initialization for EM.
    pub init_factors: InitMethod,
    /// Output format.
    pub output_format: OutputFormat,
}

impl Default for SolverOptions {
    fn default() -> Self {
        SolverOptions {
            algorithm: Algorithm::Wmb,
            task: Task::Mar,
            ibound: 2,
            iterations: 10,
            samples: 1000,
            time_limit: None,
            seed: 12345678,
            threshold: 1e-6,
            alpha: 5.0,
            init_factors: InitMethod::Uniform,
            output_format: OutputFormat::Uai,
        }
    }
}

/// What a run produced: an inference solution or a learned model.
#[derive(Debug)]
pub enum Outcome {
    /// The solution of a PR/MAR/MAP/MMAP run.
    Inference(Solution),
    /// The model with parameters learned by EM.
    Learned(GraphicalModel),
}

/// The driver.
pub struct Solver {
    options: SolverOptions,
    model: GraphicalModel,
    evidence: FxHashMap<usize, usize>,
    virtual_evidence: Vec<(usize, Vec<f64>)>,
    query: Vec<usize>,
    dataset: Vec<Example>,
}

impl Solver {
    /// A solver over a loaded model.
    pub fn new(model: GraphicalModel, options: SolverOptions) -> Self {
        Solver {
            options,
            model,
            evidence: FxHashMap::default(),
            virtual_evidence: Vec::new(),
            query: Vec::new(),
            dataset: Vec::new(),
        }
    }

    /// Sets hard evidence (variable → value, original labels).
    pub fn set_evidence(&mut self, evidence: FxHashMap<usize, usize>) {
        self.evidence = evidence;
    }

    /// Sets virtual evidence records (variable, likelihood vector).
    pub fn set_virtual_evidence(&mut self, records: Vec<(usize, Vec<f64>)>) {
        self.virtual_evidence = records;
    }

    /// Sets the MMAP / joint-marginal query (original labels).
    pub fn set_query(&mut self, query: Vec<usize>) {
        let mut query = query;
        query.sort_unstable();
        query.dedup();
        self.query = query;
    }

    /// Sets the EM training dataset.
    pub fn set_dataset(&mut self, dataset: Vec<Example>) {
        self.dataset = dataset;
    }

    /// Runs the configured task to completion.
    pub fn run(&self) -> Result<Outcome> {
        check_compatibility(self.options.task, self.options.algorithm)?;
        if self.options.task == Task::Em {
            return self.run_em();
        }

        // package virtual evidence as auxiliary indicators observed at 0
        let mut gm = self.model.clone();
        let mut evidence = self.evidence.clone();
        let mut dummies: BTreeSet<usize> = BTreeSet::new();
        for (x, likelihood) in &self.virtual_evidence {
            if evidence.contains_key(x) {
                return Err(MerlinError::Input(format!(
                    "variable {x} cannot be both virtual and regular evidence"
                )));
            }
            if *x >= gm.num_vars() {
                return Err(MerlinError::Input(format!(
                    "virtual evidence on unknown variable {x}"
                )));
            }
            let xvar = gm.var(*x);
            if likelihood.len() != xvar.states() {
                return Err(MerlinError::Input(format!(
                    "likelihood vector for variable {x} has {} entries, expected {}",
                    likelihood.len(),
                    xvar.states()
                )));
            }
            let uvar = gm.add_variable(2);
            let scope: VariableSet = [xvar, uvar].into_iter().collect();
            let mut f = Factor::constant(scope, 0.0);
            for (k, &l) in likelihood.iter().enumerate() {
                f.set(k, l);
                f.set(k + xvar.states(), 1.0 - l);
            }
            gm.add_factor(f.with_child(uvar.label()));
            evidence.insert(uvar.label(), 0);
            dummies.insert(uvar.label());
        }

        let (conditioned, old2new) = gm.assert_evidence(&evidence)?;
        let log_const = conditioned.log_global_const();
        info!(
            "solver: {} over {} with {} evidence values ({} auxiliary)",
            self.options.task,
            self.options.algorithm,
            evidence.len(),
            dummies.len()
        );

        let mut mapped_query = Vec::with_capacity(self.query.len());
        for &q in &self.query {
            let nq = old2new.get(&q).ok_or_else(|| {
                MerlinError::Config(format!(
                    "query variable {q} is observed or does not exist"
                ))
            })?;
            mapped_query.push(*nq);
        }

        let opts = &self.options;
        let ibound = if opts.ibound == 0 {
            None
        } else {
            Some(opts.ibound)
        };
        let mut engine: Box<dyn Engine> = match opts.algorithm {
            Algorithm::Bte => Box::new(Bte::new(
                conditioned,
                BteConfig {
                    task: opts.task,
                    order_method: OrderMethod::MinFill,
                    query: mapped_query.clone(),
                    seed: opts.seed,
                },
            )?),
            Algorithm::Cte => Box::new(Cte::new(
                conditioned,
                CteConfig {
                    task: opts.task,
                    order_method: OrderMethod::MinFill,
                    query: mapped_query.clone(),
                    seed: opts.seed,
                },
            )?),
            Algorithm::Wmb => Box::new(Wmb::new(
                conditioned,
                WmbConfig {
                    task: opts.task,
                    ibound,
                    iterations: opts.iterations,
                    order_method: OrderMethod::MinFill,
                    query: mapped_query.clone(),
                    seed: opts.seed,
                    stop_obj: -1.0,
                    time_limit: opts.time_limit,
                },
            )?),
            Algorithm::Ijgp => Box::new(Ijgp::new(
                conditioned,
                IjgpConfig {
                    task: opts.task,
                    ibound,
                    iterations: opts.iterations,
                    order_method: OrderMethod::MinFill,
                    seed: opts.seed,
                    stop_obj: -1.0,
                    time_limit: opts.time_limit,
                },
            )?),
            Algorithm::Jglp => Box::new(Jglp::new(
                conditioned,
                JglpConfig {
                    ibound,
                    iterations: opts.iterations,
                    order_method: OrderMethod::MinFill,
                    seed: opts.seed,
                    stop_obj: -1.0,
                    time_limit: opts.time_limit,
                },
            )?),
            Algorithm::Lbp => Box::new(Lbp::new(
                conditioned,
                LbpConfig {
                    stop_iter: opts.iterations,
                    ..Default::default()
                },
            )?),
            Algorithm::Gibbs => {
                return Err(MerlinError::Config(
                    "the Gibbs sampler is not provided by this build".into(),
                ))
            }
        };
        engine.run()?;

        let solution =
            self.build_solution(engine.as_ref(), &gm, &old2new, &evidence, &dummies, log_const)?;
        Ok(Outcome::Inference(solution))
    }

    fn run_em(&self) -> Result<Outcome> {
        if self.dataset.is_empty() {
            return Err(MerlinError::Config(
                "EM learning requires a training dataset".into(),
            ));
        }
        let mut learner = EmLearner::new(
            self.model.clone(),
            self.dataset.clone(),
            EmConfig {
                iterations: self.options.iterations,
                threshold: self.options.threshold,
                init: self.options.init_factors,
                order_method: OrderMethod::MinFill,
                seed: self.options.seed,
            },
        )?;
        learner.run()?;
        Ok(Outcome::Learned(learner.model().clone()))
    }

    /// Assembles the solution in the original label space.
    fn build_solution(
        &self,
        engine: &dyn Engine,
        orig: &GraphicalModel,
        old2new: &FxHashMap<usize, usize>,
        evidence: &FxHashMap<usize, usize>,
        dummies: &BTreeSet<usize>,
        log_const: f64,
    ) -> Result<Solution> {
        let value = engine.logz() + log_const;
        let status = engine.consistent() && value.is_finite() && value.exp() > 0.0;
        let message = if status {
            "Consistent evidence".to_string()
        } else {
            "Inconsistent evidence or underflow".to_string()
        };

        let mut marginals = None;
        if self.options.task == Task::Mar {
            let beliefs = engine.marginals().ok_or_else(|| {
                MerlinError::Internal("engine reported no marginals for a MAR run".into())
            })?;
            let mut out = Vec::new();
            for i in 0..orig.num_vars() {
                if dummies.contains(&i) {
                    continue;
                }
                let v = orig.var(i);
                let probabilities = match evidence.get(&i) {
                    Some(&val) => (0..v.states())
                        .map(|k| if k == val { 1.0 } else { 0.0 })
                        .collect(),
                    None => beliefs[old2new[&i]].values().to_vec(),
                };
                out.push(VariableMarginal {
                    variable: i,
                    states: v.states(),
                    probabilities,
                });
            }
            marginals = Some(out);
        }

        let mut solution = None;
        if matches!(self.options.task, Task::Map | Task::Mmap) {
            let best = engine.best_config().ok_or_else(|| {
                MerlinError::Internal("engine reported no assignment for a MAP run".into())
            })?;
            let assignments = match self.options.task {
                Task::Map => {
                    let mut out = Vec::new();
                    for i in 0..orig.num_vars() {
                        if dummies.contains(&i) {
                            continue;
                        }
                        let value = match evidence.get(&i) {
                            Some(&val) => val,
                            None => best[old2new[&i]],
                        };
                        out.push(VariableAssignment { variable: i, value });
                    }
                    out
                }
                _ => self
                    .query
                    .iter()
                    .map(|&q| VariableAssignment {
                        variable: q,
                        value: best[old2new[&q]],
                    })
                    .collect(),
            };
            solution = Some(assignments);
        }

        let joint_marginal = match engine.joint_marginal() {
            Some(joint) if !self.query.is_empty() => {
                let mut entries = Vec::with_capacity(joint.len());
                for idx in 0..joint.len() {
                    let mut config = Vec::with_capacity(joint.scope().len());
                    let mut rest = idx;
                    for v in joint.scope().iter() {
                        config.push(rest % v.states());
                        rest /= v.states();
                    }
                    entries.push(JointEntry {
                        config,
                        value: joint.get(idx),
                    });
                }
                Some(JointMarginal {
                    scope: self.query.clone(),
                    probabilities: entries,
                })
            }
            _ => None,
        };

        Ok(Solution {
            algorithm: engine.name().to_string(),
            task: self.options.task.to_string(),
            value,
            status,
            message,
            marginals,
            solution,
            joint_marginal,
        })
    }
}
