//! Bucket-tree elimination: exact inference for PR, MAR, MAP and MMAP.
//!
//! The degenerate cluster graph with an unbounded i-bound has exactly one
//! cluster per variable. A single forward pass computes the partition
//! function (or the MAP/MMAP value), the backward pass and update step
//! recover marginals or assignments. Exactness costs time and space
//! exponential in the induced width.

use log::debug;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;

use crate::errors::MerlinError;
use crate::infer::join_graph::JoinGraph;
use crate::infer::Engine;
use crate::model::{Factor, GraphicalModel, OrderMethod, VarKind, VariableSet};
use crate::options::Task;
use crate::Result;

/// Configuration for bucket-tree elimination.
#[derive(Debug, Clone)]
pub struct BteConfig {
    /// Inference task (PR, MAR, MAP or MMAP).
    pub task: Task,
    /// Elimination-order heuristic.
    pub order_method: OrderMethod,
    /// Query (MAX) variables for MAP/MMAP, in the conditioned label space.
    /// An empty query under the MAP task means "all variables".
    pub query: Vec<usize>,
    /// Seed for the ordering RNG.
    pub seed: u64,
}

impl Default for BteConfig {
    fn default() -> Self {
        BteConfig {
            task: Task::Mar,
            order_method: OrderMethod::MinFill,
            query: Vec::new(),
            seed: 12345678,
        }
    }
}

/// The bucket-tree elimination engine.
pub struct Bte {
    model: GraphicalModel,
    config: BteConfig,
    kinds: Vec<VarKind>,
    order: Vec<usize>,
    jg: JoinGraph,
    beliefs: Vec<Factor>,
    best: Vec<usize>,
    logz: f64,
}

impl Bte {
    /// Builds the bucket tree for a conditioned model.
    pub fn new(model: GraphicalModel, config: BteConfig) -> Result<Self> {
        match config.task {
            Task::Pr | Task::Mar | Task::Map | Task::Mmap => {}
            Task::Em => {
                return Err(MerlinError::Config(
                    "bucket-tree elimination does not run the EM task directly".into(),
                ))
            }
        }

        let mut query = config.query.clone();
        if config.task == Task::Map && query.is_empty() {
            query = (0..model.num_vars()).collect();
        }
        let mut kinds = vec![VarKind::Sum; model.num_vars()];
        for &q in &query {
            if q >= kinds.len() {
                return Err(MerlinError::Config(format!(
                    "query variable {q} is out of range"
                )));
            }
            kinds[q] = VarKind::Max;
        }

        let mut rng = Xoshiro256StarStar::seed_from_u64(config.seed);
        let order = model.order(config.order_method, Some(&kinds), &mut rng);
        debug!(
            "bte: induced width {} along {:?}",
            model.induced_width(&order),
            order
        );

        let jg = JoinGraph::build(&model, &order, None, &kinds, false);
        let nvars = model.num_vars();
        Ok(Bte {
            model,
            config: BteConfig { query, ..config },
            kinds,
            order,
            jg,
            beliefs: vec![Factor::scalar(1.0); nvars],
            best: vec![0; nvars],
            logz: 0.0,
        })
    }

    /// The conditioned model this engine runs on.
    pub fn model(&self) -> &GraphicalModel {
        &self.model
    }

    /// Forward (top-down) pass along the elimination order.
    fn forward(&mut self) {
        for &x in &self.order {
            let Some(&a) = self.jg.anchors[x].first() else {
                continue;
            };
            let Some(ei) = self.jg.out_edge(a) else {
                continue;
            };
            let vx = VariableSet::singleton(self.model.var(x));
            let collected = self.jg.collect_forward(a);
            let msg = match self.kinds[x] {
                VarKind::Sum => collected.sum_out(&vx),
                VarKind::Max => collected.max_out(&vx),
            };
            self.jg.edges[ei].fwd = msg;
        }
        self.logz = self.jg.root_bound(None);
    }

    /// Backward (bottom-up) pass along the reversed schedule.
    fn backward(&mut self) -> Result<()> {
        for ei in (0..self.jg.edges.len()).rev() {
            let (_a, b) = (self.jg.edges[ei].from, self.jg.edges[ei].to);
            let elim = self.jg.clusters[b]
                .scope
                .difference(&self.jg.edges[ei].separator);

            let bel = self.jg.belief(b);
            let bel = bel.quotient(&self.jg.edges[ei].fwd)?;
            let msg = match self.config.task {
                Task::Pr | Task::Mar => bel.sum_out(&elim),
                Task::Map => bel.max_out(&elim),
                Task::Mmap => {
                    // one variable at a time, by its elimination role
                    let mut partial = bel;
                    for v in elim.iter() {
                        let single = VariableSet::singleton(v);
                        partial = match self.kinds[v.label()] {
                            VarKind::Sum => partial.sum_out(&single),
                            VarKind::Max => partial.max_out(&single),
                        };
                    }
                    partial
                }
                Task::Em => unreachable!("rejected at construction"),
            };
            self.jg.edges[ei].bwd = msg;
        }
        Ok(())
    }

    /// Recomputes marginals or decodes the MAP/MMAP assignment.
    fn update(&mut self) {
        match self.config.task {
            Task::Mar => {
                for v in 0..self.model.num_vars() {
                    let vx = self.model.var(v);
                    let target = VariableSet::singleton(vx);
                    self.beliefs[v] = match self.jg.anchors[v].first() {
                        Some(&c) => {
                            let mut bel = self.jg.belief(c).marginal(&target);
                            bel.normalize();
                            bel
                        }
                        None => Factor::constant(target, 1.0 / vx.states() as f64),
                    };
                }
            }
            Task::Map | Task::Mmap => self.decode(),
            Task::Pr | Task::Em => {}
        }
    }

    /// Walks the reverse elimination order assigning each MAX variable from
    /// its bucket belief conditioned on the later decisions.
    fn decode(&mut self) {
        for idx in (0..self.order.len()).rev() {
            let x = self.order[idx];
            if self.config.task == Task::Mmap && self.kinds[x] == VarKind::Sum {
                break; // assignment covers only the query variables
            }
            let Some(&a) = self.jg.anchors[x].first() else {
                continue;
            };
            let mut bel = self.jg.collect_forward(a);
            for later in (idx + 1..self.order.len()).rev() {
                let y = self.order[later];
                let vy = self.model.var(y);
                if bel.scope().contains(vy) {
                    bel = bel.condition(vy, self.best[y]);
                }
            }
            self.best[x] = bel.argmax();
        }
    }
}

impl Engine for Bte {
    fn name(&self) -> &'static str {
        "bte"
    }

    fn run(&mut self) -> Result<()> {
        self.forward();
        if self.config.task == Task::Pr {
            return Ok(());
        }
        self.backward()?;
        self.update();
        Ok(())
    }

    fn logz(&self) -> f64 {
        self.logz
    }

    fn marginals(&self) -> Option<&[Factor]> {
        (self.config.task == Task::Mar).then_some(&self.beliefs)
    }

    fn best_config(&self) -> Option<&[usize]> {
        matches!(self.config.task, Task::Map | Task::Mmap).then_some(&self.best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelKind, Variable};
    use approx::assert_abs_diff_eq;

    /// The three-variable chain A→B→C with known CPTs.
    fn chain() -> GraphicalModel {
        let a = Variable::new(0, 2);
        let b = Variable::new(1, 2);
        let c = Variable::new(2, 2);
        let pa = Factor::new(VariableSet::singleton(a), vec![0.6, 0.4]).unwrap();
        let pb = Factor::new([a, b].into_iter().collect(), vec![0.7, 0.2, 0.3, 0.8]).unwrap();
        let pc = Factor::new([b, c].into_iter().collect(), vec![0.9, 0.4, 0.1, 0.6]).unwrap();
        GraphicalModel::new(ModelKind::Bayes, vec![a, b, c], vec![pa, pb, pc]).unwrap()
    }

    #[test]
    fn pr_of_a_normalized_bayes_net_is_zero() {
        let mut engine = Bte::new(
            chain(),
            BteConfig {
                task: Task::Pr,
                ..Default::default()
            },
        )
        .unwrap();
        engine.run().unwrap();
        assert_abs_diff_eq!(engine.logz(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn marginals_sum_to_one_and_match_enumeration() {
        let mut engine = Bte::new(
            chain(),
            BteConfig {
                task: Task::Mar,
                ..Default::default()
            },
        )
        .unwrap();
        engine.run().unwrap();
        let beliefs = engine.marginals().unwrap();
        for bel in beliefs {
            assert_abs_diff_eq!(bel.sum(), 1.0, epsilon = 1e-9);
        }
        // P(A) is its prior
        assert_abs_diff_eq!(beliefs[0].get(0), 0.6, epsilon = 1e-9);
        // P(B) = 0.6*0.7 + 0.4*0.2
        assert_abs_diff_eq!(beliefs[1].get(0), 0.5, epsilon = 1e-9);
    }

    #[test]
    fn map_decodes_the_most_probable_assignment() {
        let mut engine = Bte::new(
            chain(),
            BteConfig {
                task: Task::Map,
                ..Default::default()
            },
        )
        .unwrap();
        engine.run().unwrap();
        let best = engine.best_config().unwrap();
        // brute force: argmax over 8 joint states is (A=1,B=1,C=1): .4*.8*.6
        assert_eq!(best, &[1, 1, 1]);
        let lp = engine.model().log_p(best);
        assert_abs_diff_eq!(engine.logz(), lp, epsilon = 1e-9);
    }

    #[test]
    fn mmap_assigns_only_query_variables() {
        let mut engine = Bte::new(
            chain(),
            BteConfig {
                task: Task::Mmap,
                query: vec![0],
                ..Default::default()
            },
        )
        .unwrap();
        engine.run().unwrap();
        let best = engine.best_config().unwrap();
        // max_a P(a) after summing B, C: P(A=0)=0.6 wins
        assert_eq!(best[0], 0);
        assert_abs_diff_eq!(engine.logz(), 0.6f64.ln(), epsilon = 1e-9);
    }
}
