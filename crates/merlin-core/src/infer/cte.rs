//! Clique-tree elimination: exact calibration over the triangulated model.
//!
//! The clique tree is built from the maximal cliques of the triangulated
//! primal graph, joined by a maximum-weight spanning tree on separator
//! sizes (run as a minimum spanning tree with negative weights). The last
//! clique is the root; the message schedule is a reverse BFS, so both
//! passes touch every edge once.
//!
//! Nodes and edges live in two arenas referencing each other by index.
//! Besides plain calibration (PR/MAR) the engine supports
//! evidence-conditioned propagation and the joint-marginal queries that
//! drive the EM E-step.

use std::collections::VecDeque;

use log::debug;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;

use crate::errors::MerlinError;
use crate::infer::Engine;
use crate::model::indexing::{config_to_linear, linear_to_config};
use crate::model::{EvidenceVec, Factor, GraphicalModel, OrderMethod, VariableSet};
use crate::options::Task;
use crate::{Result, MAX_JOINT_SCOPE};

/// Configuration for clique-tree elimination.
#[derive(Debug, Clone)]
pub struct CteConfig {
    /// Inference task (PR or MAR).
    pub task: Task,
    /// Elimination-order heuristic.
    pub order_method: OrderMethod,
    /// Joint-marginal query scope, in the conditioned label space.
    pub query: Vec<usize>,
    /// Seed for the ordering RNG.
    pub seed: u64,
}

impl Default for CteConfig {
    fn default() -> Self {
        CteConfig {
            task: Task::Mar,
            order_method: OrderMethod::MinFill,
            query: Vec::new(),
            seed: 12345678,
        }
    }
}

/// A clique of the tree.
#[derive(Debug, Clone)]
struct Node {
    clique: VariableSet,
    /// Product of the original factors assigned to this clique.
    theta: Factor,
    /// Calibrated belief (valid after `update` / `propagate_evidence`).
    belief: Factor,
    parent: Option<usize>,
    children: Vec<usize>,
    /// Incident edge indices.
    edges: Vec<usize>,
    /// Indices of the assigned original factors.
    originals: Vec<usize>,
}

/// A tree edge directed from a child clique toward the root.
#[derive(Debug, Clone)]
struct TreeEdge {
    child: usize,
    parent: usize,
    sepset: VariableSet,
    /// Message child → parent.
    fwd: Factor,
    /// Message parent → child.
    bwd: Factor,
}

impl TreeEdge {
    fn reset(&mut self) {
        self.fwd = Factor::scalar(1.0);
        self.bwd = Factor::scalar(1.0);
    }
}

/// The clique-tree elimination engine.
pub struct Cte {
    model: GraphicalModel,
    config: CteConfig,
    order: Vec<usize>,
    nodes: Vec<Node>,
    edges: Vec<TreeEdge>,
    /// Edge schedule, leaves first.
    schedule: Vec<usize>,
    root: usize,
    var2clique: Vec<usize>,
    beliefs: Vec<Factor>,
    joint: Option<Factor>,
    logz: f64,
}

impl Cte {
    /// Builds the clique tree for a conditioned model.
    pub fn new(model: GraphicalModel, config: CteConfig) -> Result<Self> {
        if !matches!(config.task, Task::Pr | Task::Mar) {
            return Err(MerlinError::Config(
                "clique-tree elimination answers the PR and MAR tasks only".into(),
            ));
        }
        let mut model = model;

        // a small joint-marginal query rides along as a uniform factor so
        // some clique is guaranteed to contain its whole scope
        if !config.query.is_empty() && config.query.len() <= MAX_JOINT_SCOPE {
            let scope: Result<VariableSet> = config
                .query
                .iter()
                .map(|&q| {
                    if q < model.num_vars() {
                        Ok(model.var(q))
                    } else {
                        Err(MerlinError::Config(format!(
                            "query variable {q} is out of range"
                        )))
                    }
                })
                .collect::<std::result::Result<_, _>>();
            model.add_factor(Factor::constant(scope?, 1.0));
        }

        let mut rng = Xoshiro256StarStar::seed_from_u64(config.seed);
        let order = model.order(config.order_method, None, &mut rng);
        debug!(
            "cte: induced width {} along {:?}",
            model.induced_width(&order),
            order
        );

        let mut graph = model.primal_graph();
        graph.triangulate(&order);
        let cliques = graph.maximal_cliques(&order);

        let mut engine = Cte {
            beliefs: vec![Factor::scalar(1.0); model.num_vars()],
            model,
            config,
            order,
            nodes: Vec::new(),
            edges: Vec::new(),
            schedule: Vec::new(),
            root: 0,
            var2clique: Vec::new(),
            joint: None,
            logz: 0.0,
        };
        engine.build_tree(&cliques)?;
        Ok(engine)
    }

    /// The conditioned model this engine runs on.
    pub fn model(&self) -> &GraphicalModel {
        &self.model
    }

    /// The joint marginal of the last query, if one was computed.
    pub fn joint(&self) -> Option<&Factor> {
        self.joint.as_ref()
    }

    fn build_tree(&mut self, cliques: &[std::collections::BTreeSet<usize>]) -> Result<()> {
        let n = cliques.len();
        self.nodes = cliques
            .iter()
            .map(|c| Node {
                clique: c.iter().map(|&v| self.model.var(v)).collect(),
                theta: Factor::scalar(1.0),
                belief: Factor::scalar(1.0),
                parent: None,
                children: Vec::new(),
                edges: Vec::new(),
                originals: Vec::new(),
            })
            .collect();

        // maximum-weight spanning tree over separator sizes, run as Kruskal
        // on negated weights; disconnected cliques bridge over a large
        // positive weight
        let mut candidates: Vec<(i64, usize, usize)> = Vec::new();
        for i in 0..n {
            for j in i + 1..n {
                let sep = self.nodes[i].clique.intersection(&self.nodes[j].clique);
                let weight = if sep.is_empty() {
                    100_000
                } else {
                    -(sep.len() as i64)
                };
                candidates.push((weight, i, j));
            }
        }
        candidates.sort();

        let mut parent_uf: Vec<usize> = (0..n).collect();
        fn find(uf: &mut Vec<usize>, mut v: usize) -> usize {
            while uf[v] != v {
                uf[v] = uf[uf[v]];
                v = uf[v];
            }
            v
        }
        let mut mst: Vec<Vec<usize>> = vec![Vec::new(); n];
        for &(_, i, j) in &candidates {
            let (ri, rj) = (find(&mut parent_uf, i), find(&mut parent_uf, j));
            if ri != rj {
                parent_uf[ri] = rj;
                mst[i].push(j);
                mst[j].push(i);
            }
        }

        // orient every edge toward the last clique, which becomes the root
        self.root = n.saturating_sub(1);
        let mut visited = vec![false; n];
        let mut stack = vec![self.root];
        visited[self.root] = true;
        while let Some(c) = stack.pop() {
            for &other in &mst[c] {
                if visited[other] {
                    continue;
                }
                visited[other] = true;
                let sepset = self.nodes[other]
                    .clique
                    .intersection(&self.nodes[c].clique);
                let ei = self.edges.len();
                self.edges.push(TreeEdge {
                    child: other,
                    parent: c,
                    sepset,
                    fwd: Factor::scalar(1.0),
                    bwd: Factor::scalar(1.0),
                });
                self.nodes[other].edges.push(ei);
                self.nodes[c].edges.push(ei);
                self.nodes[c].children.push(other);
                self.nodes[other].parent = Some(c);
                stack.push(other);
            }
        }

        // message schedule: edges in BFS-from-root order, reversed so the
        // forward pass starts at the leaves
        let mut bfs = VecDeque::from([self.root]);
        while let Some(c) = bfs.pop_front() {
            for &ei in &self.nodes[c].edges {
                if self.edges[ei].parent == c {
                    self.schedule.push(ei);
                }
            }
            for &child in &self.nodes[c].children {
                bfs.push_back(child);
            }
        }
        self.schedule.reverse();

        // map each variable to the first clique containing it
        self.var2clique = vec![usize::MAX; self.model.num_vars()];
        for (ci, node) in self.nodes.iter().enumerate() {
            for v in node.clique.labels() {
                if self.var2clique[v] == usize::MAX {
                    self.var2clique[v] = ci;
                }
            }
        }

        // allocate every original factor to the first clique covering it
        for fi in 0..self.model.num_factors() {
            let scope = self.model.factor(fi).scope().clone();
            let home = self
                .nodes
                .iter()
                .position(|node| node.clique.is_superset(&scope))
                .ok_or_else(|| {
                    MerlinError::Internal(format!(
                        "no clique covers factor {fi} after triangulation"
                    ))
                })?;
            self.nodes[home].originals.push(fi);
            let theta = self.nodes[home].theta.product(self.model.factor(fi));
            self.nodes[home].theta = theta;
        }

        debug!(
            "cte: {} cliques, {} edges, root {}",
            self.nodes.len(),
            self.edges.len(),
            self.root
        );
        Ok(())
    }

    /// Product of `theta(at)` and every message into `at` except the one
    /// traveling along `skip`, optionally conditioned on evidence.
    fn collect(&self, at: usize, skip: Option<usize>, evidence: Option<&EvidenceVec>) -> Factor {
        let node = &self.nodes[at];
        let mut f = match evidence {
            Some(e) => node.theta.condition_map(e),
            None => node.theta.clone(),
        };
        for &ei in &node.edges {
            if Some(ei) == skip {
                continue;
            }
            let edge = &self.edges[ei];
            let msg = if edge.parent == at {
                &edge.fwd
            } else {
                &edge.bwd
            };
            match evidence {
                Some(e) => f *= &msg.condition_map(e),
                None => f *= msg,
            }
        }
        f
    }

    /// The non-evidence variables a message must eliminate.
    fn eliminator(&self, at: usize, ei: usize, evidence: Option<&EvidenceVec>) -> VariableSet {
        let mut elim = self.nodes[at].clique.difference(&self.edges[ei].sepset);
        if let Some(e) = evidence {
            for v in self.nodes[at].clique.iter() {
                if e.get(v.label()).copied().flatten().is_some() {
                    elim.remove_label(v.label());
                }
            }
        }
        elim
    }

    /// Forward pass, leaves to root.
    fn forward(&mut self, evidence: Option<&EvidenceVec>) {
        for si in 0..self.schedule.len() {
            let ei = self.schedule[si];
            let child = self.edges[ei].child;
            let collected = self.collect(child, Some(ei), evidence);
            let elim = self.eliminator(child, ei, evidence);
            self.edges[ei].fwd = collected.sum_out(&elim);
        }
    }

    /// Backward pass, root to leaves.
    fn backward(&mut self, evidence: Option<&EvidenceVec>) {
        for si in (0..self.schedule.len()).rev() {
            let ei = self.schedule[si];
            let parent = self.edges[ei].parent;
            let collected = self.collect(parent, Some(ei), evidence);
            let elim = self.eliminator(parent, ei, evidence);
            self.edges[ei].bwd = collected.sum_out(&elim);
        }
    }

    /// Both passes.
    pub fn calibrate(&mut self) {
        self.forward(None);
        self.backward(None);
    }

    /// Recomputes clique beliefs, the partition function and the variable
    /// marginals after calibration.
    pub fn update(&mut self) {
        for c in 0..self.nodes.len() {
            self.nodes[c].belief = self.collect(c, None, None);
        }
        self.logz = self.nodes[self.root].belief.sum().ln();

        for v in 0..self.var2clique.len() {
            let vx = self.model.var(v);
            let target = VariableSet::singleton(vx);
            self.beliefs[v] = match self.var2clique[v] {
                usize::MAX => Factor::constant(target, 1.0 / vx.states() as f64),
                ci => {
                    let mut bel = self.nodes[ci].belief.marginal(&target);
                    bel.normalize();
                    bel
                }
            };
        }
    }

    /// Runs both passes conditioned on evidence and recomputes beliefs.
    ///
    /// Returns `Ok(true)` when the evidence has positive probability and
    /// `Ok(false)` otherwise (the run itself still completes cleanly).
    pub fn propagate_evidence(&mut self, evidence: &EvidenceVec) -> Result<bool> {
        self.forward(Some(evidence));
        self.backward(Some(evidence));

        for c in 0..self.nodes.len() {
            self.nodes[c].belief = self.collect(c, None, Some(evidence));
        }
        let pe = self.nodes[self.root].belief.sum();
        self.logz = pe.ln();

        for v in 0..self.var2clique.len() {
            let vx = self.model.var(v);
            let target = VariableSet::singleton(vx);
            self.beliefs[v] = match evidence.get(v).copied().flatten() {
                Some(val) => {
                    let mut point = Factor::constant(target, 0.0);
                    point.set(val, 1.0);
                    point
                }
                None => match self.var2clique[v] {
                    usize::MAX => Factor::constant(target, 1.0 / vx.states() as f64),
                    ci => {
                        let mut bel = self.nodes[ci].belief.marginal(&target);
                        bel.normalize();
                        bel
                    }
                },
            };
        }
        Ok(pe > 0.0)
    }

    /// Joint marginal over a query scope on a calibrated tree.
    ///
    /// When a single clique contains the scope this is one marginalization;
    /// otherwise the relevant clique conditionals are collected along the
    /// paths to the root and re-eliminated with the restriction of the
    /// global order.
    pub fn joint_marginal(&mut self, scope: &VariableSet) -> Result<()> {
        // shallowest cliques (BFS from the root) greedily covering the scope
        let mut chosen: Vec<usize> = Vec::new();
        let mut missing = scope.clone();
        while !missing.is_empty() {
            let mut best: Option<(usize, usize)> = None; // (score, clique)
            let mut bfs = VecDeque::from([self.root]);
            while let Some(c) = bfs.pop_front() {
                let score = self.nodes[c].clique.intersection(&missing).len();
                if score > 0 && best.map_or(true, |(s, _)| score > s) {
                    best = Some((score, c));
                }
                for &child in &self.nodes[c].children {
                    bfs.push_back(child);
                }
            }
            let Some((_, c)) = best else {
                return Err(MerlinError::Internal(format!(
                    "query scope {missing} is not covered by the clique tree"
                )));
            };
            chosen.push(c);
            missing = missing.difference(&self.nodes[c].clique);
        }

        if chosen.len() == 1 {
            let mut marginal = self.nodes[chosen[0]].belief.marginal(scope);
            marginal.normalize();
            self.joint = Some(marginal);
            return Ok(());
        }

        // collect the root belief plus the clique conditionals along every
        // path to the root (each contributing clique counted once)
        let mut factors: Vec<Factor> = vec![self.nodes[self.root].belief.clone()];
        let mut seen = vec![false; self.nodes.len()];
        seen[self.root] = true;
        for &start in &chosen {
            let mut c = start;
            while c != self.root {
                if !seen[c] {
                    seen[c] = true;
                    let up = self.nodes[c]
                        .edges
                        .iter()
                        .copied()
                        .find(|&ei| self.edges[ei].child == c)
                        .ok_or_else(|| {
                            MerlinError::Internal("non-root clique without a parent edge".into())
                        })?;
                    let f = self.nodes[c].belief.quotient(&self.edges[up].fwd)?;
                    factors.push(f);
                }
                c = self.nodes[c].parent.ok_or_else(|| {
                    MerlinError::Internal("non-root clique without a parent".into())
                })?;
            }
        }

        // eliminate everything outside the query with the restriction of
        // the global elimination order
        let mut all_vars = VariableSet::new();
        for f in &factors {
            all_vars = all_vars.union(f.scope());
        }
        let elim_vars = all_vars.difference(scope);
        for &v in &self.order {
            if !elim_vars.contains_label(v) {
                continue;
            }
            let vx = self.model.var(v);
            let mut product = Factor::scalar(1.0);
            let mut rest = Vec::with_capacity(factors.len());
            for f in factors {
                if f.scope().contains(vx) {
                    product *= &f;
                } else {
                    rest.push(f);
                }
            }
            factors = rest;
            factors.push(product.sum_out(&VariableSet::singleton(vx)));
        }

        let mut marginal = Factor::scalar(1.0);
        for f in &factors {
            marginal *= f;
            marginal.normalize();
        }
        self.joint = Some(marginal);
        Ok(())
    }

    /// Joint marginal over a family scope subject to evidence (Bayes nets).
    ///
    /// The scope must be contained in a single clique. Configurations
    /// incompatible with the evidence are zeroed and the rest is scaled by
    /// `1/P(evidence)`, so the result accumulates directly into expected
    /// counts.
    pub fn joint_marginal_with_evidence(
        &mut self,
        scope: &VariableSet,
        evidence: &EvidenceVec,
    ) -> Result<Factor> {
        let home = self
            .nodes
            .iter()
            .position(|n| n.clique.is_superset(scope))
            .ok_or_else(|| {
                MerlinError::Internal(format!(
                    "family scope {scope} is not contained in a single clique"
                ))
            })?;

        let mut belief = self.collect(home, None, Some(evidence));
        let mut keep_out = VariableSet::new();
        for v in self.nodes[home].clique.iter() {
            let observed = evidence.get(v.label()).copied().flatten().is_some();
            if !scope.contains(v) && !observed {
                keep_out.insert(v);
            }
        }
        belief = belief.sum_out(&keep_out);

        let mut marginal = Factor::constant(scope.clone(), 0.0);
        for idx in 0..marginal.len() {
            let mut config = linear_to_config(scope, idx);
            let compatible = config.iter().all(|(&var, &val)| {
                evidence
                    .get(var)
                    .copied()
                    .flatten()
                    .map_or(true, |observed| observed == val)
            });
            if !compatible {
                continue;
            }
            for v in belief.scope().iter() {
                if let Some(val) = evidence.get(v.label()).copied().flatten() {
                    config.insert(v.label(), val);
                }
            }
            let j = config_to_linear(belief.scope(), &config).ok_or_else(|| {
                MerlinError::Internal("belief scope not covered by family config".into())
            })?;
            marginal.set(idx, belief.get(j));
        }

        marginal.scale((-self.logz).exp());
        Ok(marginal)
    }

    /// Installs refreshed factors after an EM M-step: clique potentials are
    /// recomputed in place and every message resets to the identity.
    pub fn reinit(&mut self, factors: &[Factor]) -> Result<()> {
        if factors.len() != self.model.num_factors() {
            return Err(MerlinError::Internal(
                "reinit expects one replacement per original factor".into(),
            ));
        }
        for (i, f) in factors.iter().enumerate() {
            self.model.set_factor(i, f.clone());
        }
        for c in 0..self.nodes.len() {
            let mut theta = Factor::scalar(1.0);
            for &fi in &self.nodes[c].originals {
                theta *= self.model.factor(fi);
            }
            self.nodes[c].theta = theta;
            self.nodes[c].belief = Factor::scalar(1.0);
        }
        for e in &mut self.edges {
            e.reset();
        }
        self.logz = 0.0;
        for b in &mut self.beliefs {
            *b = Factor::scalar(1.0);
        }
        Ok(())
    }
}

impl Engine for Cte {
    fn name(&self) -> &'static str {
        "cte"
    }

    fn run(&mut self) -> Result<()> {
        self.calibrate();
        self.update();
        if !self.config.query.is_empty() {
            let scope: VariableSet = self
                .config
                .query
                .iter()
                .map(|&q| self.model.var(q))
                .collect();
            self.joint_marginal(&scope)?;
        }
        Ok(())
    }

    fn logz(&self) -> f64 {
        self.logz
    }

    fn marginals(&self) -> Option<&[Factor]> {
        (self.config.task == Task::Mar).then_some(&self.beliefs)
    }

    fn joint_marginal(&self) -> Option<&Factor> {
        self.joint.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelKind, Variable};
    use approx::assert_abs_diff_eq;

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
    fn calibration_matches_enumeration() {
        let mut engine = Cte::new(chain(), CteConfig::default()).unwrap();
        engine.run().unwrap();
        assert_abs_diff_eq!(engine.logz(), 0.0, epsilon = 1e-9);
        let beliefs = engine.marginals().unwrap();
        assert_abs_diff_eq!(beliefs[0].get(0), 0.6, epsilon = 1e-9);
        assert_abs_diff_eq!(beliefs[1].get(0), 0.5, epsilon = 1e-9);
    }

    #[test]
    fn running_intersection_holds() {
        let engine = Cte::new(chain(), CteConfig::default()).unwrap();
        // the cliques containing any variable form a connected subtree
        for v in 0..engine.model.num_vars() {
            let vx = engine.model.var(v);
            let holders: Vec<usize> = (0..engine.nodes.len())
                .filter(|&c| engine.nodes[c].clique.contains(vx))
                .collect();
            // walk from each holder toward the root; the first holder hit
            // must be reachable without leaving the holder set
            for &start in &holders {
                let mut c = start;
                let mut crossed_out = false;
                while let Some(p) = engine.nodes[c].parent {
                    let inside = engine.nodes[p].clique.contains(vx);
                    if crossed_out && inside {
                        panic!("holders of variable {v} are disconnected");
                    }
                    crossed_out |= !inside;
                    c = p;
                }
            }
        }
    }

    #[test]
    fn evidence_propagation_reports_probability() {
        let mut engine = Cte::new(chain(), CteConfig::default()).unwrap();
        let evidence: EvidenceVec = vec![None, None, Some(1)];
        let ok = engine.propagate_evidence(&evidence).unwrap();
        assert!(ok);
        // P(C=1) = 0.35 (the S2 scenario)
        assert_abs_diff_eq!(engine.logz(), 0.35f64.ln(), epsilon = 1e-9);
        let beliefs = engine.marginals().unwrap();
        assert_abs_diff_eq!(beliefs[0].get(0), 0.6 * 0.25 / 0.35, epsilon = 1e-9);
        // evidence variables collapse to a point mass
        assert_abs_diff_eq!(beliefs[2].get(1), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn joint_marginal_over_two_variables() {
        let mut engine = Cte::new(
            chain(),
            CteConfig {
                query: vec![0, 1],
                ..Default::default()
            },
        )
        .unwrap();
        engine.run().unwrap();
        let joint = engine.joint().unwrap();
        // P(A=0,B=0) = 0.6 * 0.7
        assert_abs_diff_eq!(joint.get(0), 0.42, epsilon = 1e-9);
        assert_abs_diff_eq!(joint.sum(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn family_marginal_with_evidence_scales_by_its_probability() {
        let mut engine = Cte::new(chain(), CteConfig::default()).unwrap();
        let evidence: EvidenceVec = vec![None, None, Some(1)];
        engine.propagate_evidence(&evidence).unwrap();
        let a = engine.model.var(0);
        let b = engine.model.var(1);
        let scope: VariableSet = [a, b].into_iter().collect();
        let family = engine.joint_marginal_with_evidence(&scope, &evidence).unwrap();
        // entries are P(A,B | C=1); they sum to one
        assert_abs_diff_eq!(family.sum(), 1.0, epsilon = 1e-9);
        // P(A=0,B=0|C=1) = 0.6*0.7*0.1 / 0.35
        assert_abs_diff_eq!(family.get(0), 0.6 * 0.7 * 0.1 / 0.35, epsilon = 1e-9);
    }
}
