//! The factored joint distribution and its structural queries.
//!
//! A [`GraphicalModel`] owns an ordered sequence of factors over a fixed set
//! of variables. On top of that it provides the structural pipeline every
//! engine starts from: greedy elimination orderings (min-fill, min-width,
//! weighted min-fill, random), induced width, the pseudo tree, and evidence
//! conditioning, which produces a *new* densely renumbered model together
//! with the old → new label map.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use rustc_hash::FxHashMap;

use crate::errors::MerlinError;
use crate::model::factor::Factor;
use crate::model::graph::Graph;
use crate::model::variable::{Variable, VariableSet};
use crate::model::EvidenceVec;
use crate::Result;

/// Kind of input model: directed (Bayes net with CPTs) or undirected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// Bayesian network; each factor carries a child tag.
    Bayes,
    /// Markov random field.
    Markov,
}

/// Greedy heuristics for constructing an elimination order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderMethod {
    /// Minimize the number of fill-in edges.
    #[default]
    MinFill,
    /// Minimize the current degree.
    MinWidth,
    /// Minimize fill-in weighted by the product of endpoint cardinalities.
    WeightedMinFill,
    /// A uniformly random permutation.
    Random,
}

impl fmt::Display for OrderMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrderMethod::MinFill => "MinFill",
            OrderMethod::MinWidth => "MinWidth",
            OrderMethod::WeightedMinFill => "WeightedMinFill",
            OrderMethod::Random => "Random",
        };
        f.write_str(name)
    }
}

impl FromStr for OrderMethod {
    type Err = MerlinError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "MinFill" | "minfill" => Ok(OrderMethod::MinFill),
            "MinWidth" | "minwidth" => Ok(OrderMethod::MinWidth),
            "WeightedMinFill" | "weightedminfill" => Ok(OrderMethod::WeightedMinFill),
            "Random" | "random" => Ok(OrderMethod::Random),
            other => Err(MerlinError::Config(format!(
                "unknown ordering method '{other}'"
            ))),
        }
    }
}

/// Elimination role of a variable: summed out or maximized over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    /// Marginalized variable.
    Sum,
    /// Query (MAP) variable; eliminated last and by maximization.
    Max,
}

/// A discrete graphical model: variables plus an ordered factor list.
///
/// Factor indices are stable for the lifetime of a model instance. Evidence
/// conditioning does not mutate in place: it builds a fresh instance with a
/// renumbering map. Constant factors produced along the way are folded into
/// a global constant kept in log space.
#[derive(Debug, Clone)]
pub struct GraphicalModel {
    kind: ModelKind,
    variables: Vec<Variable>,
    factors: Vec<Factor>,
    log_global_const: f64,
}

impl GraphicalModel {
    /// Builds a model, checking that every factor scope refers to a known
    /// variable with a matching cardinality.
    pub fn new(kind: ModelKind, variables: Vec<Variable>, factors: Vec<Factor>) -> Result<Self> {
        for (i, v) in variables.iter().enumerate() {
            if v.label() != i {
                return Err(MerlinError::Input(format!(
                    "variable labels must be dense, found {} at position {}",
                    v.label(),
                    i
                )));
            }
        }
        for (fi, f) in factors.iter().enumerate() {
            for v in f.scope().iter() {
                match variables.get(v.label()) {
                    Some(known) if known.states() == v.states() => {}
                    Some(known) => {
                        return Err(MerlinError::Input(format!(
                            "factor {} declares variable {} with {} states, model has {}",
                            fi,
                            v.label(),
                            v.states(),
                            known.states()
                        )))
                    }
                    None => {
                        return Err(MerlinError::Input(format!(
                            "factor {} mentions unknown variable {}",
                            fi,
                            v.label()
                        )))
                    }
                }
            }
        }
        Ok(GraphicalModel {
            kind,
            variables,
            factors,
            log_global_const: 0.0,
        })
    }

    /// Whether the model is a Bayesian network.
    pub fn is_bayes(&self) -> bool {
        self.kind == ModelKind::Bayes
    }

    /// The model kind.
    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    /// Number of variables.
    pub fn num_vars(&self) -> usize {
        self.variables.len()
    }

    /// The variable with a given label.
    pub fn var(&self, label: usize) -> Variable {
        self.variables[label]
    }

    /// All variables in label order.
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    /// Number of factors.
    pub fn num_factors(&self) -> usize {
        self.factors.len()
    }

    /// The factor list in declaration order.
    pub fn factors(&self) -> &[Factor] {
        &self.factors
    }

    /// A single factor.
    pub fn factor(&self, idx: usize) -> &Factor {
        &self.factors[idx]
    }

    /// Replaces a factor, keeping its index.
    pub fn set_factor(&mut self, idx: usize, f: Factor) {
        self.factors[idx] = f;
    }

    /// Appends a factor, returning its index.
    pub fn add_factor(&mut self, f: Factor) -> usize {
        self.factors.push(f);
        self.factors.len() - 1
    }

    /// Appends a fresh variable (used when packaging virtual evidence),
    /// returning it.
    pub fn add_variable(&mut self, states: usize) -> Variable {
        let v = Variable::new(self.variables.len(), states);
        self.variables.push(v);
        v
    }

    /// The log of the global constant folded out of the factor list.
    pub fn log_global_const(&self) -> f64 {
        self.log_global_const
    }

    /// Indices of factors whose scope contains the variable.
    pub fn with_variable(&self, v: Variable) -> Vec<usize> {
        self.factors
            .iter()
            .enumerate()
            .filter(|(_, f)| f.scope().contains(v))
            .map(|(i, _)| i)
            .collect()
    }

    /// The primal (moral) graph of the factor scopes.
    pub fn primal_graph(&self) -> Graph {
        let scopes: Vec<VariableSet> = self.factors.iter().map(|f| f.scope().clone()).collect();
        Graph::from_scopes(self.num_vars(), &scopes)
    }

    /// Evaluates the log joint at a full assignment (indexed by label).
    pub fn log_p(&self, config: &[usize]) -> f64 {
        let mut logp = self.log_global_const;
        for f in &self.factors {
            let strides = f.strides();
            let mut idx = 0usize;
            for (pos, v) in f.scope().iter().enumerate() {
                idx += config[v.label()] * strides[pos];
            }
            logp += f.get(idx).ln();
        }
        logp
    }

    // ---- orderings --------------------------------------------------------

    /// Constructs an elimination order with a greedy heuristic.
    ///
    /// When `kinds` is given, [`VarKind::Max`] variables are constrained to
    /// the end of the order (they are eliminated last). Ties prefer the
    /// smaller label.
    pub fn order<R: Rng + ?Sized>(
        &self,
        method: OrderMethod,
        kinds: Option<&[VarKind]>,
        rng: &mut R,
    ) -> Vec<usize> {
        let n = self.num_vars();
        let graph = self.primal_graph();
        let mut adj: Vec<std::collections::BTreeSet<usize>> = (0..n)
            .map(|v| graph.neighbors(v).collect())
            .collect();
        let mut remaining: std::collections::BTreeSet<usize> = (0..n).collect();
        let mut order = Vec::with_capacity(n);

        while !remaining.is_empty() {
            // Max variables wait until every Sum variable is gone.
            let sum_left = kinds.map_or(true, |k| {
                remaining.iter().any(|&v| k[v] == VarKind::Sum)
            });
            let eligible: Vec<usize> = remaining
                .iter()
                .copied()
                .filter(|&v| match kinds {
                    Some(k) if sum_left => k[v] == VarKind::Sum,
                    _ => true,
                })
                .collect();

            let pick = match method {
                OrderMethod::Random => eligible[rng.gen_range(0..eligible.len())],
                _ => {
                    let mut best = eligible[0];
                    let mut best_score = self.elim_score(method, best, &adj);
                    for &v in &eligible[1..] {
                        let score = self.elim_score(method, v, &adj);
                        if score < best_score {
                            best = v;
                            best_score = score;
                        }
                    }
                    best
                }
            };

            // connect the neighborhood of the eliminated variable
            let nbrs: Vec<usize> = adj[pick].iter().copied().collect();
            for i in 0..nbrs.len() {
                for j in i + 1..nbrs.len() {
                    adj[nbrs[i]].insert(nbrs[j]);
                    adj[nbrs[j]].insert(nbrs[i]);
                }
            }
            for &u in &nbrs {
                adj[u].remove(&pick);
            }
            adj[pick].clear();
            remaining.remove(&pick);
            order.push(pick);
        }
        order
    }

    fn elim_score(
        &self,
        method: OrderMethod,
        v: usize,
        adj: &[std::collections::BTreeSet<usize>],
    ) -> f64 {
        match method {
            OrderMethod::MinWidth => adj[v].len() as f64,
            OrderMethod::MinFill | OrderMethod::WeightedMinFill => {
                let nbrs: Vec<usize> = adj[v].iter().copied().collect();
                let mut score = 0.0;
                for i in 0..nbrs.len() {
                    for j in i + 1..nbrs.len() {
                        if !adj[nbrs[i]].contains(&nbrs[j]) {
                            score += if method == OrderMethod::MinFill {
                                1.0
                            } else {
                                (self.var(nbrs[i]).states() * self.var(nbrs[j]).states()) as f64
                            };
                        }
                    }
                }
                score
            }
            OrderMethod::Random => 0.0,
        }
    }

    /// Induced width of an order, measured on the triangulated graph.
    pub fn induced_width(&self, order: &[usize]) -> usize {
        self.primal_graph().induced_width(order)
    }

    /// The pseudo tree of an order: the parent of `v` is its latest-in-order
    /// earlier neighbor in the triangulated graph; a variable with no earlier
    /// neighbor is a root (`None`).
    pub fn pseudo_tree(&self, order: &[usize]) -> Vec<Option<usize>> {
        let mut g = self.primal_graph();
        g.triangulate(order);
        let mut position = vec![0usize; order.len()];
        for (i, &v) in order.iter().enumerate() {
            position[v] = i;
        }
        let mut parents = vec![None; self.num_vars()];
        for &v in order {
            parents[v] = g
                .neighbors(v)
                .filter(|&u| position[u] < position[v])
                .max_by_key(|&u| position[u]);
        }
        parents
    }

    // ---- evidence ---------------------------------------------------------

    /// Conditions the model on observed values and removes the observed
    /// variables. Returns the new model (remaining variables densely
    /// renumbered) and the old → new label map. Factors that collapse to
    /// constants are folded into the global constant, kept in log space.
    pub fn assert_evidence(
        &self,
        evidence: &FxHashMap<usize, usize>,
    ) -> Result<(GraphicalModel, FxHashMap<usize, usize>)> {
        for (&var, &val) in evidence {
            match self.variables.get(var) {
                Some(v) if val < v.states() => {}
                Some(v) => {
                    return Err(MerlinError::Input(format!(
                        "evidence value {} out of range for variable {} ({} states)",
                        val,
                        var,
                        v.states()
                    )))
                }
                None => {
                    return Err(MerlinError::Input(format!(
                        "evidence on unknown variable {var}"
                    )))
                }
            }
        }

        let mut old2new = FxHashMap::default();
        let mut variables = Vec::new();
        let mut evid_vec: EvidenceVec = vec![None; self.num_vars()];
        for v in &self.variables {
            match evidence.get(&v.label()) {
                Some(&val) => evid_vec[v.label()] = Some(val),
                None => {
                    let new = Variable::new(variables.len(), v.states());
                    old2new.insert(v.label(), new.label());
                    variables.push(new);
                }
            }
        }

        let mut log_const = self.log_global_const;
        let mut factors = Vec::new();
        for f in &self.factors {
            let conditioned = f.condition_map(&evid_vec);
            if conditioned.is_scalar() {
                log_const += conditioned.get(0).ln();
                continue;
            }
            let scope: VariableSet = conditioned
                .scope()
                .iter()
                .map(|v| Variable::new(old2new[&v.label()], v.states()))
                .collect();
            let mut nf = Factor::new(scope, conditioned.values().to_vec())?;
            if let Some(child) = f.child() {
                if let Some(&new_child) = old2new.get(&child) {
                    nf.set_child(new_child);
                }
            }
            factors.push(nf);
        }

        let mut model = GraphicalModel::new(self.kind, variables, factors)?;
        model.log_global_const = log_const;
        Ok((model, old2new))
    }

    // ---- CPT initialization ----------------------------------------------

    /// Resets every child-tagged CPT to the uniform distribution over its
    /// child variable.
    pub fn uniform_bayes(&mut self) {
        for f in &mut self.factors {
            if let Some(child) = f.child() {
                let flat = Factor::constant(f.scope().clone(), 1.0);
                *f = normalize_rows(flat, child).with_child(child);
            }
        }
    }

    /// Resets every child-tagged CPT to random rows drawn from a positive
    /// distribution and normalized over the child variable.
    pub fn random_bayes<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        for f in &mut self.factors {
            if let Some(child) = f.child() {
                let mut draw = Factor::constant(f.scope().clone(), 0.0);
                for v in draw.values_mut() {
                    *v = rng.gen::<f64>().max(f64::MIN_POSITIVE);
                }
                *f = normalize_rows(draw, child).with_child(child);
            }
        }
    }
}

/// Normalizes a nonnegative table into a CPT: every row (a fixed parent
/// configuration) sums to one over the child variable. Tables whose child
/// tag is not in scope are left untouched.
fn normalize_rows(f: Factor, child: usize) -> Factor {
    let Some(child_var) = f.scope().iter().find(|v| v.label() == child) else {
        return f;
    };
    let row_sums = f.sum_out(&VariableSet::singleton(child_var));
    match f.quotient(&row_sums) {
        Ok(normalized) => normalized,
        Err(_) => f,
    }
}
