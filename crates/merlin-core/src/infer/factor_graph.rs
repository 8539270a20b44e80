//! The bipartite factor graph used by loopy belief propagation.
//!
//! Nodes are factors: the model's factors come first, followed by one unary
//! *variable node* per variable. A variable's first unary factor doubles as
//! its variable node; variables without a unary factor get an identity one.
//! Edges connect every proper factor node to the variable nodes of its
//! scope, and each edge carries two directed message slots.

use crate::model::{Factor, GraphicalModel, VariableSet};

/// A bipartite factor/variable graph.
#[derive(Debug, Clone)]
pub struct FactorGraph {
    nodes: Vec<Factor>,
    /// `local[v]` is the node index of the variable node of `v`.
    local: Vec<usize>,
    /// Undirected edges `(factor node, variable node)`.
    edges: Vec<(usize, usize)>,
    /// Incident edge indices per node.
    incident: Vec<Vec<usize>>,
}

impl FactorGraph {
    /// Builds the factor graph of a model.
    pub fn new(model: &GraphicalModel) -> Self {
        let nvars = model.num_vars();
        let mut nodes: Vec<Factor> = model.factors().to_vec();
        let mut local = vec![usize::MAX; nvars];

        for (i, f) in nodes.iter().enumerate() {
            if f.num_vars() == 1 {
                let v = f.scope().get(0).label();
                if local[v] == usize::MAX {
                    local[v] = i;
                }
            }
        }
        for v in 0..nvars {
            if local[v] == usize::MAX {
                local[v] = nodes.len();
                nodes.push(Factor::constant(
                    VariableSet::singleton(model.var(v)),
                    1.0,
                ));
            }
        }

        let mut edges = Vec::new();
        let mut incident = vec![Vec::new(); nodes.len()];
        for i in 0..nodes.len() {
            if nodes[i].num_vars() == 1 && local[nodes[i].scope().get(0).label()] == i {
                continue; // variable node
            }
            for v in nodes[i].scope().labels() {
                let ei = edges.len();
                edges.push((i, local[v]));
                incident[i].push(ei);
                incident[local[v]].push(ei);
            }
        }

        FactorGraph {
            nodes,
            local,
            edges,
            incident,
        }
    }

    /// Total number of nodes (factor nodes plus variable nodes).
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Number of undirected edges.
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// The local factor attached to a node.
    pub fn node_factor(&self, n: usize) -> &Factor {
        &self.nodes[n]
    }

    /// The variable node of a variable.
    pub fn variable_node(&self, v: usize) -> usize {
        self.local[v]
    }

    /// Whether a node is a variable node.
    pub fn is_variable_node(&self, n: usize) -> bool {
        self.nodes[n].num_vars() == 1 && self.local[self.nodes[n].scope().get(0).label()] == n
    }

    /// Incident edge indices of a node.
    pub fn incident(&self, n: usize) -> &[usize] {
        &self.incident[n]
    }

    /// The endpoint of an edge opposite to `n`.
    pub fn other(&self, ei: usize, n: usize) -> usize {
        let (a, b) = self.edges[ei];
        if a == n {
            b
        } else {
            a
        }
    }

    /// Directed slot index for the message traveling along `ei` into `n`.
    pub fn slot_into(&self, ei: usize, n: usize) -> usize {
        if self.edges[ei].1 == n {
            2 * ei
        } else {
            2 * ei + 1
        }
    }

    /// Directed slot index for the message traveling along `ei` out of `n`.
    pub fn slot_out_of(&self, ei: usize, n: usize) -> usize {
        if self.edges[ei].0 == n {
            2 * ei
        } else {
            2 * ei + 1
        }
    }

    /// The receiving node of a directed slot.
    pub fn slot_target(&self, slot: usize) -> usize {
        let (a, b) = self.edges[slot / 2];
        if slot % 2 == 0 {
            b
        } else {
            a
        }
    }

    /// Scope shared by the two endpoints of an edge.
    pub fn separator(&self, ei: usize) -> VariableSet {
        let (a, b) = self.edges[ei];
        self.nodes[a].scope().intersection(self.nodes[b].scope())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelKind, Variable};

    #[test]
    fn variable_nodes_reuse_unary_factors() {
        let a = Variable::new(0, 2);
        let b = Variable::new(1, 2);
        let fa = Factor::new(VariableSet::singleton(a), vec![0.3, 0.7]).unwrap();
        let fab = Factor::new([a, b].into_iter().collect(), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let model =
            GraphicalModel::new(ModelKind::Markov, vec![a, b], vec![fa, fab]).unwrap();
        let fg = FactorGraph::new(&model);

        // the unary factor over A doubles as A's variable node; B gets an
        // identity node appended
        assert_eq!(fg.variable_node(0), 0);
        assert_eq!(fg.num_nodes(), 3);
        assert!(fg.is_variable_node(0));
        assert!(fg.is_variable_node(2));
        assert!(!fg.is_variable_node(1));
        // the pairwise factor connects to both variable nodes
        assert_eq!(fg.incident(1).len(), 2);
        assert_eq!(fg.num_edges(), 2);
    }

    #[test]
    fn directed_slots_pair_up() {
        let a = Variable::new(0, 2);
        let b = Variable::new(1, 2);
        let fab = Factor::new([a, b].into_iter().collect(), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let model = GraphicalModel::new(ModelKind::Markov, vec![a, b], vec![fab]).unwrap();
        let fg = FactorGraph::new(&model);
        for n in 0..fg.num_nodes() {
            for &ei in fg.incident(n) {
                let into = fg.slot_into(ei, n);
                let out = fg.slot_out_of(ei, n);
                assert_ne!(into, out);
                assert_eq!(into / 2, out / 2);
                assert_eq!(fg.slot_target(into), n);
                assert_eq!(fg.slot_target(out), fg.other(ei, n));
            }
        }
    }
}
