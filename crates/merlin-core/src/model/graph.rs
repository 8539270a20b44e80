//! Undirected graphs over variable labels.
//!
//! Used for the primal (moral) graph of a model: triangulation along an
//! elimination order, maximal-clique extraction for the clique tree, and the
//! induced-width computation. Adjacency uses ordered sets so every iteration
//! is deterministic.

use std::collections::BTreeSet;

use crate::model::variable::VariableSet;

/// An undirected graph on nodes `0..n`. Edges are identified by their
/// insertion index, which the engines use to name messages.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    adj: Vec<BTreeSet<usize>>,
    edges: Vec<(usize, usize)>,
}

impl Graph {
    /// An edgeless graph on `n` nodes.
    pub fn new(n: usize) -> Self {
        Graph {
            adj: vec![BTreeSet::new(); n],
            edges: Vec::new(),
        }
    }

    /// Builds the primal graph of a set of factor scopes: every pair of
    /// variables sharing a scope is connected.
    pub fn from_scopes(n: usize, scopes: &[VariableSet]) -> Self {
        let mut g = Graph::new(n);
        for scope in scopes {
            let labels: Vec<usize> = scope.labels().collect();
            for i in 0..labels.len() {
                for j in i + 1..labels.len() {
                    g.add_edge(labels[i], labels[j]);
                }
            }
        }
        g
    }

    /// Number of nodes.
    pub fn num_nodes(&self) -> usize {
        self.adj.len()
    }

    /// Number of undirected edges.
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// The undirected edge list in insertion order.
    pub fn edges(&self) -> &[(usize, usize)] {
        &self.edges
    }

    /// Adds the undirected edge (u,v). Self-loops and duplicates are ignored;
    /// returns whether a new edge was inserted.
    pub fn add_edge(&mut self, u: usize, v: usize) -> bool {
        if u == v || self.adj[u].contains(&v) {
            return false;
        }
        self.adj[u].insert(v);
        self.adj[v].insert(u);
        self.edges.push((u.min(v), u.max(v)));
        true
    }

    /// Neighbors of `v` in ascending order.
    pub fn neighbors(&self, v: usize) -> impl Iterator<Item = usize> + '_ {
        self.adj[v].iter().copied()
    }

    /// Degree of `v`.
    pub fn degree(&self, v: usize) -> usize {
        self.adj[v].len()
    }

    /// Triangulates along an elimination order: for each variable in order,
    /// its later neighbors are connected pairwise. Earlier fill-in edges are
    /// visible to later steps.
    pub fn triangulate(&mut self, order: &[usize]) {
        let position = positions(order);
        for &var in order {
            let later: Vec<usize> = self
                .neighbors(var)
                .filter(|&n| position[n] > position[var])
                .collect();
            for i in 0..later.len() {
                for j in i + 1..later.len() {
                    self.add_edge(later[i], later[j]);
                }
            }
        }
    }

    /// Induced width of the order: the maximum later-neighbor count in the
    /// triangulation along it. The graph itself is left untouched.
    pub fn induced_width(&self, order: &[usize]) -> usize {
        let mut g = self.clone();
        g.triangulate(order);
        let position = positions(order);
        order
            .iter()
            .map(|&var| {
                g.neighbors(var)
                    .filter(|&n| position[n] > position[var])
                    .count()
            })
            .max()
            .unwrap_or(0)
    }

    /// Maximal cliques of a triangulated graph: for each variable gather
    /// `{v} ∪ later-neighbors(v)`, then drop every clique contained in
    /// another (identical cliques deduplicate).
    pub fn maximal_cliques(&self, order: &[usize]) -> Vec<BTreeSet<usize>> {
        let position = positions(order);
        let mut maximal: Vec<BTreeSet<usize>> = Vec::new();
        for &var in order {
            let mut clique: BTreeSet<usize> = BTreeSet::new();
            clique.insert(var);
            clique.extend(self.neighbors(var).filter(|&n| position[n] > position[var]));

            if maximal.iter().any(|c| c.is_superset(&clique)) {
                continue;
            }
            maximal.retain(|c| !clique.is_superset(c));
            maximal.push(clique);
        }
        maximal
    }
}

fn positions(order: &[usize]) -> Vec<usize> {
    let mut position = vec![0usize; order.len()];
    for (i, &v) in order.iter().enumerate() {
        position[v] = i;
    }
    position
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_edge_deduplicates() {
        let mut g = Graph::new(3);
        assert!(g.add_edge(0, 1));
        assert!(!g.add_edge(1, 0));
        assert!(!g.add_edge(2, 2));
        assert_eq!(g.num_edges(), 1);
    }

    #[test]
    fn triangulating_a_cycle_adds_a_chord() {
        // 4-cycle 0-1-2-3-0; eliminating in label order must add a chord
        let mut g = Graph::new(4);
        g.add_edge(0, 1);
        g.add_edge(1, 2);
        g.add_edge(2, 3);
        g.add_edge(3, 0);
        g.triangulate(&[0, 1, 2, 3]);
        // eliminating 0 connects 1 and 3
        assert!(g.neighbors(1).any(|n| n == 3));
        assert_eq!(g.induced_width(&[0, 1, 2, 3]), 2);
    }

    #[test]
    fn maximal_cliques_of_a_chain() {
        let mut g = Graph::new(3);
        g.add_edge(0, 1);
        g.add_edge(1, 2);
        g.triangulate(&[0, 1, 2]);
        let cliques = g.maximal_cliques(&[0, 1, 2]);
        assert_eq!(cliques.len(), 2);
        assert!(cliques.iter().any(|c| c.iter().copied().eq([0, 1])));
        assert!(cliques.iter().any(|c| c.iter().copied().eq([1, 2])));
    }

    #[test]
    fn dominated_cliques_are_removed() {
        let mut g = Graph::new(3);
        g.add_edge(0, 1);
        g.add_edge(1, 2);
        g.add_edge(0, 2);
        let cliques = g.maximal_cliques(&[0, 1, 2]);
        assert_eq!(cliques.len(), 1);
        assert!(cliques[0].iter().copied().eq([0, 1, 2]));
    }
}
