//! Bucket and mini-bucket cluster graphs.
//!
//! One single-pass builder serves the bucket tree (unbounded buckets: one
//! cluster per variable), the weighted mini-bucket join graph (buckets split
//! under an i-bound) and the iterative join graph (mini-buckets plus edges
//! between sibling clusters of the same bucket).
//!
//! Clusters and edges live in two arenas and reference each other by index;
//! the insertion order of the edges *is* the forward message schedule, and
//! the backward schedule is its reverse.

use std::collections::BTreeSet;

use log::debug;

use crate::model::{Factor, GraphicalModel, VarKind, VariableSet, Weight};

/// A cluster of the join graph.
#[derive(Debug, Clone)]
pub struct Cluster {
    /// Scope of the cluster (union of its assigned factor scopes).
    pub scope: VariableSet,
    /// The bucket variable this cluster was created for.
    pub anchor: usize,
    /// Whether the anchor is summed or maximized.
    pub kind: VarKind,
    /// Elimination weight: `1/R` over the `R` mini-buckets of a SUM bucket,
    /// infinite for MAX buckets.
    pub weight: Weight,
    /// Indices of the original factors multiplied into this cluster.
    pub originals: Vec<usize>,
    /// Product of the original factors.
    pub potential: Factor,
}

/// A directed edge of the message schedule, with its separator and the two
/// messages living on it.
#[derive(Debug, Clone)]
pub struct Edge {
    /// Source cluster.
    pub from: usize,
    /// Destination cluster (the one absorbing the eliminated scope).
    pub to: usize,
    /// `scope(from) ∩ scope(to)`.
    pub separator: VariableSet,
    /// Forward (top-down) message.
    pub fwd: Factor,
    /// Backward (bottom-up) message.
    pub bwd: Factor,
}

/// The cluster graph shared by the bucket-style engines.
#[derive(Debug, Clone)]
pub struct JoinGraph {
    /// Cluster arena.
    pub clusters: Vec<Cluster>,
    /// Edge arena; insertion order is the forward schedule.
    pub edges: Vec<Edge>,
    /// Incoming edge indices per cluster.
    pub incoming: Vec<Vec<usize>>,
    /// Outgoing edge indices per cluster.
    pub outgoing: Vec<Vec<usize>>,
    /// Clusters anchored at each variable, in creation order.
    pub anchors: Vec<Vec<usize>>,
    /// Clusters with no outgoing edge.
    pub roots: Vec<usize>,
}

/// Score for merging two mini-bucket scopes under an i-bound.
///
/// Merging is allowed when the union stays within `k+1` variables, where `k`
/// never shrinks below the size either operand already has; allowed merges
/// score `1/(|a| + |b|)` (prefer small scopes), forbidden ones score `None`.
pub(crate) fn pair_score(ibound: usize, a: &VariableSet, b: &VariableSet) -> Option<f64> {
    let k = ibound
        .max(a.len().saturating_sub(1))
        .max(b.len().saturating_sub(1));
    if a.union(b).len() > k.saturating_add(1) {
        None
    } else {
        Some(1.0 / (a.len() + b.len()) as f64)
    }
}

impl JoinGraph {
    /// Builds the cluster graph along an elimination order.
    ///
    /// `ibound = None` keeps every bucket whole (the bucket-tree case);
    /// `link_siblings` adds the intra-bucket edges between successive
    /// mini-buckets of the same variable that turn the structure into the
    /// iterative join graph.
    pub fn build(
        model: &GraphicalModel,
        order: &[usize],
        ibound: Option<usize>,
        kinds: &[VarKind],
        link_siblings: bool,
    ) -> Self {
        let ibound = ibound.unwrap_or(usize::MAX);
        let nf = model.num_factors();

        // per-slot state: current scope, contributing originals, feeding clusters
        let mut fin: Vec<VariableSet> =
            model.factors().iter().map(|f| f.scope().clone()).collect();
        let mut orig: Vec<Vec<usize>> = (0..nf).map(|i| vec![i]).collect();
        let mut new: Vec<Vec<usize>> = vec![Vec::new(); nf];

        // per-variable slot index
        let mut vin: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); model.num_vars()];
        for (i, scope) in fin.iter().enumerate() {
            for v in scope.labels() {
                vin[v].insert(i);
            }
        }

        let mut clusters: Vec<Cluster> = Vec::new();
        let mut edges: Vec<Edge> = Vec::new();
        let mut anchors: Vec<Vec<usize>> = vec![Vec::new(); model.num_vars()];

        for &x in order {
            let mut ids: Vec<usize> = vin[x].iter().copied().collect();
            if ids.is_empty() {
                continue;
            }

            // partition the bucket into mini-buckets under the i-bound:
            // greedily merge the best-scoring pair until none remains
            loop {
                let mut best: Option<(f64, usize, usize)> = None;
                for bi in 0..ids.len() {
                    for bj in bi + 1..ids.len() {
                        if let Some(score) = pair_score(ibound, &fin[ids[bi]], &fin[ids[bj]]) {
                            if best.map_or(true, |(s, _, _)| score > s) {
                                best = Some((score, bi, bj));
                            }
                        }
                    }
                }
                let Some((_, bi, bj)) = best else { break };
                let (i, j) = (ids[bi], ids[bj]);
                // combine slot i into slot j, then retire slot i
                let absorbed = std::mem::take(&mut fin[i]);
                for v in absorbed.labels() {
                    vin[v].remove(&i);
                }
                fin[j] = fin[j].union(&absorbed);
                for v in fin[j].labels() {
                    vin[v].insert(j);
                }
                let moved = std::mem::take(&mut orig[i]);
                orig[j].extend(moved);
                let moved = std::mem::take(&mut new[i]);
                new[j].extend(moved);
                ids.remove(bi);
            }

            // each surviving mini-bucket becomes a cluster and eliminates x
            let kind = kinds[x];
            let weight = match kind {
                VarKind::Max => Weight::INFINITY,
                VarKind::Sum => Weight::finite(1.0 / ids.len() as f64),
            };
            let mut siblings = Vec::with_capacity(ids.len());
            for &i in &ids {
                let alpha = clusters.len();
                clusters.push(Cluster {
                    scope: fin[i].clone(),
                    anchor: x,
                    kind,
                    weight,
                    originals: std::mem::take(&mut orig[i]),
                    potential: Factor::scalar(1.0),
                });
                anchors[x].push(alpha);
                siblings.push(alpha);

                fin[i].remove_label(x);
                vin[x].remove(&i);
                for v in fin[i].labels() {
                    vin[v].insert(i);
                }

                for &feeder in &new[i] {
                    edges.push(Edge {
                        from: feeder,
                        to: alpha,
                        separator: VariableSet::new(),
                        fwd: Factor::scalar(1.0),
                        bwd: Factor::scalar(1.0),
                    });
                }
                new[i].clear();
                new[i].push(alpha);
            }

            if link_siblings {
                for pair in siblings.windows(2) {
                    edges.push(Edge {
                        from: pair[0],
                        to: pair[1],
                        separator: VariableSet::new(),
                        fwd: Factor::scalar(1.0),
                        bwd: Factor::scalar(1.0),
                    });
                }
            }
        }

        // separators, adjacency lists and roots
        let nc = clusters.len();
        let mut incoming = vec![Vec::new(); nc];
        let mut outgoing = vec![Vec::new(); nc];
        for (ei, e) in edges.iter_mut().enumerate() {
            e.separator = clusters[e.from].scope.intersection(&clusters[e.to].scope);
            incoming[e.to].push(ei);
            outgoing[e.from].push(ei);
        }
        let roots: Vec<usize> = (0..nc).filter(|&c| outgoing[c].is_empty()).collect();

        // clique potentials
        for cl in &mut clusters {
            let mut pot = Factor::scalar(1.0);
            for &fi in &cl.originals {
                pot *= model.factor(fi);
            }
            cl.potential = pot;
        }

        let max_clique = clusters.iter().map(|c| c.scope.len()).max().unwrap_or(0);
        let max_sep = edges.iter().map(|e| e.separator.len()).max().unwrap_or(0);
        debug!(
            "join graph: {} clusters, {} edges, max clique {}, max separator {}",
            nc,
            edges.len(),
            max_clique,
            max_sep
        );

        JoinGraph {
            clusters,
            edges,
            incoming,
            outgoing,
            anchors,
            roots,
        }
    }

    /// Number of clusters.
    pub fn num_clusters(&self) -> usize {
        self.clusters.len()
    }

    /// Belief of a cluster: potential × incoming forwards × outgoing
    /// backwards.
    pub fn belief(&self, c: usize) -> Factor {
        let mut bel = self.clusters[c].potential.clone();
        for &ei in &self.incoming[c] {
            bel *= &self.edges[ei].fwd;
        }
        for &ei in &self.outgoing[c] {
            bel *= &self.edges[ei].bwd;
        }
        bel
    }

    /// Belief of a cluster excluding the messages exchanged with one
    /// neighbor cluster in either direction.
    pub fn belief_excluding(&self, c: usize, other: usize) -> Factor {
        let mut bel = self.clusters[c].potential.clone();
        for &ei in &self.incoming[c] {
            if self.edges[ei].from != other {
                bel *= &self.edges[ei].fwd;
            }
        }
        for &ei in &self.outgoing[c] {
            if self.edges[ei].to != other {
                bel *= &self.edges[ei].bwd;
            }
        }
        bel
    }

    /// Potential times incoming forward messages only (excludes every
    /// backward message).
    pub fn collect_forward(&self, c: usize) -> Factor {
        let mut bel = self.clusters[c].potential.clone();
        for &ei in &self.incoming[c] {
            bel *= &self.edges[ei].fwd;
        }
        bel
    }

    /// Accumulates the root contributions to the bound: `ln Σ` for SUM roots
    /// and `ln max` for MAX roots, optionally with a reparameterization.
    pub fn root_bound(&self, reparam: Option<&[Factor]>) -> f64 {
        let mut total = 0.0;
        for &r in &self.roots {
            let mut bel = self.belief(r);
            if let Some(rho) = reparam {
                bel *= &rho[r];
            }
            total += match self.clusters[r].kind {
                VarKind::Sum => bel.sum().ln(),
                VarKind::Max => bel.max().ln(),
            };
        }
        total
    }

    /// The single outgoing edge of a cluster, if any.
    pub fn out_edge(&self, c: usize) -> Option<usize> {
        self.outgoing[c].first().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Factor, GraphicalModel, ModelKind, Variable, VariableSet};

    fn chain() -> GraphicalModel {
        let a = Variable::new(0, 2);
        let b = Variable::new(1, 2);
        let c = Variable::new(2, 2);
        let fa = Factor::new(VariableSet::singleton(a), vec![0.6, 0.4]).unwrap();
        let fab = Factor::new([a, b].into_iter().collect(), vec![0.7, 0.2, 0.3, 0.8]).unwrap();
        let fbc = Factor::new([b, c].into_iter().collect(), vec![0.9, 0.4, 0.1, 0.6]).unwrap();
        GraphicalModel::new(ModelKind::Markov, vec![a, b, c], vec![fa, fab, fbc]).unwrap()
    }

    #[test]
    fn bucket_tree_has_one_cluster_per_variable() {
        let m = chain();
        let kinds = vec![VarKind::Sum; 3];
        let jg = JoinGraph::build(&m, &[0, 1, 2], None, &kinds, false);
        assert_eq!(jg.num_clusters(), 3);
        for v in 0..3 {
            assert_eq!(jg.anchors[v].len(), 1);
        }
        // chain of messages: bucket(0) -> bucket(1) -> bucket(2)
        assert_eq!(jg.edges.len(), 2);
        assert_eq!(jg.roots.len(), 1);
    }

    #[test]
    fn separators_are_scope_intersections() {
        let m = chain();
        let kinds = vec![VarKind::Sum; 3];
        let jg = JoinGraph::build(&m, &[0, 1, 2], None, &kinds, false);
        for e in &jg.edges {
            let expect = jg.clusters[e.from]
                .scope
                .intersection(&jg.clusters[e.to].scope);
            assert_eq!(e.separator, expect);
        }
    }

    #[test]
    fn ibound_one_splits_buckets() {
        // three pairwise factors over {0,1}, {0,2}, {0,3}: with i-bound 1 the
        // bucket of 0 cannot hold scopes of three variables
        let vars: Vec<Variable> = (0..4).map(|i| Variable::new(i, 2)).collect();
        let mk = |u: usize, w: usize| {
            Factor::new(
                [vars[u], vars[w]].into_iter().collect(),
                vec![1.0, 2.0, 3.0, 4.0],
            )
            .unwrap()
        };
        let m = GraphicalModel::new(
            ModelKind::Markov,
            vars.clone(),
            vec![mk(0, 1), mk(0, 2), mk(0, 3)],
        )
        .unwrap();
        let kinds = vec![VarKind::Sum; 4];
        let jg = JoinGraph::build(&m, &[0, 1, 2, 3], Some(1), &kinds, false);
        assert!(jg.anchors[0].len() > 1);
        for c in &jg.anchors[0] {
            assert!(jg.clusters[*c].scope.len() <= 2);
            assert!(!jg.clusters[*c].weight.is_infinite());
        }
    }

    #[test]
    fn sibling_links_make_a_join_graph() {
        let vars: Vec<Variable> = (0..4).map(|i| Variable::new(i, 2)).collect();
        let mk = |u: usize, w: usize| {
            Factor::new(
                [vars[u], vars[w]].into_iter().collect(),
                vec![1.0, 2.0, 3.0, 4.0],
            )
            .unwrap()
        };
        let m = GraphicalModel::new(
            ModelKind::Markov,
            vars.clone(),
            vec![mk(0, 1), mk(0, 2), mk(0, 3)],
        )
        .unwrap();
        let kinds = vec![VarKind::Sum; 4];
        let plain = JoinGraph::build(&m, &[0, 1, 2, 3], Some(1), &kinds, false);
        let linked = JoinGraph::build(&m, &[0, 1, 2, 3], Some(1), &kinds, true);
        assert!(linked.edges.len() > plain.edges.len());
    }

    #[test]
    fn potentials_multiply_assigned_originals() {
        let m = chain();
        let kinds = vec![VarKind::Sum; 3];
        let jg = JoinGraph::build(&m, &[0, 1, 2], None, &kinds, false);
        let total: usize = jg.clusters.iter().map(|c| c.originals.len()).sum();
        assert_eq!(total, m.num_factors());
    }
}
