//! Loopy belief propagation on the factor graph.
//!
//! Sum-product message passing over the bipartite graph of factor and
//! variable nodes. The objective is the Bethe free energy, an *estimate* of
//! log Z rather than a bound. Three schedules are available: a fixed cyclic order
//! over the nodes, a flooding variant that recomputes every belief once per
//! sweep, and a priority queue keyed by the latest message change under a
//! configurable distance.

use std::collections::BTreeSet;

use log::{debug, info};

use crate::errors::MerlinError;
use crate::infer::factor_graph::FactorGraph;
use crate::infer::Engine;
use crate::model::{DistKind, Factor, GraphicalModel};
use crate::Result;

/// Message propagation schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LbpSchedule {
    /// Cyclic over the nodes in insertion order.
    #[default]
    Fixed,
    /// Recompute every belief once per sweep.
    Flood,
    /// Max-heap on the last message change.
    Priority,
}

/// Configuration for loopy belief propagation.
#[derive(Debug, Clone)]
pub struct LbpConfig {
    /// Propagation schedule.
    pub schedule: LbpSchedule,
    /// Distance driving the priority schedule and the message stop test.
    pub distance: DistKind,
    /// Iteration cap, in sweeps over the node set.
    pub stop_iter: usize,
    /// Stop once the objective change drops below this (negative disables).
    pub stop_obj: f64,
    /// Stop once the largest message change drops below this (negative
    /// disables).
    pub stop_msg: f64,
}

impl Default for LbpConfig {
    fn default() -> Self {
        LbpConfig {
            schedule: LbpSchedule::Fixed,
            distance: DistKind::Hpm,
            stop_iter: 10,
            stop_obj: -1.0,
            stop_msg: -1.0,
        }
    }
}

/// A small indexed max-heap over directed message slots; supports keyed
/// reinsertion and erasure, which `BinaryHeap` does not.
#[derive(Debug, Default)]
struct SlotQueue {
    ordered: BTreeSet<(OrdF64, usize)>,
    key: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct OrdF64(f64);

impl Eq for OrdF64 {}

impl PartialOrd for OrdF64 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrdF64 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl SlotQueue {
    fn with_slots(n: usize) -> Self {
        SlotQueue {
            ordered: BTreeSet::new(),
            key: vec![None; n],
        }
    }

    fn insert(&mut self, priority: f64, slot: usize) {
        if let Some(old) = self.key[slot].take() {
            self.ordered.remove(&(OrdF64(old), slot));
        }
        self.key[slot] = Some(priority);
        self.ordered.insert((OrdF64(priority), slot));
    }

    fn erase(&mut self, slot: usize) {
        if let Some(old) = self.key[slot].take() {
            self.ordered.remove(&(OrdF64(old), slot));
        }
    }

    fn peek(&self) -> Option<(f64, usize)> {
        self.ordered.iter().next_back().map(|&(k, s)| (k.0, s))
    }
}

/// The loopy belief propagation engine (MAR only).
pub struct Lbp {
    fg: FactorGraph,
    config: LbpConfig,
    nvars: usize,
    beliefs: Vec<Factor>,
    var_beliefs: Vec<Factor>,
    msg: Vec<Factor>,
    msg_new: Vec<Factor>,
    queue: SlotQueue,
    logz: f64,
    consistent: bool,
}

impl Lbp {
    /// Builds the factor graph for a conditioned model.
    pub fn new(model: GraphicalModel, config: LbpConfig) -> Result<Self> {
        if config.stop_iter == 0 {
            return Err(MerlinError::Config("lbp requires at least one sweep".into()));
        }
        let fg = FactorGraph::new(&model);
        let slots = 2 * fg.num_edges();

        let mut msg = Vec::with_capacity(slots);
        for ei in 0..fg.num_edges() {
            let sep = fg.separator(ei);
            msg.push(Factor::constant(sep.clone(), 1.0));
            msg.push(Factor::constant(sep, 1.0));
        }

        let beliefs: Vec<Factor> = (0..fg.num_nodes())
            .map(|n| fg.node_factor(n).clone())
            .collect();

        debug!(
            "lbp: factor graph with {} nodes and {} edges",
            fg.num_nodes(),
            fg.num_edges()
        );

        let mut engine = Lbp {
            nvars: model.num_vars(),
            fg,
            config,
            beliefs,
            var_beliefs: Vec::new(),
            msg_new: msg.clone(),
            msg,
            queue: SlotQueue::with_slots(slots),
            logz: 0.0,
            consistent: true,
        };
        engine.init();
        Ok(engine)
    }

    fn init(&mut self) {
        self.logz = 0.0;
        for n in 0..self.fg.num_nodes() {
            self.beliefs[n].normalize();
            self.logz += self.node_objective(n);
        }
        if self.config.schedule == LbpSchedule::Priority {
            for slot in 0..self.msg.len() {
                self.queue.insert(f64::INFINITY, slot);
            }
        }
    }

    /// The free-energy contribution of one node: average energy plus the
    /// (factor-node corrected) entropy.
    fn node_objective(&self, n: usize) -> f64 {
        let bel = &self.beliefs[n];
        let local = self.fg.node_factor(n);
        let mut avg_energy = 0.0;
        for (&b, &f) in bel.values().iter().zip(local.values()) {
            if b > 0.0 {
                avg_energy += b * f.ln();
            }
        }
        let mut entropy = bel.entropy();
        if !self.fg.is_variable_node(n) {
            for v in bel.scope().iter() {
                let single = crate::model::VariableSet::singleton(v);
                entropy -= bel.marginal(&single).entropy();
            }
        }
        avg_energy + entropy
    }

    /// Accepts every pending message into a node and recomputes its belief.
    fn accept_incoming(&mut self, n: usize) {
        let mut bel = self.fg.node_factor(n).clone();
        for &ei in self.fg.incident(n) {
            let slot = self.fg.slot_into(ei, n);
            self.msg[slot] = self.msg_new[slot].clone();
            bel *= &self.msg[slot];
            if self.config.schedule == LbpSchedule::Priority {
                self.queue.erase(slot);
            }
        }
        bel.normalize();
        self.beliefs[n] = bel;
    }

    /// Emits fresh messages from a node to all its neighbors.
    fn update_outgoing(&mut self, n: usize) -> Result<()> {
        for &ei in self.fg.incident(n) {
            let other = self.fg.other(ei, n);
            let slot_in = self.fg.slot_into(ei, n);
            let slot_out = self.fg.slot_out_of(ei, n);
            let target = self.beliefs[other].scope().clone();
            let mut out = self.beliefs[n]
                .quotient(&self.msg[slot_in])?
                .marginal(&target);
            out.normalize();
            if self.config.schedule == LbpSchedule::Priority {
                let change = out.distance(&self.msg[slot_out], self.config.distance);
                self.queue.insert(change, slot_out);
            }
            self.msg_new[slot_out] = out;
        }
        Ok(())
    }

    fn largest_message_change(&self) -> f64 {
        let mut dmsg = 0.0f64;
        for slot in 0..self.msg.len() {
            dmsg = dmsg.max(self.msg_new[slot].distance(&self.msg[slot], self.config.distance));
        }
        dmsg
    }
}

impl Engine for Lbp {
    fn name(&self) -> &'static str {
        "lbp"
    }

    fn run(&mut self) -> Result<()> {
        let num_nodes = self.fg.num_nodes();
        let stop_iter = self.config.stop_iter * num_nodes;

        let mut dobj = self.config.stop_obj + 1.0;
        let mut dmsg = self.config.stop_msg + 1.0;
        let mut cursor = 0usize;
        let mut updates = 0usize;

        while dmsg >= self.config.stop_msg && updates < stop_iter && dobj >= self.config.stop_obj {
            let n = match self.config.schedule {
                LbpSchedule::Priority => match self.queue.peek() {
                    Some((_, slot)) => {
                        let n = self.fg.slot_target(slot);
                        self.queue.erase(slot);
                        n
                    }
                    None => break,
                },
                _ => {
                    let n = cursor;
                    cursor = (cursor + 1) % num_nodes;
                    n
                }
            };

            if self.config.schedule != LbpSchedule::Flood {
                let before = self.node_objective(n);
                self.accept_incoming(n);
                let delta = self.node_objective(n) - before;
                self.logz += delta;
                dobj = delta.abs();
            }
            self.update_outgoing(n)?;

            if self.config.schedule == LbpSchedule::Priority {
                dmsg = self.queue.peek().map_or(0.0, |(k, _)| k);
            } else if self.config.stop_msg > 0.0 && cursor == 0 {
                dmsg = self.largest_message_change();
            }

            if self.config.schedule == LbpSchedule::Flood && cursor == 0 {
                let previous = self.logz;
                self.logz = 0.0;
                for f in 0..num_nodes {
                    self.accept_incoming(f);
                    self.logz += self.node_objective(f);
                }
                dobj = (previous - self.logz).abs();
            }

            if self.logz.is_nan() || self.logz.is_infinite() {
                self.consistent = false;
                break;
            }
            updates += 1;
        }

        self.var_beliefs = (0..self.nvars)
            .map(|v| self.beliefs[self.fg.variable_node(v)].clone())
            .collect();

        info!(
            "lbp: finished after {} updates with logZ {:.6} (consistent: {})",
            updates, self.logz, self.consistent
        );
        Ok(())
    }

    fn logz(&self) -> f64 {
        self.logz
    }

    fn marginals(&self) -> Option<&[Factor]> {
        Some(&self.var_beliefs)
    }

    fn consistent(&self) -> bool {
        self.consistent && self.logz.is_finite()
    }
}
