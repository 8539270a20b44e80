//! Core data model: variables, factors, graphs and the graphical model.
//!
//! This module provides:
//! - **variable**: labeled discrete variables and ascending-ordered sets
//! - **factor**: dense multidimensional tables with the full elimination
//!   algebra (product, quotient, weighted sums, conditioning, distances)
//! - **indexing**: converters between linear table indices and assignments
//! - **graph**: undirected adjacency with triangulation and maximal cliques
//! - **graphical_model**: the factored joint distribution with orderings,
//!   induced width, pseudo tree and evidence conditioning

pub mod factor;
pub mod graph;
pub mod graphical_model;
pub mod indexing;
pub mod variable;

pub use factor::{DistKind, Factor, Weight};
pub use graph::Graph;
pub use graphical_model::{GraphicalModel, ModelKind, OrderMethod, VarKind};
pub use variable::{Variable, VariableSet};

/// Per-variable observed values; `None` marks an unobserved variable.
pub type EvidenceVec = Vec<Option<usize>>;
