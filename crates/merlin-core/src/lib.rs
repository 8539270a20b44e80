//! # Merlin
//!
//! Probabilistic inference over discrete graphical models (Bayesian networks
//! and Markov random fields).
//!
//! ## Architecture
//!
//! The crate is organized into several modules:
//!
//! - **model**: variables, dense factor tables, undirected graphs and the
//!   graphical model itself (orderings, triangulation, evidence)
//! - **infer**: the inference engines: bucket-tree elimination (BTE),
//!   clique-tree elimination (CTE), weighted mini-buckets (WMB), iterative
//!   join-graph propagation (IJGP), join-graph cost shifting (JGLP) and
//!   loopy belief propagation (LBP)
//! - **learn**: EM parameter learning for Bayesian networks
//! - **io**: readers and writers for the UAI model/evidence/query/dataset
//!   file formats
//! - **solution**: typed solution records and the UAI-text / JSON writers
//! - **solver**: the driver tying models, evidence and engines together
//!
//! ## Tasks
//!
//! Four inference queries are answered over a factored joint distribution
//! with optional evidence: `PR` (log partition function / probability of
//! evidence), `MAR` (posterior marginals), `MAP` (most probable explanation)
//! and `MMAP` (marginal MAP over a query subset). A fifth task, `EM`, learns
//! CPT parameters from partially observed data.
//!
//! ## Example
//!
//! ```rust,ignore
//! use merlin_core::model::{Factor, GraphicalModel, Variable, VariableSet};
//! use merlin_core::infer::bte::{Bte, BteConfig};
//! use merlin_core::options::Task;
//!
//! let model = GraphicalModel::new(variables, factors)?;
//! let mut engine = Bte::new(model, BteConfig { task: Task::Pr, ..Default::default() });
//! engine.run()?;
//! println!("log Z = {}", engine.logz());
//! ```

#![forbid(unsafe_code)]

pub mod errors;
pub mod infer;
pub mod io;
pub mod learn;
pub mod model;
pub mod options;
pub mod solution;
pub mod solver;

pub use errors::MerlinError;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, MerlinError>;

/// Numerical precision used when formatting probabilities and bounds.
pub const PRECISION: usize = 6;

/// Small epsilon used to keep probabilities strictly positive when requested.
pub const EPSILON: f64 = 1e-6;

/// Largest query scope served by the joint-marginal machinery.
pub const MAX_JOINT_SCOPE: usize = 5;
