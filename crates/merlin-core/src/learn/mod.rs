//! Parameter learning for Bayesian networks.
//!
//! - **observation**: per-variable observations of a training example:
//!   observed, missing, or virtual (a likelihood vector)
//! - **em**: expectation-maximization over a shared clique tree

pub mod em;
pub mod observation;

pub use em::{EmConfig, EmLearner};
pub use observation::{Example, Observation};
