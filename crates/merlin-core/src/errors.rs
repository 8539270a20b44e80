//! Error types shared across the workspace.

use thiserror::Error;

/// Errors reported by model loading, configuration and inference.
///
/// Runtime numerical conditions that correspond to zero-probability evidence
/// are *not* errors: engines finish cleanly and report `status = false` in
/// their [`Solution`](crate::solution::Solution). This enum covers the
/// conditions that abort a run instead.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum MerlinError {
    /// Malformed input: bad header, wrong arity, table-length mismatch.
    /// Reported at load time, before any inference starts.
    #[error("input error: {0}")]
    Input(String),

    /// Invalid configuration: incompatible algorithm/task pair, unknown
    /// ordering method, missing required inputs. Reported before engine start.
    #[error("configuration error: {0}")]
    Config(String),

    /// A numerical condition that cannot be reported as data (e.g. a weight
    /// outside its domain).
    #[error("numerical error: {0}")]
    Numerical(String),

    /// Invariant violation inside the library (programmer error, not user
    /// error), e.g. dividing positive mass by zero in the factor quotient.
    #[error("internal error: {0}")]
    Internal(String),

    /// Underlying IO failure while reading or writing files.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
