//! Typed configuration enumerations shared across engines and the driver.
//!
//! The engines are configured through explicit records rather than string
//! properties; this module holds the common enumerations plus the
//! task/algorithm compatibility matrix the driver enforces before any
//! expensive work starts.

use std::fmt;
use std::str::FromStr;

use crate::errors::MerlinError;
use crate::Result;

/// Inference task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// Log partition function / probability of evidence.
    Pr,
    /// Posterior marginals for every variable.
    Mar,
    /// Most probable full assignment.
    Map,
    /// Marginal MAP over a query subset.
    Mmap,
    /// EM parameter learning.
    Em,
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Task::Pr => "PR",
            Task::Mar => "MAR",
            Task::Map => "MAP",
            Task::Mmap => "MMAP",
            Task::Em => "EM",
        };
        f.write_str(name)
    }
}

impl FromStr for Task {
    type Err = MerlinError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PR" => Ok(Task::Pr),
            "MAR" => Ok(Task::Mar),
            "MAP" => Ok(Task::Map),
            "MMAP" => Ok(Task::Mmap),
            "EM" => Ok(Task::Em),
            other => Err(MerlinError::Config(format!(
                "inference task '{other}' is not supported (use PR, MAR, MAP, MMAP or EM)"
            ))),
        }
    }
}

/// Inference algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// Bucket-tree elimination (exact).
    Bte,
    /// Clique-tree elimination (exact).
    Cte,
    /// Weighted mini-buckets (bounded approximation).
    Wmb,
    /// Iterative join-graph propagation.
    Ijgp,
    /// Join-graph cost shifting for MAP upper bounds.
    Jglp,
    /// Loopy belief propagation on the factor graph.
    Lbp,
    /// Gibbs sampling (recognized but not provided by this crate).
    Gibbs,
}

impl Algorithm {
    /// Lowercase name used in files and solution records.
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Bte => "bte",
            Algorithm::Cte => "cte",
            Algorithm::Wmb => "wmb",
            Algorithm::Ijgp => "ijgp",
            Algorithm::Jglp => "jglp",
            Algorithm::Lbp => "lbp",
            Algorithm::Gibbs => "gibbs",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = MerlinError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bte" => Ok(Algorithm::Bte),
            "cte" => Ok(Algorithm::Cte),
            "wmb" => Ok(Algorithm::Wmb),
            "ijgp" => Ok(Algorithm::Ijgp),
            "jglp" => Ok(Algorithm::Jglp),
            "lbp" => Ok(Algorithm::Lbp),
            "gibbs" => Ok(Algorithm::Gibbs),
            other => Err(MerlinError::Config(format!(
                "algorithm '{other}' is not supported (use bte, cte, wmb, ijgp, jglp, lbp or gibbs)"
            ))),
        }
    }
}

/// CPT initialization for EM learning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitMethod {
    /// Keep the parameters from the model file.
    #[default]
    None,
    /// Uniform rows.
    Uniform,
    /// Random positive rows, normalized.
    Random,
}

impl FromStr for InitMethod {
    type Err = MerlinError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(InitMethod::None),
            "uniform" => Ok(InitMethod::Uniform),
            "random" => Ok(InitMethod::Random),
            other => Err(MerlinError::Config(format!(
                "factor initialization method '{other}' is not supported"
            ))),
        }
    }
}

/// Output file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// The UAI competition text format.
    #[default]
    Uai,
    /// A single JSON object.
    Json,
}

impl FromStr for OutputFormat {
    type Err = MerlinError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "uai" => Ok(OutputFormat::Uai),
            "json" => Ok(OutputFormat::Json),
            other => Err(MerlinError::Config(format!(
                "output format '{other}' is not supported (use uai or json)"
            ))),
        }
    }
}

/// Checks the task/algorithm compatibility matrix.
///
/// Each task names its admissible algorithms; anything else is a
/// configuration error reported before the engine starts.
pub fn check_compatibility(task: Task, algorithm: Algorithm) -> Result<()> {
    use Algorithm::*;
    let admissible: &[Algorithm] = match task {
        Task::Pr => &[Wmb, Bte],
        Task::Mar => &[Wmb, Ijgp, Lbp, Gibbs, Bte, Cte],
        Task::Map => &[Wmb, Jglp, Ijgp, Gibbs, Bte],
        Task::Mmap => &[Wmb, Bte],
        Task::Em => &[Cte, Bte, Wmb],
    };
    if !admissible.contains(&algorithm) {
        let names: Vec<&str> = admissible.iter().map(Algorithm::name).collect();
        return Err(MerlinError::Config(format!(
            "task {task} requires one of: {}",
            names.join(", ")
        )));
    }
    if algorithm == Gibbs {
        return Err(MerlinError::Config(
            "the Gibbs sampler is not provided by this build".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_accepts_and_rejects() {
        assert!(check_compatibility(Task::Pr, Algorithm::Bte).is_ok());
        assert!(check_compatibility(Task::Pr, Algorithm::Lbp).is_err());
        assert!(check_compatibility(Task::Mar, Algorithm::Cte).is_ok());
        assert!(check_compatibility(Task::Mmap, Algorithm::Ijgp).is_err());
        assert!(check_compatibility(Task::Em, Algorithm::Cte).is_ok());
        assert!(check_compatibility(Task::Mar, Algorithm::Gibbs).is_err());
    }

    #[test]
    fn parsing_round_trips() {
        assert_eq!("MMAP".parse::<Task>().unwrap(), Task::Mmap);
        assert_eq!("wmb".parse::<Algorithm>().unwrap(), Algorithm::Wmb);
        assert!("nuts".parse::<Algorithm>().is_err());
        assert_eq!("uniform".parse::<InitMethod>().unwrap(), InitMethod::Uniform);
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
    }
}
