//! Typed solution records and their writers.
//!
//! A [`Solution`] is built by the driver from an engine's outputs plus the
//! evidence context (observed values reappear as point masses, auxiliary
//! indicator variables are filtered out). Two writers serialize it: the UAI
//! text format and a single JSON object.

use std::io::Write;

use serde::Serialize;

use crate::options::Task;
use crate::{Result, PRECISION};

/// Marginal distribution of one variable.
#[derive(Debug, Clone, Serialize)]
pub struct VariableMarginal {
    /// Variable label in the original model.
    pub variable: usize,
    /// Number of states.
    pub states: usize,
    /// The categorical distribution.
    pub probabilities: Vec<f64>,
}

/// One assignment of a MAP/MMAP solution.
#[derive(Debug, Clone, Serialize)]
pub struct VariableAssignment {
    /// Variable label in the original model.
    pub variable: usize,
    /// Assigned value.
    pub value: usize,
}

/// One entry of a joint marginal table.
#[derive(Debug, Clone, Serialize)]
pub struct JointEntry {
    /// Configuration of the scope variables, ascending by label.
    pub config: Vec<usize>,
    /// Its probability.
    pub value: f64,
}

/// Joint marginal over a query scope.
#[derive(Debug, Clone, Serialize)]
pub struct JointMarginal {
    /// Query variable labels in the original model.
    pub scope: Vec<usize>,
    /// All configurations with their probabilities.
    pub probabilities: Vec<JointEntry>,
}

/// The result of one inference run.
#[derive(Debug, Clone, Serialize)]
pub struct Solution {
    /// Lowercase engine name.
    pub algorithm: String,
    /// Task tag (`PR`, `MAR`, `MAP`, `MMAP`).
    pub task: String,
    /// Log value: log partition function, bound or estimate, including the
    /// global constant of evidence conditioning.
    pub value: f64,
    /// Whether the run produced a usable result (`false` reports
    /// zero-probability evidence or numerical underflow).
    pub status: bool,
    /// Human-readable status message.
    pub message: String,
    /// Per-variable marginals (MAR).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marginals: Option<Vec<VariableMarginal>>,
    /// The decoded assignment (MAP/MMAP).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solution: Option<Vec<VariableAssignment>>,
    /// Joint marginal over the query scope (CTE MAR with a query).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub joint_marginal: Option<JointMarginal>,
}

impl Solution {
    fn task_enum(&self) -> Task {
        match self.task.as_str() {
            "PR" => Task::Pr,
            "MAR" => Task::Mar,
            "MAP" => Task::Map,
            "MMAP" => Task::Mmap,
            _ => Task::Pr,
        }
    }

    fn status_line(&self) -> String {
        if self.status {
            format!("true: {}", self.message)
        } else {
            format!("false: {}", self.message)
        }
    }

    /// Writes the UAI text format: the task tag, the value in fixed and
    /// scientific notation, a STATUS line, then the task-specific block.
    pub fn write_uai<W: Write>(&self, writer: &mut W) -> Result<()> {
        match self.task_enum() {
            Task::Pr | Task::Mar => {
                writeln!(writer, "PR")?;
                writeln!(
                    writer,
                    "{:.PRECISION$} ({:.PRECISION$e})",
                    self.value,
                    self.value.exp()
                )?;
                writeln!(writer, "STATUS")?;
                writeln!(writer, "{}", self.status_line())?;

                if let Some(marginals) = &self.marginals {
                    writeln!(writer, "MAR")?;
                    let mut line = format!("{}", marginals.len());
                    for m in marginals {
                        line.push_str(&format!(" {}", m.states));
                        for p in &m.probabilities {
                            line.push_str(&format!(" {p:.PRECISION$}"));
                        }
                    }
                    writeln!(writer, "{line}")?;
                }
                if let Some(joint) = &self.joint_marginal {
                    let labels: Vec<String> =
                        joint.scope.iter().map(usize::to_string).collect();
                    writeln!(writer, "JOINT_MAR : [{}]", labels.join(","))?;
                    for entry in &joint.probabilities {
                        let digits: Vec<String> =
                            entry.config.iter().map(usize::to_string).collect();
                        writeln!(
                            writer,
                            "{} : {:.PRECISION$}",
                            digits.join(" "),
                            entry.value
                        )?;
                    }
                }
            }
            Task::Map | Task::Mmap => {
                writeln!(writer, "{}", self.task)?;
                writeln!(
                    writer,
                    "{:.PRECISION$} ({:.PRECISION$e})",
                    self.value,
                    self.value.exp()
                )?;
                writeln!(writer, "STATUS")?;
                writeln!(writer, "{}", self.status_line())?;
                if let Some(assignments) = &self.solution {
                    let mut line = format!("{}", assignments.len());
                    for a in assignments {
                        line.push_str(&format!(" {}", a.value));
                    }
                    writeln!(writer, "{line}")?;
                }
            }
            Task::Em => {}
        }
        Ok(())
    }

    /// Writes the solution as a single JSON object.
    pub fn write_json<W: Write>(&self, writer: &mut W) -> Result<()> {
        serde_json::to_writer_pretty(&mut *writer, self)
            .map_err(|e| crate::MerlinError::Internal(format!("json serialization failed: {e}")))?;
        writeln!(writer)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Solution {
        Solution {
            algorithm: "bte".into(),
            task: "MAR".into(),
            value: -1.0498221244986778,
            status: true,
            message: "Consistent evidence".into(),
            marginals: Some(vec![
                VariableMarginal {
                    variable: 0,
                    states: 2,
                    probabilities: vec![0.4286, 0.5714],
                },
                VariableMarginal {
                    variable: 2,
                    states: 2,
                    probabilities: vec![0.0, 1.0],
                },
            ]),
            solution: None,
            joint_marginal: None,
        }
    }

    #[test]
    fn uai_text_carries_status_and_marginals() {
        let mut out = Vec::new();
        sample().write_uai(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("PR\n"));
        assert!(text.contains("STATUS\ntrue: Consistent evidence"));
        assert!(text.contains("MAR\n2 2 "));
    }

    #[test]
    fn json_skips_absent_blocks() {
        let mut out = Vec::new();
        sample().write_json(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("\"algorithm\": \"bte\""));
        assert!(text.contains("\"marginals\""));
        assert!(!text.contains("\"solution\""));
    }

    #[test]
    fn inconsistent_runs_report_false() {
        let mut sol = sample();
        sol.status = false;
        sol.message = "Inconsistent evidence or underflow".into();
        sol.marginals = None;
        let mut out = Vec::new();
        sol.write_uai(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("false: Inconsistent evidence or underflow"));
    }
}
