//! The UAI model format and its companion files.
//!
//! A model file carries a `BAYES` or `MARKOV` header, the variable
//! cardinalities, the factor scopes in declaration order and one table per
//! factor. Tables list their entries row-major over the *declared* scope
//! (the last declared variable iterates fastest); factors store them in the
//! canonical ascending-label layout, so both readers and writers reindex.
//! For `BAYES` models the first declared variable of each factor is the
//! child of the CPT.

use std::io::{BufRead, Write};

use rustc_hash::FxHashMap;

use crate::errors::MerlinError;
use crate::learn::observation::{Example, Observation};
use crate::model::{Factor, GraphicalModel, ModelKind, Variable, VariableSet};
use crate::{Result, EPSILON, PRECISION};

/// Whitespace tokenizer over an entire input.
struct Tokens {
    items: Vec<String>,
    at: usize,
}

impl Tokens {
    fn read_all<R: BufRead>(mut reader: R) -> Result<Self> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        Ok(Tokens {
            items: text.split_whitespace().map(str::to_owned).collect(),
            at: 0,
        })
    }

    fn next(&mut self, what: &str) -> Result<&str> {
        let tok = self.items.get(self.at).ok_or_else(|| {
            MerlinError::Input(format!("unexpected end of input while reading {what}"))
        })?;
        self.at += 1;
        Ok(tok.as_str())
    }

    fn next_usize(&mut self, what: &str) -> Result<usize> {
        let tok = self.next(what)?;
        tok.parse().map_err(|_| {
            MerlinError::Input(format!("expected an integer for {what}, got '{tok}'"))
        })
    }

    fn next_f64(&mut self, what: &str) -> Result<f64> {
        let tok = self.next(what)?;
        tok.parse()
            .map_err(|_| MerlinError::Input(format!("expected a number for {what}, got '{tok}'")))
    }
}

/// Reads a model in UAI format. With `positive` set, zero table entries are
/// replaced by a tiny positive epsilon at load time.
pub fn read_model<R: BufRead>(reader: R, positive: bool) -> Result<GraphicalModel> {
    let mut tok = Tokens::read_all(reader)?;

    let kind = match tok.next("the model header")? {
        "BAYES" => ModelKind::Bayes,
        "MARKOV" => ModelKind::Markov,
        other => {
            return Err(MerlinError::Input(format!(
                "unknown model header '{other}' (expected BAYES or MARKOV)"
            )))
        }
    };

    let nvars = tok.next_usize("the number of variables")?;
    let mut variables = Vec::with_capacity(nvars);
    for v in 0..nvars {
        let states = tok.next_usize("a variable cardinality")?;
        if states == 0 {
            return Err(MerlinError::Input(format!(
                "variable {v} declares zero states"
            )));
        }
        variables.push(Variable::new(v, states));
    }

    let nfactors = tok.next_usize("the number of factors")?;
    let mut scopes: Vec<Vec<Variable>> = Vec::with_capacity(nfactors);
    for f in 0..nfactors {
        let arity = tok.next_usize("a factor arity")?;
        if arity == 0 {
            return Err(MerlinError::Input(format!(
                "factor {f} declares an empty scope"
            )));
        }
        let mut declared = Vec::with_capacity(arity);
        for _ in 0..arity {
            let label = tok.next_usize("a scope variable")?;
            let var = *variables.get(label).ok_or_else(|| {
                MerlinError::Input(format!("factor {f} mentions unknown variable {label}"))
            })?;
            if declared.contains(&var) {
                return Err(MerlinError::Input(format!(
                    "factor {f} repeats variable {label} in its scope"
                )));
            }
            declared.push(var);
        }
        scopes.push(declared);
    }

    let mut factors = Vec::with_capacity(nfactors);
    for (f, declared) in scopes.iter().enumerate() {
        let expected: usize = declared.iter().map(Variable::states).product();
        let count = tok.next_usize("a table size")?;
        if count != expected {
            return Err(MerlinError::Input(format!(
                "factor {f} declares {count} entries, its scope has {expected} states"
            )));
        }
        let mut table = Vec::with_capacity(count);
        for _ in 0..count {
            let mut value = tok.next_f64("a table entry")?;
            if value < 0.0 {
                return Err(MerlinError::Input(format!(
                    "factor {f} contains a negative entry"
                )));
            }
            if positive && value == 0.0 {
                value = EPSILON;
            }
            table.push(value);
        }
        let mut factor = table_from_declared(declared, &table)?;
        if kind == ModelKind::Bayes {
            factor.set_child(declared[0].label());
        }
        factors.push(factor);
    }

    GraphicalModel::new(kind, variables, factors)
}

/// Writes a model in UAI format. Bayes CPTs list their child variable
/// first; Markov scopes list ascending labels.
pub fn write_model<W: Write>(writer: &mut W, model: &GraphicalModel) -> Result<()> {
    let header = match model.kind() {
        ModelKind::Bayes => "BAYES",
        ModelKind::Markov => "MARKOV",
    };
    writeln!(writer, "{header}")?;
    writeln!(writer, "{}", model.num_vars())?;
    let cards: Vec<String> = model
        .variables()
        .iter()
        .map(|v| v.states().to_string())
        .collect();
    writeln!(writer, "{}", cards.join(" "))?;
    writeln!(writer, "{}", model.num_factors())?;

    let declared: Vec<Vec<Variable>> = model
        .factors()
        .iter()
        .map(|f| declared_scope(f))
        .collect();
    for scope in &declared {
        let labels: Vec<String> = scope.iter().map(|v| v.label().to_string()).collect();
        writeln!(writer, "{} {}", scope.len(), labels.join(" "))?;
    }
    writeln!(writer)?;
    for (f, scope) in declared.iter().enumerate() {
        let table = table_to_declared(scope, model.factor(f));
        writeln!(writer, "{}", table.len())?;
        let row: Vec<String> = table.iter().map(|v| format!("{v:.PRECISION$}")).collect();
        writeln!(writer, " {}", row.join(" "))?;
    }
    Ok(())
}

/// The declared scope order used when writing: child first for CPTs,
/// ascending labels otherwise.
fn declared_scope(f: &Factor) -> Vec<Variable> {
    let mut scope: Vec<Variable> = f.scope().iter().collect();
    if let Some(child) = f.child() {
        if let Some(pos) = scope.iter().position(|v| v.label() == child) {
            let c = scope.remove(pos);
            scope.insert(0, c);
        }
    }
    scope
}

/// Converts a table read in declared order (last variable fastest) into a
/// canonical factor.
fn table_from_declared(declared: &[Variable], table: &[f64]) -> Result<Factor> {
    let scope: VariableSet = declared.iter().copied().collect();
    let mut factor = Factor::constant(scope, 0.0);
    let strides = factor.strides();
    for (t, &value) in table.iter().enumerate() {
        factor.set(canonical_index(declared, &factor, &strides, t), value);
    }
    Ok(factor)
}

/// Converts a canonical factor back to declared order.
fn table_to_declared(declared: &[Variable], factor: &Factor) -> Vec<f64> {
    let strides = factor.strides();
    let mut out = vec![0.0; factor.len()];
    for (t, slot) in out.iter_mut().enumerate() {
        *slot = factor.get(canonical_index(declared, factor, &strides, t));
    }
    out
}

/// Maps a declared-order (last variable fastest) linear index to the
/// canonical ascending-label index.
fn canonical_index(
    declared: &[Variable],
    factor: &Factor,
    canonical_strides: &[usize],
    mut t: usize,
) -> usize {
    let mut idx = 0;
    for v in declared.iter().rev() {
        let value = t % v.states();
        t /= v.states();
        let pos = factor
            .scope()
            .position(v.label())
            .expect("declared variable is in scope");
        idx += value * canonical_strides[pos];
    }
    idx
}

/// Reads an evidence file: a count followed by `variable value` pairs.
pub fn read_evidence<R: BufRead>(reader: R) -> Result<FxHashMap<usize, usize>> {
    let mut tok = Tokens::read_all(reader)?;
    let n = tok.next_usize("the number of evidence pairs")?;
    let mut evidence = FxHashMap::default();
    for _ in 0..n {
        let var = tok.next_usize("an evidence variable")?;
        let val = tok.next_usize("an evidence value")?;
        evidence.insert(var, val);
    }
    Ok(evidence)
}

/// Reads a virtual-evidence file: a count followed by records of
/// `variable cardinality v0 … v_{c-1}`.
pub fn read_virtual_evidence<R: BufRead>(reader: R) -> Result<Vec<(usize, Vec<f64>)>> {
    let mut tok = Tokens::read_all(reader)?;
    let n = tok.next_usize("the number of virtual-evidence records")?;
    let mut records = Vec::with_capacity(n);
    for _ in 0..n {
        let var = tok.next_usize("a virtual-evidence variable")?;
        let states = tok.next_usize("a likelihood cardinality")?;
        let mut likelihood = Vec::with_capacity(states);
        for _ in 0..states {
            likelihood.push(tok.next_f64("a likelihood entry")?);
        }
        records.push((var, likelihood));
    }
    Ok(records)
}

/// Reads a query file: a count followed by the variable labels, returned in
/// ascending order.
pub fn read_query<R: BufRead>(reader: R) -> Result<Vec<usize>> {
    let mut tok = Tokens::read_all(reader)?;
    let n = tok.next_usize("the number of query variables")?;
    let mut query = Vec::with_capacity(n);
    for _ in 0..n {
        query.push(tok.next_usize("a query variable")?);
    }
    query.sort_unstable();
    query.dedup();
    Ok(query)
}

/// Reads a training dataset: one comma-separated example per line; fields
/// are an integer value, `?` for missing, or `[v0;v1;…]` for virtual
/// evidence.
pub fn read_dataset<R: BufRead>(reader: R) -> Result<Vec<Example>> {
    let mut dataset = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut example = Vec::new();
        for field in line.split(',') {
            let field = field.trim();
            if field == "?" {
                example.push(Observation::Missing);
            } else if let Some(inner) = field.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                let likelihood: std::result::Result<Vec<f64>, _> =
                    inner.split(';').map(|s| s.trim().parse::<f64>()).collect();
                let likelihood = likelihood.map_err(|_| {
                    MerlinError::Input(format!(
                        "line {}: malformed likelihood '{field}'",
                        lineno + 1
                    ))
                })?;
                example.push(Observation::Virtual(likelihood));
            } else {
                let value = field.parse::<usize>().map_err(|_| {
                    MerlinError::Input(format!("line {}: malformed value '{field}'", lineno + 1))
                })?;
                example.push(Observation::Observed(value));
            }
        }
        dataset.push(example);
    }
    Ok(dataset)
}
