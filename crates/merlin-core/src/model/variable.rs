//! Discrete variables and ordered variable sets.

use std::fmt;

use smallvec::SmallVec;

/// A labeled discrete variable.
///
/// Identity is the label: two variables with the same label refer to the same
/// model variable and must agree on their number of states. Ordering follows
/// the label, which makes every scope iteration deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Variable {
    label: usize,
    states: usize,
}

impl Variable {
    /// Creates a variable with the given label and cardinality (≥ 1).
    pub fn new(label: usize, states: usize) -> Self {
        debug_assert!(states >= 1, "variable {} must have at least one state", label);
        Variable { label, states }
    }

    /// The nonnegative integer label identifying this variable.
    pub fn label(&self) -> usize {
        self.label
    }

    /// The number of states (cardinality) of this variable.
    pub fn states(&self) -> usize {
        self.states
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{}", self.label)
    }
}

/// A set of variables kept in ascending label order.
///
/// All scope arithmetic of the factor algebra goes through this type; the
/// ascending order fixes the stride layout of factor tables (the variable
/// with the lowest label iterates fastest).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct VariableSet {
    vars: SmallVec<[Variable; 6]>,
}

impl VariableSet {
    /// The empty set.
    pub fn new() -> Self {
        VariableSet::default()
    }

    /// A set holding a single variable.
    pub fn singleton(v: Variable) -> Self {
        let mut vars = SmallVec::new();
        vars.push(v);
        VariableSet { vars }
    }

    /// Number of variables in the set.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Number of joint states: the product of all cardinalities (1 for the
    /// empty set, matching the scalar factor convention).
    pub fn num_states(&self) -> usize {
        self.vars.iter().map(Variable::states).product()
    }

    /// Whether the set contains a variable with this label.
    pub fn contains_label(&self, label: usize) -> bool {
        self.vars.binary_search_by_key(&label, |v| v.label()).is_ok()
    }

    /// Whether the set contains the variable.
    pub fn contains(&self, v: Variable) -> bool {
        self.contains_label(v.label())
    }

    /// Whether every variable of `other` is also in `self`.
    pub fn is_superset(&self, other: &VariableSet) -> bool {
        other.iter().all(|v| self.contains(v))
    }

    /// Position of the variable with this label inside the ascending order.
    pub fn position(&self, label: usize) -> Option<usize> {
        self.vars.binary_search_by_key(&label, |v| v.label()).ok()
    }

    /// The variable at a position of the ascending order.
    pub fn get(&self, idx: usize) -> Variable {
        self.vars[idx]
    }

    /// Inserts a variable, keeping ascending order. Inserting a label that is
    /// already present is a no-op.
    pub fn insert(&mut self, v: Variable) {
        if let Err(pos) = self.vars.binary_search_by_key(&v.label(), |u| u.label()) {
            self.vars.insert(pos, v);
        }
    }

    /// Removes a variable by label if present.
    pub fn remove_label(&mut self, label: usize) {
        if let Ok(pos) = self.vars.binary_search_by_key(&label, |u| u.label()) {
            self.vars.remove(pos);
        }
    }

    /// Set union, ascending by label.
    pub fn union(&self, other: &VariableSet) -> VariableSet {
        let mut out = SmallVec::with_capacity(self.len() + other.len());
        let (mut i, mut j) = (0, 0);
        while i < self.len() && j < other.len() {
            let (a, b) = (self.vars[i], other.vars[j]);
            match a.label().cmp(&b.label()) {
                std::cmp::Ordering::Less => {
                    out.push(a);
                    i += 1;
                }
                std::cmp::Ordering::Greater => {
                    out.push(b);
                    j += 1;
                }
                std::cmp::Ordering::Equal => {
                    out.push(a);
                    i += 1;
                    j += 1;
                }
            }
        }
        out.extend_from_slice(&self.vars[i..]);
        out.extend_from_slice(&other.vars[j..]);
        VariableSet { vars: out }
    }

    /// Set intersection, ascending by label.
    pub fn intersection(&self, other: &VariableSet) -> VariableSet {
        let vars = self
            .vars
            .iter()
            .copied()
            .filter(|v| other.contains(*v))
            .collect();
        VariableSet { vars }
    }

    /// Set difference `self ∖ other`, ascending by label.
    pub fn difference(&self, other: &VariableSet) -> VariableSet {
        let vars = self
            .vars
            .iter()
            .copied()
            .filter(|v| !other.contains(*v))
            .collect();
        VariableSet { vars }
    }

    /// Iterates the variables in ascending label order.
    pub fn iter(&self) -> impl Iterator<Item = Variable> + '_ {
        self.vars.iter().copied()
    }

    /// Labels in ascending order.
    pub fn labels(&self) -> impl Iterator<Item = usize> + '_ {
        self.vars.iter().map(Variable::label)
    }
}

impl FromIterator<Variable> for VariableSet {
    fn from_iter<I: IntoIterator<Item = Variable>>(iter: I) -> Self {
        let mut out = VariableSet::new();
        for v in iter {
            out.insert(v);
        }
        out
    }
}

impl fmt::Display for VariableSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, v) in self.vars.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", v.label())?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(label: usize) -> Variable {
        Variable::new(label, 2)
    }

    #[test]
    fn insert_keeps_ascending_order() {
        let mut s = VariableSet::new();
        s.insert(v(3));
        s.insert(v(0));
        s.insert(v(7));
        s.insert(v(3)); // duplicate is a no-op
        let labels: Vec<usize> = s.labels().collect();
        assert_eq!(labels, vec![0, 3, 7]);
        assert_eq!(s.len(), 3);
    }

    #[test]
    fn set_algebra() {
        let a: VariableSet = [v(0), v(1), v(2)].into_iter().collect();
        let b: VariableSet = [v(1), v(3)].into_iter().collect();

        let labels: Vec<usize> = a.union(&b).labels().collect();
        assert_eq!(labels, vec![0, 1, 2, 3]);
        let labels: Vec<usize> = a.intersection(&b).labels().collect();
        assert_eq!(labels, vec![1]);
        let labels: Vec<usize> = a.difference(&b).labels().collect();
        assert_eq!(labels, vec![0, 2]);
        assert!(a.is_superset(&VariableSet::singleton(v(2))));
        assert!(!b.is_superset(&a));
    }

    #[test]
    fn joint_state_counts() {
        let s: VariableSet = [Variable::new(0, 2), Variable::new(4, 3)].into_iter().collect();
        assert_eq!(s.num_states(), 6);
        assert_eq!(VariableSet::new().num_states(), 1);
    }
}
