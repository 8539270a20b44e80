//! Converters between linear table indices and variable assignments.
//!
//! A factor table is addressed by a linear index in the canonical layout
//! (ascending labels, lowest label fastest). These helpers translate between
//! that index and an explicit assignment map, which is how the EM M-step and
//! the evidence-aware joint marginal align entries of factors with different
//! scopes.

use rustc_hash::FxHashMap;

use crate::model::factor::strides_of;
use crate::model::variable::VariableSet;

/// Expands a linear index over `scope` into a label → value assignment.
pub fn linear_to_config(scope: &VariableSet, idx: usize) -> FxHashMap<usize, usize> {
    debug_assert!(idx < scope.num_states());
    let mut config = FxHashMap::default();
    let mut rest = idx;
    for v in scope.iter() {
        config.insert(v.label(), rest % v.states());
        rest /= v.states();
    }
    config
}

/// Collapses an assignment into the linear index over `scope`.
///
/// Returns `None` when the assignment does not cover every scope variable.
pub fn config_to_linear(scope: &VariableSet, config: &FxHashMap<usize, usize>) -> Option<usize> {
    let strides = strides_of(scope);
    let mut idx = 0usize;
    for (pos, v) in scope.iter().enumerate() {
        let val = *config.get(&v.label())?;
        debug_assert!(val < v.states());
        idx += val * strides[pos];
    }
    Some(idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::variable::Variable;

    #[test]
    fn round_trip() {
        let scope: VariableSet = [Variable::new(1, 2), Variable::new(4, 3)].into_iter().collect();
        for idx in 0..scope.num_states() {
            let config = linear_to_config(&scope, idx);
            assert_eq!(config_to_linear(&scope, &config), Some(idx));
        }
    }

    #[test]
    fn partial_config_is_rejected() {
        let scope: VariableSet = [Variable::new(0, 2), Variable::new(1, 2)].into_iter().collect();
        let mut config = FxHashMap::default();
        config.insert(0, 1);
        assert_eq!(config_to_linear(&scope, &config), None);
    }

    #[test]
    fn lowest_label_iterates_fastest() {
        let scope: VariableSet = [Variable::new(0, 2), Variable::new(1, 2)].into_iter().collect();
        let config = linear_to_config(&scope, 1);
        assert_eq!(config[&0], 1);
        assert_eq!(config[&1], 0);
    }
}
