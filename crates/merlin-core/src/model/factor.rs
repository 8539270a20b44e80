//! Dense factor tables and their elimination algebra.
//!
//! A [`Factor`] is a nonnegative real-valued table over a [`VariableSet`]
//! scope. The table layout is fixed by the ascending label order of the
//! scope: the variable with the lowest label has the lowest stride (iterates
//! fastest). All operations return new factors; the algebra is pure and
//! keeps no state between invocations.
//!
//! Elimination comes in three flavors: plain (`sum_out`, `max_out`,
//! `min_out`), scope-preserving marginals (`marginal`, `max_marginal`), and
//! the weighted power sum `(Σ f^{1/w})^w` used by the weighted mini-bucket
//! bound, where the weight may be `+∞` (behaving exactly like `max`).

use std::ops::{AddAssign, Mul, MulAssign};

use rand::Rng;
use smallvec::SmallVec;

use crate::errors::MerlinError;
use crate::model::variable::{Variable, VariableSet};
use crate::Result;

/// A positive weight that may be infinite.
///
/// Supports the identity `f^{1/∞} = f^0 = 1` through [`Weight::recip`]
/// returning zero for the infinite weight, so call sites never special-case
/// the max-elimination limit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weight(f64);

impl Weight {
    /// The neutral weight: `sum_power(vs, ONE)` is a plain sum.
    pub const ONE: Weight = Weight(1.0);

    /// The max-elimination limit: `sum_power(vs, INFINITY)` is a max.
    pub const INFINITY: Weight = Weight(f64::INFINITY);

    /// A finite positive weight.
    pub fn finite(w: f64) -> Self {
        debug_assert!(w > 0.0 && w.is_finite(), "weight must be positive, got {w}");
        Weight(w)
    }

    /// The raw weight value.
    pub fn value(self) -> f64 {
        self.0
    }

    /// `1/w`, defined as 0 for the infinite weight.
    pub fn recip(self) -> f64 {
        if self.0.is_infinite() {
            0.0
        } else {
            1.0 / self.0
        }
    }

    /// Whether this is the max-elimination weight.
    pub fn is_infinite(self) -> bool {
        self.0.is_infinite()
    }
}

/// Distance measures between two factors over the same scope, used by the
/// priority propagation schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistKind {
    /// Sum of absolute differences.
    L1,
    /// Maximum absolute difference.
    LInf,
    /// Kullback-Leibler divergence of the normalized tables.
    Kl,
    /// Log-ratio spread `max ln(a/b) − min ln(a/b)`, a projective
    /// pseudo-metric that ignores global rescaling.
    Hpm,
}

type Strides = SmallVec<[usize; 6]>;

/// A dense nonnegative table over a set of discrete variables.
///
/// An empty scope is a scalar factor holding exactly one value. The optional
/// *child* tag marks the conditioned variable of a Bayesian CPT and is only
/// consulted by EM learning and the model writer.
#[derive(Debug, Clone, PartialEq)]
pub struct Factor {
    scope: VariableSet,
    values: Vec<f64>,
    child: Option<usize>,
}

impl Factor {
    /// A scalar factor with a single value.
    pub fn scalar(value: f64) -> Self {
        Factor {
            scope: VariableSet::new(),
            values: vec![value],
            child: None,
        }
    }

    /// A factor over `scope` with every entry set to `value`.
    pub fn constant(scope: VariableSet, value: f64) -> Self {
        let n = scope.num_states();
        Factor {
            scope,
            values: vec![value; n],
            child: None,
        }
    }

    /// A factor from explicit values in the canonical (ascending-label,
    /// first-variable-fastest) layout.
    pub fn new(scope: VariableSet, values: Vec<f64>) -> Result<Self> {
        if values.len() != scope.num_states() {
            return Err(MerlinError::Input(format!(
                "factor over {} expects {} entries, got {}",
                scope,
                scope.num_states(),
                values.len()
            )));
        }
        Ok(Factor {
            scope,
            values,
            child: None,
        })
    }

    /// The scope of this factor.
    pub fn scope(&self) -> &VariableSet {
        &self.scope
    }

    /// Number of scope variables.
    pub fn num_vars(&self) -> usize {
        self.scope.len()
    }

    /// Number of table entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether this is a scalar factor (empty scope, one entry).
    pub fn is_scalar(&self) -> bool {
        self.scope.is_empty()
    }

    /// The raw table in canonical layout.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Mutable access to the raw table.
    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    /// Table entry at a linear index.
    pub fn get(&self, idx: usize) -> f64 {
        self.values[idx]
    }

    /// Sets the table entry at a linear index.
    pub fn set(&mut self, idx: usize, value: f64) {
        self.values[idx] = value;
    }

    /// The child tag of a Bayesian CPT, if any.
    pub fn child(&self) -> Option<usize> {
        self.child
    }

    /// Tags this factor as the CPT of the given child variable.
    pub fn set_child(&mut self, label: usize) {
        self.child = Some(label);
    }

    /// Returns self tagged as the CPT of the given child variable.
    pub fn with_child(mut self, label: usize) -> Self {
        self.child = Some(label);
        self
    }

    /// Strides of the scope variables in ascending label order: the first
    /// variable has stride 1, each next the product of earlier cardinalities.
    pub fn strides(&self) -> Strides {
        strides_of(&self.scope)
    }

    // ---- scalar reductions ------------------------------------------------

    /// Sum of all entries.
    pub fn sum(&self) -> f64 {
        self.values.iter().sum()
    }

    /// Largest entry.
    pub fn max(&self) -> f64 {
        self.values.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b))
    }

    /// Smallest entry.
    pub fn min(&self) -> f64 {
        self.values.iter().fold(f64::INFINITY, |a, &b| a.min(b))
    }

    /// Linear index of the largest entry; ties break to the lowest index.
    pub fn argmax(&self) -> usize {
        let mut best = 0;
        for (i, &v) in self.values.iter().enumerate().skip(1) {
            if v > self.values[best] {
                best = i;
            }
        }
        best
    }

    /// Entropy `−Σ p ln p` of the normalized table (0 when the mass is 0).
    pub fn entropy(&self) -> f64 {
        let total = self.sum();
        if total <= 0.0 {
            return 0.0;
        }
        let mut h = 0.0;
        for &v in &self.values {
            if v > 0.0 {
                let p = v / total;
                h -= p * p.ln();
            }
        }
        h
    }

    /// Draws a linear index with probability proportional to the entries.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let total = self.sum();
        if total <= 0.0 {
            return rng.gen_range(0..self.values.len());
        }
        let target = rng.gen::<f64>() * total;
        let mut acc = 0.0;
        for (i, &v) in self.values.iter().enumerate() {
            acc += v;
            if target < acc {
                return i;
            }
        }
        self.values.len() - 1
    }

    // ---- elementwise ------------------------------------------------------

    /// Elementwise power.
    pub fn pow(&self, k: f64) -> Factor {
        self.map(|v| v.powf(k))
    }

    /// Elementwise natural logarithm.
    pub fn log(&self) -> Factor {
        self.map(f64::ln)
    }

    /// Elementwise exponential.
    pub fn exp(&self) -> Factor {
        self.map(f64::exp)
    }

    /// Multiplies every entry by a scalar.
    pub fn scale(&mut self, k: f64) {
        for v in &mut self.values {
            *v *= k;
        }
    }

    /// Divides by the total mass. If the mass is zero the table is left
    /// unchanged and `false` is returned so the caller can surface the
    /// inconsistency.
    pub fn normalize(&mut self) -> bool {
        let total = self.sum();
        if total > 0.0 && total.is_finite() {
            self.scale(1.0 / total);
            true
        } else {
            false
        }
    }

    /// Divides by the maximum entry, returning `ln(max)` for the caller to
    /// fold into its bound accumulator. A zero table returns `-∞` unchanged.
    pub fn normalize_max(&mut self) -> f64 {
        let mx = self.max();
        if mx > 0.0 && mx.is_finite() {
            self.scale(1.0 / mx);
        }
        mx.ln()
    }

    /// The annealed projection used by the marginal-MAP backward pass:
    /// `f^iter` rescaled to maximum 1, which tends to the indicator of the
    /// argmax as `iter → ∞`.
    pub fn sigma(&self, iter: usize) -> Factor {
        let mut out = self.pow(iter as f64);
        let mx = out.max();
        if mx > 0.0 && mx.is_finite() {
            out.scale(1.0 / mx);
        }
        out
    }

    fn map(&self, f: impl Fn(f64) -> f64) -> Factor {
        Factor {
            scope: self.scope.clone(),
            values: self.values.iter().map(|&v| f(v)).collect(),
            child: self.child,
        }
    }

    // ---- binary combination ----------------------------------------------

    /// Pointwise product over the union of both scopes.
    pub fn product(&self, other: &Factor) -> Factor {
        self.combine(other, |a, b| a * b)
    }

    /// Pointwise quotient over the union of both scopes.
    ///
    /// `0/0` is defined as 0 (absent mass stays absent). Dividing a positive
    /// entry by zero has no meaning in any message computation and is
    /// reported as an internal invariant violation.
    pub fn quotient(&self, other: &Factor) -> Result<Factor> {
        let mut ill = false;
        let out = self.combine(other, |a, b| {
            if b == 0.0 {
                if a > 0.0 {
                    ill = true;
                }
                0.0
            } else {
                a / b
            }
        });
        if ill {
            return Err(MerlinError::Internal(
                "factor quotient divides positive mass by zero".into(),
            ));
        }
        Ok(out)
    }

    fn combine(&self, other: &Factor, mut op: impl FnMut(f64, f64) -> f64) -> Factor {
        let scope = self.scope.union(&other.scope);
        let cards: Strides = scope.iter().map(|v| v.states()).collect();
        let amap = stride_contributions(&self.scope, &scope);
        let bmap = stride_contributions(&other.scope, &scope);

        let total = scope.num_states();
        let mut values = Vec::with_capacity(total);
        let mut digits: Strides = smallvec::smallvec![0; scope.len()];
        let (mut ai, mut bi) = (0usize, 0usize);
        for _ in 0..total {
            values.push(op(self.values[ai], other.values[bi]));
            for d in 0..digits.len() {
                digits[d] += 1;
                ai += amap[d];
                bi += bmap[d];
                if digits[d] < cards[d] {
                    break;
                }
                digits[d] = 0;
                ai -= amap[d] * cards[d];
                bi -= bmap[d] * cards[d];
            }
        }
        Factor {
            scope,
            values,
            child: None,
        }
    }

    // ---- elimination ------------------------------------------------------

    /// Sums out the variables `vs ∩ scope`.
    pub fn sum_out(&self, vs: &VariableSet) -> Factor {
        self.eliminate(vs, 0.0, |acc, v| acc + v)
    }

    /// Max-eliminates the variables `vs ∩ scope`.
    pub fn max_out(&self, vs: &VariableSet) -> Factor {
        self.eliminate(vs, f64::NEG_INFINITY, f64::max)
    }

    /// Min-eliminates the variables `vs ∩ scope`.
    pub fn min_out(&self, vs: &VariableSet) -> Factor {
        self.eliminate(vs, f64::INFINITY, f64::min)
    }

    /// Marginal onto `target`: sums out everything else.
    pub fn marginal(&self, target: &VariableSet) -> Factor {
        self.sum_out(&self.scope.difference(target))
    }

    /// Max-marginal onto `target`: max-eliminates everything else.
    pub fn max_marginal(&self, target: &VariableSet) -> Factor {
        self.max_out(&self.scope.difference(target))
    }

    /// Weighted elimination `(Σ_vs f^{1/w})^w`; the infinite weight reduces
    /// to `max_out`, the unit weight to `sum_out`.
    pub fn sum_power(&self, vs: &VariableSet, w: Weight) -> Factor {
        if w.is_infinite() {
            self.max_out(vs)
        } else if w.value() == 1.0 {
            self.sum_out(vs)
        } else {
            self.pow(w.recip()).sum_out(vs).pow(w.value())
        }
    }

    /// Weighted marginal `(marg(f^{1/w}))^w` onto `target`.
    pub fn marginal_weighted(&self, target: &VariableSet, w: Weight) -> Factor {
        if w.is_infinite() {
            self.max_marginal(target)
        } else if w.value() == 1.0 {
            self.marginal(target)
        } else {
            self.pow(w.recip()).marginal(target).pow(w.value())
        }
    }

    fn eliminate(&self, vs: &VariableSet, init: f64, fold: impl Fn(f64, f64) -> f64) -> Factor {
        let elim = self.scope.intersection(vs);
        if elim.is_empty() {
            return self.clone();
        }
        let keep = self.scope.difference(&elim);
        let cards: Strides = self.scope.iter().map(|v| v.states()).collect();
        // destination stride of each source variable; 0 for eliminated ones
        let dmap = stride_contributions(&keep, &self.scope);

        let mut values = vec![init; keep.num_states()];
        let mut digits: Strides = smallvec::smallvec![0; self.scope.len()];
        let mut di = 0usize;
        for &v in &self.values {
            values[di] = fold(values[di], v);
            for d in 0..digits.len() {
                digits[d] += 1;
                di += dmap[d];
                if digits[d] < cards[d] {
                    break;
                }
                digits[d] = 0;
                di -= dmap[d] * cards[d];
            }
        }
        Factor {
            scope: keep,
            values,
            child: None,
        }
    }

    // ---- conditioning -----------------------------------------------------

    /// Restricts a single variable to a value; the result scope drops it.
    pub fn condition(&self, v: Variable, value: usize) -> Factor {
        let mut evid: SmallVec<[(usize, usize); 4]> = SmallVec::new();
        if let Some(pos) = self.scope.position(v.label()) {
            evid.push((pos, value));
        }
        self.restrict(&evid)
    }

    /// Restricts every observed variable in scope; unobserved entries of the
    /// evidence vector are `None`. Labels beyond the vector are unobserved.
    pub fn condition_map(&self, evidence: &[Option<usize>]) -> Factor {
        let mut evid: SmallVec<[(usize, usize); 4]> = SmallVec::new();
        for (pos, v) in self.scope.iter().enumerate() {
            if let Some(Some(val)) = evidence.get(v.label()) {
                evid.push((pos, *val));
            }
        }
        self.restrict(&evid)
    }

    fn restrict(&self, observed: &[(usize, usize)]) -> Factor {
        if observed.is_empty() {
            return self.clone();
        }
        let strides = self.strides();
        let mut keep = self.scope.clone();
        let mut base = 0usize;
        for &(pos, val) in observed {
            let v = self.scope.get(pos);
            debug_assert!(val < v.states(), "value {} out of range for {}", val, v);
            base += val * strides[pos];
            keep.remove_label(v.label());
        }

        let cards: Strides = keep.iter().map(|v| v.states()).collect();
        let smap = stride_contributions_from(&self.scope, &keep, &strides);
        let total = keep.num_states();
        let mut values = Vec::with_capacity(total);
        let mut digits: Strides = smallvec::smallvec![0; keep.len()];
        let mut si = base;
        for _ in 0..total {
            values.push(self.values[si]);
            for d in 0..digits.len() {
                digits[d] += 1;
                si += smap[d];
                if digits[d] < cards[d] {
                    break;
                }
                digits[d] = 0;
                si -= smap[d] * cards[d];
            }
        }
        Factor {
            scope: keep,
            values,
            child: self.child,
        }
    }

    // ---- distances --------------------------------------------------------

    /// Distance between two tables over the same scope.
    pub fn distance(&self, other: &Factor, kind: DistKind) -> f64 {
        debug_assert_eq!(self.scope, other.scope, "distance requires equal scopes");
        match kind {
            DistKind::L1 => self
                .values
                .iter()
                .zip(&other.values)
                .map(|(a, b)| (a - b).abs())
                .sum(),
            DistKind::LInf => self
                .values
                .iter()
                .zip(&other.values)
                .fold(0.0, |m, (a, b)| m.max((a - b).abs())),
            DistKind::Kl => {
                let (pa, pb) = (self.sum(), other.sum());
                if pa <= 0.0 || pb <= 0.0 {
                    return f64::INFINITY;
                }
                let mut d = 0.0;
                for (&a, &b) in self.values.iter().zip(&other.values) {
                    let p = a / pa;
                    if p > 0.0 {
                        let q = b / pb;
                        if q <= 0.0 {
                            return f64::INFINITY;
                        }
                        d += p * (p / q).ln();
                    }
                }
                d
            }
            DistKind::Hpm => {
                let (mut lo, mut hi) = (f64::INFINITY, f64::NEG_INFINITY);
                for (&a, &b) in self.values.iter().zip(&other.values) {
                    if a == 0.0 && b == 0.0 {
                        continue;
                    }
                    if a == 0.0 || b == 0.0 {
                        return f64::INFINITY;
                    }
                    let r = (a / b).ln();
                    lo = lo.min(r);
                    hi = hi.max(r);
                }
                if hi < lo {
                    0.0
                } else {
                    hi - lo
                }
            }
        }
    }
}

impl Mul for &Factor {
    type Output = Factor;

    fn mul(self, rhs: &Factor) -> Factor {
        self.product(rhs)
    }
}

impl MulAssign<&Factor> for Factor {
    fn mul_assign(&mut self, rhs: &Factor) {
        *self = self.product(rhs);
    }
}

impl AddAssign<&Factor> for Factor {
    fn add_assign(&mut self, rhs: &Factor) {
        let child = self.child;
        *self = self.combine(rhs, |a, b| a + b);
        self.child = child;
    }
}

/// Strides of a scope in its canonical layout.
pub(crate) fn strides_of(scope: &VariableSet) -> Strides {
    let mut strides = Strides::with_capacity(scope.len());
    let mut s = 1usize;
    for v in scope.iter() {
        strides.push(s);
        s *= v.states();
    }
    strides
}

/// For each variable of `sup` (ascending), its stride inside `sub`'s layout,
/// or 0 when `sub` does not mention it.
fn stride_contributions(sub: &VariableSet, sup: &VariableSet) -> Strides {
    let strides = strides_of(sub);
    stride_contributions_from(sub, sup, &strides)
}

fn stride_contributions_from(sub: &VariableSet, sup: &VariableSet, sub_strides: &[usize]) -> Strides {
    sup.iter()
        .map(|v| match sub.position(v.label()) {
            Some(pos) => sub_strides[pos],
            None => 0,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256StarStar;

    fn var(label: usize, states: usize) -> Variable {
        Variable::new(label, states)
    }

    fn table(vars: &[Variable], values: &[f64]) -> Factor {
        let scope: VariableSet = vars.iter().copied().collect();
        Factor::new(scope, values.to_vec()).unwrap()
    }

    #[test]
    fn product_respects_strides() {
        // f(x0) = [1, 2], g(x1) = [3, 5]; product indexed with x0 fastest
        let f = table(&[var(0, 2)], &[1.0, 2.0]);
        let g = table(&[var(1, 2)], &[3.0, 5.0]);
        let p = f.product(&g);
        assert_eq!(p.scope().len(), 2);
        assert_eq!(p.values(), &[3.0, 6.0, 5.0, 10.0]);
    }

    #[test]
    fn product_with_scalar() {
        let f = table(&[var(0, 3)], &[1.0, 2.0, 3.0]);
        let s = Factor::scalar(2.0);
        assert_eq!(f.product(&s).values(), &[2.0, 4.0, 6.0]);
        assert_eq!(s.product(&f).values(), &[2.0, 4.0, 6.0]);
    }

    #[test]
    fn quotient_zero_over_zero_is_zero() {
        let f = table(&[var(0, 2)], &[0.0, 4.0]);
        let g = table(&[var(0, 2)], &[0.0, 2.0]);
        assert_eq!(f.quotient(&g).unwrap().values(), &[0.0, 2.0]);
    }

    #[test]
    fn quotient_positive_over_zero_is_an_invariant_failure() {
        let f = table(&[var(0, 2)], &[1.0, 4.0]);
        let g = table(&[var(0, 2)], &[0.0, 2.0]);
        assert!(f.quotient(&g).is_err());
    }

    #[test]
    fn sum_out_matches_marginal() {
        let f = table(&[var(0, 2), var(1, 3)], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let m = f.marginal(&VariableSet::singleton(var(1, 3)));
        let s = f.sum_out(&VariableSet::singleton(var(0, 2)));
        assert_eq!(m.values(), s.values());
        assert_eq!(m.values(), &[3.0, 7.0, 11.0]);
    }

    #[test]
    fn max_out_and_argmax_tie_break() {
        let f = table(&[var(0, 2), var(1, 2)], &[1.0, 7.0, 7.0, 2.0]);
        let m = f.max_out(&VariableSet::singleton(var(1, 2)));
        assert_eq!(m.values(), &[7.0, 7.0]);
        // first linear index wins the tie
        assert_eq!(f.argmax(), 1);
    }

    #[test]
    fn min_out_keeps_the_smallest_entry() {
        let f = table(&[var(0, 2), var(1, 2)], &[1.0, 7.0, 3.0, 2.0]);
        let m = f.min_out(&VariableSet::singleton(var(1, 2)));
        assert_eq!(m.values(), &[1.0, 2.0]);
    }

    #[test]
    fn sum_power_limits() {
        let f = table(&[var(0, 2), var(1, 2)], &[1.0, 2.0, 3.0, 4.0]);
        let vs = VariableSet::singleton(var(0, 2));
        assert_eq!(f.sum_power(&vs, Weight::ONE).values(), f.sum_out(&vs).values());
        assert_eq!(
            f.sum_power(&vs, Weight::INFINITY).values(),
            f.max_out(&vs).values()
        );
        // w = 1/2: (Σ f^2)^(1/2)
        let w = Weight::finite(0.5);
        let got = f.sum_power(&vs, w);
        assert_abs_diff_eq!(got.values()[0], (1.0f64 + 4.0).sqrt(), epsilon = 1e-12);
        assert_abs_diff_eq!(got.values()[1], (9.0f64 + 16.0).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn condition_drops_the_variable() {
        let f = table(&[var(0, 2), var(2, 3)], &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        let c = f.condition(var(2, 3), 1);
        assert_eq!(c.scope().len(), 1);
        assert_eq!(c.values(), &[2.0, 3.0]);

        let evid: Vec<Option<usize>> = vec![Some(1), None, None];
        let c = f.condition_map(&evid);
        assert_eq!(c.values(), &[1.0, 3.0, 5.0]);
    }

    #[test]
    fn normalize_reports_zero_mass() {
        let mut f = table(&[var(0, 2)], &[0.0, 0.0]);
        assert!(!f.normalize());
        assert_eq!(f.values(), &[0.0, 0.0]);

        let mut f = table(&[var(0, 2)], &[1.0, 3.0]);
        assert!(f.normalize());
        assert_eq!(f.values(), &[0.25, 0.75]);
    }

    #[test]
    fn sigma_concentrates_on_the_argmax() {
        let f = table(&[var(0, 3)], &[0.2, 0.5, 0.3]);
        let s = f.sigma(50);
        assert_abs_diff_eq!(s.values()[1], 1.0, epsilon = 1e-12);
        assert!(s.values()[0] < 1e-10);
        assert!(s.values()[2] < 1e-10);
    }

    #[test]
    fn sample_is_proportional() {
        let f = table(&[var(0, 2)], &[0.0, 5.0]);
        let mut rng = Xoshiro256StarStar::seed_from_u64(7);
        for _ in 0..32 {
            assert_eq!(f.sample(&mut rng), 1);
        }
    }

    #[test]
    fn distances() {
        let a = table(&[var(0, 2)], &[0.5, 0.5]);
        let b = table(&[var(0, 2)], &[0.25, 0.75]);
        assert_abs_diff_eq!(a.distance(&b, DistKind::L1), 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(a.distance(&b, DistKind::LInf), 0.25, epsilon = 1e-12);
        assert!(a.distance(&b, DistKind::Kl) > 0.0);
        let spread = (0.5f64 / 0.25).ln() - (0.5f64 / 0.75).ln();
        assert_abs_diff_eq!(a.distance(&b, DistKind::Hpm), spread, epsilon = 1e-12);
        assert_abs_diff_eq!(a.distance(&a, DistKind::Hpm), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn entropy_of_uniform() {
        let f = table(&[var(0, 4)], &[1.0, 1.0, 1.0, 1.0]);
        assert_abs_diff_eq!(f.entropy(), (4.0f64).ln(), epsilon = 1e-12);
    }
}
