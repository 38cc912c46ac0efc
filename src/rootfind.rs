//! Half-interval root finding
//!
//! Used both for the exact ICD voxel update (root of the cost derivative) and
//! for the Lagrange multiplier of the gain constraint.

use crate::types::Real;

/// Outcome of a bracketed root search
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Solution {
    Root(Real),
    /// `f` is positive at both ends of the bracket
    BothPositive,
    /// `f` is negative at both ends of the bracket
    BothNegative,
}

impl Solution {

    /// `0` for a root, otherwise the common sign of the endpoints
    pub fn code(&self) -> i8 {
        match self {
            Solution::Root(_)      =>  0,
            Solution::BothPositive =>  1,
            Solution::BothNegative => -1,
        }
    }

    pub fn root(&self) -> Option<Real> {
        match *self { Solution::Root(x) => Some(x), _ => None }
    }
}

/// Bisections are capped; 200 halvings exhaust any `f64` bracket
const MAX_BISECTIONS: usize = 200;

/// Find a root of `f` in `[a, b]` to within `tolerance`.
///
/// Bisects until the bracket is narrower than `tolerance`, then interpolates
/// linearly between the final endpoints.
pub fn solve<F>(mut f: F, mut a: Real, mut b: Real, tolerance: Real) -> Solution
where
    F: FnMut(Real) -> Real,
{
    if a > b { std::mem::swap(&mut a, &mut b); }
    let mut fa = f(a);
    let mut fb = f(b);
    if fa == 0.0 { return Solution::Root(a); }
    if fb == 0.0 { return Solution::Root(b); }
    if fa > 0.0 && fb > 0.0 { return Solution::BothPositive; }
    if fa < 0.0 && fb < 0.0 { return Solution::BothNegative; }
    // NaN at an endpoint: nothing sensible to bracket
    if !(fa * fb < 0.0) { return Solution::BothPositive; }

    for _ in 0..MAX_BISECTIONS {
        if (b - a).abs() <= tolerance { break; }
        let c = 0.5 * (a + b);
        let fc = f(c);
        if fc == 0.0 { return Solution::Root(c); }
        if (fc > 0.0) == (fa > 0.0) { a = c; fa = fc; }
        else                        { b = c; fb = fc; }
    }

    let root = if fb == fa { a } else { (a * fb - b * fa) / (fb - fa) };
    Solution::Root(root.clamp(a, b))
}
