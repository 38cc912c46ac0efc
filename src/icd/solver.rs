//! One-dimensional voxel updates
//!
//! With every other voxel held fixed, the cost as a function of the value `u`
//! of the voxel being updated is
//!
//!   `θ1·(u − V) + ½·θ2·(u − V)² + Σₖ wₖ·ρ(u − xₖ)`
//!
//! where `V` is the current value, `xₖ` the neighbour values and `wₖ` their
//! filter weights. The minimizer over `u ≥ 0` is found either exactly, by
//! rooting the derivative, or approximately by minimizing a quadratic
//! majorizer of the prior term.

/// Everything the voxel update needs to know about one voxel
#[derive(Clone, Copy, Debug)]
pub struct LocalProblem<'n> {
    /// Current value `V`
    pub value: Real,
    pub theta1: Real,
    pub theta2: Real,
    /// `(value, filter weight)` of each in-bounds neighbour
    pub neighbours: &'n [(Real, Weight)],
}

/// Result of one voxel update
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Step {
    pub value: Real,
    /// The root bracket did not straddle a sign change
    pub flat: bool,
}

impl LocalProblem<'_> {

    /// Derivative of the local cost at `u`
    pub fn derivative<P: Prior>(&self, prior: &P, u: Real) -> Real {
        let prior_term: Real = self.neighbours.iter()
            .map(|&(x, w)| w * prior.derivative(u - x))
            .sum();
        self.theta1 + self.theta2 * (u - self.value) + prior_term
    }

    /// Local cost at `u`, relative to an arbitrary constant
    pub fn cost<P: Prior>(&self, prior: &P, u: Real) -> Real {
        let d = u - self.value;
        let prior_term: Real = self.neighbours.iter()
            .map(|&(x, w)| w * prior.value(u - x))
            .sum();
        self.theta1 * d + 0.5 * self.theta2 * d * d + prior_term
    }

    /// Unconstrained minimizer of the data term alone
    fn quadratic_optimum(&self) -> Option<Real> {
        (self.theta2 > 0.0).then(|| self.value - self.theta1 / self.theta2)
    }

    /// Interval guaranteed to contain the minimizer when the data term is
    /// strictly convex: the neighbour values together with the quadratic
    /// optimum
    pub fn bracket(&self) -> (Real, Real) {
        let candidates = self.neighbours.iter().map(|&(x, _)| x).chain(self.quadratic_optimum());
        candidates
            .fold(None, |acc: Option<(Real, Real)>, x| match acc {
                None             => Some((x, x)),
                Some((lo, hi)) => Some((lo.min(x), hi.max(x))),
            })
            .unwrap_or((self.value, self.value))
    }
}

/// Root the derivative of the local cost within `bracket`, then clamp to the
/// non-negative half-line
pub fn exact<P: Prior>(problem: &LocalProblem, prior: &P, tolerance: Real) -> Step {
    let (low, high) = problem.bracket();
    let (value, flat) = match solve(|u| problem.derivative(prior, u), low, high, tolerance) {
        Solution::Root(u)      => (u, false),
        Solution::BothPositive => (low, true),
        Solution::BothNegative => (high, true),
    };
    Step { value: value.max(0.0), flat }
}

/// Minimize the data term plus a symmetric quadratic majorizer of each
/// neighbour's penalty, built at the current value
pub fn surrogate<P: Prior>(problem: &LocalProblem, prior: &P) -> Step {
    let v = problem.value;
    let (numerator, denominator) = problem.neighbours.iter()
        .filter_map(|&(x, w)| prior.surrogate_coefficient(v - x).map(|b| (x, w * b)))
        .fold((-problem.theta1, problem.theta2), |(num, den), (x, wb)| {
            (num - wb * (v - x), den + wb)
        });
    if !(denominator > 0.0) {
        return Step { value: v, flat: false };
    }
    let step = numerator / denominator;
    Step { value: (v + step).max(0.0), flat: false }
}

/// Dispatch on the configured solver
#[inline]
pub fn update<P: Prior>(solver: Solver, problem: &LocalProblem, prior: &P, tolerance: Real) -> Step {
    match solver {
        Solver::Exact     => exact(problem, prior, tolerance),
        Solver::Surrogate => surrogate(problem, prior),
    }
}


// ----- Imports ------------------------------------------------------------------------------------------
use crate::{
    config::Solver,
    prior::Prior,
    rootfind::{solve, Solution},
    types::{Real, Weight},
};
