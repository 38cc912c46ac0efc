//! The penalized cost which ICD minimizes, and its bookkeeping
//!
//! `cost = ½·Σ w·e² + Σ_pairs filter·ρ(Object[v] − Object[neighbour])`
//!
//! plus, when the noise variance is being estimated, the normalization
//! `½·Σ log(2π/w)` of the Gaussian likelihood.

/// `½·Σ w·e²`
pub fn data_term(error: &SinoArray, weights: &SinoArray) -> Real {
    0.5 * Zip::from(error)
        .and(weights)
        .fold(0.0, |acc, &e, &w| acc + e * e * w)
}

/// Sum of the prior penalty over every unordered pair of neighbouring voxels
pub fn prior_term<P: Prior>(volume: &Volume, prior: &P, boundary: Boundary) -> Real {
    let (n_z, n_x, n_y) = volume.dim();
    let directions: Vec<(Offset, Weight)> = FORWARD.iter().map(|&o| (o, filter_weight(o))).collect();
    (0..n_z)
        .into_par_iter()
        .map(|z| {
            let mut sum = 0.0;
            for (x, y) in iproduct!(0..n_x, 0..n_y) {
                let value = volume[[z, x, y]];
                for &([dz, dx, dy], w) in &directions {
                    let (Some(nz), Some(nx), Some(ny)) =
                        (shift(z, dz, n_z, boundary), shift(x, dx, n_x, boundary), shift(y, dy, n_y, boundary))
                    else { continue };
                    sum += w * prior.value(value - volume[[nz, nx, ny]]);
                }
            }
            sum
        })
        .sum()
}

/// `½·Σ log(2π/w)` over measurements with non-zero weight
pub fn noise_term(weights: &SinoArray) -> Real {
    0.5 * weights.iter()
        .filter(|&&w| w > 0.0)
        .map(|&w| (TWOPI / w).ln())
        .sum::<Real>()
}

/// Total cost of the current estimate
pub fn total<P: Prior>(
    error   : &SinoArray,
    weights : &SinoArray,
    volume  : &Volume,
    prior   : &P,
    boundary: Boundary,
    noise   : bool,
) -> Real {
    let mut cost = data_term(error, weights) + prior_term(volume, prior, boundary);
    if noise { cost += noise_term(weights) }
    cost
}

/// Relative increase tolerated before a cost rise is reported
pub const COST_TOLERANCE: Real = 1e-9;

/// History of cost evaluations, watching for increases
#[derive(Clone, Debug, Default)]
pub struct CostTracker {
    history: Vec<Real>,
}

impl CostTracker {

    pub fn new() -> Self { Self::default() }

    /// Record `cost`, returning the previous value if `cost` exceeds it
    pub fn record(&mut self, cost: Real) -> Option<Real> {
        let previous = self.last();
        self.history.push(cost);
        previous.filter(|&p| increased(p, cost))
    }

    pub fn last(&self) -> Option<Real> { self.history.last().cloned() }

    pub fn history(&self) -> &[Real] { &self.history }

    pub fn into_history(self) -> Vec<Real> { self.history }
}

/// Whether `after` is larger than `before` beyond rounding
pub fn increased(before: Real, after: Real) -> bool {
    after - before > COST_TOLERANCE * before.abs().max(1.0)
}


// ----- Imports ------------------------------------------------------------------------------------------
use itertools::iproduct;
use ndarray::Zip;
use rayon::prelude::*;

use crate::{
    config::Boundary,
    geometry::Volume,
    index::shift,
    prior::{filter_weight, Offset, Prior, FORWARD},
    sinogram::SinoArray,
    types::{Real, Weight, TWOPI},
};
