//! Inverse-variance weights of the measurements
//!
//! The initial weights follow the configured noise model. When refinement is
//! enabled the weights are replaced, after each nuisance update, by the
//! per-view precision of the current residual.

/// Initial weights for `counts` under `model`
pub fn initial_weights(model: NoiseKind, variance: Real, counts: &SinoArray) -> SinoArray {
    match model {
        NoiseKind::Counts => counts.mapv(|c| if c > 0.0 { 1.0 / c } else { 0.0 }),
        NoiseKind::Uniform => SinoArray::from_elem(counts.raw_dim(), 1.0 / variance),
        NoiseKind::ViewMean => {
            let mut weights = SinoArray::zeros(counts.raw_dim());
            for (mut w, c) in weights.outer_iter_mut().zip(counts.outer_iter()) {
                let mean = c.mean().unwrap_or(0.0);
                w.fill(if mean > 0.0 { 1.0 / mean } else { 0.0 });
            }
            weights
        }
    }
}

/// Per-view precision `1/mean(e²)` of the residual `error`. Views with a
/// vanishing residual get `None`.
pub fn residual_precision(error: &SinoArray) -> Vec<Option<Real>> {
    error.outer_iter()
        .map(|e| {
            let mean_square = e.fold(0.0, |acc, &x| acc + x * x) / e.len().max(1) as Real;
            (mean_square > 0.0).then(|| 1.0 / mean_square)
        })
        .collect()
}

/// Replace the weights of each view by the precision of its residual.
/// Views whose residual vanishes keep their weights.
pub fn refine(weights: &mut SinoArray, error: &SinoArray) {
    for (mut w, precision) in weights.outer_iter_mut().zip(residual_precision(error)) {
        if let Some(p) = precision { w.fill(p); }
    }
}


// ----- Imports ------------------------------------------------------------------------------------------
use crate::{config::NoiseKind, sinogram::SinoArray, types::Real};
