//! Per-view gain and offset
//!
//! The measured counts are modelled as `gain[θ] · Y[θ] + offset[θ]`, where `Y`
//! is the projection of the volume. Jointly estimating the nuisance
//! parameters minimizes the weighted squared error of every view, subject to
//! the geometric mean of the gains being fixed:
//!
//!   `Σ_θ log gain[θ] = N_θ · log target`
//!
//! For fixed gain the optimal offset is linear in the gain, which reduces each
//! view's problem to a quadratic in the gain. The Lagrange condition of the
//! constrained problem is then, per view, `a·g² + b·g + λ = 0`, and the
//! multiplier `λ` is found by rooting the constraint.

#[derive(Clone, Debug, PartialEq)]
pub struct Nuisance {
    pub gain: Vec<Real>,
    pub offset: Vec<Real>,
}

impl Nuisance {

    pub fn new(gain: Vec<Real>, offset: Vec<Real>) -> Result<Self> {
        if gain.len() != offset.len() {
            return Err(MbirError::ShapeMismatch {
                what: "offsets", expected: vec![gain.len()], found: vec![offset.len()],
            });
        }
        if let Some(g) = gain.iter().find(|g| !(**g > 0.0)) {
            return Err(MbirError::InvalidData(format!("gains must be positive, found {g}")));
        }
        Ok(Self { gain, offset })
    }

    /// The same gain and zero offset for every view
    pub fn constant(n_views: usize, gain: Real) -> Self {
        Self { gain: vec![gain; n_views], offset: vec![0.0; n_views] }
    }

    pub fn n_views(&self) -> usize { self.gain.len() }

    pub fn geometric_mean_gain(&self) -> Real {
        let n = self.gain.len().max(1) as Real;
        (self.gain.iter().map(|g| g.ln()).sum::<Real>() / n).exp()
    }
}

/// Weighted moments of one view
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct ViewSums {
    w: Real,
    y_w: Real,
    y2_w: Real,
    counts_w: Real,
    counts2_w: Real,
    y_counts_w: Real,
}

impl ViewSums {

    fn new(y: ArrayView2<Real>, counts: ArrayView2<Real>, weights: ArrayView2<Real>) -> Self {
        Zip::from(y).and(counts).and(weights).fold(Self::default(), |s, &y, &c, &w| Self {
            w         : s.w          + w,
            y_w       : s.y_w        + y * w,
            y2_w      : s.y2_w       + y * y * w,
            counts_w  : s.counts_w   + c * w,
            counts2_w : s.counts2_w  + c * c * w,
            y_counts_w: s.y_counts_w + y * c * w,
        })
    }

    /// `½·Σ w·(counts − gain·Y − offset)²`
    fn cost(&self, gain: Real, offset: Real) -> Real {
        0.5 * (self.y2_w * gain * gain
               + 2.0 * self.y_w * gain * offset
               + self.w * offset * offset
               - 2.0 * (self.y_counts_w * gain + self.counts_w * offset)
               + self.counts2_w)
    }

    /// Optimal offset for `gain`: `d1 − d2·gain`
    fn offset(&self, gain: Real) -> Real {
        (self.counts_w - self.y_w * gain) / self.w
    }

    /// Coefficients `(a, b)` of the Lagrange condition `a·g² + b·g + λ = 0`
    fn quadratic(&self) -> (Real, Real) {
        let d1 = self.counts_w / self.w;
        let d2 = self.y_w / self.w;
        (self.y2_w - d2 * self.y_w, -(self.y_counts_w - d1 * self.y_w))
    }

    /// The positive root of the Lagrange condition with the lower cost
    fn gain(&self, lambda: Real) -> Option<Real> {
        let (a, b) = self.quadratic();
        let root = (b * b - 4.0 * a * lambda).max(0.0).sqrt();
        [(-b - root) / (2.0 * a), (-b + root) / (2.0 * a)]
            .into_iter()
            .filter(|&g| g > 0.0)
            .map(|g| (g, self.cost(g, self.offset(g))))
            .min_by(|(_, c1), (_, c2)| c1.total_cmp(c2))
            .map(|(g, _)| g)
    }

    /// Whether the view constrains both gain and offset
    fn is_determined(&self) -> bool {
        self.w > 0.0 && self.quadratic().0 > 0.0
    }
}

/// Largest number of bracket expansions tried when rooting the multiplier
const MAX_EXPANSIONS: usize = 128;

/// Jointly estimate gain and offset of every view, for a volume whose
/// unscaled projection is `projection`.
///
/// Returns `None` when the problem is degenerate (some view's projection is
/// constant over its weighted measurements) or no multiplier satisfying the
/// constraint can be bracketed.
pub fn estimate(
    projection : &SinoArray,
    counts     : &SinoArray,
    weights    : &SinoArray,
    target_gain: Real,
    tolerance  : Real,
) -> Option<Nuisance> {
    let sums: Vec<ViewSums> = projection.outer_iter()
        .zip(counts.outer_iter())
        .zip(weights.outer_iter())
        .map(|((y, c), w)| ViewSums::new(y, c, w))
        .collect();

    if let Some(view) = sums.iter().position(|s| !s.is_determined()) {
        debug!("nuisance estimation skipped: view {view} is degenerate");
        return None;
    }

    let log_target = sums.len() as Real * target_gain.ln();
    let constraint = |lambda: Real| -> Real {
        sums.iter()
            .map(|s| s.gain(lambda).unwrap_or(Real::MIN_POSITIVE).ln())
            .sum::<Real>() - log_target
    };

    // Beyond min(b²/4a) some discriminant becomes negative
    let high = sums.iter()
        .map(|s| { let (a, b) = s.quadratic(); b * b / (4.0 * a) })
        .fold(Real::INFINITY, Real::min);
    let mut distance = high.abs().max(1.0);
    let mut low = high - distance;
    let mut lambda = None;
    for _ in 0..MAX_EXPANSIONS {
        if let Solution::Root(l) = solve(&constraint, low, high, tolerance) {
            lambda = Some(l);
            break;
        }
        distance *= 2.0;
        low = high - distance;
    }
    let Some(lambda) = lambda else {
        warn!("nuisance estimation: cannot bracket the Lagrange multiplier below {high:.3e}");
        return None;
    };

    let mut gain = Vec::with_capacity(sums.len());
    let mut offset = Vec::with_capacity(sums.len());
    for s in &sums {
        let g = s.gain(lambda)?;
        gain.push(g);
        offset.push(s.offset(g));
    }
    debug!("nuisance estimation: lambda = {lambda:.4e}");
    Some(Nuisance { gain, offset })
}


// ----- Imports ------------------------------------------------------------------------------------------
use ndarray::{ArrayView2, Zip};
use tracing::{debug, warn};

use crate::{
    error::{MbirError, Result},
    rootfind::{solve, Solution},
    sinogram::SinoArray,
    types::Real,
};
