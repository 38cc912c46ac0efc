//! Markov random field prior on the reconstructed volume
//!
//! The prior penalizes differences between each voxel and its 26 neighbours,
//! weighted by a fixed 3×3×3 filter. The penalty function `ρ` is pluggable
//! through the `Prior` trait; two families are provided:
//!
//! + `PowerMrf`: `ρ(Δ) = |Δ|^p / (p σ^p)`
//!
//! + `Qggmrf`: `ρ(Δ) = z² / (c + z^(2-p))`, `z = |Δ|/σ`, quadratic near zero
//!   and growing like `|Δ|^p` far from it.

use crate::config::{PriorConfig, PriorKind};
use crate::types::Real;

// ----- Neighbourhood -----------------------------------------------------------------

/// Offset `[dz, dx, dy]` to a neighbour
pub type Offset = [isize; 3];

const FACE  : Real = 0.0523;
const EDGE  : Real = 0.0370;
const CORNER: Real = 0.0302;

/// Filter weight of the neighbour at `offset`
pub fn filter_weight(offset: Offset) -> Real {
    match offset.iter().filter(|&&d| d != 0).count() {
        0 => 0.0,
        1 => FACE,
        2 => EDGE,
        _ => CORNER,
    }
}

/// All 26 neighbours with their filter weights
pub fn neighbours() -> Vec<(Offset, Real)> {
    itertools::iproduct!(-1..=1_isize, -1..=1_isize, -1..=1_isize)
        .map(|(dz, dx, dy)| [dz, dx, dy])
        .filter(|o| *o != [0, 0, 0])
        .map(|o| (o, filter_weight(o)))
        .collect()
}

/// Half of the neighbourhood: visiting these from every voxel counts each
/// unordered neighbour pair exactly once
pub const FORWARD: [Offset; 13] = [
    [0,  0,  1],
    [0,  1, -1],
    [0,  1,  0],
    [0,  1,  1],
    [1, -1,  0],
    [1,  0,  0],
    [1,  1,  0],
    [1, -1, -1],
    [1, -1,  1],
    [1,  0, -1],
    [1,  1, -1],
    [1,  1,  1],
    [1,  0,  1],
];

// ----- Penalty functions -------------------------------------------------------------

/// Penalty applied to the difference between neighbouring voxels
pub trait Prior: Sync {

    /// `ρ(Δ)`
    fn value(&self, delta: Real) -> Real;

    /// `ρ'(Δ)`
    fn derivative(&self, delta: Real) -> Real;

    /// `ρ'(Δ)/Δ`: curvature of the symmetric quadratic which touches `ρ` at
    /// `±Δ` and lies above it everywhere else. `None` where this is singular.
    fn surrogate_coefficient(&self, delta: Real) -> Option<Real>;
}

#[inline]
fn sign(x: Real) -> Real {
    if x > 0.0 { 1.0 } else if x < 0.0 { -1.0 } else { 0.0 }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PowerMrf {
    pub p: Real,
    /// `σ_x^p`
    sigma_x_p: Real,
}

impl PowerMrf {
    pub fn new(p: Real, sigma_x: Real) -> Self { Self { p, sigma_x_p: sigma_x.powf(p) } }
}

impl Prior for PowerMrf {

    fn value(&self, delta: Real) -> Real {
        delta.abs().powf(self.p) / (self.p * self.sigma_x_p)
    }

    fn derivative(&self, delta: Real) -> Real {
        sign(delta) * delta.abs().powf(self.p - 1.0) / self.sigma_x_p
    }

    fn surrogate_coefficient(&self, delta: Real) -> Option<Real> {
        if delta == 0.0 && self.p < 2.0 { return None; }
        Some(delta.abs().powf(self.p - 2.0) / self.sigma_x_p)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Qggmrf {
    pub p: Real,
    pub c: Real,
    pub sigma_x: Real,
}

impl Qggmrf {
    #[inline]
    fn z_k(&self, delta: Real) -> (Real, Real) {
        let z = delta.abs() / self.sigma_x;
        (z, z.powf(2.0 - self.p))
    }
}

impl Prior for Qggmrf {

    fn value(&self, delta: Real) -> Real {
        let (z, zk) = self.z_k(delta);
        z * z / (self.c + zk)
    }

    fn derivative(&self, delta: Real) -> Real {
        let (z, zk) = self.z_k(delta);
        let denominator = self.c + zk;
        sign(delta) / self.sigma_x * z * (2.0 * self.c + self.p * zk) / (denominator * denominator)
    }

    fn surrogate_coefficient(&self, delta: Real) -> Option<Real> {
        let (_, zk) = self.z_k(delta);
        let denominator = self.c + zk;
        Some((2.0 * self.c + self.p * zk) / (self.sigma_x * self.sigma_x * denominator * denominator))
    }
}

/// The prior selected at run time
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PriorModel {
    Power(PowerMrf),
    Qggmrf(Qggmrf),
}

impl From<&PriorConfig> for PriorModel {
    fn from(config: &PriorConfig) -> Self {
        let PriorConfig { kind, p, c, sigma_x } = *config;
        match kind {
            PriorKind::Power  => Self::Power(PowerMrf::new(p, sigma_x)),
            PriorKind::Qggmrf => Self::Qggmrf(Qggmrf { p, c, sigma_x }),
        }
    }
}

impl Prior for PriorModel {
    #[inline]
    fn value(&self, delta: Real) -> Real {
        match self { Self::Power(m) => m.value(delta), Self::Qggmrf(m) => m.value(delta) }
    }
    #[inline]
    fn derivative(&self, delta: Real) -> Real {
        match self { Self::Power(m) => m.derivative(delta), Self::Qggmrf(m) => m.derivative(delta) }
    }
    #[inline]
    fn surrogate_coefficient(&self, delta: Real) -> Option<Real> {
        match self {
            Self::Power (m) => m.surrogate_coefficient(delta),
            Self::Qggmrf(m) => m.surrogate_coefficient(delta),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;
    use float_eq::assert_float_eq;
    use std::collections::HashSet;

    #[test]
    fn filter_has_expected_shape() {
        let n = neighbours();
        assert_eq!(n.len(), 26);
        let count = |w| n.iter().filter(|(_, x)| *x == w).count();
        assert_eq!(count(FACE  ),  6);
        assert_eq!(count(EDGE  ), 12);
        assert_eq!(count(CORNER),  8);
    }

    #[test]
    fn forward_directions_cover_each_pair_once() {
        let forward: HashSet<Offset> = FORWARD.iter().cloned().collect();
        assert_eq!(forward.len(), 13);
        for (o, _) in neighbours() {
            let negated = [-o[0], -o[1], -o[2]];
            assert!(forward.contains(&o) ^ forward.contains(&negated), "{o:?}");
        }
    }

    #[rstest(/**/ p  , sigma, delta,
             case(1.2, 1.0  ,  0.7 ),
             case(1.2, 2.0  , -1.3 ),
             case(2.0, 1.0  ,  3.0 ),
             case(1.0, 0.5  , -0.2 ),
    )]
    fn power_derivative_is_gradient(p: Real, sigma: Real, delta: Real) {
        let m = PowerMrf::new(p, sigma);
        let h = 1e-6;
        let numeric = (m.value(delta + h) - m.value(delta - h)) / (2.0 * h);
        assert_float_eq!(m.derivative(delta), numeric, rel <= 1e-6);
        assert_float_eq!(m.surrogate_coefficient(delta).unwrap() * delta, m.derivative(delta), rel <= 1e-12);
    }

    #[rstest(/**/ p  , c   , sigma, delta,
             case(1.2, 0.01, 1.0  ,  0.7 ),
             case(1.1, 0.1 , 2.0  , -1.3 ),
             case(2.0, 1.0 , 1.0  ,  3.0 ),
             case(1.5, 0.5 , 0.5  , -0.02),
    )]
    fn qggmrf_derivative_is_gradient(p: Real, c: Real, sigma: Real, delta: Real) {
        let m = Qggmrf { p, c, sigma_x: sigma };
        let h = 1e-7;
        let numeric = (m.value(delta + h) - m.value(delta - h)) / (2.0 * h);
        assert_float_eq!(m.derivative(delta), numeric, rel <= 1e-5);
        assert_float_eq!(m.surrogate_coefficient(delta).unwrap() * delta, m.derivative(delta), rel <= 1e-12);
    }

    #[test]
    fn qggmrf_is_quadratic_near_zero() {
        let m = Qggmrf { p: 1.2, c: 0.01, sigma_x: 1.0 };
        assert_float_eq!(m.surrogate_coefficient(0.0).unwrap(), 2.0 / 0.01, rel <= 1e-12);
        assert_eq!(m.derivative(0.0), 0.0);
    }

    #[test]
    fn power_coefficient_is_singular_at_zero_below_two() {
        assert_eq!(PowerMrf::new(1.2, 1.0).surrogate_coefficient(0.0), None);
        assert_eq!(PowerMrf::new(2.0, 1.0).surrogate_coefficient(0.0), Some(1.0));
        assert_eq!(PowerMrf::new(1.0, 1.0).derivative(0.0), 0.0);
    }

    use proptest::prelude::*;

    proptest! {
        // The quadratic surrogate built at `d0` must lie on or above `ρ`
        #[test]
        fn surrogates_majorize(
            p in 1.0..2.0_f64,
            c in 0.001..2.0_f64,
            sigma in 0.1..5.0_f64,
            d0 in prop_oneof![-10.0..-1e-3_f64, 1e-3..10.0_f64],
            d in -20.0..20.0_f64,
            qggmrf in any::<bool>(),
        ) {
            let m = if qggmrf { PriorModel::Qggmrf(Qggmrf { p, c, sigma_x: sigma }) }
                    else      { PriorModel::Power(PowerMrf::new(p, sigma)) };
            let b = m.surrogate_coefficient(d0).unwrap();
            let surrogate = m.value(d0) + 0.5 * b * (d * d - d0 * d0);
            let scale = 1.0 + m.value(d).abs();
            prop_assert!(surrogate >= m.value(d) - 1e-9 * scale,
                         "surrogate {} < value {}", surrogate, m.value(d));
        }
    }
}
