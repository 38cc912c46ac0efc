//! Measured tilt-series data and the detector it was recorded on
//!
//! Sinogram arrays are indexed `[view, r, t]`: `r` runs across the detector
//! perpendicular to the tilt axis, `t` along it.

use ndarray::{Array3, Axis};

use crate::error::{MbirError, Result, checked_volume};
use crate::types::{Angle, Length, Real};

/// Any per-measurement quantity: counts, estimates, errors, weights
pub type SinoArray = Array3<Real>;

#[derive(Clone, Debug, PartialEq)]
pub struct Detector {
    /// Tilt angle of each view, in radians
    pub angles: Vec<Angle>,
    pub n_r: usize,
    pub n_t: usize,
    pub delta_r: Length,
    pub delta_t: Length,
    /// Coordinates of the lower edges of the first bins
    pub r0: Length,
    pub t0: Length,
}

impl Detector {

    /// Detector centred on the rotation axis, angles in radians
    pub fn centred(angles: Vec<Angle>, n_r: usize, n_t: usize, delta_r: Length, delta_t: Length) -> Result<Self> {
        if angles.is_empty() || n_r == 0 || n_t == 0 {
            return Err(MbirError::InvalidGeometry(
                format!("empty detector: {} views, n_r = {n_r}, n_t = {n_t}", angles.len())));
        }
        if !(delta_r > 0.0 && delta_t > 0.0) {
            return Err(MbirError::InvalidGeometry(
                format!("detector pitches must be positive: delta_r = {delta_r}, delta_t = {delta_t}")));
        }
        if let Some(angle) = angles.iter().find(|a| !a.is_finite()) {
            return Err(MbirError::InvalidGeometry(format!("tilt angles must be finite, found {angle}")));
        }
        checked_volume("sinogram", &[angles.len(), n_r, n_t])?;
        Ok(Self {
            angles, n_r, n_t, delta_r, delta_t,
            r0: -(n_r as Length) * delta_r / 2.0,
            t0: -(n_t as Length) * delta_t / 2.0,
        })
    }

    #[inline] pub fn n_views(&self) -> usize { self.angles.len() }

    #[inline] pub fn r_max(&self) -> Length { self.r0 + self.n_r as Length * self.delta_r }
    #[inline] pub fn t_max(&self) -> Length { self.t0 + self.n_t as Length * self.delta_t }

    #[inline] pub fn r_centre(&self, r: usize) -> Length { self.r0 + (r as Length + 0.5) * self.delta_r }
    #[inline] pub fn t_centre(&self, t: usize) -> Length { self.t0 + (t as Length + 0.5) * self.delta_t }

    pub fn r_half_width(&self) -> Length { self.n_r as Length * self.delta_r / 2.0 }

    /// `[n_views, n_r, n_t]`
    pub fn shape(&self) -> [usize; 3] { [self.n_views(), self.n_r, self.n_t] }

    pub fn zeros(&self) -> SinoArray { SinoArray::zeros(self.shape()) }

    /// Check that an array matches this detector's layout
    pub fn check(&self, what: &'static str, data: &SinoArray) -> Result<()> {
        if data.shape() != self.shape() {
            return Err(MbirError::ShapeMismatch {
                what,
                expected: self.shape().to_vec(),
                found: data.shape().to_vec(),
            });
        }
        Ok(())
    }
}

/// Measured counts together with the detector geometry
#[derive(Clone, Debug)]
pub struct Sinogram {
    pub detector: Detector,
    pub counts: SinoArray,
}

impl Sinogram {

    pub fn new(detector: Detector, counts: SinoArray) -> Result<Self> {
        detector.check("counts", &counts)?;
        if let Some(bad) = counts.iter().find(|c| !(**c >= 0.0)) {
            return Err(MbirError::InvalidData(format!("counts must be non-negative, found {bad}")));
        }
        Ok(Self { detector, counts })
    }

    /// Build from a flat buffer laid out `[view][r][t]`
    pub fn from_vec(detector: Detector, data: Vec<Real>) -> Result<Self> {
        let shape = detector.shape();
        let found = data.len();
        let counts = SinoArray::from_shape_vec(shape, data)
            .map_err(|_| MbirError::ShapeMismatch { what: "counts", expected: shape.to_vec(), found: vec![found] })?;
        Self::new(detector, counts)
    }

    /// Keep only the views in `kept`, in that order
    pub fn select_views(self, kept: &[usize]) -> Self {
        let Self { detector, counts } = self;
        let angles = kept.iter().map(|&v| detector.angles[v]).collect();
        Self {
            counts: counts.select(Axis(0), kept),
            detector: Detector { angles, ..detector },
        }
    }
}

/// Indices of the views of `n_views` which are not listed in `excluded`
pub fn kept_views(n_views: usize, excluded: &[usize]) -> Result<Vec<usize>> {
    if let Some(v) = excluded.iter().find(|&&v| v >= n_views) {
        return Err(MbirError::InvalidConfig(format!("cannot exclude view {v}: there are only {n_views} views")));
    }
    let kept: Vec<usize> = (0..n_views).filter(|v| !excluded.contains(v)).collect();
    if kept.is_empty() {
        return Err(MbirError::InvalidConfig("every view is excluded".into()));
    }
    Ok(kept)
}

#[cfg(test)]
mod test {
    use super::*;
    use float_eq::assert_float_eq;
    #[allow(unused)] use pretty_assertions::{assert_eq, assert_ne};

    fn detector() -> Detector {
        Detector::centred(vec![-0.5, 0.0, 0.5], 6, 2, 1.0, 2.0).unwrap()
    }

    #[test]
    fn centred_extents() {
        let d = detector();
        assert_float_eq!(d.r0   , -3.0, abs <= 1e-12);
        assert_float_eq!(d.r_max(),  3.0, abs <= 1e-12);
        assert_float_eq!(d.t0   , -2.0, abs <= 1e-12);
        assert_float_eq!(d.t_max(),  2.0, abs <= 1e-12);
        assert_float_eq!(d.r_centre(0), -2.5, abs <= 1e-12);
        assert_float_eq!(d.t_centre(1),  1.0, abs <= 1e-12);
        assert_eq!(d.shape(), [3, 6, 2]);
    }

    #[test]
    fn counts_must_match_detector() {
        let d = detector();
        assert!(Sinogram::new(d.clone(), d.zeros()).is_ok());
        assert!(Sinogram::new(d.clone(), SinoArray::zeros([3, 2, 6])).is_err());
        assert!(Sinogram::from_vec(d.clone(), vec![0.0; 35]).is_err());
        assert!(Sinogram::from_vec(d, vec![1.0; 36]).is_ok());
    }

    #[test]
    fn negative_counts_are_rejected() {
        let d = detector();
        let mut counts = d.zeros();
        counts[[1, 2, 1]] = -1.0;
        assert!(Sinogram::new(d, counts).is_err());
    }

    #[test]
    fn empty_detector_is_rejected() {
        assert!(Detector::centred(vec![], 4, 4, 1.0, 1.0).is_err());
        assert!(Detector::centred(vec![0.0], 4, 4, -1.0, 1.0).is_err());
    }

    #[test]
    fn excluded_views_are_dropped() -> Result<()> {
        let d = detector();
        let counts = SinoArray::from_shape_fn(d.shape(), |(v, r, t)| (100 * v + 10 * r + t) as Real);
        let kept = kept_views(3, &[1])?;
        assert_eq!(kept, vec![0, 2]);
        let sinogram = Sinogram::new(d, counts)?.select_views(&kept);
        assert_eq!(sinogram.detector.angles, vec![-0.5, 0.5]);
        assert_eq!(sinogram.detector.shape(), [2, 6, 2]);
        assert_eq!(sinogram.counts.shape(), &[2, 6, 2]);
        assert_eq!(sinogram.counts[[1, 3, 1]], 231.0);
        assert_eq!(kept_views(3, &[])?, vec![0, 1, 2]);
        Ok(())
    }

    #[test]
    fn bad_exclusions_are_rejected() {
        assert!(matches!(kept_views(3, &[3])      , Err(MbirError::InvalidConfig(_))));
        assert!(matches!(kept_views(2, &[0, 1, 0]), Err(MbirError::InvalidConfig(_))));
    }

    #[rstest::rstest(/**/ angle, case(Real::INFINITY), case(Real::NEG_INFINITY), case(Real::NAN))]
    fn non_finite_angles_are_rejected(angle: Angle) {
        let result = Detector::centred(vec![0.0, angle], 4, 1, 1.0, 1.0);
        assert!(matches!(result, Err(MbirError::InvalidGeometry(_))), "{result:?}");
    }
}
