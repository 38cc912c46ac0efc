//! Voxel and detector response tables
//!
//! All projection weights are interpolated from tables computed once, before
//! any iteration starts:
//!
//! + The *voxel profile*: the line integral through a square voxel of side
//!   `delta_xz` tilted by the view angle, as a function of the detector
//!   coordinate. This is a trapezoid whose shape depends only on
//!   `|angle mod 90°|`.
//!
//! + The *beam profile*: a Hamming-shaped blur of width `delta_r`.
//!
//! + The *detector response* (per view): the voxel profile convolved with the
//!   beam profile, tabulated against the distance between the voxel centre and
//!   the detector bin centre.
//!
//! + The *slice response* (`H_t`): the overlap between a voxel slab of width
//!   `delta_xy` and a detector bin of width `delta_t`, tabulated against the
//!   distance between their centres.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

use ndarray::{Array1, Array2};

use crate::geometry::Geometry;
use crate::sinogram::Detector;
use crate::types::{Angle, Length, Real, BEAM_RESOLUTION, DETECTOR_RESPONSE_BINS, PROFILE_RESOLUTION, TWOPI};

/// Fold an angle into `[0, π/2]`; the voxel footprint has that period
fn fold_angle(angle: Angle) -> Angle {
    angle.rem_euclid(FRAC_PI_2)
}

/// Peak line integral through a square voxel of side `delta_xz`
pub fn peak_line_integral(angle: Angle, delta_xz: Length) -> Length {
    let angle = fold_angle(angle);
    if angle <= FRAC_PI_4 { delta_xz / angle.cos() }
    else                  { delta_xz / (FRAC_PI_2 - angle).cos() }
}

/// Trapezoidal line-integral profile of a tilted voxel.
///
/// Sample `j` lies at `2j/PROFILE_RESOLUTION` voxel widths from the left end
/// of a window which spans `[-delta_xz, +delta_xz]` around the voxel centre.
pub fn voxel_profile(angle: Angle, delta_xz: Length) -> Array1<Real> {
    let max = peak_line_integral(angle, delta_xz);
    let angle = fold_angle(angle);
    let c = FRAC_PI_4.cos();
    let dist1 = c * (FRAC_PI_4 - angle).cos();
    let dist2 = c * (FRAC_PI_4 + angle).cos().abs();
    let left_corner  = 1.0 - dist1;
    let left_near    = 1.0 - dist2;
    let right_near   = 1.0 + dist2;
    let right_corner = 1.0 + dist1;

    Array1::from_shape_fn(PROFILE_RESOLUTION, |j| {
        let t = 2.0 * j as Real / PROFILE_RESOLUTION as Real;
        if t <= left_corner || t >= right_corner { 0.0 }
        else if t > right_near  { max * (right_corner - t) / (right_corner - right_near) }
        else if t >= left_near  { max }
        else                    { max * (t - left_corner) / (left_near - left_corner) }
    })
}

/// Hamming beam-blur kernel, normalized to unit sum and scaled by `1/delta_t`
pub fn beam_profile(delta_t: Length) -> Array1<Real> {
    let raw = Array1::from_shape_fn(BEAM_RESOLUTION, |i| {
        0.54 - 0.46 * (TWOPI * i as Real / BEAM_RESOLUTION as Real).cos()
    });
    let sum = raw.sum();
    raw / (sum * delta_t)
}

/// Linear interpolation in a table sampled every `offset`, starting at 0.
/// The response falls to zero one step past the last entry; `None` beyond.
#[inline]
fn interpolate(table: &[Real], offset: Length, distance: Length) -> Option<Real> {
    let index = (distance / offset).floor();
    if index < 0.0 || index >= table.len() as Real { return None; }
    let i = index as usize;
    let w1 = distance - i as Real * offset;
    let w2 = (i + 1) as Real * offset - distance;
    let next = table.get(i + 1).copied().unwrap_or(0.0);
    Some((w2 / offset) * table[i] + (w1 / offset) * next)
}

/// Per-view detector response against voxel-to-bin distance along `r`
#[derive(Clone, Debug)]
pub struct DetectorResponse {
    /// Distance between consecutive table entries
    pub offset: Length,
    /// `[view, bin]`
    pub table: Array2<Real>,
}

impl DetectorResponse {

    pub fn new(geometry: &Geometry, detector: &Detector) -> Self {
        let delta_xz = geometry.delta_xz;
        let offset = (delta_xz / 3.0_f64.sqrt() + detector.delta_r / 2.0) / DETECTOR_RESPONSE_BINS as Real;
        let beam = beam_profile(detector.delta_t);
        let beam_width = detector.delta_r;
        let mut table = Array2::zeros((detector.n_views(), DETECTOR_RESPONSE_BINS));

        for (mut row, &angle) in table.outer_iter_mut().zip(&detector.angles) {
            let profile = voxel_profile(angle, delta_xz);
            for (i, entry) in row.iter_mut().enumerate() {
                let r_min = i as Real * offset - delta_xz;
                let mut sum = 0.0;
                for (p, b) in beam.iter().enumerate() {
                    let r = -beam_width / 2.0 + p as Real * beam_width / BEAM_RESOLUTION as Real;
                    if r < r_min { continue; }
                    let index = ((r - r_min) * PROFILE_RESOLUTION as Real / (2.0 * delta_xz)).floor() as usize;
                    sum += profile[index.min(PROFILE_RESOLUTION - 1)] * b;
                }
                *entry = sum;
            }
        }
        Self { offset, table }
    }

    /// Response of `view` at `distance` (≥ 0) between voxel and bin centres
    #[inline]
    pub fn at(&self, view: usize, distance: Length) -> Option<Real> {
        let row = self.table.row(view);
        row.as_slice().and_then(|row| interpolate(row, self.offset, distance))
    }
}

/// Overlap of a voxel slab with a detector bin along the tilt axis
#[derive(Clone, Debug)]
pub struct SliceResponse {
    pub offset: Length,
    pub table: Vec<Real>,
}

impl SliceResponse {

    pub fn new(geometry: &Geometry, detector: &Detector) -> Self {
        let (delta_xy, delta_t) = (geometry.delta_xy, detector.delta_t);
        let offset = (delta_xy / 2.0 + delta_t / 2.0) / DETECTOR_RESPONSE_BINS as Real;
        let (narrow, wide) = if delta_xy >= delta_t { (delta_t, delta_xy) } else { (delta_xy, delta_t) };
        let table = (0..DETECTOR_RESPONSE_BINS)
            .map(|i| {
                let centre = i as Real * offset;
                if centre <= wide / 2.0 - narrow / 2.0 { narrow }
                else { (delta_xy / 2.0 + delta_t / 2.0 - centre).max(0.0) }
            })
            .collect();
        Self { offset, table }
    }

    #[inline]
    pub fn at(&self, distance: Length) -> Option<Real> { interpolate(&self.table, self.offset, distance) }
}

/// Everything the system matrix builder needs to look up
#[derive(Clone, Debug)]
pub struct ResponseTables {
    pub detector: DetectorResponse,
    pub slice: SliceResponse,
}

impl ResponseTables {
    pub fn new(geometry: &Geometry, detector: &Detector) -> Self {
        Self {
            detector: DetectorResponse::new(geometry, detector),
            slice   : SliceResponse   ::new(geometry, detector),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;
    use float_eq::assert_float_eq;

    const DEG: Real = std::f64::consts::PI / 180.0;

    #[test]
    fn untilted_profile_is_flat_topped() {
        let profile = voxel_profile(0.0, 2.0);
        let quarter = PROFILE_RESOLUTION / 4;
        assert_eq!(profile[quarter - 1], 0.0);
        assert_float_eq!(profile[quarter + 1], 2.0, abs <= 1e-12);
        assert_float_eq!(profile[PROFILE_RESOLUTION / 2], 2.0, abs <= 1e-12);
        assert_eq!(profile[3 * quarter + 1], 0.0);
    }

    #[test]
    fn diagonal_profile_is_triangular() {
        let profile = voxel_profile(45.0 * DEG, 1.0);
        let peak = profile.iter().cloned().fold(0.0, f64::max);
        assert_float_eq!(peak, 2.0_f64.sqrt(), rel <= 1e-2);
        let middle = PROFILE_RESOLUTION / 2;
        assert!(profile[middle - 100] < profile[middle]);
        assert!(profile[middle + 100] < profile[middle]);
    }

    #[rstest(/**/ angle,
             case(10.0),
             case(30.0),
             case(60.0),
             case(85.0),
    )]
    fn profile_depends_on_angle_mod_90(angle: Real) {
        let a = voxel_profile( angle         * DEG, 1.0);
        let b = voxel_profile((angle - 90.0) * DEG, 1.0);
        let c = voxel_profile((90.0 - angle) * DEG, 1.0);
        for j in 0..PROFILE_RESOLUTION {
            assert_float_eq!(a[j], b[j], abs <= 1e-9);
            assert_float_eq!(a[j], c[j], abs <= 1e-9);
        }
    }

    #[rstest(/**/ angle, case(1e20), case(-1e20), case(1e300), case(-7.0 * FRAC_PI_2))]
    fn huge_angles_fold_into_first_quadrant(angle: Angle) {
        let folded = fold_angle(angle);
        assert!((0.0..=FRAC_PI_2).contains(&folded), "{angle} folded to {folded}");
        let peak = peak_line_integral(angle, 1.0);
        assert!((1.0..=2.0_f64.sqrt() + 1e-12).contains(&peak));
    }

    #[rstest(/**/ angle, case(0.0), case(20.0), case(45.0), case(70.0))]
    fn profile_area_is_voxel_area(angle: Real) {
        // The line integral integrated across the detector is the voxel's area
        let delta_xz = 1.5;
        let profile = voxel_profile(angle * DEG, delta_xz);
        let step = 2.0 * delta_xz / PROFILE_RESOLUTION as Real;
        assert_float_eq!(profile.sum() * step, delta_xz * delta_xz, rel <= 1e-2);
    }

    #[test]
    fn beam_profile_is_normalized() {
        assert_float_eq!(beam_profile(1.0).sum(), 1.0, abs <= 1e-12);
        assert_float_eq!(beam_profile(4.0).sum(), 0.25, abs <= 1e-12);
    }

    fn setup(delta_xz: Length, delta_xy: Length, delta_r: Length, delta_t: Length) -> (Geometry, Detector) {
        let g = Geometry::centred([4, 4, 4], delta_xz, delta_xy).unwrap();
        let d = Detector::centred(vec![0.0, 30.0 * DEG, -70.0 * DEG], 8, 4, delta_r, delta_t).unwrap();
        (g, d)
    }

    #[test]
    fn untilted_detector_response_decreases_with_distance() {
        let (g, d) = setup(1.0, 1.0, 1.0, 1.0);
        let response = DetectorResponse::new(&g, &d);
        let row = response.table.row(0);
        assert!(row[0] > 0.0);
        for w in row.to_vec().windows(2) {
            assert!(w[1] <= w[0] + 1e-12, "{} > {}", w[1], w[0]);
        }
        assert!(response.table.iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn detector_response_lookup_stops_at_table_end() {
        let (g, d) = setup(1.0, 1.0, 1.0, 1.0);
        let response = DetectorResponse::new(&g, &d);
        let end = response.offset * DETECTOR_RESPONSE_BINS as Real;
        assert!(response.at(1, 0.0).is_some());
        assert!(response.at(1, end - 1e-9).is_some());
        assert!(response.at(1, end + 1e-9).is_none());
    }

    #[test]
    fn slice_response_for_equal_pitches_is_a_ramp() {
        let (g, d) = setup(1.0, 1.0, 1.0, 1.0);
        let h_t = SliceResponse::new(&g, &d);
        for (i, &v) in h_t.table.iter().enumerate() {
            assert_float_eq!(v, 1.0 - i as Real / DETECTOR_RESPONSE_BINS as Real, abs <= 1e-12);
        }
        assert_float_eq!(h_t.at(0.5).unwrap(), 0.5, abs <= 1e-12);
    }

    #[rstest(/**/ delta_xy, delta_t, plateau,
             case(     2.0,     1.0,     1.0),
             case(     1.0,     2.0,     1.0),
             case(     3.0,     3.0,     3.0),
    )]
    fn slice_response_plateau_is_narrower_pitch(delta_xy: Length, delta_t: Length, plateau: Length) {
        let (g, d) = setup(1.0, delta_xy, 1.0, delta_t);
        let h_t = SliceResponse::new(&g, &d);
        assert_float_eq!(h_t.table[0], plateau, abs <= 1e-12);
        assert!(h_t.table.iter().all(|&v| (0.0..=plateau).contains(&v)));
    }
}
