//! Calculation of system matrix elements for use in forward projection and in
//! incremental ICD updates.
//!
//! The system matrix is never stored in full. It factorizes into
//!
//! + one sparse `AMatrixCol` per `(z, x)` voxel line, listing the `(view, r)`
//!   detector bins the line's footprint overlaps, and
//!
//! + one `LineResponse` per `y` slice, listing the `t` bins the slice overlaps.
//!
//! The weight of voxel `(z, x, y)` in measurement `(view, r, t)` is the product
//! of the two.

// ----- The trait --------------------------------------------------------------------

/// Interface for calculation of the in-plane footprint of a voxel line
pub trait Footprint {

    /// Append to `column` the `(detector index, weight)` pairs of the voxel
    /// line at `(x, z)` for one view. Only strictly positive weights may be
    /// appended.
    fn view_elements(
        column: &mut AMatrixCol,
        view  : usize,
        r     : Length,
        ctx   : &Context,
    );
}

// ----- Implementations of the trait -----------------------------------------------
pub mod area_weighted;
pub mod distance_driven;
pub use area_weighted::AreaWeighted;
pub use distance_driven::DistanceDriven;

/// Read-only data shared by all voxel lines while building columns
pub struct Context<'a> {
    pub geometry: &'a Geometry,
    pub detector: &'a Detector,
    pub tables  : &'a ResponseTables,
    /// `(cos θ, sin θ)` per view
    pub trig    : &'a [(Real, Real)],
}

impl Context<'_> {

    /// Detector bins overlapping `[lo, hi]`, or `None` if the interval misses
    /// the detector altogether
    pub fn r_bins(&self, lo: Length, hi: Length) -> Option<std::ops::RangeInclusive<usize>> {
        let d = self.detector;
        if hi < d.r0 || lo > d.r_max() { return None; }
        let bin = |r: Length| ((r - d.r0) / d.delta_r).floor().clamp(0.0, (d.n_r - 1) as Real) as usize;
        Some(bin(lo)..=bin(hi))
    }
}

// ----- Storage of system matrix elements -------------------------------------------
pub type SystemMatrixElement = (Index1, Weight);

/// Non-zero elements of one voxel line across all views, keyed by
/// `view * n_r + r_bin`
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AMatrixCol(pub Vec<SystemMatrixElement>);

impl AMatrixCol {
    pub fn iter(&self) -> std::slice::Iter<SystemMatrixElement> { self.0.iter() }
    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
    pub fn push(&mut self, index: Index1, weight: Weight) { self.0.push((index, weight)) }
}

impl<'a> IntoIterator for &'a AMatrixCol {
    type Item = SystemMatrixElement;
    type IntoIter = std::iter::Cloned<std::slice::Iter<'a, Self::Item>>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.iter().cloned()
    }
}

/// `(t bin, thickness)` pairs of one `y` slice
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LineResponse(pub Vec<(usize, Weight)>);

impl LineResponse {
    pub fn iter(&self) -> std::slice::Iter<(usize, Weight)> { self.0.iter() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    /// Inclusive range of `t` bins touched, if any
    pub fn t_range(&self) -> Option<(usize, usize)> {
        let first = self.0.first()?.0;
        let last  = self.0.last ()?.0;
        Some((first, last))
    }
}

/// The factorized system matrix
#[derive(Clone, Debug)]
pub struct SystemMatrix {
    /// Indexed by voxel line `z * n_x + x`
    pub columns: Vec<AMatrixCol>,
    /// Indexed by `y`
    pub slices: Vec<LineResponse>,
    pub n_r: usize,
}

impl SystemMatrix {

    pub fn build(geometry: &Geometry, detector: &Detector, kernel: Kernel) -> Self {
        let tables = ResponseTables::new(geometry, detector);
        let trig: Vec<_> = detector.angles.iter().map(|a| (a.cos(), a.sin())).collect();
        let ctx = Context { geometry, detector, tables: &tables, trig: &trig };

        let columns = (0..geometry.n_lines())
            .into_par_iter()
            .map(|i| {
                let line = line_from_1(i, geometry.n_x());
                match kernel {
                    Kernel::AreaWeighted   => column::<AreaWeighted  >(line, &ctx),
                    Kernel::DistanceDriven => column::<DistanceDriven>(line, &ctx),
                }
            })
            .collect::<Vec<_>>();

        let slices = (0..geometry.n_y())
            .map(|y| line_response(geometry.y_centre(y), geometry, detector, &tables.slice))
            .collect();

        let matrix = Self { columns, slices, n_r: detector.n_r };
        debug!("system matrix: {} non-zero column elements, {} empty voxel lines",
               group_digits(matrix.n_elements()),
               matrix.columns.iter().filter(|c| c.is_empty()).count());
        matrix
    }

    #[inline] pub fn column(&self, line: Index1) -> &AMatrixCol  { &self.columns[line] }
    #[inline] pub fn slice (&self, y: usize)     -> &LineResponse { &self.slices[y] }

    pub fn n_elements(&self) -> usize { self.columns.iter().map(AMatrixCol::len).sum() }

    /// Weight of voxel `[z, x, y]` in measurement `[view, r, t]`
    pub fn weight(&self, [z, x, y]: Index3, [view, r, t]: [usize; 3], n_x: usize) -> Weight {
        let line = line_to_1(Line { z, x }, n_x);
        let index = detector_to_1(view, r, self.n_r);
        let a = self.columns[line].iter().find(|(i, _)| *i == index).map_or(0.0, |(_, w)| *w);
        let h = self.slices[y].iter().find(|(i, _)| *i == t).map_or(0.0, |(_, w)| *w);
        a * h
    }
}

/// Build the sparse column of one voxel line using footprint model `F`
pub fn column<F: Footprint>(line: Line, ctx: &Context) -> AMatrixCol {
    let Context { geometry, detector, trig, .. } = *ctx;
    let x = geometry.x_centre(line.x);
    let z = geometry.z_centre(line.z);

    // Over-allocate, then compact once the true count is known
    let per_view = (3.0 * geometry.delta_xz / detector.delta_r).ceil() as usize
                 * (3.0 * geometry.delta_xy / detector.delta_t).ceil() as usize;
    let mut column = AMatrixCol(Vec::with_capacity(per_view.max(1) * detector.n_views()));
    for (view, &(cos, sin)) in trig.iter().enumerate() {
        let r = x * cos - z * sin;
        F::view_elements(&mut column, view, r, ctx);
    }
    column.0.shrink_to_fit();
    column
}

/// `t` bins overlapped by the slice centred at `y`, with their thicknesses
pub fn line_response(y: Length, geometry: &Geometry, detector: &Detector, h_t: &SliceResponse) -> LineResponse {
    let t_min = (y - geometry.delta_xy / 2.0).max(detector.t0);
    let t_max = (y + geometry.delta_xy / 2.0).min(detector.t_max());
    if t_min >= t_max { return LineResponse::default(); }
    let bin = |t: Length| ((t - detector.t0) / detector.delta_t).floor().clamp(0.0, (detector.n_t - 1) as Real) as usize;
    LineResponse(
        (bin(t_min)..=bin(t_max))
            .filter_map(|t| {
                let distance = (detector.t_centre(t) - y).abs();
                h_t.at(distance).filter(|&h| h > 0.0).map(|h| (t, h))
            })
            .collect()
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;
    use float_eq::assert_float_eq;
    use std::collections::HashSet;
    #[allow(unused)] use pretty_assertions::{assert_eq, assert_ne};

    const DEG: Real = std::f64::consts::PI / 180.0;

    fn setup(angles: &[Real], n: [usize; 3], n_r: usize, n_t: usize, delta_r: Length) -> (Geometry, Detector) {
        let g = Geometry::centred(n, 1.0, 1.0).unwrap();
        let d = Detector::centred(angles.iter().map(|a| a * DEG).collect(), n_r, n_t, delta_r, 1.0).unwrap();
        (g, d)
    }

    #[rstest(kernel, case(Kernel::AreaWeighted), case(Kernel::DistanceDriven))]
    fn aligned_voxel_hits_its_own_bin(kernel: Kernel) {
        // 4x4 grid, untilted view, detector bins coincide with voxel columns
        let (g, d) = setup(&[0.0], [4, 4, 1], 4, 1, 1.0);
        let a = SystemMatrix::build(&g, &d, kernel);
        for x in 0..4 {
            let col = a.column(line_to_1(Line { z: 1, x }, 4));
            let (index, weight) = col.iter()
                .cloned()
                .fold((0, 0.0), |best, e| if e.1 > best.1 { e } else { best });
            assert_eq!(detector_from_1(index, 4), (0, x));
            assert_float_eq!(weight, 1.0, abs <= 1e-3);
        }
    }

    #[test]
    fn columns_outside_detector_are_empty() {
        // Only the central two columns project onto a 2-bin detector at 0°
        let (g, d) = setup(&[0.0], [1, 8, 1], 2, 1, 1.0);
        let a = SystemMatrix::build(&g, &d, Kernel::AreaWeighted);
        assert!( a.column(0).is_empty());
        assert!( a.column(7).is_empty());
        assert!(!a.column(3).is_empty());
        assert!(!a.column(4).is_empty());
    }

    #[test]
    fn equal_pitches_give_one_t_bin_per_slice() {
        let (g, d) = setup(&[0.0], [1, 1, 4], 4, 4, 1.0);
        let a = SystemMatrix::build(&g, &d, Kernel::AreaWeighted);
        for y in 0..4 {
            let slice = a.slice(y);
            let (t, h) = slice.0[0];
            assert_eq!(t, y);
            assert_float_eq!(h, 1.0, abs <= 1e-12);
            let rest: Real = slice.iter().skip(1).map(|(_, h)| h).sum();
            assert!(rest < 1e-9);
        }
    }

    #[test]
    fn slices_beyond_detector_have_no_response() {
        // Three slices but only one detector row
        let (g, d) = setup(&[0.0], [1, 1, 3], 4, 1, 1.0);
        let a = SystemMatrix::build(&g, &d, Kernel::AreaWeighted);
        assert!( a.slice(0).is_empty());
        assert!(!a.slice(1).is_empty());
        assert!( a.slice(2).is_empty());
        assert_eq!(a.slice(1).t_range(), Some((0, 0)));
    }

    #[test]
    fn weight_is_product_of_factors() {
        let (g, d) = setup(&[0.0, 45.0], [2, 2, 2], 4, 2, 1.0);
        let a = SystemMatrix::build(&g, &d, Kernel::AreaWeighted);
        let (index, w_col) = a.column(0).0[0];
        let (view, r) = detector_from_1(index, 4);
        let (t, w_slice) = a.slice(1).0[0];
        assert_float_eq!(a.weight([0, 0, 1], [view, r, t], 2), w_col * w_slice, ulps <= 1);
    }

    #[rstest(kernel, case(Kernel::AreaWeighted), case(Kernel::DistanceDriven))]
    fn huge_angle_builds_like_its_folded_angle(kernel: Kernel) {
        // 1e20 rad is not reduced by repeated subtraction of π/2
        let huge: Real = 1e20;
        let folded = huge.rem_euclid(std::f64::consts::FRAC_PI_2);
        let (g, _) = setup(&[0.0], [3, 3, 1], 5, 1, 1.0);
        let detector = |a| Detector::centred(vec![a], 5, 1, 1.0, 1.0).unwrap();
        let a = SystemMatrix::build(&g, &detector(huge), kernel);
        let b = SystemMatrix::build(&g, &detector(folded), kernel);
        assert_eq!(a.columns.len(), b.columns.len());
        let total = |m: &SystemMatrix| -> Real { m.columns.iter().flat_map(|c| c.iter().map(|e| e.1)).sum() };
        assert!(a.columns.iter().flat_map(|c| c.iter()).all(|e| e.1.is_finite() && e.1 > 0.0));
        // Same footprint, possibly shifted across bins
        assert_float_eq!(total(&a), total(&b), rel <= 2e-2);
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn column_elements_are_positive_and_unique(
            n_x in 1..10_usize,
            n_z in 1..10_usize,
            n_r in 1..16_usize,
            delta_r in 0.3..3.0_f64,
            angles in proptest::collection::vec(-80.0..80.0_f64, 1..6),
            distance_driven in any::<bool>(),
        ) {
            let (g, d) = setup(&angles, [n_z, n_x, 1], n_r, 1, delta_r);
            let kernel = if distance_driven { Kernel::DistanceDriven } else { Kernel::AreaWeighted };
            let a = SystemMatrix::build(&g, &d, kernel);
            prop_assert_eq!(a.columns.len(), n_x * n_z);
            for col in &a.columns {
                let mut seen = HashSet::new();
                for (index, weight) in col {
                    prop_assert!(weight > 0.0);
                    prop_assert!(seen.insert(index), "duplicate index {}", index);
                    let (view, r) = detector_from_1(index, n_r);
                    prop_assert!(view < angles.len());
                    prop_assert!(r < n_r);
                }
            }
        }
    }
}

// ----- Imports ------------------------------------------------------------------------------------------
use rayon::prelude::*;
use tracing::debug;

use crate::{
    config::Kernel,
    geometry::Geometry,
    index::{Line, line_from_1, line_to_1, detector_to_1},
    response::{ResponseTables, SliceResponse},
    sinogram::Detector,
    types::{Index1, Index3, Length, Real, Weight},
    utils::group_digits,
};
#[cfg(test)] use crate::index::detector_from_1;
