//! Footprint approximated by a rectangle
//!
//! The voxel's projection is replaced by a rectangle of half-width
//! `delta_xz/2 · max(|cos θ|, |sin θ|)` and height equal to the peak line
//! integral, so that its area is preserved. Each bin's weight is the fraction
//! of the bin covered by the rectangle, times the height.

use crate::index::detector_to_1;
use crate::response::peak_line_integral;
use crate::types::Length;
use super::{AMatrixCol, Context, Footprint};

#[derive(Clone, Copy, Debug)]
pub struct DistanceDriven;

impl Footprint for DistanceDriven {

    fn view_elements(column: &mut AMatrixCol, view: usize, r: Length, ctx: &Context) {
        let (cos, sin) = ctx.trig[view];
        let d = ctx.detector;
        let delta_xz = ctx.geometry.delta_xz;
        let half = delta_xz / 2.0 * cos.abs().max(sin.abs());
        let (lo, hi) = (r - half, r + half);
        let Some(bins) = ctx.r_bins(lo, hi) else { return };
        // Matches the 1/δt scaling of the tabulated beam profile
        let height = peak_line_integral(d.angles[view], delta_xz) / d.delta_t;
        for bin in bins {
            let bin_lo = d.r0 + bin as Length * d.delta_r;
            let overlap = hi.min(bin_lo + d.delta_r) - lo.max(bin_lo);
            if overlap > 0.0 {
                column.push(detector_to_1(view, bin, d.n_r), overlap / d.delta_r * height);
            }
        }
    }
}
