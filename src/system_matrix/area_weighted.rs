//! Footprint from the tabulated voxel-profile ⊛ beam response
//!
//! For every detector bin within one voxel width of the projected voxel
//! centre, the weight is the per-view detector response interpolated at the
//! distance between the projected centre and the bin centre.

use crate::index::detector_to_1;
use crate::types::Length;
use super::{AMatrixCol, Context, Footprint};

#[derive(Clone, Copy, Debug)]
pub struct AreaWeighted;

impl Footprint for AreaWeighted {

    fn view_elements(column: &mut AMatrixCol, view: usize, r: Length, ctx: &Context) {
        let delta_xz = ctx.geometry.delta_xz;
        let Some(bins) = ctx.r_bins(r - delta_xz, r + delta_xz) else { return };
        let n_r = ctx.detector.n_r;
        for bin in bins {
            let distance = (r - ctx.detector.r_centre(bin)).abs();
            match ctx.tables.detector.at(view, distance) {
                Some(weight) if weight > 0.0 => column.push(detector_to_1(view, bin, n_r), weight),
                _ => {}
            }
        }
    }
}
