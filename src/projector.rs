//! Application of the factorized system matrix to volumes.
//!
//! Every path that turns voxel values into sinogram contributions goes through
//! `for_each_element` and `accumulate`:
//!
//! + `forward_project`, which builds a whole estimated sinogram, and
//!
//! + the incremental error-sinogram update performed after each ICD voxel
//!   update (see `icd`),
//!
//! so that the sum of incremental updates matches a full recomputation.

/// Visit every measurement `(view, r, t)` touched by the voxel at slice
/// `slice` of the voxel line whose column is `column`, passing the combined
/// weight `A · H`.
#[inline]
pub fn for_each_element<F>(column: &AMatrixCol, slice: &LineResponse, n_r: usize, mut visit: F)
where
    F: FnMut(usize, usize, usize, Weight),
{
    for &(index, a) in column.iter() {
        let (view, r) = detector_from_1(index, n_r);
        for &(t, h) in slice.iter() {
            visit(view, r, t, a * h);
        }
    }
}

/// Add `gain[view] · A · H · amount` to `sino` at every measurement touched by
/// one voxel. `sino` may be a band of `t` bins starting at `t_offset`.
#[inline]
pub fn accumulate(
    sino    : &mut ArrayViewMut3<Real>,
    column  : &AMatrixCol,
    slice   : &LineResponse,
    n_r     : usize,
    gain    : &[Real],
    amount  : Real,
    t_offset: usize,
) {
    for_each_element(column, slice, n_r, |view, r, t, w| {
        sino[[view, r, t - t_offset]] += gain[view] * w * amount;
    });
}

/// Project one voxel line (all of its `y` voxels) into `sino`
fn project_line(sino: &mut SinoArray, matrix: &SystemMatrix, volume: &Volume, gain: &[Real], line: Index1) {
    let column = matrix.column(line);
    if column.is_empty() { return; }
    let Line { z, x } = line_from_1(line, volume.shape()[1]);
    let mut view = sino.view_mut();
    for (y, &value) in volume.slice(s![z, x, ..]).iter().enumerate() {
        if value == 0.0 { continue; }
        accumulate(&mut view, column, matrix.slice(y), matrix.n_r, gain, value, 0);
    }
}

/// Estimated sinogram `Σ gain · A · H · Object` of `volume`.
///
/// Pass unit gains to obtain the projection before nuisance scaling.
pub fn forward_project(matrix: &SystemMatrix, detector: &Detector, volume: &Volume, gain: &[Real]) -> SinoArray {
    let n_lines = matrix.columns.len();
    // Each rayon job owns a whole sinogram accumulator, so keep the number of
    // jobs close to the number of threads
    let job_size = (n_lines / rayon::current_num_threads()).max(1);
    let initial_thread_state = || detector.zeros();
    (0..n_lines)
        .into_par_iter()
        .with_min_len(job_size)
        .fold(initial_thread_state, |mut sino, line| {
            project_line(&mut sino, matrix, volume, gain, line);
            sino
        })
        .reduce(initial_thread_state, |a, b| a + b)
}

/// `counts − (gain · Y + offset)` where `Y` is the unscaled projection
pub fn error_sinogram(counts: &SinoArray, projection: &SinoArray, gain: &[Real], offset: &[Real]) -> SinoArray {
    let mut error = counts.clone();
    for (((mut error_view, projection_view), &g), &mu) in error.outer_iter_mut()
        .zip(projection.outer_iter())
        .zip(gain)
        .zip(offset)
    {
        azip!((e in &mut error_view, &y in &projection_view) *e -= g * y + mu);
    }
    error
}

/// `gain · Y + offset` per view
pub fn predicted_sinogram(projection: &SinoArray, gain: &[Real], offset: &[Real]) -> SinoArray {
    let mut predicted = projection.clone();
    for ((mut p, &g), &mu) in predicted.outer_iter_mut().zip(gain).zip(offset) {
        p.mapv_inplace(|y| g * y + mu);
    }
    predicted
}


// ----- Imports ------------------------------------------------------------------------------------------
use ndarray::{azip, s, ArrayViewMut3};
use rayon::prelude::*;

use crate::{
    geometry::Volume,
    index::{Line, line_from_1, detector_from_1},
    sinogram::{Detector, SinoArray},
    system_matrix::{AMatrixCol, LineResponse, SystemMatrix},
    types::{Index1, Real, Weight},
};
