//! The state owned by one worker during a parallel sweep
//!
//! A worker updates every voxel of the active voxel lines whose `y` falls in
//! its contiguous range. It works on private copies of
//!
//! + its `y` planes, plus the halo planes its neighbourhoods reach into, and
//!
//! + the `t` band of the error sinogram its slices project onto,
//!
//! and records the changes it makes to the error sinogram in an increment
//! buffer which is added to the shared error sinogram once all workers finish.

pub(super) struct Slab {
    /// Global `y` range updated by this worker
    pub y: Range<usize>,
    /// Position in `values` of each global `y` plane, if copied
    local_y: Vec<Option<usize>>,
    values: Volume,
    /// First `t` bin of the band
    t_lo: usize,
    error: SinoArray,
    increment: SinoArray,
    pub stats: SweepStats,
}

impl Slab {

    pub fn new(sweep: &Sweep, volume: &Volume, error: &SinoArray, y: Range<usize>) -> Self {
        let [n_z, n_x, n_y] = sweep.geometry.n;
        let halo = halo_planes(&y, n_y, sweep.boundary);
        let planes: Vec<usize> = y.clone().chain(halo).collect();
        let mut local_y = vec![None; n_y];
        for (local, &global) in planes.iter().enumerate() { local_y[global] = Some(local); }

        let (t_lo, error, increment) = match t_band(sweep.matrix, &y) {
            Some((lo, hi)) => {
                let band = error.slice(s![.., .., lo..=hi]).to_owned();
                let increment = SinoArray::zeros(band.raw_dim());
                (lo, band, increment)
            }
            None => {
                let [n_views, n_r, _] = sweep.detector.shape();
                (0, SinoArray::zeros([n_views, n_r, 0]), SinoArray::zeros([n_views, n_r, 0]))
            }
        };

        Self {
            y,
            local_y,
            values: volume.select(Axis(2), &planes),
            t_lo,
            error,
            increment,
            stats: SweepStats::new(n_z, n_x),
        }
    }

    /// Update, in the order given by `seed`, every voxel of `lines` in this slab
    pub fn run(&mut self, sweep: &Sweep, neighbours: &[(Offset, Weight)], lines: &[Index1], seed: u64, cancel: &AtomicBool) {
        let n_x = sweep.geometry.n_x();
        let r_half_width = sweep.detector.r_half_width();
        let mut neighbourhood = Vec::with_capacity(neighbours.len());

        for line in visitation_order(lines, seed) {
            if cancel.load(Ordering::Relaxed) {
                self.stats.cancelled = true;
                return;
            }
            let column = sweep.matrix.column(line);
            if column.is_empty() { continue; }
            let Line { z, x } = line_from_1(line, n_x);
            let in_roi = sweep.geometry.in_roi(Line { z, x }, r_half_width);

            for y in self.y.clone() {
                let local = y - self.y.start;
                let value = self.values[[z, x, local]];
                self.gather(sweep, neighbours, [z, x, y], &mut neighbourhood);
                let slice = sweep.matrix.slice(y);
                let (theta1, theta2) = self.thetas(sweep, column, slice);

                let problem = LocalProblem { value, theta1, theta2, neighbours: &neighbourhood };
                let step = update(sweep.solver, &problem, sweep.prior, sweep.root_tolerance);
                if step.flat {
                    self.stats.flat += 1;
                    trace!("flat root bracket at voxel {:?}: theta1 = {theta1}, theta2 = {theta2}", [z, x, y]);
                }

                let delta = step.value - value;
                if delta != 0.0 {
                    self.values[[z, x, local]] = step.value;
                    let n_r = sweep.matrix.n_r;
                    accumulate(&mut self.error    .view_mut(), column, slice, n_r, sweep.gain, -delta, self.t_lo);
                    accumulate(&mut self.increment.view_mut(), column, slice, n_r, sweep.gain, -delta, self.t_lo);
                }

                self.stats.magnitude[[z, x]] += delta.abs();
                if in_roi {
                    self.stats.update_sum    += delta.abs();
                    self.stats.magnitude_sum += step.value.abs();
                }
            }
        }
    }

    /// Collect `(value, filter weight)` of the in-bounds neighbours of `voxel`
    fn gather(&self, sweep: &Sweep, neighbours: &[(Offset, Weight)], [z, x, y]: Index3, out: &mut Vec<(Real, Weight)>) {
        let [n_z, n_x, n_y] = sweep.geometry.n;
        let b = sweep.boundary;
        out.clear();
        for &([dz, dx, dy], w) in neighbours {
            let (Some(nz), Some(nx), Some(ny)) = (shift(z, dz, n_z, b), shift(x, dx, n_x, b), shift(y, dy, n_y, b))
            else { continue };
            // Wrapping around an extent of 1 or 2 can land on the voxel itself
            if [nz, nx, ny] == [z, x, y] { continue; }
            if let Some(local) = self.local_y[ny] {
                out.push((self.values[[nz, nx, local]], w));
            }
        }
    }

    /// Linear and quadratic coefficients of the data term
    fn thetas(&self, sweep: &Sweep, column: &AMatrixCol, slice: &LineResponse) -> (Real, Real) {
        let mut theta1 = 0.0;
        let mut theta2 = 0.0;
        for_each_element(column, slice, sweep.matrix.n_r, |view, r, t, w| {
            let a = sweep.gain[view] * w;
            let precision = sweep.weights[[view, r, t]];
            theta1 -= a * self.error[[view, r, t - self.t_lo]] * precision;
            theta2 += a * a * precision;
        });
        (theta1, theta2)
    }

    /// Copy the updated planes and error increments into the shared state
    pub fn write_back(self, volume: &mut Volume, error: &mut SinoArray) -> SweepStats {
        let interior = self.y.len();
        volume
            .slice_mut(s![.., .., self.y.start..self.y.end])
            .assign(&self.values.slice(s![.., .., ..interior]));
        let band = self.increment.shape()[2];
        if band > 0 {
            let mut target = error.slice_mut(s![.., .., self.t_lo..self.t_lo + band]);
            target += &self.increment;
        }
        self.stats
    }
}

/// Planes outside `y` reached by the neighbourhoods of its edge planes
fn halo_planes(y: &Range<usize>, n_y: usize, boundary: Boundary) -> Vec<usize> {
    if y.is_empty() { return vec![]; }
    [shift(y.start, -1, n_y, boundary), shift(y.end - 1, 1, n_y, boundary)]
        .into_iter()
        .flatten()
        .filter(|p| !y.contains(p))
        .unique()
        .collect()
}

/// Inclusive range of `t` bins onto which the slices in `y` project
fn t_band(matrix: &SystemMatrix, y: &Range<usize>) -> Option<(usize, usize)> {
    y.clone()
        .filter_map(|y| matrix.slice(y).t_range())
        .reduce(|(a, b), (c, d)| (a.min(c), b.max(d)))
}


// ----- Imports ------------------------------------------------------------------------------------------
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};

use itertools::Itertools;
use ndarray::{s, Axis};
use tracing::trace;

use super::{solver::{update, LocalProblem}, visitation_order, Sweep, SweepStats};
use crate::{
    config::Boundary,
    geometry::Volume,
    index::{line_from_1, shift, Line},
    prior::Offset,
    projector::{accumulate, for_each_element},
    sinogram::SinoArray,
    system_matrix::{AMatrixCol, LineResponse, SystemMatrix},
    types::{Index1, Index3, Real, Weight},
};
