//! Conversions between flat and structured indices
//!
//! + Voxel lines: a voxel line is the set of voxels sharing `(z, x)` and
//!   differing only in `y`. Lines are numbered `z * n_x + x`.
//!
//! + Detector indices: the sparse system matrix stores `(view, r_bin)` pairs
//!   flattened as `view * n_r + r_bin`.
//!
//! + Neighbour offsets under the two boundary policies.

use crate::types::Index1;
use crate::config::Boundary;

/// `(z, x)` position of a voxel line
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Line { pub z: usize, pub x: usize }

#[inline]
pub fn line_to_1(Line { z, x }: Line, n_x: usize) -> Index1 { z * n_x + x }

#[inline]
pub fn line_from_1(i: Index1, n_x: usize) -> Line { Line { z: i / n_x, x: i % n_x } }

#[inline]
pub fn detector_to_1(view: usize, r_bin: usize, n_r: usize) -> Index1 { view * n_r + r_bin }

#[inline]
pub fn detector_from_1(i: Index1, n_r: usize) -> (usize, usize) { (i / n_r, i % n_r) }

/// Displace `i` by `delta` in a dimension of extent `n`.
///
/// Truncated boundaries yield `None` when stepping off the grid; circular
/// boundaries wrap modulo `n`.
#[inline]
pub fn shift(i: usize, delta: isize, n: usize, boundary: Boundary) -> Option<usize> {
    let j = i as isize + delta;
    match boundary {
        Boundary::Truncated => if j < 0 || j >= n as isize { None } else { Some(j as usize) },
        Boundary::Circular  => Some(j.rem_euclid(n as isize) as usize),
    }
}
