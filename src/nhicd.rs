//! Non-homogeneous ICD: concentrate updates where the volume is still changing
//!
//! Between full sweeps, a restricted sweep visits only the voxel lines whose
//! smoothed update magnitude (the voxel selection criterion, VSC) lies in the
//! top `1/divisor` of all voxel lines.

/// Separable 5×5 Hamming window, normalized to unit sum
pub fn vsc_filter() -> [[Real; 5]; 5] {
    // Measured from the centre so that the window is exactly symmetric
    let h = |i: usize| 0.54 + 0.46 * (TWOPI * (i as Real - 2.0) / 4.0).cos();
    let mut filter = [[0.0; 5]; 5];
    for (i, j) in iproduct!(0..5, 0..5) {
        filter[i][j] = h(i) * h(j);
    }
    let total: Real = filter.iter().flatten().sum();
    for w in filter.iter_mut().flatten() { *w /= total; }
    filter
}

/// Smooth the `(z, x)` update-magnitude map with the VSC filter. Cells beyond
/// the edge of the map contribute nothing.
pub fn smooth(magnitude: &Array2<Real>) -> Array2<Real> {
    let filter = vsc_filter();
    let (n_z, n_x) = magnitude.dim();
    Array2::from_shape_fn((n_z, n_x), |(z, x)| {
        iproduct!(-2..=2_isize, -2..=2_isize)
            .filter_map(|(dz, dx)| {
                let zz = shift(z, dz, n_z, Boundary::Truncated)?;
                let xx = shift(x, dx, n_x, Boundary::Truncated)?;
                Some(filter[(dz + 2) as usize][(dx + 2) as usize] * magnitude[[zz, xx]])
            })
            .sum()
    })
}

/// The `k`-th smallest (0-based) element of `values`, which is reordered
pub fn quickselect<R: Rng>(values: &mut [Real], k: usize, rng: &mut R) -> Option<Real> {
    if k >= values.len() { return None; }
    let (mut lo, mut hi) = (0, values.len() - 1);
    loop {
        if lo == hi { return Some(values[lo]); }
        let pivot = rng.gen_range(lo..=hi);
        values.swap(pivot, hi);
        // Lomuto partition around values[hi]
        let mut store = lo;
        for i in lo..hi {
            if values[i] < values[hi] {
                values.swap(i, store);
                store += 1;
            }
        }
        values.swap(store, hi);
        match k.cmp(&store) {
            std::cmp::Ordering::Equal   => return Some(values[store]),
            std::cmp::Ordering::Less    => hi = store - 1,
            std::cmp::Ordering::Greater => lo = store + 1,
        }
    }
}

/// Voxel lines (flattened `z * n_x + x`) whose smoothed magnitude strictly
/// exceeds the `(n − n/divisor)`-th order statistic
pub fn select_lines<R: Rng>(magnitude: &Array2<Real>, divisor: usize, rng: &mut R) -> Vec<Index1> {
    let vsc = smooth(magnitude);
    let n = vsc.len();
    if n == 0 { return vec![]; }
    let mut values: Vec<Real> = vsc.iter().cloned().collect();
    let k = n.saturating_sub(n / divisor.max(1)).saturating_sub(1);
    let Some(threshold) = quickselect(&mut values, k, rng) else { return vec![] };
    let selected: Vec<Index1> = vsc.iter()
        .enumerate()
        .filter(|(_, &v)| v > threshold)
        .map(|(i, _)| i)
        .collect();
    debug!("NHICD threshold {threshold:.3e} selects {} of {n} voxel lines", selected.len());
    selected
}


// ----- Imports ------------------------------------------------------------------------------------------
use itertools::iproduct;
use ndarray::Array2;
use rand::Rng;
use tracing::debug;

use crate::{
    config::Boundary,
    index::shift,
    types::{Index1, Real, TWOPI},
};
