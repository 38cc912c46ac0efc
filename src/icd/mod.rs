//! Iterative coordinate descent over the voxels of the volume
//!
//! One call to `Sweep::run` visits every voxel of a list of voxel lines once,
//! updating each voxel to (approximately) minimize the cost with all other
//! voxels held fixed, and keeping the error sinogram consistent with the
//! volume after every update.
//!
//! The `y` axis is split into contiguous ranges, one per worker. Voxels in
//! different `y` planes never share a column of the system matrix, so workers
//! are independent apart from
//!
//! + the prior, which couples adjacent planes at range boundaries (workers
//!   see a snapshot of their neighbours' edge planes), and
//!
//! + blurred slice responses, which may overlap in `t` (each worker's changes
//!   to the error sinogram are merged at the end of the sweep).
//!
//! With a single worker the sweep is exactly sequential ICD.

pub mod solver;
mod slab;

use slab::Slab;

/// Read-only state shared by all workers during one sweep
pub struct Sweep<'a> {
    pub geometry: &'a Geometry,
    pub detector: &'a Detector,
    pub matrix: &'a SystemMatrix,
    pub prior: &'a PriorModel,
    /// Inverse-variance of each measurement
    pub weights: &'a SinoArray,
    /// Per-view gain
    pub gain: &'a [Real],
    pub solver: Solver,
    pub boundary: Boundary,
    pub root_tolerance: Real,
}

/// What happened during a sweep
#[derive(Clone, Debug)]
pub struct SweepStats {
    /// `Σ|update|` over the region of interest
    pub update_sum: Real,
    /// `Σ|value|` after update over the region of interest
    pub magnitude_sum: Real,
    /// `Σ_y |update|` per `(z, x)` voxel line
    pub magnitude: Array2<Real>,
    /// Number of voxel updates whose root bracket did not straddle a root
    pub flat: usize,
    pub cancelled: bool,
}

impl SweepStats {

    pub fn new(n_z: usize, n_x: usize) -> Self {
        Self {
            update_sum: 0.0,
            magnitude_sum: 0.0,
            magnitude: Array2::zeros((n_z, n_x)),
            flat: 0,
            cancelled: false,
        }
    }

    /// Relative size of the sweep's updates: the convergence statistic
    pub fn ratio(&self) -> Real {
        if self.magnitude_sum > 0.0 { self.update_sum / self.magnitude_sum }
        else if self.update_sum == 0.0 { 0.0 }
        else { Real::INFINITY }
    }

    fn merge(&mut self, other: SweepStats) {
        self.update_sum    += other.update_sum;
        self.magnitude_sum += other.magnitude_sum;
        self.magnitude     += &other.magnitude;
        self.flat          += other.flat;
        self.cancelled     |= other.cancelled;
    }
}

impl Sweep<'_> {

    /// Update every voxel of `lines` once, splitting the `y` axis among
    /// `workers` rayon tasks. `seed` determines the visitation orders.
    pub fn run(
        &self,
        volume : &mut Volume,
        error  : &mut SinoArray,
        lines  : &[Index1],
        workers: usize,
        seed   : u64,
        cancel : &AtomicBool,
    ) -> SweepStats {
        let neighbours = neighbours();
        let mut slabs: Vec<Slab> = partition(self.geometry.n_y(), workers)
            .into_iter()
            .map(|y| Slab::new(self, &*volume, &*error, y))
            .collect();

        slabs
            .par_iter_mut()
            .enumerate()
            .for_each(|(worker, slab)| slab.run(self, &neighbours, lines, worker_seed(seed, worker), cancel));

        let mut stats = SweepStats::new(self.geometry.n_z(), self.geometry.n_x());
        for slab in slabs {
            stats.merge(slab.write_back(volume, error));
        }
        stats
    }
}

/// Split `0..n` into at most `workers` contiguous, non-empty, near-equal ranges
pub fn partition(n: usize, workers: usize) -> Vec<Range<usize>> {
    let workers = workers.clamp(1, n.max(1));
    (0..workers)
        .map(|w| (w * n / workers)..((w + 1) * n / workers))
        .filter(|r| !r.is_empty())
        .collect()
}

/// Seed for one worker within a sweep seeded by `seed`
fn worker_seed(seed: u64, worker: usize) -> u64 {
    seed ^ (worker as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Seed for one sweep of a run seeded by `seed`
pub fn sweep_seed(seed: u64, sweep: usize) -> u64 {
    seed ^ (sweep as u64).wrapping_mul(0xD1B5_4A32_D192_ED03).rotate_left(17)
}

/// A uniformly random permutation of `lines`
pub fn visitation_order(lines: &[Index1], seed: u64) -> Vec<Index1> {
    let mut order = lines.to_vec();
    order.shuffle(&mut StdRng::seed_from_u64(seed));
    order
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::{Kernel, PriorConfig};
    use crate::projector::{error_sinogram, forward_project};
    use float_eq::assert_float_eq;
    use rstest::rstest;
    use std::collections::HashMap;
    #[allow(unused)] use pretty_assertions::{assert_eq, assert_ne};

    #[rstest(/**/ n , workers, expected,
             case(8 , 1      , vec![0..8]                  ),
             case(8 , 3      , vec![0..2, 2..5, 5..8]      ),
             case(2 , 4      , vec![0..1, 1..2]            ),
             case(5 , 5      , vec![0..1, 1..2, 2..3, 3..4, 4..5]),
    )]
    fn partitions_are_contiguous(n: usize, workers: usize, expected: Vec<Range<usize>>) {
        assert_eq!(partition(n, workers), expected);
    }

    #[test]
    fn every_line_visited_once_per_sweep() {
        let lines: Vec<Index1> = (0..50).collect();
        let mut first_position: HashMap<Index1, usize> = HashMap::new();
        for seed in 0..200 {
            let order = visitation_order(&lines, sweep_seed(7, seed));
            let mut histogram = vec![0; 50];
            for &line in &order { histogram[line] += 1; }
            assert!(histogram.iter().all(|&n| n == 1));
            *first_position.entry(order[0]).or_default() += 1;
        }
        // Different seeds start in different places
        assert!(first_position.len() > 20);
    }

    struct Problem {
        geometry: Geometry,
        detector: Detector,
        matrix: SystemMatrix,
        counts: SinoArray,
        weights: SinoArray,
        prior: PriorModel,
    }

    fn problem(n: [usize; 3], n_t: usize) -> Problem {
        let geometry = Geometry::centred(n, 1.0, 1.0).unwrap();
        let angles = [-1.0, -0.4, 0.0, 0.3, 0.9].to_vec();
        let detector = Detector::centred(angles, n[1] + 2, n_t, 1.0, 1.0).unwrap();
        let matrix = SystemMatrix::build(&geometry, &detector, Kernel::AreaWeighted);
        let mut phantom = geometry.zeros();
        for ([z, x, y], v) in phantom.indexed_iter_mut().map(|((z, x, y), v)| ([z, x, y], v)) {
            *v = ((z + 2 * x + 3 * y) % 5) as Real * 0.3;
        }
        let counts = forward_project(&matrix, &detector, &phantom, &vec![1.0; 5]);
        let weights = SinoArray::from_elem(counts.raw_dim(), 1.0);
        let prior = PriorModel::from(&PriorConfig { p: 1.2, sigma_x: 2.0, ..PriorConfig::default() });
        Problem { geometry, detector, matrix, counts, weights, prior }
    }

    fn run_sweep(p: &Problem, volume: &mut Volume, error: &mut SinoArray, gain: &[Real], solver: Solver, boundary: Boundary, workers: usize) -> SweepStats {
        let sweep = Sweep {
            geometry: &p.geometry, detector: &p.detector, matrix: &p.matrix, prior: &p.prior,
            weights: &p.weights, gain, solver, boundary, root_tolerance: 1e-9,
        };
        let lines: Vec<Index1> = (0..p.geometry.n_lines()).collect();
        sweep.run(volume, error, &lines, workers, 42, &AtomicBool::new(false))
    }

    #[rstest(/**/ solver           , boundary           , workers,
             case(Solver::Exact    , Boundary::Truncated, 1      ),
             case(Solver::Surrogate, Boundary::Circular , 1      ),
             case(Solver::Exact    , Boundary::Circular , 3      ),
             case(Solver::Surrogate, Boundary::Truncated, 4      ),
    )]
    fn incremental_error_matches_recomputation(solver: Solver, boundary: Boundary, workers: usize) {
        let p = problem([3, 4, 4], 4);
        let gain = [1.0, 0.9, 1.2, 1.0, 1.1];
        let offset = [0.0; 5];
        let mut volume = p.geometry.zeros();
        let mut error = error_sinogram(&p.counts, &p.detector.zeros(), &gain, &offset);
        for _ in 0..3 {
            let stats = run_sweep(&p, &mut volume, &mut error, &gain, solver, boundary, workers);
            assert!(!stats.cancelled);
        }
        let projection = forward_project(&p.matrix, &p.detector, &volume, &[1.0; 5]);
        let expected = error_sinogram(&p.counts, &projection, &gain, &offset);
        let scale = p.counts.iter().fold(0.0, |m: Real, &c| m.max(c.abs()));
        for (&got, &want) in error.iter().zip(expected.iter()) {
            assert_float_eq!(got, want, abs <= 1e-9 * scale);
        }
        assert!(volume.iter().all(|&v| v >= 0.0));
        assert!(volume.iter().any(|&v| v > 0.0));
    }

    #[test]
    fn magnitude_map_sums_updates() {
        let p = problem([2, 3, 2], 2);
        let gain = [1.0; 5];
        let mut volume = p.geometry.zeros();
        let mut error = p.counts.clone();
        let stats = run_sweep(&p, &mut volume, &mut error, &gain, Solver::Exact, Boundary::Truncated, 2);
        // Starting from zero every update is the new value
        assert_float_eq!(stats.magnitude.sum(), volume.sum(), rel <= 1e-12);
        assert_float_eq!(stats.update_sum, stats.magnitude_sum, rel <= 1e-12);
        assert_float_eq!(stats.ratio(), 1.0, rel <= 1e-12);
    }

    #[test]
    fn raised_cancel_flag_stops_before_any_update() {
        let p = problem([2, 3, 2], 2);
        let sweep = Sweep {
            geometry: &p.geometry, detector: &p.detector, matrix: &p.matrix, prior: &p.prior,
            weights: &p.weights, gain: &[1.0; 5], solver: Solver::Exact,
            boundary: Boundary::Truncated, root_tolerance: 1e-9,
        };
        let mut volume = p.geometry.zeros();
        let mut error = p.counts.clone();
        let lines: Vec<Index1> = (0..p.geometry.n_lines()).collect();
        let stats = sweep.run(&mut volume, &mut error, &lines, 2, 1, &AtomicBool::new(true));
        assert!(stats.cancelled);
        assert!(volume.iter().all(|&v| v == 0.0));
        assert_eq!(error, p.counts);
    }

    #[test]
    fn restricted_sweep_leaves_other_lines_alone() {
        let p = problem([3, 3, 2], 2);
        let gain = [1.0; 5];
        let mut volume = p.geometry.zeros();
        let mut error = p.counts.clone();
        let sweep = Sweep {
            geometry: &p.geometry, detector: &p.detector, matrix: &p.matrix, prior: &p.prior,
            weights: &p.weights, gain: &gain, solver: Solver::Surrogate,
            boundary: Boundary::Truncated, root_tolerance: 1e-9,
        };
        let stats = sweep.run(&mut volume, &mut error, &[4], 1, 3, &AtomicBool::new(false));
        for ([z, x, _], v) in volume.indexed_iter().map(|((z, x, y), v)| ([z, x, y], *v)) {
            if (z, x) != (1, 1) { assert_eq!(v, 0.0); }
        }
        assert!(stats.magnitude[[1, 1]] > 0.0);
        assert_eq!(stats.magnitude.sum(), stats.magnitude[[1, 1]]);
    }
}

// ----- Imports ------------------------------------------------------------------------------------------
use std::ops::Range;
use std::sync::atomic::AtomicBool;

use ndarray::Array2;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use rayon::prelude::*;

use crate::{
    config::{Boundary, Solver},
    geometry::{Geometry, Volume},
    prior::{neighbours, PriorModel},
    sinogram::{Detector, SinoArray},
    system_matrix::SystemMatrix,
    types::{Index1, Real},
};
