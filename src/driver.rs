//! Outer/inner iteration of a reconstruction
//!
//! Each outer iteration runs up to `inner` ICD sweeps over the volume, then
//! re-estimates the per-view gain and offset (when they are not fixed) and
//! optionally refines the noise weights. Inner loops end early when the
//! relative update magnitude falls below the (possibly shrinking) stop
//! threshold.

/// Receives progress reports at sweep boundaries
pub trait Observer: Sync {
    fn progress(&self, _percent: Real, _message: &str) {}
}

/// Observer which ignores everything
#[derive(Clone, Copy, Debug, Default)]
pub struct NullObserver;

impl Observer for NullObserver {}

/// How a reconstruction ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Converged,
    MaxIterations,
    /// A gain/offset update would have increased the cost; it was discarded
    CostIncreased { outer: usize, inner: usize },
    /// The cancel flag was raised; the volume may be partially updated
    Cancelled,
}

/// The step after which a cost increase was observed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Sweep,
    Nuisance,
    NoiseRefinement,
}

/// A cost increase. ICD cannot increase the cost, so these point at
/// numerical trouble.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Anomaly {
    pub stage: Stage,
    pub outer: usize,
    /// Sweeps completed in the outer iteration
    pub inner: usize,
    pub before: Real,
    pub after: Real,
}

#[derive(Clone, Debug)]
pub struct Outcome {
    pub volume: Volume,
    pub gain: Vec<Real>,
    pub offset: Vec<Real>,
    pub weights: SinoArray,
    /// `gain · A · volume + offset`
    pub predicted: SinoArray,
    pub status: Status,
    pub cost_history: Vec<Real>,
    pub anomalies: Vec<Anomaly>,
    /// Outer iterations started
    pub iterations: usize,
    /// ICD sweeps completed
    pub sweeps: usize,
}

pub struct Reconstructor {
    params: Params,
    geometry: Geometry,
    detector: Detector,
    matrix: SystemMatrix,
    counts: SinoArray,
    volume: Volume,
    nuisance: Nuisance,
    weights: SinoArray,
}

impl Reconstructor {

    /// Validate the inputs and precompute the system matrix. Every voxel
    /// starts at the configured initial value, the weights follow the
    /// configured noise model.
    pub fn new(params: Params, geometry: Geometry, sinogram: Sinogram) -> Result<Self> {
        params.validate()?;
        let Sinogram { detector, counts } = sinogram;
        detector.check("counts", &counts)?;
        if let Some(c) = counts.iter().find(|c| !c.is_finite()) {
            return Err(MbirError::InvalidData(format!("measured counts must be finite, found {c}")));
        }
        let matrix = SystemMatrix::build(&geometry, &detector, params.solver.kernel);
        info!("System matrix: {} non-zero elements over {} voxel lines",
              group_digits(matrix.n_elements()), group_digits(geometry.n_lines()));
        let weights = initial_weights(params.noise.model, params.noise.variance, &counts);
        let initial_gain = match params.nuisance.mode {
            NuisanceMode::Joint => params.nuisance.target_gain,
            NuisanceMode::Fixed => 1.0,
        };
        let nuisance = Nuisance::constant(detector.n_views(), initial_gain);
        let volume = geometry.constant(params.initial_value);
        Ok(Self { params, geometry, detector, matrix, counts, volume, nuisance, weights })
    }

    pub fn with_initial_volume(self, volume: Volume) -> Result<Self> {
        self.geometry.check(&volume)?;
        if let Some(v) = volume.iter().find(|v| !(**v >= 0.0)) {
            return Err(MbirError::InvalidData(format!("initial volume must be non-negative, found {v}")));
        }
        Ok(Self { volume, ..self })
    }

    pub fn with_nuisance(self, nuisance: Nuisance) -> Result<Self> {
        if nuisance.n_views() != self.detector.n_views() {
            return Err(MbirError::ShapeMismatch {
                what: "gains", expected: vec![self.detector.n_views()], found: vec![nuisance.n_views()],
            });
        }
        Ok(Self { nuisance, ..self })
    }

    pub fn with_weights(self, weights: SinoArray) -> Result<Self> {
        self.detector.check("weights", &weights)?;
        if let Some(w) = weights.iter().find(|w| !(**w >= 0.0 && w.is_finite())) {
            return Err(MbirError::InvalidData(format!("weights must be finite and non-negative, found {w}")));
        }
        Ok(Self { weights, ..self })
    }

    pub fn geometry(&self) -> &Geometry { &self.geometry }
    pub fn detector(&self) -> &Detector { &self.detector }
    pub fn matrix  (&self) -> &SystemMatrix { &self.matrix }

    /// Iterate until convergence, exhaustion of the iteration budget or
    /// cancellation
    pub fn run(self, observer: &dyn Observer, cancel: &AtomicBool) -> Outcome {
        let Self { params, geometry, detector, matrix, counts, mut volume, mut nuisance, mut weights } = self;
        let Params { prior, iterations: it, solver, noise, nuisance: nuisance_config, .. } = &params;
        let prior = PriorModel::from(prior);
        let boundary = solver.boundary;
        let workers = solver.threads.unwrap_or_else(rayon::current_num_threads).max(1);
        let with_noise_term = noise.refine;
        let cost_of = |error: &SinoArray, weights: &SinoArray, volume: &Volume| {
            cost::total(error, weights, volume, &prior, boundary, with_noise_term)
        };

        let unit_gain = vec![1.0; detector.n_views()];
        let projection = forward_project(&matrix, &detector, &volume, &unit_gain);
        let mut error = error_sinogram(&counts, &projection, &nuisance.gain, &nuisance.offset);

        // Voxel lines which project onto no detector bin are never updated
        let all_lines: Vec<Index1> = (0..geometry.n_lines())
            .filter(|&line| !matrix.column(line).is_empty())
            .collect();
        let mut selection_rng = StdRng::seed_from_u64(solver.seed);

        let mut tracker = CostTracker::new();
        if it.track_cost { tracker.record(cost_of(&error, &weights, &volume)); }
        let mut anomalies = vec![];
        let mut threshold = it.stop_threshold;
        let mut magnitude: Option<Array2<Real>> = None;
        let mut sweeps = 0;
        let mut iterations = 0;
        let mut status = None;
        let mut converged = false;
        let budget = (it.outer * it.inner).max(1) as Real;

        info!("Reconstructing {:?} voxels from {:?} measurements with {workers} workers",
              geometry.n, detector.shape());
        'outer: for outer in 0..it.outer {
            iterations = outer + 1;
            converged = false;
            let mut inner_done = 0;
            for inner in 0..it.inner {
                let full = solver.schedule == Schedule::Homogeneous || sweeps % 2 == 0;
                let selected;
                let lines: &[Index1] = match (&magnitude, full) {
                    (Some(m), false) => {
                        selected = select_lines(m, solver.percentile_divisor, &mut selection_rng)
                            .into_iter()
                            .filter(|&line| !matrix.column(line).is_empty())
                            .collect::<Vec<_>>();
                        &selected
                    }
                    _ => &all_lines,
                };
                let sweep = Sweep {
                    geometry: &geometry,
                    detector: &detector,
                    matrix  : &matrix,
                    prior   : &prior,
                    weights : &weights,
                    gain    : &nuisance.gain,
                    solver  : solver.kind,
                    boundary,
                    root_tolerance: it.root_tolerance,
                };
                let stats = sweep.run(&mut volume, &mut error, lines, workers, sweep_seed(solver.seed, sweeps), cancel);
                if stats.cancelled {
                    info!("Cancelled during sweep {}", sweeps + 1);
                    status = Some(Status::Cancelled);
                    break 'outer;
                }
                let sweep_index = sweeps;
                sweeps += 1;
                inner_done = inner + 1;
                let ratio = stats.ratio();
                debug!("sweep {sweeps} ({} of {} lines): update ratio {ratio:.3e}, {} flat brackets",
                       lines.len(), all_lines.len(), stats.flat);
                magnitude = Some(stats.magnitude);
                observer.progress(100.0 * sweeps as Real / budget,
                                  &format!("outer {}/{}, sweep {}, ratio {ratio:.3e}", outer + 1, it.outer, inner + 1));

                if it.track_cost {
                    let cost = cost_of(&error, &weights, &volume);
                    debug!("cost {cost:.6e}");
                    if let Some(before) = tracker.record(cost) {
                        warn!("Cost increased during sweep {sweeps}: {before:.9e} -> {cost:.9e}");
                        anomalies.push(Anomaly { stage: Stage::Sweep, outer, inner: inner_done, before, after: cost });
                        break;
                    }
                }

                let check = full && (solver.schedule == Schedule::Homogeneous
                                     || sweep_index % solver.check_interval == 0);
                if check && ratio < threshold {
                    debug!("update ratio {ratio:.3e} below threshold {threshold:.3e}");
                    threshold *= it.reduction_factor;
                    converged = true;
                    break;
                }
            }

            if nuisance_config.mode == NuisanceMode::Joint {
                let projection = forward_project(&matrix, &detector, &volume, &unit_gain);
                match estimate(&projection, &counts, &weights, nuisance_config.target_gain, nuisance_config.lambda_tolerance) {
                    Some(estimated) => {
                        let candidate = error_sinogram(&counts, &projection, &estimated.gain, &estimated.offset);
                        // Only the data term depends on gain and offset
                        let before = data_term(&error    , &weights);
                        let after  = data_term(&candidate, &weights);
                        if increased(before, after) {
                            warn!("Gain/offset update would increase the data cost: {before:.9e} -> {after:.9e}");
                            anomalies.push(Anomaly { stage: Stage::Nuisance, outer, inner: inner_done, before, after });
                            status = Some(Status::CostIncreased { outer, inner: inner_done });
                            break 'outer;
                        }
                        nuisance = estimated;
                        error = candidate;
                        if it.track_cost { tracker.record(cost_of(&error, &weights, &volume)); }
                    }
                    None => warn!("Keeping current gain and offset"),
                }
            }

            if noise.refine {
                let mut refined = weights.clone();
                refine(&mut refined, &error);
                let before = cost_of(&error, &weights, &volume);
                let after  = cost_of(&error, &refined, &volume);
                if increased(before, after) {
                    warn!("Noise refinement would increase the cost: {before:.9e} -> {after:.9e}");
                    anomalies.push(Anomaly { stage: Stage::NoiseRefinement, outer, inner: inner_done, before, after });
                } else {
                    weights = refined;
                    if it.track_cost { tracker.record(after); }
                }
            }

            info!("Outer iteration {}/{}: {inner_done} sweeps{}{}", outer + 1, it.outer,
                  tracker.last().map(|c| format!(", cost {c:.6e}")).unwrap_or_default(),
                  if converged { ", converged" } else { "" });

            // Nothing changes in later iterations except through the threshold
            let frozen = nuisance_config.mode == NuisanceMode::Fixed && !noise.refine;
            if converged && frozen && it.reduction_factor >= 1.0 {
                status = Some(Status::Converged);
                break;
            }
        }

        let status = status.unwrap_or(if converged { Status::Converged } else { Status::MaxIterations });
        info!("Finished after {iterations} outer iterations and {sweeps} sweeps: {status:?}");
        let projection = forward_project(&matrix, &detector, &volume, &unit_gain);
        let predicted = predicted_sinogram(&projection, &nuisance.gain, &nuisance.offset);
        let Nuisance { gain, offset } = nuisance;
        Outcome {
            volume,
            gain,
            offset,
            weights,
            predicted,
            status,
            cost_history: tracker.into_history(),
            anomalies,
            iterations,
            sweeps,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::{Kernel, NoiseKind};
    use std::sync::Mutex;
    #[allow(unused)] use pretty_assertions::{assert_eq, assert_ne};

    fn setup(params: Params) -> Reconstructor {
        let geometry = Geometry::centred([2, 3, 2], 1.0, 1.0).unwrap();
        let detector = Detector::centred(vec![-0.5, 0.0, 0.5], 5, 2, 1.0, 1.0).unwrap();
        let matrix = SystemMatrix::build(&geometry, &detector, Kernel::AreaWeighted);
        let phantom = geometry.constant(1.0);
        let counts = forward_project(&matrix, &detector, &phantom, &[1.0; 3]);
        Reconstructor::new(params, geometry, Sinogram::new(detector, counts).unwrap()).unwrap()
    }

    fn uniform_noise() -> Params {
        let mut params = Params::default();
        params.noise.model = NoiseKind::Uniform;
        params.noise.variance = 1.0;
        params
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Real>>);

    impl Observer for Recorder {
        fn progress(&self, percent: Real, _message: &str) {
            if let Ok(mut seen) = self.0.lock() { seen.push(percent); }
        }
    }

    #[test]
    fn builders_reject_mismatched_inputs() {
        let r = setup(uniform_noise());
        assert!(matches!(r.with_nuisance(Nuisance::constant(2, 1.0)), Err(MbirError::ShapeMismatch { .. })));
        let r = setup(uniform_noise());
        assert!(matches!(r.with_weights(SinoArray::zeros([3, 5, 1])), Err(MbirError::ShapeMismatch { .. })));
        let r = setup(uniform_noise());
        let mut negative = Volume::zeros([2, 3, 2]);
        negative[[0, 0, 0]] = -1.0;
        assert!(matches!(r.with_initial_volume(negative), Err(MbirError::InvalidData(_))));
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let mut params = uniform_noise();
        params.solver.threads = Some(0);
        let geometry = Geometry::centred([1, 2, 1], 1.0, 1.0).unwrap();
        let detector = Detector::centred(vec![0.0], 3, 1, 1.0, 1.0).unwrap();
        let sinogram = Sinogram::new(detector.clone(), detector.zeros()).unwrap();
        assert!(matches!(Reconstructor::new(params, geometry, sinogram), Err(MbirError::InvalidConfig(_))));
    }

    #[test]
    fn progress_is_reported_per_sweep() {
        let mut params = uniform_noise();
        params.iterations.outer = 2;
        params.iterations.inner = 3;
        params.iterations.stop_threshold = 0.0;
        params.solver.threads = Some(1);
        let recorder = Recorder::default();
        let outcome = setup(params).run(&recorder, &AtomicBool::new(false));
        let seen = recorder.0.into_inner().unwrap();
        assert_eq!(seen.len(), 6);
        assert_eq!(outcome.sweeps, 6);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(seen.last().cloned(), Some(100.0));
        assert_eq!(outcome.status, Status::MaxIterations);
    }

    #[test]
    fn no_iterations_leaves_initial_state() {
        let mut params = uniform_noise();
        params.iterations.outer = 0;
        let outcome = setup(params).run(&NullObserver, &AtomicBool::new(false));
        assert_eq!(outcome.status, Status::MaxIterations);
        assert_eq!(outcome.iterations, 0);
        assert!(outcome.volume.iter().all(|&v| v == 0.0));
        assert_eq!(outcome.gain, vec![1.0; 3]);
        assert_eq!(outcome.cost_history.len(), 1);
        assert!(outcome.predicted.iter().all(|&p| p == 0.0));
    }

    #[test]
    fn volume_starts_at_initial_value() {
        let mut params = uniform_noise();
        params.initial_value = 0.75;
        params.iterations.outer = 0;
        let outcome = setup(params).run(&NullObserver, &AtomicBool::new(false));
        assert!(outcome.volume.iter().all(|&v| v == 0.75));
        assert!(outcome.predicted.iter().any(|&p| p > 0.0));
    }

    #[test]
    fn joint_mode_starts_from_target_gain() {
        let mut params = uniform_noise();
        params.nuisance.mode = NuisanceMode::Joint;
        params.nuisance.target_gain = 2.0;
        params.iterations.outer = 0;
        let outcome = setup(params).run(&NullObserver, &AtomicBool::new(false));
        assert_eq!(outcome.gain, vec![2.0; 3]);
        assert_eq!(outcome.offset, vec![0.0; 3]);
    }
}

// ----- Imports ------------------------------------------------------------------------------------------
use std::sync::atomic::AtomicBool;

use ndarray::Array2;
use rand::{rngs::StdRng, SeedableRng};
use tracing::{debug, info, warn};

use crate::{
    config::{NuisanceMode, Params, Schedule},
    cost::{self, data_term, increased, CostTracker},
    error::{MbirError, Result},
    geometry::{Geometry, Volume},
    icd::{sweep_seed, Sweep},
    nhicd::select_lines,
    noise::{initial_weights, refine},
    nuisance::{estimate, Nuisance},
    prior::PriorModel,
    projector::{error_sinogram, forward_project, predicted_sinogram},
    sinogram::{Detector, SinoArray, Sinogram},
    system_matrix::SystemMatrix,
    types::{Index1, Real},
    utils::group_digits,
};
