//! Coarse-to-fine reconstruction
//!
//! With `levels` resolution levels, level `i` reconstructs on a grid whose
//! voxels are `final_factor · 2^(levels − 1 − i)` times the configured ones.
//! Every level after the first starts from the previous level's volume,
//! resampled onto its finer grid, and from its gains, offsets and weights.
//! The sinogram is the same at every level.

/// Rescales the progress of one level into the progress of the whole ladder
struct LevelObserver<'a> {
    observer: &'a dyn Observer,
    level: usize,
    n_levels: usize,
}

impl Observer for LevelObserver<'_> {
    fn progress(&self, percent: Real, message: &str) {
        let overall = (self.level as Real * 100.0 + percent) / self.n_levels as Real;
        self.observer.progress(overall, &format!("level {}/{}, {message}", self.level + 1, self.n_levels));
    }
}

pub struct Ladder {
    params: Params,
    geometries: Vec<Geometry>,
    sinogram: Sinogram,
    initial: Option<Volume>,
    nuisance: Option<Nuisance>,
}

impl Ladder {

    /// `geometry` is the grid at unit resolution factor
    pub fn new(params: Params, geometry: Geometry, sinogram: Sinogram) -> Result<Self> {
        params.validate()?;
        let geometries = params.resolution.factors()?
            .into_iter()
            .map(|factor| geometry.coarsened(factor))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { params, geometries, sinogram, initial: None, nuisance: None })
    }

    /// Grids of all levels, coarsest first
    pub fn geometries(&self) -> &[Geometry] { &self.geometries }

    /// Starting volume of the first (coarsest) level
    pub fn with_initial_volume(self, volume: Volume) -> Result<Self> {
        self.geometries[0].check(&volume)?;
        Ok(Self { initial: Some(volume), ..self })
    }

    /// Starting gains and offsets of the first level
    pub fn with_nuisance(self, nuisance: Nuisance) -> Result<Self> {
        let n_views = self.sinogram.detector.n_views();
        if nuisance.n_views() != n_views {
            return Err(MbirError::ShapeMismatch {
                what: "gains", expected: vec![n_views], found: vec![nuisance.n_views()],
            });
        }
        Ok(Self { nuisance: Some(nuisance), ..self })
    }

    /// Reconstruct every level in turn. Returns the outcome of the finest
    /// level, or of the first level which was cancelled or stopped on a cost
    /// increase.
    pub fn run(self, observer: &dyn Observer, cancel: &AtomicBool) -> Result<Outcome> {
        let Self { params, geometries, sinogram, mut initial, mut nuisance } = self;
        let n_levels = geometries.len();
        let mut previous: Option<(Geometry, Outcome)> = None;
        for (level, geometry) in geometries.into_iter().enumerate() {
            info!("Resolution level {}/{n_levels}: {:?} voxels of {} x {}",
                  level + 1, geometry.n, geometry.delta_xz, geometry.delta_xy);
            let reconstructor = Reconstructor::new(params.clone(), geometry, sinogram.clone())?;
            let reconstructor = match previous.take() {
                Some((coarse, outcome)) => {
                    let Outcome { volume, gain, offset, weights, .. } = outcome;
                    reconstructor
                        .with_initial_volume(coarse.resample(&volume, &geometry))?
                        .with_nuisance(Nuisance { gain, offset })?
                        .with_weights(weights)?
                }
                None => {
                    let reconstructor = match initial.take() {
                        Some(volume) => reconstructor.with_initial_volume(volume)?,
                        None         => reconstructor,
                    };
                    match nuisance.take() {
                        Some(nuisance) => reconstructor.with_nuisance(nuisance)?,
                        None           => reconstructor,
                    }
                }
            };
            let outcome = reconstructor.run(&LevelObserver { observer, level, n_levels }, cancel);
            let finished = matches!(outcome.status, Status::Converged | Status::MaxIterations);
            if !finished || level + 1 == n_levels {
                if !finished { warn!("Stopping at resolution level {}: {:?}", level + 1, outcome.status); }
                return Ok(outcome);
            }
            previous = Some((geometry, outcome));
        }
        Err(MbirError::InvalidConfig("no resolution levels".into()))
    }
}


// ----- Imports ------------------------------------------------------------------------------------------
use std::sync::atomic::AtomicBool;

use tracing::{info, warn};

use crate::{
    config::Params,
    driver::{Observer, Outcome, Reconstructor, Status},
    error::{MbirError, Result},
    geometry::{Geometry, Volume},
    nuisance::Nuisance,
    sinogram::Sinogram,
    types::Real,
};
