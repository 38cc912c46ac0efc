//! Run-time selection of algorithm variants and their numerical parameters
//!
//! Every variant the engine supports is chosen here, so that a single build
//! can exercise all of them:
//!
//! + `Solver`: exact root-finding or surrogate quadratic voxel update
//! + `Boundary`: truncated or circular MRF neighbourhoods
//! + `Schedule`: homogeneous or non-homogeneous (NHICD) sweeps
//! + `Kernel`: area-weighted or distance-driven projection weights
//! + `PriorKind`: p-power MRF or QGGMRF
//!
//! The TOML file layout lives in `file`.

pub mod file;
pub use file::{Config, read_config_file};

use serde::Deserialize;

use crate::error::{MbirError, Result};
use crate::types::Real;

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Solver { Exact, Surrogate }

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Boundary { Truncated, Circular }

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Schedule { Homogeneous, NonHomogeneous }

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Kernel { AreaWeighted, DistanceDriven }

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PriorKind { Power, Qggmrf }

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum NoiseKind { Counts, Uniform, ViewMean }

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum NuisanceMode { Fixed, Joint }

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PriorConfig {
    #[serde(default = "default_prior_kind")] pub kind: PriorKind,
    /// Shape parameter: 2 is Gaussian, values towards 1 preserve edges
    #[serde(default = "default_p")]          pub p: Real,
    /// QGGMRF transition parameter
    #[serde(default = "default_c")]          pub c: Real,
    #[serde(default = "default_sigma_x")]    pub sigma_x: Real,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Iterations {
    #[serde(default = "default_outer")]            pub outer: usize,
    #[serde(default = "default_inner")]            pub inner: usize,
    /// Converged when `Σ|update| / Σ|value|` over the ROI drops below this
    #[serde(default = "default_stop_threshold")]   pub stop_threshold: Real,
    /// Applied to `stop_threshold` every time it is crossed
    #[serde(default = "default_reduction_factor")] pub reduction_factor: Real,
    #[serde(default = "default_root_tolerance")]   pub root_tolerance: Real,
    /// Evaluate the full cost after every sweep
    #[serde(default = "default_true")]             pub track_cost: bool,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SolverConfig {
    #[serde(default = "default_solver")]   pub kind: Solver,
    #[serde(default = "default_boundary")] pub boundary: Boundary,
    #[serde(default = "default_schedule")] pub schedule: Schedule,
    #[serde(default = "default_kernel")]   pub kernel: Kernel,
    /// Number of y-slab workers; defaults to the size of the rayon pool
    #[serde(default)]                      pub threads: Option<usize>,
    #[serde(default = "default_seed")]     pub seed: u64,
    /// NHICD selects the top `1/percentile_divisor` of voxel lines
    #[serde(default = "default_divisor")]  pub percentile_divisor: usize,
    /// NHICD checks convergence every this many sweeps
    #[serde(default = "default_check_interval")] pub check_interval: usize,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct NoiseConfig {
    #[serde(default = "default_noise")]    pub model: NoiseKind,
    #[serde(default = "default_variance")] pub variance: Real,
    /// Re-estimate per-view variance from the residual after nuisance updates
    #[serde(default)]                      pub refine: bool,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct NuisanceConfig {
    #[serde(default = "default_nuisance")]         pub mode: NuisanceMode,
    /// Geometric mean imposed on the per-view gains
    #[serde(default = "default_target_gain")]      pub target_gain: Real,
    #[serde(default = "default_lambda_tolerance")] pub lambda_tolerance: Real,
}

/// Coarse-to-fine schedule of voxel sizes
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ResolutionConfig {
    /// Number of grids reconstructed, each with half the voxel size of the last
    #[serde(default = "default_one")] pub levels: usize,
    /// Voxel size of the finest grid, in multiples of the configured pitches
    #[serde(default = "default_one")] pub final_factor: usize,
}

impl ResolutionConfig {

    /// Voxel size multiple of each level, coarsest first
    pub fn factors(&self) -> Result<Vec<usize>> {
        if self.levels == 0 || self.final_factor == 0 {
            return Err(MbirError::InvalidConfig(
                format!("resolution levels ({}) and final_factor ({}) must be at least 1", self.levels, self.final_factor)));
        }
        (0..self.levels).rev()
            .map(|k| u32::try_from(k).ok()
                 .and_then(|k| 2_usize.checked_pow(k))
                 .and_then(|f| f.checked_mul(self.final_factor))
                 .ok_or_else(|| MbirError::InvalidConfig(format!("{} resolution levels are too many", self.levels))))
            .collect()
    }
}

/// Everything the engine needs besides geometry and data
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Params {
    pub prior: PriorConfig,
    pub iterations: Iterations,
    pub solver: SolverConfig,
    pub noise: NoiseConfig,
    pub nuisance: NuisanceConfig,
    pub resolution: ResolutionConfig,
    /// Value of every voxel before the first sweep
    pub initial_value: Real,
}

impl Params {

    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(MbirError::InvalidConfig(msg));
        let PriorConfig { kind, p, c, sigma_x } = &self.prior;
        if !(1.0..=2.0).contains(p)  { return bad(format!("prior p must lie in [1, 2], got {p}")); }
        if !(*sigma_x > 0.0)         { return bad(format!("prior sigma_x must be positive, got {sigma_x}")); }
        if *kind == PriorKind::Qggmrf && !(*c > 0.0) {
            return bad(format!("QGGMRF c must be positive, got {c}"));
        }
        let it = &self.iterations;
        if !(it.stop_threshold >= 0.0) { return bad("stop_threshold must not be negative".into()); }
        if !(it.reduction_factor > 0.0) { return bad("reduction_factor must be positive".into()); }
        if !(it.root_tolerance > 0.0) { return bad("root_tolerance must be positive".into()); }
        let s = &self.solver;
        if s.threads == Some(0)      { return bad("threads must be at least 1".into()); }
        if s.percentile_divisor == 0 { return bad("percentile_divisor must be at least 1".into()); }
        if s.check_interval == 0     { return bad("check_interval must be at least 1".into()); }
        if self.noise.model == NoiseKind::Uniform && !(self.noise.variance > 0.0) {
            return bad("uniform noise variance must be positive".into());
        }
        let n = &self.nuisance;
        if !(n.target_gain > 0.0 && n.target_gain.is_finite()) { return bad("target_gain must be positive".into()); }
        if !(n.lambda_tolerance > 0.0) { return bad("lambda_tolerance must be positive".into()); }
        self.resolution.factors()?;
        if !(self.initial_value >= 0.0 && self.initial_value.is_finite()) {
            return bad(format!("initial_value must be finite and non-negative, got {}", self.initial_value));
        }
        Ok(())
    }
}

impl Default for PriorConfig {
    fn default() -> Self {
        Self { kind: default_prior_kind(), p: default_p(), c: default_c(), sigma_x: default_sigma_x() }
    }
}

impl Default for Iterations {
    fn default() -> Self {
        Self {
            outer           : default_outer(),
            inner           : default_inner(),
            stop_threshold  : default_stop_threshold(),
            reduction_factor: default_reduction_factor(),
            root_tolerance  : default_root_tolerance(),
            track_cost      : true,
        }
    }
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            kind              : default_solver(),
            boundary          : default_boundary(),
            schedule          : default_schedule(),
            kernel            : default_kernel(),
            threads           : None,
            seed              : default_seed(),
            percentile_divisor: default_divisor(),
            check_interval    : default_check_interval(),
        }
    }
}

impl Default for NoiseConfig {
    fn default() -> Self { Self { model: default_noise(), variance: default_variance(), refine: false } }
}

impl Default for NuisanceConfig {
    fn default() -> Self {
        Self {
            mode            : default_nuisance(),
            target_gain     : default_target_gain(),
            lambda_tolerance: default_lambda_tolerance(),
        }
    }
}

impl Default for ResolutionConfig {
    fn default() -> Self { Self { levels: default_one(), final_factor: default_one() } }
}

fn default_true() -> bool { true }
fn default_one()  -> usize { 1 }
fn default_prior_kind() -> PriorKind { PriorKind::Power }
fn default_p()       -> Real { 1.2 }
fn default_c()       -> Real { 0.01 }
fn default_sigma_x() -> Real { 1.0 }

fn default_outer()            -> usize { 30 }
fn default_inner()            -> usize { 10 }
fn default_stop_threshold()   -> Real  { 0.009 }
fn default_reduction_factor() -> Real  { 1.0 }
fn default_root_tolerance()   -> Real  { 1e-7 }

fn default_solver()   -> Solver   { Solver::Exact }
fn default_boundary() -> Boundary { Boundary::Truncated }
fn default_schedule() -> Schedule { Schedule::Homogeneous }
fn default_kernel()   -> Kernel   { Kernel::AreaWeighted }
fn default_seed()     -> u64      { 0x5eed }
fn default_divisor()  -> usize    { 20 }
fn default_check_interval() -> usize { 20 }

fn default_noise()    -> NoiseKind { NoiseKind::Counts }
fn default_variance() -> Real      { 1.0 }

fn default_nuisance()         -> NuisanceMode { NuisanceMode::Fixed }
fn default_target_gain()      -> Real { 1.0 }
fn default_lambda_tolerance() -> Real { 1e-10 }
