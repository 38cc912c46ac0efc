//! Configuration file parser for MBIR reconstructions

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::config::{Params, PriorConfig, Iterations, SolverConfig, NoiseConfig, NuisanceConfig, ResolutionConfig};
use crate::error::{MbirError, Result};
use crate::geometry::Geometry;
use crate::sinogram::Detector;
use crate::types::{Length, Real};

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub geometry: GeometrySection,
    pub detector: DetectorSection,
    #[serde(default)] pub prior: PriorConfig,
    #[serde(default)] pub iterations: Iterations,
    #[serde(default)] pub solver: SolverConfig,
    #[serde(default)] pub noise: NoiseConfig,
    #[serde(default)] pub nuisance: NuisanceConfig,
    #[serde(default)] pub resolution: ResolutionConfig,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GeometrySection {
    pub n_x: usize,
    pub n_y: usize,
    pub n_z: usize,
    /// In-plane voxel pitch
    pub delta_xz: Length,
    /// Voxel pitch along the tilt axis
    pub delta_xy: Length,
    /// Extent along z of the region used for convergence statistics
    #[serde(default)] pub roi_length_z: Option<Length>,
    /// Starting value of every voxel
    #[serde(default)] pub initial_value: Real,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DetectorSection {
    /// Must match the number of angles when given
    #[serde(default)] pub n_views: Option<usize>,
    pub n_r: usize,
    pub n_t: usize,
    pub delta_r: Length,
    pub delta_t: Length,
    /// Tilt angles in degrees, one per view
    pub angles: Vec<Real>,
    /// Detector origins; centred on the rotation axis when absent
    #[serde(default)] pub r0: Option<Length>,
    #[serde(default)] pub t0: Option<Length>,
    /// Indices of views left out of the reconstruction
    #[serde(default)] pub exclude_views: Vec<usize>,
}

impl Config {

    pub fn params(&self) -> Params {
        Params {
            prior     : self.prior     .clone(),
            iterations: self.iterations.clone(),
            solver    : self.solver    .clone(),
            noise     : self.noise     .clone(),
            nuisance  : self.nuisance  .clone(),
            resolution: self.resolution.clone(),
            initial_value: self.geometry.initial_value,
        }
    }

    pub fn geometry(&self) -> Result<Geometry> {
        let GeometrySection { n_x, n_y, n_z, delta_xz, delta_xy, roi_length_z, .. } = self.geometry;
        let geometry = Geometry::centred([n_z, n_x, n_y], delta_xz, delta_xy)?;
        Ok(match roi_length_z {
            Some(length) => geometry.with_roi_length_z(length),
            None         => geometry,
        })
    }

    pub fn detector(&self) -> Result<Detector> {
        let DetectorSection { n_views, n_r, n_t, delta_r, delta_t, ref angles, r0, t0, .. } = self.detector;
        if let Some(n) = n_views.filter(|&n| n != angles.len()) {
            return Err(MbirError::InvalidConfig(format!("n_views = {n} but {} angles given", angles.len())));
        }
        let radians = angles.iter().map(|a| a.to_radians()).collect();
        let mut detector = Detector::centred(radians, n_r, n_t, delta_r, delta_t)?;
        if let Some(r0) = r0 { detector.r0 = r0; }
        if let Some(t0) = t0 { detector.t0 = t0; }
        Ok(detector)
    }
}

pub fn read_config_file(path: &Path) -> Result<Config> {
    let config: String = fs::read_to_string(path)?;
    let config: Config = toml::from_str(&config)?;
    config.params().validate()?;
    Ok(config)
}
