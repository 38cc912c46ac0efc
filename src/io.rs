//! Volumes, sinograms and per-view vectors on disk
//!
//! Everything is stored as raw little-endian `f32` in C order: volumes as
//! `[z][x][y]`, sinograms as `[view][r][t]`. Shapes come from the
//! configuration, never from the files.

pub mod raw;

/// Write `data` as `f32`
pub fn write_reals<'a>(data: impl IntoIterator<Item = &'a Real>, path: &Path) -> Result<()> {
    raw::write(data.into_iter().map(|&x| x as f32), path)?;
    Ok(())
}

/// Read exactly as many values as `shape` holds
fn read_reals(what: &'static str, shape: &[usize], path: &Path) -> Result<Vec<Real>> {
    let expected = checked_volume(what, shape)?;
    let data: Vec<Real> = raw::read(path)?
        .map(|x| x.map(Real::from))
        .collect::<std::io::Result<_>>()?;
    if data.len() != expected {
        return Err(MbirError::ShapeMismatch { what, expected: shape.to_vec(), found: vec![data.len()] });
    }
    Ok(data)
}

pub fn read_volume(path: &Path, geometry: &Geometry) -> Result<Volume> {
    let data = read_reals("volume", &geometry.n, path)?;
    Volume::from_shape_vec(geometry.n, data)
        .map_err(|e| MbirError::InvalidData(format!("volume: {e}")))
}

pub fn read_sinogram(path: &Path, detector: &Detector) -> Result<Sinogram> {
    let data = read_reals("sinogram", &detector.shape(), path)?;
    Sinogram::from_vec(detector.clone(), data)
}

/// One value per view, such as gains or offsets
pub fn read_per_view(what: &'static str, path: &Path, detector: &Detector) -> Result<Vec<Real>> {
    read_reals(what, &[detector.n_views()], path)
}

/// Cost history as text, one `iteration cost` pair per line
pub fn write_cost_log(history: &[Real], path: &Path) -> Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    for (i, cost) in history.iter().enumerate() {
        writeln!(file, "{i} {cost:.12e}")?;
    }
    file.flush()?;
    Ok(())
}


// ----- Imports ------------------------------------------------------------------------------------------
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::{
    error::{checked_volume, MbirError, Result},
    geometry::{Geometry, Volume},
    sinogram::{Detector, Sinogram},
    types::Real,
};
