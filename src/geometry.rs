//! The extent and granularity of the reconstruction volume
//!
//! Voxels are addressed as `[z, x, y]`: `z` is the row, `x` the column and `y`
//! the slice along the tilt axis. The in-plane pitch `delta_xz` is shared by
//! `x` and `z`; `delta_xy` is the pitch along the tilt axis.

use ndarray::Array3;

use crate::error::{MbirError, Result, checked_volume};
use crate::index::Line;
use crate::types::{BoxDim, Length, Real};

/// The estimator's state: `Object[z][x][y]`
pub type Volume = Array3<Real>;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Geometry {
    /// `[n_z, n_x, n_y]`
    pub n: BoxDim,
    pub delta_xz: Length,
    pub delta_xy: Length,
    /// Lower corner of the grid
    pub x0: Length,
    pub z0: Length,
    pub y0: Length,
    /// Extent along z of the convergence region of interest
    pub roi_length_z: Length,
}

impl Geometry {

    /// Grid centred on the rotation axis
    pub fn centred(n: BoxDim, delta_xz: Length, delta_xy: Length) -> Result<Self> {
        if n.iter().any(|&n| n == 0) {
            return Err(MbirError::InvalidGeometry(format!("empty grid {n:?}")));
        }
        if !(delta_xz > 0.0 && delta_xy > 0.0) {
            return Err(MbirError::InvalidGeometry(
                format!("voxel pitches must be positive: delta_xz = {delta_xz}, delta_xy = {delta_xy}")));
        }
        checked_volume("volume", &n)?;
        let [n_z, n_x, n_y] = n;
        Ok(Self {
            n, delta_xz, delta_xy,
            x0: -(n_x as Length) * delta_xz / 2.0,
            z0: -(n_z as Length) * delta_xz / 2.0,
            y0: -(n_y as Length) * delta_xy / 2.0,
            roi_length_z: n_z as Length * delta_xz,
        })
    }

    pub fn with_roi_length_z(self, roi_length_z: Length) -> Self { Self { roi_length_z, ..self } }

    /// Centred grid covering at least the same extent with voxels `factor`
    /// times larger along every axis
    pub fn coarsened(&self, factor: usize) -> Result<Self> {
        if factor == 0 {
            return Err(MbirError::InvalidGeometry("coarsening factor must be at least 1".into()));
        }
        let n = self.n.map(|n| (n + factor - 1) / factor);
        let f = factor as Length;
        Ok(Self::centred(n, self.delta_xz * f, self.delta_xy * f)?.with_roi_length_z(self.roi_length_z))
    }

    /// Resample `volume`, defined on this grid, onto `target`: each voxel of
    /// `target` takes the value of the voxel containing its centre
    pub fn resample(&self, volume: &Volume, target: &Geometry) -> Volume {
        let nearest = |c: Length, origin: Length, delta: Length, n: usize| {
            ((c - origin) / delta).floor().clamp(0.0, (n - 1) as Real) as usize
        };
        Volume::from_shape_fn(target.n, |(z, x, y)| {
            volume[[
                nearest(target.z_centre(z), self.z0, self.delta_xz, self.n_z()),
                nearest(target.x_centre(x), self.x0, self.delta_xz, self.n_x()),
                nearest(target.y_centre(y), self.y0, self.delta_xy, self.n_y()),
            ]]
        })
    }

    #[inline] pub fn n_z(&self) -> usize { self.n[0] }
    #[inline] pub fn n_x(&self) -> usize { self.n[1] }
    #[inline] pub fn n_y(&self) -> usize { self.n[2] }

    /// Number of `(z, x)` voxel lines
    #[inline] pub fn n_lines(&self) -> usize { self.n_z() * self.n_x() }

    #[inline] pub fn x_centre(&self, x: usize) -> Length { self.x0 + (x as Length + 0.5) * self.delta_xz }
    #[inline] pub fn z_centre(&self, z: usize) -> Length { self.z0 + (z as Length + 0.5) * self.delta_xz }
    #[inline] pub fn y_centre(&self, y: usize) -> Length { self.y0 + (y as Length + 0.5) * self.delta_xy }

    /// Whether the voxel line contributes to convergence statistics: its
    /// centre must project inside a detector of half-width `r_half_width` and
    /// lie within the z-extent of the ROI.
    pub fn in_roi(&self, Line { z, x }: Line, r_half_width: Length) -> bool {
        self.x_centre(x).abs() <= r_half_width &&
        self.z_centre(z).abs() <= self.roi_length_z / 2.0
    }

    pub fn zeros(&self) -> Volume { Volume::zeros(self.n) }

    pub fn constant(&self, value: Real) -> Volume { Volume::from_elem(self.n, value) }

    /// Check that an externally supplied volume matches this grid
    pub fn check(&self, volume: &Volume) -> Result<()> {
        if volume.shape() != self.n {
            return Err(MbirError::ShapeMismatch {
                what: "initial volume",
                expected: self.n.to_vec(),
                found: volume.shape().to_vec(),
            });
        }
        Ok(())
    }
}
