pub type Real   = f64;
pub type Length = Real;
pub type Weight = Real;
pub type Angle  = Real;

pub type Index1 = usize;
/// Voxel position as `[z, x, y]`
pub type Index3 = [usize; 3];
/// Grid extent as `[n_z, n_x, n_y]`
pub type BoxDim = [usize; 3];

/// Samples across the (double) width of the trapezoidal voxel profile
pub const PROFILE_RESOLUTION: usize = 1536;

/// Samples across the width of the beam-blur kernel
pub const BEAM_RESOLUTION: usize = 512;

/// Number of tabulated offsets in each detector response table
pub const DETECTOR_RESPONSE_BINS: usize = 64;

pub const TWOPI: Real = std::f64::consts::TAU;
