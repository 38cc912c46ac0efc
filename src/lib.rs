//! Model-based iterative reconstruction of electron tomography tilt series
//!
//! The volume is estimated by iterative coordinate descent (ICD) on a
//! penalized weighted least-squares cost, with optional joint estimation of
//! per-view gain and offset, optionally coarse to fine over several grid
//! resolutions.

pub mod types;
pub mod error;
pub mod index;
pub mod config;
pub mod geometry;
pub mod sinogram;
pub mod response;
pub mod system_matrix;
pub mod projector;
pub mod prior;
pub mod rootfind;
pub mod icd;
pub mod nhicd;
pub mod cost;
pub mod noise;
pub mod nuisance;
pub mod driver;
pub mod multires;
pub mod io;
pub mod utils;

pub use driver::{Anomaly, NullObserver, Observer, Outcome, Reconstructor, Stage, Status};
pub use error::{MbirError, Result};
pub use multires::Ladder;
