// ----------------------------------- CLI -----------------------------------
#[derive(clap::Parser, Debug, Clone)]
#[clap(name = "mbir-phantom", about = "Forward-project a box phantom into a synthetic tilt series")]
pub struct Cli {

    /// TOML file whose [geometry] and [detector] sections describe the scan
    pub config: PathBuf,

    /// Output sinogram: raw little-endian f32, laid out [view][r][t]
    #[clap(short, long, default_value = "phantom-sino.raw")]
    pub out: PathBuf,

    /// Also write the phantom volume here
    #[clap(long)]
    pub volume: Option<PathBuf>,

    /// Fraction of each volume extent covered by the box
    #[clap(short, long, default_value = "0.5")]
    pub fraction: Real,

    /// Value of voxels inside the box
    #[clap(long, default_value = "1.0")]
    pub value: Real,

    /// Standard deviation of additive Gaussian noise
    #[clap(short, long, default_value = "0.0")]
    pub sigma: Real,

    /// Relative spread of per-view gains (their geometric mean stays 1)
    #[clap(long, default_value = "0.0")]
    pub gain_jitter: Real,

    /// Offset added to every measurement
    #[clap(long, default_value = "0.0")]
    pub offset: Real,

    #[clap(long, default_value = "1")]
    pub seed: u64,
}

// --------------------------------------------------------------------------------

/// A centred box covering `fraction` of every extent
fn box_phantom(geometry: &Geometry, fraction: Real, value: Real) -> Volume {
    let inside = |i: usize, n: usize| {
        let centre = (n as Real - 1.0) / 2.0;
        (i as Real - centre).abs() <= fraction * n as Real / 2.0
    };
    let [n_z, n_x, n_y] = geometry.n;
    Volume::from_shape_fn(geometry.n, |(z, x, y)| {
        if inside(z, n_z) && inside(x, n_x) && inside(y, n_y) { value } else { 0.0 }
    })
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Cli::parse();
    let mut progress = Progress::new();

    let config = read_config_file(&args.config)?;
    let geometry = config.geometry()?;
    let detector = config.detector()?;
    let mut rng = StdRng::seed_from_u64(args.seed);

    progress.start("Building system matrix");
    let matrix = SystemMatrix::build(&geometry, &detector, config.solver.kernel);
    progress.done();

    let phantom = box_phantom(&geometry, args.fraction, args.value);
    let log_gains: Vec<Real> = (0..detector.n_views())
        .map(|_| args.gain_jitter * rng.gen_range(-1.0..=1.0))
        .collect();
    let mean = log_gains.iter().sum::<Real>() / log_gains.len().max(1) as Real;
    let gain: Vec<Real> = log_gains.iter().map(|g| (g - mean).exp()).collect();
    let offset = vec![args.offset; detector.n_views()];

    progress.start("Projecting phantom");
    let projection = forward_project(&matrix, &detector, &phantom, &vec![1.0; detector.n_views()]);
    let mut counts = predicted_sinogram(&projection, &gain, &offset);
    if args.sigma > 0.0 {
        let noise = Normal::new(0.0, args.sigma)?;
        counts.mapv_inplace(|c| (c + noise.sample(&mut rng)).max(0.0));
    }
    progress.done();
    info!("Projected {} non-zero voxels onto {:?} detector bins",
          group_digits(phantom.iter().filter(|&&v| v != 0.0).count()), detector.shape());

    if let Some(dir) = args.out.parent() { create_dir_all(dir)?; }
    io::write_reals(&counts, &args.out)?;
    if let Some(path) = &args.volume {
        io::write_reals(&phantom, path)?;
    }
    info!("Per-view gains: {gain:.4?}");
    Ok(())
}

// ----- Imports ------------------------------------------------------------------------------------------
use std::error::Error;
use std::fs::create_dir_all;
use std::path::PathBuf;

use clap::Parser;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use tracing::info;
use tracing_subscriber::EnvFilter;

use mbir::{
    config::read_config_file,
    geometry::{Geometry, Volume},
    io,
    projector::{forward_project, predicted_sinogram},
    system_matrix::SystemMatrix,
    types::Real,
    utils::{group_digits, timing::Progress},
};
