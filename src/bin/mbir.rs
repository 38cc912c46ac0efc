// ----------------------------------- CLI -----------------------------------
#[derive(clap::Parser, Debug, Clone)]
#[clap(name = "mbir", about = "Model-based iterative reconstruction of tilt series")]
pub struct Cli {

    /// TOML reconstruction parameters
    pub config: PathBuf,

    /// Measured sinogram: raw little-endian f32, laid out [view][r][t]
    pub sinogram: PathBuf,

    /// Directory where the results are written
    #[clap(short, long, default_value = "mbir-out")]
    pub out: PathBuf,

    /// Maximum number of rayon threads; also the number of ICD workers
    #[clap(short = 'j', long)]
    pub threads: Option<usize>,

    /// Start from this volume, on the coarsest grid, instead of the
    /// configured initial value
    #[clap(long)]
    pub initial: Option<PathBuf>,

    /// Initial per-view gains (one f32 per view)
    #[clap(long, requires = "offset")]
    pub gain: Option<PathBuf>,

    /// Initial per-view offsets (one f32 per view)
    #[clap(long, requires = "gain")]
    pub offset: Option<PathBuf>,

    /// Do not show a progress bar
    #[clap(short, long)]
    pub quiet: bool,
}

// --------------------------------------------------------------------------------

struct Bar(ProgressBar);

impl Observer for Bar {
    fn progress(&self, percent: Real, message: &str) {
        self.0.set_position(percent.round() as u64);
        self.0.set_message(message.to_string());
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Cli::parse();
    let mut progress = Progress::new();

    // Before starting the potentially long computation, make sure that we can
    // write the result to the requested destination.
    create_dir_all(&args.out)?;

    progress.start("Reading configuration and sinogram");
    let config = read_config_file(&args.config)?;
    let mut params = config.params();
    if args.threads.is_some() { params.solver.threads = args.threads; }
    let geometry = config.geometry()?;
    let detector = config.detector()?;
    let sinogram = io::read_sinogram(&args.sinogram, &detector)?;
    let kept = kept_views(detector.n_views(), &config.detector.exclude_views)?;
    if kept.len() < detector.n_views() {
        info!("Excluding views {:?}", config.detector.exclude_views);
    }
    let sinogram = sinogram.select_views(&kept);
    progress.done();

    if let Some(n) = params.solver.threads {
        // Set the maximum number of threads used by rayon for parallel iteration
        match rayon::ThreadPoolBuilder::new().num_threads(n).build_global() {
            Err(e) => warn!("{e}"),
            Ok(_)  => info!("Using up to {n} threads."),
        }
    }

    let mut ladder = Ladder::new(params, geometry, sinogram)?;
    if let Some(path) = &args.initial {
        let coarsest = ladder.geometries()[0];
        ladder = ladder.with_initial_volume(io::read_volume(path, &coarsest)?)?;
    }
    if let (Some(gain), Some(offset)) = (&args.gain, &args.offset) {
        let gain   = io::read_per_view("gains"  , gain  , &detector)?;
        let offset = io::read_per_view("offsets", offset, &detector)?;
        let select = |all: Vec<Real>| -> Vec<Real> { kept.iter().map(|&v| all[v]).collect() };
        ladder = ladder.with_nuisance(Nuisance::new(select(gain), select(offset))?)?;
    }

    let bar = if args.quiet { ProgressBar::hidden() } else { ProgressBar::new(100) };
    bar.set_style(ProgressStyle::default_bar()
                  .template("[{elapsed_precise}] {wide_bar} {pos}% {msg}")?);
    let cancel = AtomicBool::new(false);
    let outcome = ladder.run(&Bar(bar.clone()), &cancel)?;
    bar.finish_and_clear();

    for anomaly in &outcome.anomalies {
        warn!("{anomaly:?}");
    }
    info!("{:?} after {} outer iterations ({} sweeps) on a {:?} grid",
          outcome.status, outcome.iterations, outcome.sweeps, outcome.volume.shape());

    progress.start("Writing results");
    let write = |name: &str, data: &[Real]| io::write_reals(data, &args.out.join(name));
    io::write_reals(&outcome.volume   , &args.out.join("volume.raw"   ))?;
    io::write_reals(&outcome.predicted, &args.out.join("predicted.raw"))?;
    io::write_reals(&outcome.weights  , &args.out.join("weights.raw"  ))?;
    write("gain.raw"  , &outcome.gain  )?;
    write("offset.raw", &outcome.offset)?;
    io::write_cost_log(&outcome.cost_history, &args.out.join("cost.txt"))?;
    progress.done_with_message(&format!("Wrote results to {}", args.out.display()));

    match outcome.status {
        Status::Converged | Status::MaxIterations => Ok(()),
        status => Err(format!("reconstruction ended early: {status:?}").into()),
    }
}

// ----- Imports ------------------------------------------------------------------------------------------
use std::error::Error;
use std::fs::create_dir_all;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mbir::{
    config::read_config_file,
    io,
    nuisance::Nuisance,
    sinogram::kept_views,
    types::Real,
    utils::timing::Progress,
    Ladder, Observer, Status,
};
