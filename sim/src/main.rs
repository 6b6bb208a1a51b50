//! BIP SIM: replay tool for the phase-indexed ensemble estimator.
//!
//! Demonstration traces are loaded from a directory and an ensemble of eight is built from them.
//! Held-out traces are then fed through the estimator one record at a time, as if they were live
//! sensor data, and the per-tick predictions are written to CSV next to the observed values.
//!
//! - `replay`: replay one trace, or every trace in a directory, and write `<stem>_prediction.csv`
//! - `trajectory`: write the mean trajectory of the demonstrations over a phase interval
//! - `config`: write a template estimator configuration (TOML or JSON)
//!
//! Estimator settings come from `--config <file>` when given, otherwise from the defaults.

mod common;
mod replay;

use clap::{Args, Parser, Subcommand};
use common::{
    ensure_dir, ensure_parent, get_trace_files, init_logger, prediction_path, validate_input_path,
};
use log::{error, info, warn};
use rayon::prelude::*;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use bip::demonstration::DemonstrationStore;
use bip::{ENSEMBLE_SIZE, EstimatorConfig, PhaseEstimator};
use replay::{ReplayOptions, process_file};

const LONG_ABOUT: &str = "BIP SIM: replay tool for the phase-indexed ensemble estimator.

Demonstration traces (files named <prefix>*, 'trace' by default) are loaded from a directory and
the first eight form the ensemble. Observed traces are replayed through the estimator one record
at a time and the predicted ball and robot positions are written to CSV.

Estimator parameters (noise ranges, sensor rate, trace prefix, seed) are read from the file given
with --config (TOML or JSON), or taken from the defaults. Use the 'config' subcommand to write a
template.";

/// Command line arguments
#[derive(Parser)]
#[command(author, version, about = "Replay tool for the phase-indexed ensemble estimator.", long_about = LONG_ABOUT)]
struct Cli {
    /// Estimator configuration file (TOML/JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Override the random seed of the configuration
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Override the initial weight spread of the configuration (0 keeps every weight at 1)
    #[arg(long, global = true)]
    weight_spread: Option<f64>,

    /// Replay traces in parallel when processing a directory
    #[arg(long, global = true)]
    parallel: bool,
}

/// Top-level commands
#[derive(Subcommand, Clone)]
enum Command {
    #[command(
        name = "replay",
        about = "Replay observed traces through the estimator",
        long_about = "Replay observed traces through the estimator. Each record of an observed trace is turned into a sensor reading, optionally corrupted with uniform or Gaussian noise, and fed to a fresh estimator built from the demonstrations. Predictions are written to <output>/<stem>_prediction.csv. The ensemble weights only adapt when they start apart: with the default initial_weight_spread of 0 every weight stays at 1 and the prediction is the plain mean of the demonstrations at the estimated phase. Set initial_weight_spread in the configuration, or pass --weight-spread, to let the correction move them."
    )]
    Replay(ReplayArgs),
    #[command(
        name = "trajectory",
        about = "Write the mean trajectory of the demonstrations",
        long_about = "Sample the mean of the demonstrations, under the seeded ensemble weights (all 1 unless a weight spread is configured), at evenly spaced phases and write the curve to CSV. Phases where no demonstration holds a ball position are left empty."
    )]
    Trajectory(TrajectoryArgs),
    #[command(name = "config", about = "Generate a template configuration file")]
    CreateConfig(CreateConfigArgs),
}

/// Arguments for replaying observed traces
#[derive(Args, Clone, Debug)]
struct ReplayArgs {
    /// Directory holding the demonstration traces
    #[arg(short, long, value_parser, default_value = ".")]
    traces: PathBuf,

    /// Observed trace file, or a directory of traces to replay
    #[arg(short, long, value_parser)]
    input: PathBuf,

    /// Output directory for the prediction files
    #[arg(short, long, value_parser)]
    output: PathBuf,

    /// Width of the uniform integer noise added to every observed coordinate
    #[arg(long, default_value_t = 0)]
    sensor_noise: u32,

    /// Standard deviation of the Gaussian noise added to every observed coordinate
    #[arg(long, default_value_t = 0.0)]
    sensor_noise_std: f64,

    /// Drive the estimator from a frame clock at the configured sensor rate
    #[arg(long)]
    tick_clock: bool,

    /// Frame length of the clock in nanoseconds (with --tick-clock)
    #[arg(long, default_value_t = 4_000_000)]
    frame_ns: u64,
}

/// Arguments for exporting the mean trajectory
#[derive(Args, Clone, Debug)]
struct TrajectoryArgs {
    /// Directory holding the demonstration traces
    #[arg(short, long, value_parser, default_value = ".")]
    traces: PathBuf,

    /// Output CSV file
    #[arg(short, long, value_parser)]
    output: PathBuf,

    /// Number of phase samples
    #[arg(long, default_value_t = 100)]
    samples: usize,

    /// First phase of the interval
    #[arg(long, default_value_t = 0.0)]
    start: f64,

    /// End of the phase interval (exclusive)
    #[arg(long, default_value_t = 1.0)]
    end: f64,
}

#[derive(Args, Clone, Debug)]
struct CreateConfigArgs {
    /// Output file path for the config file
    /// File extension determines format: .json or .toml
    #[arg(short, long, value_parser, default_value = "bip.toml")]
    output: PathBuf,
}

/// Resolve the estimator configuration from `--config`, `--seed` and `--weight-spread`.
fn load_config(
    path: Option<&PathBuf>,
    seed: Option<u64>,
    weight_spread: Option<f64>,
) -> Result<EstimatorConfig, Box<dyn Error>> {
    let mut config = match path {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            EstimatorConfig::from_file(path)?
        }
        None => EstimatorConfig::default(),
    };
    if let Some(seed) = seed {
        config.seed = seed;
    }
    if let Some(spread) = weight_spread {
        config.initial_weight_spread = spread;
    }
    config.validate()?;
    Ok(config)
}

fn load_store(traces: &Path, config: &EstimatorConfig) -> Result<DemonstrationStore, Box<dyn Error>> {
    validate_input_path(traces)?;
    let store = DemonstrationStore::from_directory(traces, &config.trace_prefix, ENSEMBLE_SIZE)?;
    if let Some(stats) = store.phase_stats() {
        info!(
            "Demonstration phase velocity: mean {:.5}, variance {:.3e}",
            stats.mean_velocity, stats.velocity_variance
        );
    }
    Ok(store)
}

/// Replay one observed trace or a directory of them
fn run_replay(
    args: &ReplayArgs,
    config: &EstimatorConfig,
    parallel: bool,
) -> Result<(), Box<dyn Error>> {
    let store = load_store(&args.traces, config)?;
    validate_input_path(&args.input)?;
    ensure_dir(&args.output)?;

    let options = ReplayOptions {
        sensor_noise: args.sensor_noise,
        sensor_noise_std: args.sensor_noise_std,
        tick_clock: args.tick_clock.then_some(args.frame_ns),
    };

    let trace_files = get_trace_files(&args.input, &config.trace_prefix)?;
    let is_multiple = trace_files.len() > 1;
    if is_multiple {
        info!("Replaying {} traces from directory", trace_files.len());
        if parallel {
            info!("Running in parallel mode");
        }
    }

    let replay_one = |input_file: &PathBuf| -> Result<(), Box<dyn Error>> {
        let output_file = prediction_path(input_file, &args.output)?;
        process_file(input_file, &output_file, &store, config, &options)
    };

    if parallel && is_multiple {
        let errors = Mutex::new(Vec::new());

        trace_files.par_iter().for_each(|input_file| {
            if let Err(e) = replay_one(input_file) {
                error!("Error processing {}: {}", input_file.display(), e);
                errors
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .push((input_file.clone(), e.to_string()));
            }
        });

        let errors = errors
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !errors.is_empty() {
            error!("{} file(s) failed to process", errors.len());
            for (file, err) in &errors {
                error!("  {}: {}", file.display(), err);
            }
            return Err(format!("{} file(s) failed to process", errors.len()).into());
        }
    } else {
        let mut failures = 0usize;
        for input_file in &trace_files {
            if let Err(e) = replay_one(input_file) {
                if !is_multiple {
                    return Err(e);
                }
                failures += 1;
                error!("Error processing {}: {}", input_file.display(), e);
            }
        }
        if failures > 0 {
            error!("{} file(s) failed to process", failures);
        }
    }
    Ok(())
}

fn run_trajectory(args: &TrajectoryArgs, config: &EstimatorConfig) -> Result<(), Box<dyn Error>> {
    let store = load_store(&args.traces, config)?;
    let estimator = PhaseEstimator::new(&store, config.clone())?;
    let curve = estimator.mean_trajectory(args.start, args.end, args.samples);
    let missing = curve.len() - curve.valid_count();
    if missing > 0 {
        warn!(
            "{} of {} phases have no ball position in any demonstration",
            missing,
            curve.len()
        );
    }
    ensure_parent(&args.output)?;
    curve.to_csv(&args.output)?;
    info!(
        "Mean trajectory ({} samples) written to {}",
        curve.len(),
        args.output.display()
    );
    Ok(())
}

fn create_config_file(args: &CreateConfigArgs) -> Result<(), Box<dyn Error>> {
    EstimatorConfig::default().to_file(&args.output)?;
    println!("Template configuration written to {}", args.output.display());
    println!("\nYou can now replay traces with:");
    println!(
        "  bip-sim --config {} replay -t <traces> -i <observed> -o <output>",
        args.output.display()
    );
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logger(&cli.log_level, cli.log_file.as_ref())?;

    match cli.command {
        Some(Command::Replay(args)) => {
            let config = load_config(cli.config.as_ref(), cli.seed, cli.weight_spread)?;
            info!(
                "Replaying {} against demonstrations in {}",
                args.input.display(),
                args.traces.display()
            );
            run_replay(&args, &config, cli.parallel)
        }
        Some(Command::Trajectory(args)) => {
            let config = load_config(cli.config.as_ref(), cli.seed, cli.weight_spread)?;
            run_trajectory(&args, &config)
        }
        Some(Command::CreateConfig(args)) => create_config_file(&args),
        None => {
            eprintln!("Error: No command provided. Use -h or --help for usage information.");
            std::process::exit(1);
        }
    }
}
