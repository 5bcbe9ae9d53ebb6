//! Runs the simulation pipeline from the command line.
//!
//! Usage:
//!   `covsim simulate <spec.json> [--region R] [--output-dir DIR]`
//!   `covsim calibrate <spec.json> --observed observed.csv [--guess P] [--output-dir DIR]`
//!   `covsim key <spec.json>`

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use covsim::calibrate::CalibrationSettings;
use covsim::report::read_observations;
use covsim::{
    CanonicalInput, Calibrator, Config, Error, InputSpecification, Report, Result,
    SimulationObjective, Simulator,
};

#[derive(Parser, Debug)]
#[command(name = "covsim")]
#[command(about = "Cached runs and contact-probability calibration for the simulation engine")]
struct Cli {
    /// TOML file with engine and cache locations
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run (or fetch from cache) a simulation and write its statistical bands
    Simulate {
        spec: PathBuf,

        /// Region to summarize; defaults to the specification's target region
        #[arg(long)]
        region: Option<String>,

        /// Directory for `bands.csv`; stdout when omitted
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Fit the contact probability to observed daily new infections
    Calibrate {
        spec: PathBuf,

        /// CSV with `date,new_infections` columns
        #[arg(long)]
        observed: PathBuf,

        /// Center of the first bracket
        #[arg(long)]
        guess: Option<f64>,

        /// Directory for `calibration.json`; stdout when omitted
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Print the cache key of a specification
    Key { spec: PathBuf },
}

fn main() {
    covsim::init_logging();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        error!("{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    match cli.command {
        Command::Simulate {
            spec,
            region,
            output_dir,
        } => {
            let spec = load_spec(&spec)?;
            let simulator = Simulator::from_config(&config)?;
            let run = simulator.simulate(&spec)?;
            info!(
                key = %run.key,
                from_cache = run.from_cache,
                seconds = run.result.run_time.as_secs_f64(),
                "simulation ready"
            );
            let region = region.unwrap_or_else(|| spec.region.clone());
            let summary = run.result.summary(&region, None, None)?;
            Report::new(output_dir).write_summary("bands.csv", &summary)
        }
        Command::Calibrate {
            spec,
            observed,
            guess,
            output_dir,
        } => {
            let spec = load_spec(&spec)?;
            let file = fs::File::open(&observed).map_err(|e| Error::Io {
                path: observed.clone(),
                source: e,
            })?;
            let observed = read_observations(file)?;
            let simulator = Simulator::from_config(&config)?;
            let calibrator = Calibrator::new(CalibrationSettings {
                initial_guess: guess,
                ..CalibrationSettings::default()
            });
            let mut objective = SimulationObjective::new(&simulator, spec, observed);
            let calibration = calibrator.calibrate(&mut objective)?;
            info!(
                contact_probability = calibration.contact_probability,
                status = ?calibration.status,
                "calibration finished"
            );
            let mut json = serde_json::to_vec_pretty(&calibration)?;
            json.push(b'\n');
            Report::new(output_dir).write("calibration.json", &json)
        }
        Command::Key { spec } => {
            let canonical = CanonicalInput::new(&load_spec(&spec)?)?;
            println!("{}", canonical.key());
            Ok(())
        }
    }
}

fn load_spec(path: &Path) -> Result<InputSpecification> {
    let raw = fs::read_to_string(path).map_err(|e| Error::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(serde_json::from_str(&raw)?)
}
