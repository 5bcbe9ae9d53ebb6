//! Drives an external epidemic simulation engine through a file-based
//! contract, caches its results by content hash, summarizes stochastic runs
//! into statistical bands, and calibrates the contact probability against
//! observed infections.
//!
//! ```no_run
//! use covsim::{Config, InputSpecification, Metric, Simulator};
//!
//! # fn main() -> covsim::Result<()> {
//! let config = Config::default().with_cache_dir("/var/cache/covsim");
//! let simulator = Simulator::from_config(&config)?;
//! let start = chrono::NaiveDate::from_ymd_opt(2021, 6, 1).unwrap();
//! let end = chrono::NaiveDate::from_ymd_opt(2021, 9, 1).unwrap();
//! let spec = InputSpecification::builder(&config, "PA", start, end)
//!     .run_count(20)
//!     .build()?;
//! let run = simulator.simulate(&spec)?;
//! let band = run.result.band("PA", Metric::NewInfections, None, None)?;
//! # let _ = band;
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod cache;
pub mod calibrate;
pub mod canonical;
pub mod config;
pub mod dates;
pub mod dynamics;
pub mod engine;
pub mod error;
pub mod input;
pub mod output;
pub mod report;
pub mod simulator;

pub use aggregate::{
    BandPoint, Metric, RegionSummary, SimulationResult, StatisticalBand, StepRecord,
};
pub use cache::ResultCache;
pub use calibrate::{
    Calibration, CalibrationSettings, CalibrationStatus, Calibrator, ErrorEstimate, Objective,
    SimulationObjective,
};
pub use canonical::{CacheKey, CanonicalInput};
pub use config::Config;
pub use engine::{Engine, ProcessEngine};
pub use error::{Error, Result};
pub use input::{InputSpecification, RunMode};
pub use output::{ContactSearchResult, EngineOutput};
pub use report::Report;
pub use simulator::{Execution, SimulationRun, Simulator};

/// Installs a `tracing` subscriber that honors `RUST_LOG` and defaults to
/// `info`.
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
