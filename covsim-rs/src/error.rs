use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

use crate::input::RunMode;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The input specification was rejected before any engine run.
    #[error("invalid input specification: {0}")]
    InvalidSpecification(String),

    #[error("failed to launch engine {}: {source}", program.display())]
    EngineLaunch {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("engine {} exited with {status}", program.display())]
    EngineFailed { program: PathBuf, status: ExitStatus },

    #[error("engine produced no output at {}", path.display())]
    MissingOutput { path: PathBuf },

    #[error("malformed engine output at {}: {source}", path.display())]
    MalformedOutput {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("engine output does not match the requested {expected:?} mode")]
    UnexpectedOutput { expected: RunMode },

    #[error("region {0} is not present in the simulation result")]
    UnknownRegion(String),

    #[error("no simulated day of {region} overlaps the observations")]
    NoObservationOverlap { region: String },

    #[error(
        "no bracket around zero error after {rounds} rounds (lower = {lower}, upper = {upper})"
    )]
    Unbracketed { lower: f64, upper: f64, rounds: usize },

    #[error("invalid config {}: {source}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("i/o error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidSpecification(message.into())
    }

    /// True for failures of a single engine invocation: the engine could not
    /// be started, exited unsuccessfully, or left no usable output behind.
    pub fn is_invocation_failure(&self) -> bool {
        matches!(
            self,
            Self::EngineLaunch { .. }
                | Self::EngineFailed { .. }
                | Self::MissingOutput { .. }
                | Self::MalformedOutput { .. }
                | Self::UnexpectedOutput { .. }
        )
    }
}
