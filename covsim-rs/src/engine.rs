use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, error};

use crate::error::{Error, Result};

/// The external simulation engine.
///
/// An implementation reads the input document at `input_path` and leaves its
/// results at `output_path` before returning. The output location is part of
/// the input document itself, so a real engine only ever receives the input
/// path.
pub trait Engine {
    fn invoke(&self, input_path: &Path, output_path: &Path) -> Result<()>;
}

impl<E: Engine + ?Sized> Engine for &E {
    fn invoke(&self, input_path: &Path, output_path: &Path) -> Result<()> {
        (**self).invoke(input_path, output_path)
    }
}

impl<E: Engine + ?Sized> Engine for Box<E> {
    fn invoke(&self, input_path: &Path, output_path: &Path) -> Result<()> {
        (**self).invoke(input_path, output_path)
    }
}

/// Runs the engine executable as a blocking child process:
/// `<program> <input_path>`.
#[derive(Debug, Clone)]
pub struct ProcessEngine {
    program: PathBuf,
}

impl ProcessEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Engine for ProcessEngine {
    fn invoke(&self, input_path: &Path, _output_path: &Path) -> Result<()> {
        debug!(
            program = %self.program.display(),
            input = %input_path.display(),
            "launching engine"
        );
        let status = Command::new(&self.program)
            .arg(input_path)
            .status()
            .map_err(|source| Error::EngineLaunch {
                program: self.program.clone(),
                source,
            })?;
        if !status.success() {
            error!(program = %self.program.display(), %status, "engine failed");
            return Err(Error::EngineFailed {
                program: self.program.clone(),
                status,
            });
        }
        Ok(())
    }
}
