use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::aggregate::SimulationResult;
use crate::cache::ResultCache;
use crate::canonical::{CacheKey, CanonicalInput};
use crate::config::Config;
use crate::engine::{Engine, ProcessEngine};
use crate::error::{Error, Result};
use crate::input::{InputSpecification, RunMode};
use crate::output::{ContactSearchResult, EngineOutput, read_output};

/// Result of one pipeline request.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub key: CacheKey,
    pub output: EngineOutput,
    pub from_cache: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationRun {
    pub key: CacheKey,
    pub result: SimulationResult,
    pub from_cache: bool,
}

/// Canonicalize, look up, invoke on a miss, parse and store.
///
/// All invocations through one `Simulator` share the same input file, so
/// they are serialized; a request that waited re-checks the cache before
/// invoking the engine itself.
pub struct Simulator<E> {
    engine: E,
    input_file: PathBuf,
    cache: Option<ResultCache>,
    files: Mutex<()>,
}

impl Simulator<ProcessEngine> {
    pub fn from_config(config: &Config) -> Result<Self> {
        let simulator = Simulator::new(
            ProcessEngine::new(&config.engine_path),
            config.input_file.clone(),
        );
        match &config.cache_dir {
            Some(dir) => Ok(simulator.with_cache(ResultCache::open(dir)?)),
            None => Ok(simulator),
        }
    }
}

impl<E: Engine> Simulator<E> {
    pub fn new(engine: E, input_file: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            input_file: input_file.into(),
            cache: None,
            files: Mutex::new(()),
        }
    }

    pub fn with_cache(mut self, cache: ResultCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn cache(&self) -> Option<&ResultCache> {
        self.cache.as_ref()
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn simulate(&self, spec: &InputSpecification) -> Result<SimulationRun> {
        require_mode(spec, RunMode::Simulate)?;
        let execution = self.execute(spec)?;
        match execution.output {
            EngineOutput::Simulation(result) => Ok(SimulationRun {
                key: execution.key,
                result,
                from_cache: execution.from_cache,
            }),
            EngineOutput::ContactSearch(_) => Err(Error::UnexpectedOutput {
                expected: RunMode::Simulate,
            }),
        }
    }

    pub fn search_contact_probability(
        &self,
        spec: &InputSpecification,
    ) -> Result<ContactSearchResult> {
        require_mode(spec, RunMode::FindContactProbability)?;
        match self.execute(spec)?.output {
            EngineOutput::ContactSearch(search) => Ok(search),
            EngineOutput::Simulation(_) => Err(Error::UnexpectedOutput {
                expected: RunMode::FindContactProbability,
            }),
        }
    }

    pub fn execute(&self, spec: &InputSpecification) -> Result<Execution> {
        let canonical = CanonicalInput::new(spec)?;
        if let Some(output) = self.cached(&canonical) {
            return Ok(Execution {
                key: canonical.key().clone(),
                output,
                from_cache: true,
            });
        }

        let _files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(output) = self.cached(&canonical) {
            debug!(key = %canonical.key(), "computed while waiting");
            return Ok(Execution {
                key: canonical.key().clone(),
                output,
                from_cache: true,
            });
        }

        let output = self.invoke(&canonical, &spec.output_file)?;
        if let Some(cache) = &self.cache
            && let Err(e) = cache.store(canonical.key(), &output)
        {
            warn!(key = %canonical.key(), error = %e, "failed to store result in cache");
        }
        Ok(Execution {
            key: canonical.key().clone(),
            output,
            from_cache: false,
        })
    }

    fn cached(&self, canonical: &CanonicalInput) -> Option<EngineOutput> {
        let output = self.cache.as_ref()?.lookup(canonical.key())?;
        if output.mode() != canonical.mode() {
            warn!(key = %canonical.key(), "cache entry has the wrong mode, recomputing");
            return None;
        }
        Some(output)
    }

    fn invoke(&self, canonical: &CanonicalInput, output_file: &Path) -> Result<EngineOutput> {
        if let Some(parent) = self.input_file.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        fs::write(&self.input_file, canonical.text())
            .map_err(|e| Error::io(&self.input_file, e))?;
        match fs::remove_file(output_file) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io(output_file, e)),
        }

        info!(key = %canonical.key(), mode = ?canonical.mode(), "running engine");
        let started = Instant::now();
        self.engine.invoke(&self.input_file, output_file)?;
        let run_time = started.elapsed();
        info!(
            key = %canonical.key(),
            seconds = run_time.as_secs_f64(),
            "engine finished"
        );
        read_output(output_file, canonical.mode(), run_time)
    }
}

fn require_mode(spec: &InputSpecification, mode: RunMode) -> Result<()> {
    if spec.mode() != mode {
        return Err(Error::invalid(format!(
            "expected {mode:?} mode, got {:?}",
            spec.mode()
        )));
    }
    Ok(())
}
