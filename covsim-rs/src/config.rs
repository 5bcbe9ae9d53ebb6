use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Locations shared by every engine invocation.
///
/// Nothing in the crate reads these from the environment; callers load a
/// `Config` once and hand it to the components that need it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub engine_path: PathBuf,
    pub input_file: PathBuf,
    pub output_file: PathBuf,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let scratch = std::env::temp_dir().join("covsim");
        Self {
            engine_path: PathBuf::from("covid-sim"),
            input_file: scratch.join("input_data.json"),
            output_file: scratch.join("output_data.json"),
            cache_dir: None,
        }
    }
}

impl Config {
    pub fn from_toml_str(raw: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_toml_str(&raw).map_err(|source| Error::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }
}
