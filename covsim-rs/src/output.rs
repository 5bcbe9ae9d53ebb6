//! Engine output files.
//!
//! In `Simulate` mode the engine writes a JSON array with one entry per
//! (region, run) pair. In `FindContactProbability` mode it writes a single
//! object of parallel `days`/`probabilities`/`stdevs` arrays.

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use chrono::NaiveDate;
use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::aggregate::SimulationResult;
use crate::dates::{date_from_day_index, day_index};
use crate::error::{Error, Result};
use crate::input::RunMode;

/// Cumulative counters for one simulated day of one run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawStepRecord {
    /// Days since [`crate::dates::EPOCH`].
    pub day: i64,
    pub total_infections: i64,
    #[serde(default)]
    pub total_vaccinated: i64,
    #[serde(default)]
    pub never_infected: i64,
    #[serde(default)]
    pub total_delta_infections: i64,
    #[serde(default)]
    pub total_alpha_infections: i64,
    #[serde(default)]
    pub reinfections: i64,
    #[serde(default)]
    pub vaccinated_infections: i64,
    #[serde(default)]
    pub vaccine_saves: i64,
    #[serde(default)]
    pub natural_saves: i64,
    #[serde(default)]
    pub virus_carriers: i64,
    #[serde(default)]
    pub population_infectiousness: f64,
}

/// One run of one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRegionRun {
    pub name: String,
    pub results: Vec<RawStepRecord>,
}

/// Contact probability fitted by the engine for each calibration day.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContactSearchResult {
    pub days: Vec<NaiveDate>,
    pub probabilities: Vec<f64>,
    pub stdevs: Vec<f64>,
}

impl ContactSearchResult {
    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn push(&mut self, day: NaiveDate, probability: f64, stdev: f64) {
        self.days.push(day);
        self.probabilities.push(probability);
        self.stdevs.push(stdev);
    }

    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, f64, f64)> + '_ {
        self.days
            .iter()
            .zip(&self.probabilities)
            .zip(&self.stdevs)
            .map(|((d, p), s)| (*d, *p, *s))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RawContactSearch {
    days: Vec<i64>,
    probabilities: Vec<f64>,
    stdevs: Vec<f64>,
}

impl TryFrom<RawContactSearch> for ContactSearchResult {
    type Error = String;

    fn try_from(raw: RawContactSearch) -> std::result::Result<Self, String> {
        if raw.days.len() != raw.probabilities.len() || raw.days.len() != raw.stdevs.len() {
            return Err(format!(
                "mismatched lengths: {} days, {} probabilities, {} stdevs",
                raw.days.len(),
                raw.probabilities.len(),
                raw.stdevs.len()
            ));
        }
        let days = raw
            .days
            .iter()
            .map(|&d| date_from_day_index(d).ok_or_else(|| format!("day {d} out of range")))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self {
            days,
            probabilities: raw.probabilities,
            stdevs: raw.stdevs,
        })
    }
}

impl From<&ContactSearchResult> for RawContactSearch {
    fn from(result: &ContactSearchResult) -> Self {
        Self {
            days: result.days.iter().map(|d| day_index(*d)).collect(),
            probabilities: result.probabilities.clone(),
            stdevs: result.stdevs.clone(),
        }
    }
}

/// Renders a contact search in the engine's wire format.
pub fn contact_search_to_wire(result: &ContactSearchResult) -> serde_json::Result<Value> {
    serde_json::to_value(RawContactSearch::from(result))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineOutput {
    Simulation(SimulationResult),
    ContactSearch(ContactSearchResult),
}

impl EngineOutput {
    pub fn mode(&self) -> RunMode {
        match self {
            EngineOutput::Simulation(_) => RunMode::Simulate,
            EngineOutput::ContactSearch(_) => RunMode::FindContactProbability,
        }
    }
}

/// Reads and parses the output file left by a finished engine run.
pub fn read_output(path: &Path, mode: RunMode, run_time: Duration) -> Result<EngineOutput> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(Error::MissingOutput {
                path: path.to_path_buf(),
            });
        }
        Err(e) => return Err(Error::io(path, e)),
    };
    parse_output(&raw, mode, run_time).map_err(|e| match e {
        ParseFailure::Shape => Error::UnexpectedOutput { expected: mode },
        ParseFailure::Json(source) => Error::MalformedOutput {
            path: path.to_path_buf(),
            source,
        },
    })
}

enum ParseFailure {
    Shape,
    Json(serde_json::Error),
}

fn parse_output(
    raw: &str,
    mode: RunMode,
    run_time: Duration,
) -> std::result::Result<EngineOutput, ParseFailure> {
    let value: Value = serde_json::from_str(raw).map_err(ParseFailure::Json)?;
    match (mode, &value) {
        (RunMode::Simulate, Value::Array(_)) => {
            let runs: Vec<RawRegionRun> =
                serde_json::from_value(value).map_err(ParseFailure::Json)?;
            SimulationResult::from_raw_runs(runs, run_time)
                .map(EngineOutput::Simulation)
                .map_err(|msg| ParseFailure::Json(serde_json::Error::custom(msg)))
        }
        (RunMode::FindContactProbability, Value::Object(_)) => {
            let search: RawContactSearch =
                serde_json::from_value(value).map_err(ParseFailure::Json)?;
            ContactSearchResult::try_from(search)
                .map(EngineOutput::ContactSearch)
                .map_err(|msg| ParseFailure::Json(serde_json::Error::custom(msg)))
        }
        (_, Value::Array(_) | Value::Object(_)) => Err(ParseFailure::Shape),
        _ => Err(ParseFailure::Json(serde_json::Error::custom(
            "expected a JSON array or object",
        ))),
    }
}
