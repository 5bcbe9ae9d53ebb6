pub mod output;
pub mod parameters;
pub mod renewal;
pub mod search;

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use covsim::output::contact_search_to_wire;
use covsim::{InputSpecification, RunMode};
use tracing::{error, info};

const DEFAULT_INPUT: &str = "/tmp/input_data.json";

fn main() -> ExitCode {
    covsim::init_logging();

    let input = std::env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from(DEFAULT_INPUT), PathBuf::from);
    match run(&input) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(input = %input.display(), "{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(input: &Path) -> Result<(), Box<dyn Error>> {
    let spec: InputSpecification = serde_json::from_str(&fs::read_to_string(input)?)?;
    info!(region = %spec.region, mode = ?spec.mode(), runs = spec.run_count, "starting");

    let data = match spec.mode() {
        RunMode::Simulate => serde_json::to_vec(&output::simulate_runs(&spec)?)?,
        RunMode::FindContactProbability => {
            let search = search::find_contact_probabilities(&spec)?;
            serde_json::to_vec(&contact_search_to_wire(&search)?)?
        }
    };
    fs::write(&spec.output_file, data)?;
    info!(output = %spec.output_file.display(), "done");
    Ok(())
}
