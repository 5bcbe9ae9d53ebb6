use chrono::{Days, NaiveDate};
use covsim::InputSpecification;
use covsim::dates::day_index;
use covsim::output::{RawRegionRun, RawStepRecord};

use crate::parameters::{BASE_SEED, Parameters, Population};
use crate::renewal::RenewalModel;

#[derive(Default)]
pub struct RenewalOutput {
    pub infection_incidence: Vec<u64>,
    pub cumulative_infections: Vec<u64>,
    pub infectiousness: Vec<f64>,
}

impl RenewalOutput {
    pub fn new(len: usize) -> RenewalOutput {
        RenewalOutput {
            infection_incidence: vec![0; len],
            cumulative_infections: vec![0; len],
            infectiousness: vec![0.; len],
        }
    }
}

/// Runs `run_count` simulations of the target region from the day before
/// `start_day` through `end_day`.
pub fn simulate_runs(spec: &InputSpecification) -> Result<Vec<RawRegionRun>, String> {
    let first = spec
        .start_day
        .checked_sub_days(Days::new(1))
        .ok_or_else(|| format!("start day {} has no predecessor", spec.start_day))?;
    let runs = (0..u64::from(spec.run_count))
        .map(|run| {
            let parameters = Parameters::for_window(
                spec,
                first,
                spec.end_day,
                spec.contact_probability,
                BASE_SEED + run,
            );
            let output = RenewalModel::simulate(&parameters);
            region_run(spec, first, &parameters, &output)
        })
        .collect();
    Ok(runs)
}

/// Converts one simulation into the engine's per-day cumulative records,
/// scaled back to people.
pub fn region_run(
    spec: &InputSpecification,
    first: NaiveDate,
    parameters: &Parameters,
    output: &RenewalOutput,
) -> RawRegionRun {
    let scale = i64::from(spec.population_scale.max(1));
    let carrier_window = parameters.generation_interval_pmf.len();
    let vaccinations = spec.vax_history.get(&spec.region);
    let first_day = day_index(first);

    let results = (0..parameters.sim_length)
        .map(|step| {
            let date = first + Days::new(step as u64);
            let total = output.cumulative_infections[step] as i64;
            let window_start = (step + 1).saturating_sub(carrier_window.max(1));
            let carriers: u64 = output.infection_incidence[window_start..=step].iter().sum();
            let (never_infected, infectiousness) = match parameters.population {
                Population::Finite(n) => (
                    (n as i64 - total) * scale,
                    output.infectiousness[step] / n.max(1) as f64,
                ),
                Population::Infinite => (0, output.infectiousness[step]),
            };
            RawStepRecord {
                day: first_day + step as i64,
                total_infections: total * scale,
                total_vaccinated: vaccinations
                    .and_then(|v| v.range(..=date).next_back())
                    .map_or(0, |(_, r)| r.total_completed_vax as i64),
                never_infected,
                virus_carriers: carriers as i64 * scale,
                population_infectiousness: infectiousness,
                ..Default::default()
            }
        })
        .collect();

    RawRegionRun {
        name: spec.region.clone(),
        results,
    }
}

#[cfg(test)]
mod test {
    use covsim::{Config, SimulationResult};

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_runs_cover_window_with_predecessor() {
        let spec = InputSpecification::builder(
            &Config::default(),
            "OH",
            date(2021, 5, 1),
            date(2021, 5, 14),
        )
        .run_count(3)
        .population_scale(5)
        .build()
        .unwrap();
        let runs = simulate_runs(&spec).unwrap();
        assert_eq!(runs.len(), 3);
        for run in &runs {
            assert_eq!(run.name, "OH");
            assert_eq!(run.results.len(), 15);
            assert_eq!(run.results[0].day, day_index(date(2021, 4, 30)));
            assert!(run.results.windows(2).all(|w| w[0].total_infections <= w[1].total_infections));
            assert!(run.results.iter().all(|r| r.total_infections % 5 == 0));
        }

        // The host side reads the records back as fourteen days of deltas.
        let result = SimulationResult::from_raw_runs(runs, Default::default()).unwrap();
        assert_eq!(result.runs("OH").unwrap()[0].len(), 14);
    }

    #[test]
    fn test_runs_are_reproducible() {
        let spec = InputSpecification::builder(
            &Config::default(),
            "OH",
            date(2021, 5, 1),
            date(2021, 5, 7),
        )
        .run_count(2)
        .build()
        .unwrap();
        assert_eq!(simulate_runs(&spec).unwrap(), simulate_runs(&spec).unwrap());
    }
}
