use std::collections::BTreeMap;

use chrono::{Days, NaiveDate};
use covsim::InputSpecification;
use covsim::input::InfectionEstimate;

/// Reproduction number at a contact probability of one.
pub const BASE_R0: f64 = 2.0;
pub const DEFAULT_GENERATION_INTERVAL: [f64; 5] = [0., 0., 0.25, 0.5, 0.25];
/// Seed incidence when the region has no infection history before the window.
pub const DEFAULT_SEED_INFECTIONS: u64 = 10;
pub const BASE_SEED: u64 = 8675309;

#[derive(Debug, Clone)]
pub struct Parameters {
    pub population: Population,
    pub r0: f64,
    pub generation_interval_pmf: Vec<f64>,
    /// Daily incidence immediately before the first simulated day, oldest first.
    pub seed_incidence: Vec<u64>,
    /// Cumulative infections before the first simulated day.
    pub prior_infections: u64,
    pub sim_length: usize,
    pub seed: u64,
}

#[derive(Debug, Clone, Copy)]
pub enum Population {
    Finite(u64),
    Infinite,
}

impl Parameters {
    /// Parameters for one run of the target region over `first..=last`, in
    /// units of `population_scale` people.
    pub fn for_window(
        spec: &InputSpecification,
        first: NaiveDate,
        last: NaiveDate,
        contact_probability: f64,
        seed: u64,
    ) -> Parameters {
        let scale = u64::from(spec.population_scale.max(1));
        let generation_interval_pmf = generation_interval(spec);
        let history = spec.infected_history.get(&spec.region);

        let prior_infections = history
            .and_then(|h| last_known(h, first))
            .map_or(0, |e| e.total_infections / scale);
        let seed_incidence = history
            .map(|h| seed_incidence(h, first, generation_interval_pmf.len(), scale))
            .filter(|s| s.iter().any(|&n| n > 0))
            .unwrap_or_else(|| vec![DEFAULT_SEED_INFECTIONS]);

        let population = match spec.region_info.get(&spec.region) {
            Some(info) if info.population > 0 => Population::Finite(info.population / scale),
            _ => Population::Infinite,
        };

        Parameters {
            population,
            r0: BASE_R0 * contact_probability,
            generation_interval_pmf,
            seed_incidence,
            prior_infections,
            sim_length: (last - first).num_days().max(0) as usize + 1,
            seed,
        }
    }
}

/// Normalized infectivity curve of the dominant variant, or the default.
fn generation_interval(spec: &InputSpecification) -> Vec<f64> {
    let infectivity = &spec.world_properties.delta.infectivity.values;
    let total: f64 = infectivity.iter().sum();
    if total > 0.0 {
        infectivity.iter().map(|v| v / total).collect()
    } else {
        DEFAULT_GENERATION_INTERVAL.to_vec()
    }
}

fn last_known(
    history: &BTreeMap<NaiveDate, InfectionEstimate>,
    before: NaiveDate,
) -> Option<&InfectionEstimate> {
    history.range(..before).next_back().map(|(_, e)| e)
}

fn seed_incidence(
    history: &BTreeMap<NaiveDate, InfectionEstimate>,
    first: NaiveDate,
    days: usize,
    scale: u64,
) -> Vec<u64> {
    let Some(start) = first.checked_sub_days(Days::new(days as u64 + 1)) else {
        return Vec::new();
    };
    let totals: Vec<u64> = start
        .iter_days()
        .take(days + 1)
        .map(|day| {
            last_known(history, day.succ_opt().unwrap_or(day)).map_or(0, |e| e.total_infections)
        })
        .collect();
    totals
        .windows(2)
        .map(|w| w[1].saturating_sub(w[0]) / scale)
        .collect()
}

#[cfg(test)]
mod test {
    use covsim::Config;
    use covsim::input::RegionInfo;

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn estimate(total: u64) -> InfectionEstimate {
        InfectionEstimate {
            total_infections: total,
            total_cases: 0,
        }
    }

    #[test]
    fn test_defaults_without_history() {
        let spec = InputSpecification::builder(
            &Config::default(),
            "VT",
            date(2021, 1, 1),
            date(2021, 1, 31),
        )
        .contact_probability(1.5)
        .build()
        .unwrap();
        let p = Parameters::for_window(&spec, date(2020, 12, 31), date(2021, 1, 31), 1.5, 1);
        assert!(matches!(p.population, Population::Infinite));
        assert_eq!(p.r0, 3.0);
        assert_eq!(p.sim_length, 32);
        assert_eq!(p.seed_incidence, vec![DEFAULT_SEED_INFECTIONS]);
        assert_eq!(p.prior_infections, 0);
        assert_eq!(p.generation_interval_pmf, DEFAULT_GENERATION_INTERVAL.to_vec());
    }

    #[test]
    fn test_history_seeds_window() {
        let mut history = BTreeMap::new();
        for (i, day) in date(2021, 1, 1).iter_days().take(10).enumerate() {
            history.insert(day, estimate(1000 + 100 * i as u64));
        }
        let spec = InputSpecification::builder(
            &Config::default(),
            "VT",
            date(2021, 1, 10),
            date(2021, 1, 20),
        )
        .population_scale(10)
        .region_info("VT", RegionInfo {
            population: 600_000,
            adjacent: vec![],
        })
        .infected_history("VT", history)
        .build()
        .unwrap();
        let p = Parameters::for_window(&spec, date(2021, 1, 9), date(2021, 1, 20), 1.0, 1);
        assert!(matches!(p.population, Population::Finite(60_000)));
        // Cumulative total known on Jan 8, in units of ten people.
        assert_eq!(p.prior_infections, 170);
        assert_eq!(p.seed_incidence, vec![10; 5]);
    }
}
