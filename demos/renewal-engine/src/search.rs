use std::collections::BTreeMap;

use chrono::{Days, NaiveDate};
use covsim::InputSpecification;
use covsim::input::InfectionEstimate;
use covsim::output::ContactSearchResult;
use nalgebra::{DMatrix, DVector};
use tracing::{debug, warn};

use crate::parameters::{BASE_SEED, Parameters};
use crate::renewal::RenewalModel;

/// Contact probabilities tried for every calibration day.
pub const PROBABILITY_GRID: [f64; 9] = [0.5, 0.75, 1.0, 1.25, 1.5, 1.75, 2.0, 2.25, 2.5];
pub const MIN_PROBABILITY: f64 = 1e-4;

/// Straight-line fit `error = intercept + slope * probability`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineFit {
    pub intercept: f64,
    pub slope: f64,
    pub residual_std: f64,
}

impl LineFit {
    pub fn least_squares(points: &[(f64, f64)]) -> Option<LineFit> {
        if points.len() < 3 {
            return None;
        }
        let x = DMatrix::from_fn(points.len(), 2, |i, j| if j == 0 { 1.0 } else { points[i].0 });
        let y = DVector::from_iterator(points.len(), points.iter().map(|p| p.1));
        let beta = x.clone().svd(true, true).solve(&y, 1e-12).ok()?;
        let residuals = &y - &x * &beta;
        let dof = (points.len() - 2) as f64;
        Some(LineFit {
            intercept: beta[0],
            slope: beta[1],
            residual_std: (residuals.norm_squared() / dof).sqrt(),
        })
    }

    pub fn root(&self) -> Option<f64> {
        (self.slope.abs() > 1e-9).then(|| -self.intercept / self.slope)
    }
}

/// For each calibration day, sweeps the probability grid over a window of
/// `contact_day_interval` days and fits where simulated minus observed daily
/// infections crosses zero. Days without observations are skipped.
pub fn find_contact_probabilities(
    spec: &InputSpecification,
) -> Result<ContactSearchResult, String> {
    let history = spec
        .infected_history
        .get(&spec.region)
        .ok_or_else(|| format!("no infection history for {}", spec.region))?;
    let interval = u64::from(spec.contact_day_interval.max(1));

    let mut search = ContactSearchResult::default();
    let mut day = spec.start_day;
    while day <= spec.end_day {
        let last = day
            .checked_add_days(Days::new(interval - 1))
            .map_or(spec.end_day, |d| d.min(spec.end_day));
        match observed_daily_mean(history, day, last) {
            Some(observed) => {
                let fit = fit_day(spec, day, last, observed)?;
                match fit.root() {
                    Some(root) => {
                        let probability = root.max(MIN_PROBABILITY);
                        let stdev = (fit.residual_std / fit.slope).abs();
                        debug!(%day, probability, stdev, "fitted contact probability");
                        search.push(day, probability, stdev);
                    }
                    None => warn!(%day, "error does not depend on contact probability, skipping"),
                }
            }
            None => warn!(%day, "no observations in window, skipping"),
        }
        match last.checked_add_days(Days::new(1)) {
            Some(next) => day = next,
            None => break,
        }
    }
    Ok(search)
}

fn fit_day(
    spec: &InputSpecification,
    first: NaiveDate,
    last: NaiveDate,
    observed: f64,
) -> Result<LineFit, String> {
    let predecessor = first
        .checked_sub_days(Days::new(1))
        .ok_or_else(|| format!("day {first} has no predecessor"))?;
    let mut points = Vec::new();
    for probability in PROBABILITY_GRID {
        for run in 0..u64::from(spec.run_count) {
            let parameters =
                Parameters::for_window(spec, predecessor, last, probability, BASE_SEED + run);
            let output = RenewalModel::simulate(&parameters);
            let scale = f64::from(spec.population_scale.max(1));
            let days = output.infection_incidence.len().saturating_sub(1).max(1) as f64;
            let simulated: u64 = output.infection_incidence.iter().skip(1).sum();
            points.push((probability, simulated as f64 * scale / days - observed));
        }
    }
    LineFit::least_squares(&points).ok_or_else(|| format!("cannot fit error line for {first}"))
}

fn observed_daily_mean(
    history: &BTreeMap<NaiveDate, InfectionEstimate>,
    first: NaiveDate,
    last: NaiveDate,
) -> Option<f64> {
    let before = history.get(&first.checked_sub_days(Days::new(1))?)?;
    let end = history.get(&last)?;
    let days = (last - first).num_days() + 1;
    Some((end.total_infections as f64 - before.total_infections as f64) / days as f64)
}

#[cfg(test)]
mod test {
    use covsim::Config;

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_least_squares_exact_line() {
        let points: Vec<(f64, f64)> = [0.5, 1.0, 1.5, 2.0]
            .iter()
            .map(|&p| (p, 40.0 * p - 60.0))
            .collect();
        let fit = LineFit::least_squares(&points).unwrap();
        assert!((fit.slope - 40.0).abs() < 1e-9);
        assert!((fit.intercept + 60.0).abs() < 1e-9);
        assert!(fit.residual_std < 1e-9);
        assert!((fit.root().unwrap() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_flat_line_has_no_root() {
        let points = [(0.5, 3.0), (1.0, 3.0), (1.5, 3.0)];
        assert_eq!(LineFit::least_squares(&points).unwrap().root(), None);
        assert_eq!(LineFit::least_squares(&points[..2]), None);
    }

    #[test]
    fn test_search_one_result_per_interval() {
        // Steady 100 new infections a day.
        let history: BTreeMap<NaiveDate, InfectionEstimate> = date(2021, 2, 1)
            .iter_days()
            .take(40)
            .enumerate()
            .map(|(i, day)| {
                (
                    day,
                    InfectionEstimate {
                        total_infections: 10_000 + 100 * i as u64,
                        total_cases: 0,
                    },
                )
            })
            .collect();
        let spec = InputSpecification::builder(
            &Config::default(),
            "NM",
            date(2021, 2, 20),
            date(2021, 3, 1),
        )
        .contact_day_interval(5)
        .run_count(4)
        .infected_history("NM", history)
        .build()
        .unwrap();

        let search = find_contact_probabilities(&spec).unwrap();
        assert_eq!(search.days, vec![date(2021, 2, 20), date(2021, 2, 25)]);
        for (_, probability, stdev) in search.iter() {
            // Flat incidence means a reproduction number near one.
            assert!(probability > 0.2 && probability < 1.0, "{probability}");
            assert!(stdev.is_finite());
        }
    }

    #[test]
    fn test_search_requires_history() {
        let spec = InputSpecification::builder(
            &Config::default(),
            "NM",
            date(2021, 2, 20),
            date(2021, 3, 1),
        )
        .build()
        .unwrap();
        assert!(find_contact_probabilities(&spec).is_err());
    }
}
