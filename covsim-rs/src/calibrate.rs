//! Contact-probability calibration.
//!
//! Each evaluation of a candidate contact probability is a full Monte-Carlo
//! run, so the error against the observations is a distribution rather than
//! a number. The search first brackets zero error, then repeatedly
//! interpolates the tightest bracket and samples on both sides of the
//! estimate, stopping once zero lies inside one standard deviation of both
//! samples.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::aggregate::StepRecord;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::input::{InfectionEstimate, InputSpecification};
use crate::output::ContactSearchResult;
use crate::simulator::Simulator;

/// Fraction of the remaining span between the estimate and each side of the
/// bracket at which the next candidates are placed.
pub const DEFAULT_STEP_FRACTION: f64 = 0.3;
/// Interpolation rounds before giving up and returning the last estimate.
pub const DEFAULT_MAX_ROUNDS: usize = 10;
pub const DEFAULT_MAX_BRACKET_ROUNDS: usize = 32;
pub const DEFAULT_LOWER_BOUND: f64 = 0.25;
pub const DEFAULT_UPPER_BOUND: f64 = 2.0;
/// Half width of the first bracket when an initial guess is supplied.
pub const DEFAULT_GUESS_HALF_WIDTH: f64 = 0.5;
pub const MIN_CONTACT_PROBABILITY: f64 = 1e-4;

/// Normal approximation of the simulated-minus-observed error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ErrorEstimate {
    pub mean: f64,
    pub std_dev: f64,
}

impl ErrorEstimate {
    /// Maximum-likelihood normal fit (population standard deviation).
    pub fn fit(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        Some(Self {
            mean,
            std_dev: variance.sqrt(),
        })
    }
}

/// Something that can be measured at a candidate contact probability.
pub trait Objective {
    fn evaluate(&mut self, contact_probability: f64) -> Result<ErrorEstimate>;
}

impl<F> Objective for F
where
    F: FnMut(f64) -> Result<ErrorEstimate>,
{
    fn evaluate(&mut self, contact_probability: f64) -> Result<ErrorEstimate> {
        self(contact_probability)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Evaluation {
    pub contact_probability: f64,
    pub error: ErrorEstimate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationStatus {
    /// Zero error lies within one standard deviation of both final samples.
    Converged,
    /// The round budget ran out; the estimate is approximate.
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Calibration {
    pub contact_probability: f64,
    /// Sample noise divided by the local slope of the error curve.
    pub uncertainty: f64,
    pub status: CalibrationStatus,
    /// Interpolation rounds used.
    pub rounds: usize,
    /// Every evaluation made, bracketing included, in order.
    pub history: Vec<Evaluation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationSettings {
    pub initial_guess: Option<f64>,
    pub step_fraction: f64,
    pub max_rounds: usize,
    pub max_bracket_rounds: usize,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub guess_half_width: f64,
    pub min_contact_probability: f64,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            initial_guess: None,
            step_fraction: DEFAULT_STEP_FRACTION,
            max_rounds: DEFAULT_MAX_ROUNDS,
            max_bracket_rounds: DEFAULT_MAX_BRACKET_ROUNDS,
            lower_bound: DEFAULT_LOWER_BOUND,
            upper_bound: DEFAULT_UPPER_BOUND,
            guess_half_width: DEFAULT_GUESS_HALF_WIDTH,
            min_contact_probability: MIN_CONTACT_PROBABILITY,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Calibrator {
    settings: CalibrationSettings,
}

struct Candidates {
    guess: f64,
    lower: f64,
    upper: f64,
}

impl Calibrator {
    pub fn new(settings: CalibrationSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &CalibrationSettings {
        &self.settings
    }

    pub fn calibrate<O: Objective + ?Sized>(&self, objective: &mut O) -> Result<Calibration> {
        let mut history = Vec::new();
        self.bracket(objective, &mut history)?;

        let s = &self.settings;
        let mut rounds = 0;
        let mut last = None;
        while rounds < s.max_rounds {
            let next = self.next_candidates(&history);
            let upper = measure(objective, next.upper, &mut history)?;
            let lower = measure(objective, next.lower, &mut history)?;
            rounds += 1;
            debug!(
                round = rounds,
                guess = next.guess,
                lower = next.lower,
                lower_error = lower.error.mean,
                upper = next.upper,
                upper_error = upper.error.mean,
                "interpolation round"
            );

            let uncertainty = uncertainty(&lower, &upper);
            if lower.error.mean + lower.error.std_dev > 0.0
                && upper.error.mean - upper.error.std_dev < 0.0
            {
                info!(
                    contact_probability = next.guess,
                    rounds, "calibration converged"
                );
                return Ok(Calibration {
                    contact_probability: next.guess,
                    uncertainty,
                    status: CalibrationStatus::Converged,
                    rounds,
                    history,
                });
            }
            last = Some((next.guess, uncertainty));
        }

        let (guess, uncertainty) =
            last.unwrap_or_else(|| (self.next_candidates(&history).guess, f64::NAN));
        warn!(
            contact_probability = guess,
            rounds, "calibration exhausted its round budget"
        );
        Ok(Calibration {
            contact_probability: guess,
            uncertainty,
            status: CalibrationStatus::Exhausted,
            rounds,
            history,
        })
    }

    /// Calibrates each day in turn, seeding every search with the previous
    /// day's estimate.
    pub fn calibrate_series<I, F, O>(
        &self,
        days: I,
        mut objective_for_day: F,
    ) -> Result<ContactSearchResult>
    where
        I: IntoIterator<Item = NaiveDate>,
        F: FnMut(NaiveDate) -> Result<O>,
        O: Objective,
    {
        let mut search = ContactSearchResult::default();
        let mut settings = self.settings.clone();
        for day in days {
            let mut objective = objective_for_day(day)?;
            let calibration = Calibrator::new(settings.clone()).calibrate(&mut objective)?;
            search.push(day, calibration.contact_probability, calibration.uncertainty);
            settings.initial_guess = Some(calibration.contact_probability);
        }
        Ok(search)
    }

    /// Widens the starting bounds until the upper error is non-negative and
    /// the lower error is negative.
    fn bracket<O: Objective + ?Sized>(
        &self,
        objective: &mut O,
        history: &mut Vec<Evaluation>,
    ) -> Result<()> {
        let s = &self.settings;
        let floor = s.min_contact_probability;
        let (mut lower, mut upper) = match s.initial_guess {
            Some(guess) => (guess - s.guess_half_width, guess + s.guess_half_width),
            None => (s.lower_bound, s.upper_bound),
        };
        lower = lower.max(floor);
        upper = upper.max(lower * 2.0);

        let mut upper_eval = measure(objective, upper, history)?;
        let mut lower_eval = measure(objective, lower, history)?;
        let mut rounds = 0;
        loop {
            if upper_eval.error.mean < 0.0 {
                upper *= 2.0;
                upper_eval = measure(objective, upper, history)?;
            } else if lower_eval.error.mean >= 0.0 && lower > floor {
                lower = (lower * 0.5).max(floor);
                lower_eval = measure(objective, lower, history)?;
            } else if lower_eval.error.mean >= 0.0 {
                return Err(Error::Unbracketed {
                    lower,
                    upper,
                    rounds,
                });
            } else {
                debug!(lower, upper, "bracket found");
                return Ok(());
            }
            rounds += 1;
            if rounds > s.max_bracket_rounds {
                return Err(Error::Unbracketed {
                    lower,
                    upper,
                    rounds,
                });
            }
        }
    }

    /// Linear interpolation between the smallest non-negative and the largest
    /// negative error seen so far.
    fn next_candidates(&self, history: &[Evaluation]) -> Candidates {
        let above = history
            .iter()
            .filter(|e| e.error.mean >= 0.0)
            .min_by(|a, b| a.error.mean.total_cmp(&b.error.mean));
        let below = history
            .iter()
            .filter(|e| e.error.mean < 0.0)
            .max_by(|a, b| a.error.mean.total_cmp(&b.error.mean));
        let (Some(above), Some(below)) = (above, below) else {
            // Unreachable once bracketing succeeded.
            let p = history.last().map_or(1.0, |e| e.contact_probability);
            return Candidates {
                guess: p,
                lower: p,
                upper: p,
            };
        };

        let f = -below.error.mean / (above.error.mean - below.error.mean);
        let guess =
            below.contact_probability + f * (above.contact_probability - below.contact_probability);
        let step = self.settings.step_fraction;
        let floor = self.settings.min_contact_probability;
        Candidates {
            guess,
            upper: (guess + (above.contact_probability - guess) * step).max(floor),
            lower: (guess - (guess - below.contact_probability) * step).max(floor),
        }
    }
}

fn measure<O: Objective + ?Sized>(
    objective: &mut O,
    contact_probability: f64,
    history: &mut Vec<Evaluation>,
) -> Result<Evaluation> {
    let error = objective.evaluate(contact_probability)?;
    let evaluation = Evaluation {
        contact_probability,
        error,
    };
    history.push(evaluation);
    Ok(evaluation)
}

fn uncertainty(lower: &Evaluation, upper: &Evaluation) -> f64 {
    let slope = (upper.error.mean - lower.error.mean)
        / (upper.contact_probability - lower.contact_probability);
    let noise = 0.5 * (upper.error.std_dev + lower.error.std_dev);
    (noise / slope).abs()
}

/// Daily new infections to match, derived from cumulative estimates.
pub fn observed_new_infections(
    estimates: &BTreeMap<NaiveDate, InfectionEstimate>,
    start: NaiveDate,
    days: u32,
) -> BTreeMap<NaiveDate, f64> {
    start
        .iter_days()
        .take(days as usize)
        .filter_map(|day| {
            let today = estimates.get(&day)?;
            let yesterday = estimates.get(&day.pred_opt()?)?;
            let new = today.total_infections as f64 - yesterday.total_infections as f64;
            Some((day, new))
        })
        .collect()
}

/// Runs the full pipeline at each candidate and compares simulated daily new
/// infections of the target region with `observed`.
///
/// Each run contributes one sample: its mean daily error over the observed
/// days it covers.
pub struct SimulationObjective<'a, E> {
    simulator: &'a Simulator<E>,
    spec: InputSpecification,
    observed: BTreeMap<NaiveDate, f64>,
}

impl<'a, E: Engine> SimulationObjective<'a, E> {
    pub fn new(
        simulator: &'a Simulator<E>,
        spec: InputSpecification,
        observed: BTreeMap<NaiveDate, f64>,
    ) -> Self {
        Self {
            simulator,
            spec,
            observed,
        }
    }

    fn run_error(&self, run: &[StepRecord]) -> Option<f64> {
        let errors: Vec<f64> = run
            .iter()
            .filter_map(|step| {
                let expected = self.observed.get(&step.date)?;
                Some(step.new_infections as f64 - expected)
            })
            .collect();
        if errors.is_empty() {
            return None;
        }
        Some(errors.iter().sum::<f64>() / errors.len() as f64)
    }
}

impl<E: Engine> Objective for SimulationObjective<'_, E> {
    fn evaluate(&mut self, contact_probability: f64) -> Result<ErrorEstimate> {
        let spec = self.spec.with_contact_probability(contact_probability);
        let run = self.simulator.simulate(&spec)?;
        let errors: Vec<f64> = run
            .result
            .runs(&spec.region)?
            .iter()
            .filter_map(|r| self.run_error(r))
            .collect();
        ErrorEstimate::fit(&errors).ok_or(Error::NoObservationOverlap {
            region: spec.region,
        })
    }
}
