use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::dates::date_from_day_index;
use crate::error::{Error, Result};
use crate::output::{RawRegionRun, RawStepRecord};

pub const UPPER_QUANTILE: f64 = 0.95;
pub const LOWER_QUANTILE: f64 = 0.05;

/// One day of one run, with day-over-day deltas against the previous day of
/// the same run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StepRecord {
    pub date: NaiveDate,
    pub total_infections: i64,
    pub total_vaccinated: i64,
    pub never_infected: i64,
    pub total_delta_infections: i64,
    pub total_alpha_infections: i64,
    pub reinfections: i64,
    pub vaccinated_infections: i64,
    pub vaccine_saves: i64,
    pub natural_saves: i64,
    pub virus_carriers: i64,
    pub population_infectiousness: f64,
    pub new_infections: i64,
    pub new_delta_infections: i64,
    pub new_alpha_infections: i64,
    pub new_reinfections: i64,
    pub new_natural_saves: i64,
    pub new_vaccine_saves: i64,
}

impl StepRecord {
    fn from_raw(raw: &RawStepRecord) -> Option<Self> {
        Some(Self {
            date: date_from_day_index(raw.day)?,
            total_infections: raw.total_infections,
            total_vaccinated: raw.total_vaccinated,
            never_infected: raw.never_infected,
            total_delta_infections: raw.total_delta_infections,
            total_alpha_infections: raw.total_alpha_infections,
            reinfections: raw.reinfections,
            vaccinated_infections: raw.vaccinated_infections,
            vaccine_saves: raw.vaccine_saves,
            natural_saves: raw.natural_saves,
            virus_carriers: raw.virus_carriers,
            population_infectiousness: raw.population_infectiousness,
            ..Default::default()
        })
    }

    fn set_differences(&mut self, previous: &StepRecord) {
        self.new_infections = self.total_infections - previous.total_infections;
        self.new_delta_infections = self.total_delta_infections - previous.total_delta_infections;
        self.new_alpha_infections = self.total_alpha_infections - previous.total_alpha_infections;
        self.new_reinfections = self.reinfections - previous.reinfections;
        self.new_natural_saves = self.natural_saves - previous.natural_saves;
        self.new_vaccine_saves = self.vaccine_saves - previous.vaccine_saves;
    }
}

/// Sorts a run by date, fills in deltas and drops the first record, which
/// only exists to seed the deltas of the start day. When a day is reported
/// more than once, the last report wins.
pub fn derive_run(raw: &[RawStepRecord]) -> std::result::Result<Vec<StepRecord>, String> {
    let mut parsed = raw
        .iter()
        .map(|r| StepRecord::from_raw(r).ok_or_else(|| format!("day {} out of range", r.day)))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    parsed.sort_by_key(|s| s.date);
    let mut steps: Vec<StepRecord> = Vec::with_capacity(parsed.len());
    for step in parsed {
        match steps.last_mut() {
            Some(last) if last.date == step.date => *last = step,
            _ => steps.push(step),
        }
    }
    for i in 1..steps.len() {
        let (before, after) = steps.split_at_mut(i);
        after[0].set_differences(&before[i - 1]);
    }
    if !steps.is_empty() {
        steps.remove(0);
    }
    Ok(steps)
}

/// Every run of every region from one engine invocation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SimulationResult {
    #[serde(with = "duration_secs")]
    pub run_time: Duration,
    pub regions: BTreeMap<String, Vec<Vec<StepRecord>>>,
}

impl SimulationResult {
    pub fn from_raw_runs(
        runs: Vec<RawRegionRun>,
        run_time: Duration,
    ) -> std::result::Result<Self, String> {
        let mut regions: BTreeMap<String, Vec<Vec<StepRecord>>> = BTreeMap::new();
        for run in runs {
            let steps = derive_run(&run.results)?;
            regions.entry(run.name).or_default().push(steps);
        }
        Ok(Self { run_time, regions })
    }

    pub fn runs(&self, region: &str) -> Result<&[Vec<StepRecord>]> {
        self.regions
            .get(region)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::UnknownRegion(region.to_string()))
    }

    pub fn band(
        &self,
        region: &str,
        metric: Metric,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<StatisticalBand> {
        self.band_by(region, |s| metric.value(s), start, end)
    }

    /// Mean and quantile bounds of `extract` across runs, one point per day
    /// inside `[start, end]` that at least one run reports.
    pub fn band_by<F>(
        &self,
        region: &str,
        extract: F,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<StatisticalBand>
    where
        F: Fn(&StepRecord) -> f64,
    {
        let mut by_day: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
        for run in self.runs(region)? {
            for step in run.iter().filter(|s| in_window(s.date, start, end)) {
                by_day.entry(step.date).or_default().push(extract(step));
            }
        }
        let mut band = StatisticalBand::default();
        for (date, samples) in by_day {
            band.push(date, summarize(samples));
        }
        Ok(band)
    }

    pub fn summary(
        &self,
        region: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<RegionSummary> {
        let dates: BTreeSet<NaiveDate> = self
            .runs(region)?
            .iter()
            .flatten()
            .map(|s| s.date)
            .filter(|d| in_window(*d, start, end))
            .collect();
        let mut bands = BTreeMap::new();
        for metric in Metric::ALL {
            bands.insert(metric, self.band(region, metric, start, end)?);
        }
        Ok(RegionSummary {
            dates: dates.into_iter().collect(),
            bands,
        })
    }
}

fn in_window(date: NaiveDate, start: Option<NaiveDate>, end: Option<NaiveDate>) -> bool {
    start.is_none_or(|s| date >= s) && end.is_none_or(|e| date <= e)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandPoint {
    pub mean: f64,
    pub upper: f64,
    pub lower: f64,
}

fn summarize(mut samples: Vec<f64>) -> BandPoint {
    samples.sort_by(f64::total_cmp);
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let (first, last) = (samples[0], samples[samples.len() - 1]);
    if first == last {
        return BandPoint {
            mean: first,
            upper: first,
            lower: first,
        };
    }
    BandPoint {
        mean,
        upper: quantile(&samples, UPPER_QUANTILE),
        lower: quantile(&samples, LOWER_QUANTILE),
    }
}

/// Linear-interpolated quantile of sorted, non-empty samples.
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    let position = q * (sorted.len() - 1) as f64;
    let lo = position.floor() as usize;
    let hi = position.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (position - lo as f64)
}

/// Per-day mean, upper and lower bounds of one metric across runs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatisticalBand {
    pub dates: Vec<NaiveDate>,
    pub mean: Vec<f64>,
    pub upper: Vec<f64>,
    pub lower: Vec<f64>,
}

impl StatisticalBand {
    fn push(&mut self, date: NaiveDate, point: BandPoint) {
        self.dates.push(date);
        self.mean.push(point.mean);
        self.upper.push(point.upper);
        self.lower.push(point.lower);
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn at(&self, date: NaiveDate) -> Option<BandPoint> {
        let i = self.dates.binary_search(&date).ok()?;
        Some(self.point(i))
    }

    fn point(&self, i: usize) -> BandPoint {
        BandPoint {
            mean: self.mean[i],
            upper: self.upper[i],
            lower: self.lower[i],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, BandPoint)> + '_ {
        self.dates.iter().enumerate().map(|(i, d)| (*d, self.point(i)))
    }

    pub fn scale(&self, factor: f64) -> Self {
        self.map(|p| BandPoint {
            mean: p.mean * factor,
            upper: p.upper * factor,
            lower: p.lower * factor,
        })
    }

    /// Element-wise product; `None` unless both bands cover the same days.
    pub fn mul(&self, other: &StatisticalBand) -> Option<Self> {
        self.zip_with(other, |a, b| a * b)
    }

    /// Element-wise ratio; `None` unless both bands cover the same days.
    pub fn div(&self, other: &StatisticalBand) -> Option<Self> {
        self.zip_with(other, |a, b| a / b)
    }

    fn map(&self, f: impl Fn(BandPoint) -> BandPoint) -> Self {
        let mut out = StatisticalBand::default();
        for (date, point) in self.iter() {
            out.push(date, f(point));
        }
        out
    }

    fn zip_with(&self, other: &StatisticalBand, f: impl Fn(f64, f64) -> f64) -> Option<Self> {
        if self.dates != other.dates {
            return None;
        }
        let mut out = StatisticalBand::default();
        for (i, date) in self.dates.iter().enumerate() {
            let (a, b) = (self.point(i), other.point(i));
            out.push(
                *date,
                BandPoint {
                    mean: f(a.mean, b.mean),
                    upper: f(a.upper, b.upper),
                    lower: f(a.lower, b.lower),
                },
            );
        }
        Some(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Metric {
    TotalInfections,
    NewInfections,
    TotalVaccinated,
    NeverInfected,
    TotalDeltaInfections,
    NewDeltaInfections,
    TotalAlphaInfections,
    NewAlphaInfections,
    Reinfections,
    NewReinfections,
    VaccineSaves,
    NewVaccineSaves,
    NaturalSaves,
    NewNaturalSaves,
    VaccinatedInfections,
    VirusCarriers,
    PopulationInfectiousness,
}

impl Metric {
    pub const ALL: [Metric; 17] = [
        Metric::TotalInfections,
        Metric::NewInfections,
        Metric::TotalVaccinated,
        Metric::NeverInfected,
        Metric::TotalDeltaInfections,
        Metric::NewDeltaInfections,
        Metric::TotalAlphaInfections,
        Metric::NewAlphaInfections,
        Metric::Reinfections,
        Metric::NewReinfections,
        Metric::VaccineSaves,
        Metric::NewVaccineSaves,
        Metric::NaturalSaves,
        Metric::NewNaturalSaves,
        Metric::VaccinatedInfections,
        Metric::VirusCarriers,
        Metric::PopulationInfectiousness,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Metric::TotalInfections => "total_infections",
            Metric::NewInfections => "new_infections",
            Metric::TotalVaccinated => "total_vaccinated",
            Metric::NeverInfected => "never_infected",
            Metric::TotalDeltaInfections => "total_delta_infections",
            Metric::NewDeltaInfections => "new_delta_infections",
            Metric::TotalAlphaInfections => "total_alpha_infections",
            Metric::NewAlphaInfections => "new_alpha_infections",
            Metric::Reinfections => "reinfections",
            Metric::NewReinfections => "new_reinfections",
            Metric::VaccineSaves => "vaccine_saves",
            Metric::NewVaccineSaves => "new_vaccine_saves",
            Metric::NaturalSaves => "natural_saves",
            Metric::NewNaturalSaves => "new_natural_saves",
            Metric::VaccinatedInfections => "vaccinated_infections",
            Metric::VirusCarriers => "virus_carriers",
            Metric::PopulationInfectiousness => "population_infectiousness",
        }
    }

    pub fn value(self, step: &StepRecord) -> f64 {
        match self {
            Metric::TotalInfections => step.total_infections as f64,
            Metric::NewInfections => step.new_infections as f64,
            Metric::TotalVaccinated => step.total_vaccinated as f64,
            Metric::NeverInfected => step.never_infected as f64,
            Metric::TotalDeltaInfections => step.total_delta_infections as f64,
            Metric::NewDeltaInfections => step.new_delta_infections as f64,
            Metric::TotalAlphaInfections => step.total_alpha_infections as f64,
            Metric::NewAlphaInfections => step.new_alpha_infections as f64,
            Metric::Reinfections => step.reinfections as f64,
            Metric::NewReinfections => step.new_reinfections as f64,
            Metric::VaccineSaves => step.vaccine_saves as f64,
            Metric::NewVaccineSaves => step.new_vaccine_saves as f64,
            Metric::NaturalSaves => step.natural_saves as f64,
            Metric::NewNaturalSaves => step.new_natural_saves as f64,
            Metric::VaccinatedInfections => step.vaccinated_infections as f64,
            Metric::VirusCarriers => step.virus_carriers as f64,
            Metric::PopulationInfectiousness => step.population_infectiousness,
        }
    }
}

/// Bands for every metric of one region.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionSummary {
    pub dates: Vec<NaiveDate>,
    pub bands: BTreeMap<Metric, StatisticalBand>,
}

impl RegionSummary {
    pub fn get(&self, metric: Metric) -> Option<&StatisticalBand> {
        self.bands.get(&metric)
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
