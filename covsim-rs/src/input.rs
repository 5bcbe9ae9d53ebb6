use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::NaiveDate;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

use crate::config::Config;
use crate::dynamics::WorldProperties;
use crate::error::{Error, Result};

/// What the engine should do with an input file.
///
/// Encoded on the wire as `1` and `2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RunMode {
    #[default]
    Simulate,
    FindContactProbability,
}

impl RunMode {
    pub fn code(self) -> u8 {
        match self {
            RunMode::Simulate => 1,
            RunMode::FindContactProbability => 2,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            1 => Some(RunMode::Simulate),
            2 => Some(RunMode::FindContactProbability),
            _ => None,
        }
    }
}

impl Serialize for RunMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for RunMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct ModeVisitor;

        impl Visitor<'_> for ModeVisitor {
            type Value = RunMode;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("run mode code 1 or 2")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<RunMode, E> {
                RunMode::from_code(v)
                    .ok_or_else(|| E::invalid_value(de::Unexpected::Unsigned(v), &self))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<RunMode, E> {
                u64::try_from(v)
                    .ok()
                    .and_then(RunMode::from_code)
                    .ok_or_else(|| E::invalid_value(de::Unexpected::Signed(v), &self))
            }
        }

        deserializer.deserialize_u64(ModeVisitor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunOptions {
    pub full_history: bool,
    pub expensive_stats: bool,
    pub mode: RunMode,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RegionInfo {
    pub population: u64,
    pub adjacent: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct KnownCases {
    pub total_known_cases: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct InfectionEstimate {
    pub total_infections: u64,
    pub total_cases: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VaccinationRecord {
    pub total_completed_vax: u64,
}

/// Share of sequenced cases per variant name on one date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantShare {
    pub date: NaiveDate,
    pub variants: BTreeMap<String, f64>,
}

/// Daily series keyed by region, then by date.
pub type RegionSeries<T> = BTreeMap<String, BTreeMap<NaiveDate, T>>;

/// Everything the engine needs for one request.
///
/// Field order here is the order of the canonical form. Maps are ordered so
/// that two equal specifications always serialize to the same bytes, and
/// absent historical series are empty maps rather than missing keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSpecification {
    pub output_file: PathBuf,
    #[serde(rename = "state")]
    pub region: String,
    pub world_properties: WorldProperties,
    pub start_day: NaiveDate,
    pub end_day: NaiveDate,
    pub contact_probability: f64,
    pub population_scale: u32,
    pub contact_day_interval: u32,
    pub run_count: u32,
    pub options: RunOptions,
    #[serde(default)]
    pub infected_history: RegionSeries<InfectionEstimate>,
    #[serde(default)]
    pub vax_history: RegionSeries<VaccinationRecord>,
    #[serde(default)]
    pub test_history: RegionSeries<KnownCases>,
    #[serde(rename = "state_info", default)]
    pub region_info: BTreeMap<String, RegionInfo>,
    #[serde(default)]
    pub variant_history: BTreeMap<String, Vec<VariantShare>>,
}

impl InputSpecification {
    pub fn builder(
        config: &Config,
        region: impl Into<String>,
        start_day: NaiveDate,
        end_day: NaiveDate,
    ) -> InputSpecificationBuilder {
        InputSpecificationBuilder {
            spec: InputSpecification {
                output_file: config.output_file.clone(),
                region: region.into(),
                world_properties: WorldProperties::default(),
                start_day,
                end_day,
                contact_probability: 1.0,
                population_scale: 10,
                contact_day_interval: 1,
                run_count: 1,
                options: RunOptions::default(),
                infected_history: BTreeMap::new(),
                vax_history: BTreeMap::new(),
                test_history: BTreeMap::new(),
                region_info: BTreeMap::new(),
                variant_history: BTreeMap::new(),
            },
        }
    }

    pub fn mode(&self) -> RunMode {
        self.options.mode
    }

    /// Copy of this specification at another contact probability.
    pub fn with_contact_probability(&self, contact_probability: f64) -> Self {
        Self {
            contact_probability,
            ..self.clone()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.start_day > self.end_day {
            return Err(Error::invalid(format!(
                "start day {} is after end day {}",
                self.start_day, self.end_day
            )));
        }
        if !self.contact_probability.is_finite() || self.contact_probability <= 0.0 {
            return Err(Error::invalid(format!(
                "contact probability must be positive, got {}",
                self.contact_probability
            )));
        }
        if self.run_count == 0 {
            return Err(Error::invalid("run count must be at least 1"));
        }
        if self.population_scale == 0 {
            return Err(Error::invalid("population scale must be at least 1"));
        }
        if self.contact_day_interval == 0 {
            return Err(Error::invalid("contact day interval must be at least 1"));
        }
        if !self.region_info.is_empty() && !self.region_info.contains_key(&self.region) {
            return Err(Error::invalid(format!(
                "region {} has no population entry",
                self.region
            )));
        }
        Ok(())
    }
}

pub struct InputSpecificationBuilder {
    spec: InputSpecification,
}

impl InputSpecificationBuilder {
    pub fn output_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.spec.output_file = path.into();
        self
    }

    pub fn world_properties(mut self, world: WorldProperties) -> Self {
        self.spec.world_properties = world;
        self
    }

    pub fn contact_probability(mut self, p: f64) -> Self {
        self.spec.contact_probability = p;
        self
    }

    pub fn population_scale(mut self, scale: u32) -> Self {
        self.spec.population_scale = scale;
        self
    }

    pub fn contact_day_interval(mut self, days: u32) -> Self {
        self.spec.contact_day_interval = days;
        self
    }

    pub fn run_count(mut self, runs: u32) -> Self {
        self.spec.run_count = runs;
        self
    }

    pub fn mode(mut self, mode: RunMode) -> Self {
        self.spec.options.mode = mode;
        self
    }

    pub fn full_history(mut self, enabled: bool) -> Self {
        self.spec.options.full_history = enabled;
        self
    }

    pub fn expensive_stats(mut self, enabled: bool) -> Self {
        self.spec.options.expensive_stats = enabled;
        self
    }

    pub fn region_info(mut self, region: impl Into<String>, info: RegionInfo) -> Self {
        self.spec.region_info.insert(region.into(), info);
        self
    }

    pub fn infected_history(
        mut self,
        region: impl Into<String>,
        series: BTreeMap<NaiveDate, InfectionEstimate>,
    ) -> Self {
        self.spec.infected_history.insert(region.into(), series);
        self
    }

    pub fn vax_history(
        mut self,
        region: impl Into<String>,
        series: BTreeMap<NaiveDate, VaccinationRecord>,
    ) -> Self {
        self.spec.vax_history.insert(region.into(), series);
        self
    }

    pub fn test_history(
        mut self,
        region: impl Into<String>,
        series: BTreeMap<NaiveDate, KnownCases>,
    ) -> Self {
        self.spec.test_history.insert(region.into(), series);
        self
    }

    pub fn variant_history(mut self, region: impl Into<String>, shares: Vec<VariantShare>) -> Self {
        self.spec.variant_history.insert(region.into(), shares);
        self
    }

    pub fn build(self) -> Result<InputSpecification> {
        self.spec.validate()?;
        Ok(self.spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn builder() -> InputSpecificationBuilder {
        InputSpecification::builder(&Config::default(), "FL", date(2021, 7, 14), date(2021, 11, 14))
    }

    #[test]
    fn test_builder_defaults() {
        let spec = builder().build().unwrap();
        assert_eq!(spec.region, "FL");
        assert_eq!(spec.run_count, 1);
        assert_eq!(spec.population_scale, 10);
        assert_eq!(spec.contact_day_interval, 1);
        assert_eq!(spec.mode(), RunMode::Simulate);
        assert_eq!(spec.output_file, Config::default().output_file);
    }

    #[test]
    fn test_inverted_dates_rejected() {
        let spec = InputSpecification::builder(
            &Config::default(),
            "FL",
            date(2021, 8, 1),
            date(2021, 7, 1),
        )
        .build();
        assert!(matches!(spec, Err(Error::InvalidSpecification(_))));
    }

    #[test]
    fn test_single_day_range_allowed() {
        let d = date(2020, 12, 1);
        let spec = InputSpecification::builder(&Config::default(), "CO", d, d).build();
        assert!(spec.is_ok());
    }

    #[test]
    fn test_non_positive_values_rejected() {
        assert!(builder().run_count(0).build().is_err());
        assert!(builder().contact_probability(0.0).build().is_err());
        assert!(builder().contact_probability(-1.5).build().is_err());
        assert!(builder().contact_probability(f64::NAN).build().is_err());
        assert!(builder().population_scale(0).build().is_err());
        assert!(builder().contact_day_interval(0).build().is_err());
    }

    #[test]
    fn test_region_must_be_in_region_table() {
        let info = RegionInfo {
            population: 5_000_000,
            adjacent: vec!["GA".into()],
        };
        assert!(builder().region_info("AL", info.clone()).build().is_err());
        assert!(builder().region_info("FL", info).build().is_ok());
    }

    #[test]
    fn test_mode_wire_codes() {
        assert_eq!(serde_json::to_value(RunMode::Simulate).unwrap(), json!(1));
        assert_eq!(
            serde_json::from_value::<RunMode>(json!(2)).unwrap(),
            RunMode::FindContactProbability
        );
        assert!(serde_json::from_value::<RunMode>(json!(3)).is_err());
    }

    #[test]
    fn test_wire_field_names() {
        let spec = builder()
            .vax_history(
                "FL",
                BTreeMap::from([(date(2021, 7, 1), VaccinationRecord { total_completed_vax: 7 })]),
            )
            .build()
            .unwrap();
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["state"], json!("FL"));
        assert_eq!(value["start_day"], json!("2021-07-14"));
        assert_eq!(value["options"]["mode"], json!(1));
        assert_eq!(value["vax_history"]["FL"]["2021-07-01"]["total_completed_vax"], json!(7));
        assert_eq!(value["test_history"], json!({}));
        assert_eq!(value["state_info"], json!({}));
    }

    #[test]
    fn test_with_contact_probability_copies() {
        let spec = builder().contact_probability(1.5).build().unwrap();
        let moved = spec.with_contact_probability(2.0);
        assert_eq!(spec.contact_probability, 1.5);
        assert_eq!(moved.contact_probability, 2.0);
        assert_eq!(moved.region, spec.region);
    }
}
