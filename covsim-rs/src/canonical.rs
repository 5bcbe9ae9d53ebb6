use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::input::{InputSpecification, RunMode};

/// Hex SHA-256 digest of a canonical input, used as the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Accepts only 64 lowercase hex digits.
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = raw.len() == 64
            && raw
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(raw.to_string()))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A frozen snapshot of an input specification: the exact text handed to the
/// engine together with its key. Changing the source specification afterwards
/// does not touch the snapshot; derive a new one instead.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalInput {
    text: String,
    mode: RunMode,
    key: CacheKey,
}

impl CanonicalInput {
    pub fn new(spec: &InputSpecification) -> Result<Self> {
        spec.validate()?;
        let text = serde_json::to_string_pretty(spec)?;
        let mode = spec.mode();
        let key = derive_key(&text, mode);
        Ok(Self { text, mode, key })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

fn derive_key(text: &str, mode: RunMode) -> CacheKey {
    let mut hasher = Sha256::new();
    hasher.update([mode.code()]);
    hasher.update(text.as_bytes());
    CacheKey(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::NaiveDate;

    use super::*;
    use crate::config::Config;
    use crate::dynamics::{DiscreteFunction, VariantProperties, WorldProperties};
    use crate::input::{InfectionEstimate, RegionInfo, VariantShare};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn world() -> WorldProperties {
        let variant = VariantProperties {
            incubation: vec![0.0, 0.1, 0.5, 1.0],
            infectivity: DiscreteFunction::new(-2, vec![0.0, 0.4, 0.6, 0.0]),
            vax_immunity: DiscreteFunction::new(0, vec![0.9; 5]),
            natural_immunity: DiscreteFunction::new(0, vec![1.0; 5]),
        };
        WorldProperties {
            alpha: variant.clone(),
            delta: VariantProperties {
                infectivity: variant.infectivity.scale_y(2.0),
                ..variant
            },
        }
    }

    fn base() -> InputSpecification {
        InputSpecification::builder(&Config::default(), "FL", date(2021, 7, 14), date(2021, 8, 14))
            .world_properties(world())
            .contact_probability(1.5)
            .run_count(10)
            .region_info(
                "FL",
                RegionInfo {
                    population: 21_000_000,
                    adjacent: vec!["AL".into(), "GA".into()],
                },
            )
            .region_info(
                "GA",
                RegionInfo {
                    population: 10_000_000,
                    adjacent: vec!["FL".into()],
                },
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_insertion_order_does_not_matter() {
        let a = base();
        let b = InputSpecification::builder(
            &Config::default(),
            "FL",
            date(2021, 7, 14),
            date(2021, 8, 14),
        )
        .region_info(
            "GA",
            RegionInfo {
                population: 10_000_000,
                adjacent: vec!["FL".into()],
            },
        )
        .run_count(10)
        .region_info(
            "FL",
            RegionInfo {
                population: 21_000_000,
                adjacent: vec!["AL".into(), "GA".into()],
            },
        )
        .contact_probability(1.5)
        .world_properties(world())
        .build()
        .unwrap();

        let ca = CanonicalInput::new(&a).unwrap();
        let cb = CanonicalInput::new(&b).unwrap();
        assert_eq!(ca.text(), cb.text());
        assert_eq!(ca.key(), cb.key());
    }

    #[test]
    fn test_every_field_change_changes_key() {
        let original = CanonicalInput::new(&base()).unwrap();
        let mut variants: Vec<InputSpecification> = Vec::new();

        variants.push(base().with_contact_probability(1.5000001));
        let mut s = base();
        s.end_day = date(2021, 8, 15);
        variants.push(s);
        let mut s = base();
        s.start_day = date(2021, 7, 13);
        variants.push(s);
        let mut s = base();
        s.run_count = 11;
        variants.push(s);
        let mut s = base();
        s.population_scale = 11;
        variants.push(s);
        let mut s = base();
        s.options.expensive_stats = true;
        variants.push(s);
        let mut s = base();
        s.world_properties.delta.vax_immunity.values[0] = 0.8;
        variants.push(s);
        let mut s = base();
        s.region_info.get_mut("GA").unwrap().population += 1;
        variants.push(s);
        let mut s = base();
        s.infected_history.insert(
            "FL".into(),
            BTreeMap::from([(
                date(2021, 7, 1),
                InfectionEstimate {
                    total_infections: 10,
                    total_cases: 2,
                },
            )]),
        );
        variants.push(s);

        for (i, spec) in variants.iter().enumerate() {
            let canonical = CanonicalInput::new(spec).unwrap();
            assert_ne!(canonical.key(), original.key(), "variant {i} collided");
        }
    }

    #[test]
    fn test_mode_changes_key() {
        let a = base();
        let mut b = base();
        b.options.mode = RunMode::FindContactProbability;
        assert_ne!(
            CanonicalInput::new(&a).unwrap().key(),
            CanonicalInput::new(&b).unwrap().key()
        );
    }

    #[test]
    fn test_absent_series_are_explicit() {
        let canonical = CanonicalInput::new(&base()).unwrap();
        let value: serde_json::Value = serde_json::from_str(canonical.text()).unwrap();
        for key in ["infected_history", "vax_history", "test_history", "variant_history"] {
            assert_eq!(value[key], serde_json::json!({}), "{key}");
        }
    }

    #[test]
    fn test_empty_series_differs_from_series_with_empty_region() {
        let a = base();
        let mut b = base();
        b.variant_history.insert("FL".into(), Vec::<VariantShare>::new());
        assert_ne!(
            CanonicalInput::new(&a).unwrap().key(),
            CanonicalInput::new(&b).unwrap().key()
        );
    }

    #[test]
    fn test_snapshot_survives_mutation() {
        let mut spec = base();
        let canonical = CanonicalInput::new(&spec).unwrap();
        let key = canonical.key().clone();
        spec.contact_probability = 3.0;
        assert_eq!(canonical.key(), &key);
        assert_ne!(CanonicalInput::new(&spec).unwrap().key(), &key);
    }

    #[test]
    fn test_invalid_spec_has_no_key() {
        let mut spec = base();
        spec.run_count = 0;
        assert!(CanonicalInput::new(&spec).is_err());
    }

    #[test]
    fn test_key_format() {
        let canonical = CanonicalInput::new(&base()).unwrap();
        let key = canonical.key().as_str();
        assert_eq!(key.len(), 64);
        assert_eq!(CacheKey::parse(key).as_ref(), Some(canonical.key()));
        assert_eq!(CacheKey::parse("../etc/passwd"), None);
    }
}
