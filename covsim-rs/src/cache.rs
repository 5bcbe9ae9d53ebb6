use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::canonical::CacheKey;
use crate::error::{Error, Result};
use crate::output::EngineOutput;

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    key: CacheKey,
    output: EngineOutput,
}

/// Content-addressed store of engine results, one JSON file per key.
///
/// Entries are never expired. Writes go through a temporary file that is
/// renamed into place, so readers only ever see complete entries and
/// concurrent writers of the same key simply replace each other.
#[derive(Debug, Clone)]
pub struct ResultCache {
    root: PathBuf,
}

impl ResultCache {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| Error::io(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.path_for(key).is_file()
    }

    /// Returns the stored result for `key`. Unreadable or corrupted entries
    /// are reported as misses.
    pub fn lookup(&self, key: &CacheKey) -> Option<EngineOutput> {
        let path = self.path_for(key);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(%key, "cache miss");
                return None;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable cache entry, recomputing");
                return None;
            }
        };
        match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) if entry.key == *key => {
                debug!(%key, "cache hit");
                Some(entry.output)
            }
            Ok(entry) => {
                warn!(
                    path = %path.display(),
                    stored = %entry.key,
                    "cache entry key mismatch, recomputing"
                );
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupted cache entry, recomputing");
                None
            }
        }
    }

    pub fn store(&self, key: &CacheKey, output: &EngineOutput) -> Result<()> {
        let entry = CacheEntry {
            key: key.clone(),
            output: output.clone(),
        };
        let bytes = serde_json::to_vec(&entry)?;
        let path = self.path_for(key);

        let mut file = tempfile::NamedTempFile::new_in(&self.root)
            .map_err(|e| Error::io(&self.root, e))?;
        file.write_all(&bytes).map_err(|e| Error::io(file.path(), e))?;
        file.as_file()
            .sync_all()
            .map_err(|e| Error::io(file.path(), e))?;
        file.persist(&path).map_err(|e| Error::io(&path, e.error))?;
        debug!(%key, bytes = bytes.len(), "stored cache entry");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::NaiveDate;

    use super::*;
    use crate::aggregate::SimulationResult;
    use crate::output::{ContactSearchResult, RawRegionRun, RawStepRecord};

    fn key(c: char) -> CacheKey {
        CacheKey::parse(&c.to_string().repeat(64)).unwrap()
    }

    fn simulation() -> EngineOutput {
        let runs = vec![RawRegionRun {
            name: "FL".into(),
            results: vec![
                RawStepRecord {
                    day: 920,
                    total_infections: 100,
                    ..Default::default()
                },
                RawStepRecord {
                    day: 921,
                    total_infections: 140,
                    ..Default::default()
                },
            ],
        }];
        EngineOutput::Simulation(
            SimulationResult::from_raw_runs(runs, Duration::from_millis(250)).unwrap(),
        )
    }

    #[test]
    fn test_lookup_after_store_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::open(dir.path().join("cache")).unwrap();
        let k = key('a');
        assert_eq!(cache.lookup(&k), None);

        let output = simulation();
        cache.store(&k, &output).unwrap();
        for _ in 0..3 {
            assert_eq!(cache.lookup(&k), Some(output.clone()));
        }
        assert!(cache.contains(&k));
        assert!(!cache.contains(&key('b')));
    }

    #[test]
    fn test_contact_search_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::open(dir.path()).unwrap();
        let mut search = ContactSearchResult::default();
        search.push(NaiveDate::from_ymd_opt(2020, 12, 1).unwrap(), 1.8, 0.05);
        let output = EngineOutput::ContactSearch(search);
        cache.store(&key('c'), &output).unwrap();
        assert_eq!(cache.lookup(&key('c')), Some(output));
    }

    #[test]
    fn test_lookup_returns_floats_bit_for_bit() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::open(dir.path()).unwrap();
        let first = NaiveDate::from_ymd_opt(2020, 12, 1).unwrap();

        let mut search = ContactSearchResult::default();
        search.push(first, 1.5324141532383067, 0.1 + 0.2);
        for i in 1..200u32 {
            let x = f64::from(i);
            search.push(
                first + chrono::Days::new(u64::from(i)),
                1.0 + (x * 0.7381).sin() / 3.0,
                (x.sqrt() * 1.0e-3).exp() - 1.0,
            );
        }
        let output = EngineOutput::ContactSearch(search);
        cache.store(&key('d'), &output).unwrap();
        assert_eq!(cache.lookup(&key('d')), Some(output));

        let runs = vec![RawRegionRun {
            name: "FL".into(),
            results: (0..50i32)
                .map(|i| RawStepRecord {
                    day: 900 + i64::from(i),
                    total_infections: 1000 + 37 * i64::from(i),
                    population_infectiousness: (f64::from(i) / 7.0).cos() * 0.123456789,
                    ..Default::default()
                })
                .collect(),
        }];
        let output = EngineOutput::Simulation(
            SimulationResult::from_raw_runs(runs, Duration::from_millis(250)).unwrap(),
        );
        cache.store(&key('e'), &output).unwrap();
        assert_eq!(cache.lookup(&key('e')), Some(output));
    }

    #[test]
    fn test_overwrite_keeps_single_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::open(dir.path()).unwrap();
        let k = key('d');
        cache.store(&k, &simulation()).unwrap();
        let replacement = EngineOutput::ContactSearch(ContactSearchResult::default());
        cache.store(&k, &replacement).unwrap();

        assert_eq!(cache.lookup(&k), Some(replacement));
        let files = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(files, 1);
    }

    #[test]
    fn test_corrupted_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::open(dir.path()).unwrap();
        let k = key('e');
        fs::write(cache.path_for(&k), b"{\"key\": \"eee").unwrap();
        assert_eq!(cache.lookup(&k), None);

        // Recomputing then storing repairs the entry.
        cache.store(&k, &simulation()).unwrap();
        assert!(cache.lookup(&k).is_some());
    }

    #[test]
    fn test_entry_under_wrong_name_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::open(dir.path()).unwrap();
        cache.store(&key('1'), &simulation()).unwrap();
        fs::copy(cache.path_for(&key('1')), cache.path_for(&key('2'))).unwrap();
        assert_eq!(cache.lookup(&key('2')), None);
    }
}
