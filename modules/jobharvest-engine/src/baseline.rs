//! Historical baseline store: rolling listing-count statistics per
//! organization. Read concurrently by gate evaluation during a run; written
//! only out-of-band after batch acceptance.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::RwLock;

use chrono::Utc;
use tracing::debug;

use jobharvest_common::{BaselineStat, HarvestError, OrgId};

/// Trailing window for the rolling average.
const BASELINE_WINDOW: u32 = 10;

pub trait BaselineStore: Send + Sync {
    fn get(&self, org: &OrgId) -> Option<BaselineStat>;

    /// Fold an accepted run's listing count into the rolling average.
    /// Never called while a run is in flight.
    fn record_run(&self, org: &OrgId, listing_count: usize) -> Result<BaselineStat, HarvestError>;
}

/// JSON-file key-value store at `{data_dir}/baselines.json`.
pub struct JsonBaselineStore {
    path: PathBuf,
    stats: RwLock<BTreeMap<String, BaselineStat>>,
}

impl JsonBaselineStore {
    pub fn open(data_dir: &std::path::Path) -> Result<Self, HarvestError> {
        let path = data_dir.join("baselines.json");
        let stats = if path.exists() {
            serde_json::from_str(&std::fs::read_to_string(&path)?)?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            stats: RwLock::new(stats),
        })
    }

    fn persist(&self, stats: &BTreeMap<String, BaselineStat>) -> Result<(), HarvestError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(stats)?)?;
        Ok(())
    }
}

impl BaselineStore for JsonBaselineStore {
    fn get(&self, org: &OrgId) -> Option<BaselineStat> {
        self.stats.read().unwrap().get(org.as_str()).cloned()
    }

    fn record_run(&self, org: &OrgId, listing_count: usize) -> Result<BaselineStat, HarvestError> {
        let mut stats = self.stats.write().unwrap();
        let updated = match stats.get(org.as_str()) {
            Some(prev) => {
                // Rolling average over a trailing window once warmed up.
                let window = prev.runs.min(BASELINE_WINDOW) as f64;
                let avg_count = prev.avg_count + (listing_count as f64 - prev.avg_count) / (window + 1.0);
                BaselineStat {
                    avg_count,
                    runs: prev.runs + 1,
                    updated_at: Utc::now(),
                }
            }
            None => BaselineStat {
                avg_count: listing_count as f64,
                runs: 1,
                updated_at: Utc::now(),
            },
        };
        debug!(org = %org, avg = updated.avg_count, runs = updated.runs, "baseline updated");
        stats.insert(org.as_str().to_string(), updated.clone());
        self.persist(&stats)?;
        Ok(updated)
    }
}

/// In-memory store with fixed values, for tests and `--skip-validation` runs.
#[derive(Default)]
pub struct FixedBaselines {
    stats: BTreeMap<String, BaselineStat>,
}

impl FixedBaselines {
    pub fn with(mut self, org: &OrgId, avg_count: f64, runs: u32) -> Self {
        self.stats.insert(
            org.as_str().to_string(),
            BaselineStat {
                avg_count,
                runs,
                updated_at: Utc::now(),
            },
        );
        self
    }
}

impl BaselineStore for FixedBaselines {
    fn get(&self, org: &OrgId) -> Option<BaselineStat> {
        self.stats.get(org.as_str()).cloned()
    }

    fn record_run(&self, _org: &OrgId, _listing_count: usize) -> Result<BaselineStat, HarvestError> {
        Err(HarvestError::Config(
            "fixed baseline store is read-only".to_string(),
        ))
    }
}
