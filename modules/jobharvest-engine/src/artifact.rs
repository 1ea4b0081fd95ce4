//! Artifact persistence. Each run writes one JSON file per organization under
//! `{data_dir}/runs/{run_id}/postings/` plus a `report.json` summary, so a
//! partially-failed run still leaves every completed org's output on disk.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use jobharvest_common::{ArtifactRef, HarvestError, OrgId, RunArtifact};

use crate::stats::RunStats;

pub struct ArtifactStore {
    data_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.data_dir.join("runs").join(run_id)
    }

    fn posting_path(&self, run_id: &str, org: &OrgId) -> PathBuf {
        self.run_dir(run_id)
            .join("postings")
            .join(format!("{}.json", org.as_str()))
    }

    /// Write one organization's artifact. Called eagerly as each org worker
    /// finishes, not at the end of the run.
    pub fn save(&self, artifact: &RunArtifact) -> Result<ArtifactRef, HarvestError> {
        let path = self.posting_path(&artifact.run_id, &artifact.org);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, serde_json::to_string_pretty(artifact)?)?;
        info!(org = %artifact.org, path = %path.display(), "artifact written");
        Ok(ArtifactRef {
            org: artifact.org.clone(),
            run_id: artifact.run_id.clone(),
            path: path.display().to_string(),
        })
    }

    pub fn load(&self, run_id: &str, org: &OrgId) -> Result<RunArtifact, HarvestError> {
        let path = self.posting_path(run_id, org);
        Self::load_path(&path)
    }

    pub fn load_ref(&self, artifact: &ArtifactRef) -> Result<RunArtifact, HarvestError> {
        Self::load_path(Path::new(&artifact.path))
    }

    fn load_path(path: &Path) -> Result<RunArtifact, HarvestError> {
        // Older artifacts lack schema_version and the enrichment/gate fields;
        // serde defaults cover them.
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }

    /// Write the run-level `report.json` next to the postings.
    pub fn save_report(&self, run_id: &str, stats: &RunStats) -> Result<PathBuf, HarvestError> {
        let dir = self.run_dir(run_id);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("report.json");
        let report = RunReport {
            run_id,
            generated_at: Utc::now(),
            stats,
        };
        std::fs::write(&path, serde_json::to_string_pretty(&report)?)?;
        Ok(path)
    }
}

#[derive(Serialize)]
struct RunReport<'a> {
    run_id: &'a str,
    generated_at: DateTime<Utc>,
    stats: &'a RunStats,
}
