//! Batch review: run output is grouped into a batch that a human approves or
//! rejects before it feeds the baselines. Terminal decisions are final.

use std::path::PathBuf;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use jobharvest_common::{ApprovalState, ArtifactRef, BatchReport, HarvestError};

use crate::artifact::ArtifactStore;
use crate::baseline::BaselineStore;

pub struct BatchReviewer {
    dir: PathBuf,
}

impl BatchReviewer {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: data_dir.into().join("batches"),
        }
    }

    fn batch_path(&self, batch_id: &str) -> PathBuf {
        self.dir.join(format!("{batch_id}.json"))
    }

    /// Open a pending batch covering the given artifacts.
    pub fn create_batch(&self, artifacts: Vec<ArtifactRef>) -> Result<BatchReport, HarvestError> {
        let batch_id = new_batch_id();
        let report = BatchReport {
            batch_id,
            orgs: artifacts.iter().map(|a| a.org.clone()).collect(),
            artifacts,
            state: ApprovalState::Pending,
            created_at: Utc::now(),
            resolved_at: None,
        };
        self.persist(&report)?;
        info!(batch = %report.batch_id, orgs = report.orgs.len(), "batch created");
        Ok(report)
    }

    pub fn load(&self, batch_id: &str) -> Result<BatchReport, HarvestError> {
        let path = self.batch_path(batch_id);
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }

    /// Accept the batch: each artifact's listing count is folded into the
    /// org's baseline. This is the only path that writes baselines.
    pub fn approve(
        &self,
        batch_id: &str,
        store: &ArtifactStore,
        baselines: &dyn BaselineStore,
    ) -> Result<BatchReport, HarvestError> {
        let mut report = self.load(batch_id)?;
        self.ensure_pending(&report)?;

        for artifact_ref in &report.artifacts {
            let artifact = store.load_ref(artifact_ref)?;
            baselines.record_run(&artifact.org, artifact.listings.len())?;
        }

        report.state = ApprovalState::Approved;
        report.resolved_at = Some(Utc::now());
        self.persist(&report)?;
        info!(batch = %report.batch_id, "batch approved");
        Ok(report)
    }

    /// Reject the batch. Artifacts stay on disk; baselines are untouched.
    pub fn reject(&self, batch_id: &str, reason: &str) -> Result<BatchReport, HarvestError> {
        let mut report = self.load(batch_id)?;
        self.ensure_pending(&report)?;

        report.state = ApprovalState::Rejected {
            reason: reason.to_string(),
        };
        report.resolved_at = Some(Utc::now());
        self.persist(&report)?;
        info!(batch = %report.batch_id, reason, "batch rejected");
        Ok(report)
    }

    fn ensure_pending(&self, report: &BatchReport) -> Result<(), HarvestError> {
        if report.state.is_terminal() {
            return Err(HarvestError::InvalidBatchTransition {
                batch: report.batch_id.clone(),
                state: report.state.label().to_string(),
            });
        }
        Ok(())
    }

    fn persist(&self, report: &BatchReport) -> Result<(), HarvestError> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(
            self.batch_path(&report.batch_id),
            serde_json::to_string_pretty(report)?,
        )?;
        Ok(())
    }
}

fn new_batch_id() -> String {
    format!(
        "batch-{}-{}",
        Utc::now().format("%Y%m%dT%H%M%SZ"),
        &Uuid::new_v4().simple().to_string()[..8]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::JsonBaselineStore;
    use chrono::Utc;
    use jobharvest_common::{
        EnrichmentStatus, FetchStatus, FetchSummary, JobListing, OrgId, RawListing, RunArtifact,
        SCHEMA_VERSION,
    };
    use tempfile::tempdir;

    fn saved_artifact(store: &ArtifactStore, org: &str, listings: usize) -> ArtifactRef {
        let listings: Vec<JobListing> = (0..listings)
            .map(|i| {
                JobListing::from_raw(
                    RawListing::new(&format!("Job {i}"), &format!("https://example.org/jobs/{i}")),
                    "https://example.org",
                )
                .unwrap()
            })
            .collect();
        let artifact = RunArtifact {
            org: OrgId::new(org),
            org_name: format!("Org [{org}]"),
            run_id: "run-test".to_string(),
            generated_at: Utc::now(),
            schema_version: SCHEMA_VERSION,
            fetch: FetchSummary {
                status: FetchStatus::Success,
                attempts: 1,
                elapsed_ms: 1,
                listing_count: listings.len(),
                violation_count: 0,
                error: String::new(),
            },
            listings,
            enrichment: EnrichmentStatus::Skipped,
            gate: None,
        };
        store.save(&artifact).unwrap()
    }

    #[test]
    fn approve_folds_counts_into_baselines() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let baselines = JsonBaselineStore::open(dir.path()).unwrap();
        let reviewer = BatchReviewer::new(dir.path());

        let refs = vec![
            saved_artifact(&store, "WCC", 5),
            saved_artifact(&store, "EDA", 2),
        ];
        let batch = reviewer.create_batch(refs).unwrap();
        assert_eq!(batch.state, ApprovalState::Pending);

        let approved = reviewer.approve(&batch.batch_id, &store, &baselines).unwrap();
        assert_eq!(approved.state, ApprovalState::Approved);
        assert!(approved.resolved_at.is_some());
        assert_eq!(baselines.get(&OrgId::new("WCC")).unwrap().avg_count, 5.0);
        assert_eq!(baselines.get(&OrgId::new("EDA")).unwrap().avg_count, 2.0);
    }

    #[test]
    fn terminal_batches_refuse_further_transitions() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let baselines = JsonBaselineStore::open(dir.path()).unwrap();
        let reviewer = BatchReviewer::new(dir.path());

        let batch = reviewer
            .create_batch(vec![saved_artifact(&store, "WCC", 3)])
            .unwrap();
        reviewer.reject(&batch.batch_id, "counts look wrong").unwrap();

        let err = reviewer
            .approve(&batch.batch_id, &store, &baselines)
            .unwrap_err();
        assert!(matches!(err, HarvestError::InvalidBatchTransition { .. }));
        // Rejection never touched the baselines.
        assert!(baselines.get(&OrgId::new("WCC")).is_none());

        let err = reviewer.reject(&batch.batch_id, "again").unwrap_err();
        assert!(matches!(err, HarvestError::InvalidBatchTransition { .. }));
    }

    #[test]
    fn rejection_survives_reload() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let reviewer = BatchReviewer::new(dir.path());

        let batch = reviewer
            .create_batch(vec![saved_artifact(&store, "WCC", 1)])
            .unwrap();
        reviewer.reject(&batch.batch_id, "stale data").unwrap();

        let reloaded = reviewer.load(&batch.batch_id).unwrap();
        assert_eq!(
            reloaded.state,
            ApprovalState::Rejected {
                reason: "stale data".to_string()
            }
        );
    }
}
