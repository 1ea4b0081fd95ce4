use serde::Serialize;

use jobharvest_common::{EnrichmentStatus, FetchStatus, RunArtifact};

/// Aggregate outcome of one multi-organization run.
#[derive(Debug, Default, Serialize)]
pub struct RunStats {
    pub orgs_requested: u32,
    pub orgs_succeeded: u32,
    pub orgs_partial: u32,
    pub orgs_failed: u32,
    pub orgs_gate_failed: u32,
    pub listings_total: u32,
    pub violations_total: u32,
    pub enrichment_partial: u32,
}

impl RunStats {
    pub fn from_artifacts(artifacts: &[RunArtifact]) -> Self {
        let mut stats = Self {
            orgs_requested: artifacts.len() as u32,
            ..Self::default()
        };
        for artifact in artifacts {
            match artifact.fetch.status {
                FetchStatus::Success => stats.orgs_succeeded += 1,
                FetchStatus::Partial => stats.orgs_partial += 1,
                FetchStatus::Failure => stats.orgs_failed += 1,
            }
            if artifact.gate.as_ref().is_some_and(|g| !g.pass) {
                stats.orgs_gate_failed += 1;
            }
            if artifact.enrichment == EnrichmentStatus::Partial {
                stats.enrichment_partial += 1;
            }
            stats.listings_total += artifact.listings.len() as u32;
            stats.violations_total += artifact.fetch.violation_count;
        }
        stats
    }

    /// A non-zero exit is warranted when any org failed outright or failed
    /// its quality gate (the latter only when gate enforcement is on).
    pub fn is_clean(&self, enforce_gate: bool) -> bool {
        self.orgs_failed == 0 && (!enforce_gate || self.orgs_gate_failed == 0)
    }
}

impl std::fmt::Display for RunStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Harvest Run Complete ===")?;
        writeln!(f, "Orgs requested:    {}", self.orgs_requested)?;
        writeln!(f, "Orgs succeeded:    {}", self.orgs_succeeded)?;
        writeln!(f, "Orgs partial:      {}", self.orgs_partial)?;
        writeln!(f, "Orgs failed:       {}", self.orgs_failed)?;
        writeln!(f, "Gate failures:     {}", self.orgs_gate_failed)?;
        writeln!(f, "Listings total:    {}", self.listings_total)?;
        writeln!(f, "Contract drops:    {}", self.violations_total)?;
        if self.enrichment_partial > 0 {
            writeln!(f, "Enrichment partial:{}", self.enrichment_partial)?;
        }
        Ok(())
    }
}
