//! Quality gate: structural rules plus regression checks against the
//! historical baseline. Failing the gate annotates the artifact — it never
//! deletes or blocks it.

use std::collections::HashSet;

use tracing::warn;

use jobharvest_common::{BaselineStat, Organization, QualityGateResult, RunArtifact};

#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Rule 3: fail when the count drops below this fraction of the baseline.
    pub drop_ratio: f64,
    /// Rule 4: fail when the count exceeds baseline by this multiple.
    pub spike_multiplier: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            drop_ratio: 0.2,
            spike_multiplier: 5.0,
        }
    }
}

/// A baseline below this average is not "materially above zero" and carries
/// no regression signal.
const MIN_MATERIAL_BASELINE: f64 = 1.0;

pub struct QualityGate {
    cfg: GateConfig,
}

impl QualityGate {
    pub fn new(cfg: GateConfig) -> Self {
        Self { cfg }
    }

    /// Check every rule independently; the gate fails if any rule produced a
    /// violation.
    pub fn evaluate(
        &self,
        artifact: &RunArtifact,
        org: &Organization,
        baseline: Option<&BaselineStat>,
    ) -> QualityGateResult {
        let mut violations = Vec::new();

        // Rule 1: non-empty titles, https-only urls (http needs the org flag).
        for listing in &artifact.listings {
            if listing.title.trim().is_empty() {
                violations.push(format!("empty_title: {}", listing.url));
            }
            match url::Url::parse(&listing.url) {
                Ok(u) => match u.scheme() {
                    "https" => {}
                    "http" if org.allow_http => {}
                    scheme => violations.push(format!(
                        "insecure_url: {} (scheme {scheme}, allow_http={})",
                        listing.url, org.allow_http
                    )),
                },
                Err(e) => violations.push(format!("invalid_url: {} ({e})", listing.url)),
            }
        }

        // Rule 2: no duplicate normalized urls survive.
        let mut seen = HashSet::new();
        for listing in &artifact.listings {
            if !seen.insert(listing.url.as_str()) {
                violations.push(format!("duplicate_url: {}", listing.url));
            }
        }

        // Rules 3 and 4 need a material baseline.
        let count = artifact.listings.len() as f64;
        if let Some(stat) = baseline.filter(|s| s.avg_count >= MIN_MATERIAL_BASELINE) {
            if !org.zero_tolerant && count < stat.avg_count * self.cfg.drop_ratio {
                violations.push(format!(
                    "count_collapse: {} listings vs baseline avg {:.1}",
                    artifact.listings.len(),
                    stat.avg_count
                ));
            }
            if count > stat.avg_count * self.cfg.spike_multiplier {
                violations.push(format!(
                    "count_spike: {} listings vs baseline avg {:.1} (limit {:.0}x)",
                    artifact.listings.len(),
                    stat.avg_count,
                    self.cfg.spike_multiplier
                ));
            }
        }

        let pass = violations.is_empty();
        if !pass {
            warn!(org = %org.id, run_id = %artifact.run_id, ?violations, "quality gate failed");
        }

        QualityGateResult {
            pass,
            violations,
            baseline: baseline.cloned(),
            org: org.id.clone(),
            run_id: artifact.run_id.clone(),
        }
    }
}
