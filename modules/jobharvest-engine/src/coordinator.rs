//! Run coordinator: fans the requested organizations out over a bounded pool
//! of workers, normalizes and gates each org's output, and persists artifacts
//! eagerly. One org failing, timing out or panicking never touches another
//! org's results.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use jobharvest_common::{
    ArtifactRef, EnrichmentStatus, FetchOutcome, FetchStatus, FetchSummary, HarvestError,
    JobListing, OrgId, Organization, RawListing, RunArtifact, SCHEMA_VERSION,
};

use crate::adapter::Adapter;
use crate::artifact::ArtifactStore;
use crate::baseline::BaselineStore;
use crate::enrichment::Enricher;
use crate::fetch::Fetcher;
use crate::gate::QualityGate;
use crate::registry::AdapterRegistry;
use crate::run_log::{EventKind, RunLog};
use crate::stats::RunStats;

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Maximum organizations processed at once.
    pub concurrency: usize,
    /// Budget for one organization's fetch plus enrichment.
    pub org_timeout: Duration,
    pub enrich: bool,
    /// Quality-gate evaluation; off under `--skip-validation`.
    pub validate: bool,
    /// Externally supplied run id, otherwise generated.
    pub run_id: Option<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            org_timeout: Duration::from_secs(120),
            enrich: false,
            validate: true,
            run_id: None,
        }
    }
}

#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: String,
    /// One artifact per requested org, in request order.
    pub artifacts: Vec<RunArtifact>,
    pub refs: Vec<ArtifactRef>,
    pub stats: RunStats,
}

pub struct RunCoordinator {
    registry: Arc<AdapterRegistry>,
    fetcher: Arc<Fetcher>,
    enricher: Arc<Enricher>,
    gate: Arc<QualityGate>,
    baselines: Arc<dyn BaselineStore>,
    store: Arc<ArtifactStore>,
}

impl RunCoordinator {
    pub fn new(
        registry: Arc<AdapterRegistry>,
        fetcher: Arc<Fetcher>,
        enricher: Arc<Enricher>,
        gate: Arc<QualityGate>,
        baselines: Arc<dyn BaselineStore>,
        store: Arc<ArtifactStore>,
    ) -> Self {
        Self {
            registry,
            fetcher,
            enricher,
            gate,
            baselines,
            store,
        }
    }

    /// Process the requested organizations. An empty request means every
    /// enabled org in registration order. Unknown ids fail the whole run
    /// before any work starts.
    pub async fn run(
        &self,
        requested: &[OrgId],
        opts: RunOptions,
    ) -> Result<RunOutcome, HarvestError> {
        let ids = if requested.is_empty() {
            self.registry.enabled_ids()
        } else {
            requested.to_vec()
        };

        let mut targets: Vec<(Organization, Arc<dyn Adapter>)> = Vec::with_capacity(ids.len());
        for id in &ids {
            let org = self
                .registry
                .organization(id)
                .cloned()
                .ok_or_else(|| HarvestError::UnknownOrg(id.to_string()))?;
            let adapter = self
                .registry
                .resolve(id)
                .ok_or_else(|| HarvestError::UnknownOrg(id.to_string()))?;
            targets.push((org, adapter));
        }

        let run_id = opts.run_id.clone().unwrap_or_else(new_run_id);
        let run_log = Arc::new(RunLog::new(run_id.clone()));
        info!(run_id = %run_id, orgs = targets.len(), concurrency = opts.concurrency, "run started");

        let semaphore = Arc::new(Semaphore::new(opts.concurrency.max(1)));
        let mut workers: JoinSet<(usize, RunArtifact, Option<ArtifactRef>)> = JoinSet::new();

        for (index, (org, adapter)) in targets.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let fetcher = Arc::clone(&self.fetcher);
            let enricher = Arc::clone(&self.enricher);
            let gate = Arc::clone(&self.gate);
            let baselines = Arc::clone(&self.baselines);
            let store = Arc::clone(&self.store);
            let run_log = Arc::clone(&run_log);
            let run_id = run_id.clone();
            let opts = opts.clone();

            workers.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let artifact = harvest_org(
                    &org, adapter, &fetcher, &enricher, &gate, baselines.as_ref(), &run_log,
                    &run_id, &opts,
                )
                .await;

                let saved = match store.save(&artifact) {
                    Ok(r) => {
                        run_log.log(EventKind::ArtifactWritten {
                            org: org.id.to_string(),
                            path: r.path.clone(),
                        });
                        Some(r)
                    }
                    Err(e) => {
                        error!(org = %org.id, error = %e, "failed to persist artifact");
                        None
                    }
                };
                (index, artifact, saved)
            });
        }

        let mut slots: Vec<Option<(RunArtifact, Option<ArtifactRef>)>> =
            ids.iter().map(|_| None).collect();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((index, artifact, saved)) => slots[index] = Some((artifact, saved)),
                Err(e) => error!(error = %e, "org worker panicked"),
            }
        }

        let mut artifacts = Vec::with_capacity(slots.len());
        let mut refs = Vec::new();
        for slot in slots.into_iter().flatten() {
            artifacts.push(slot.0);
            if let Some(r) = slot.1 {
                refs.push(r);
            }
        }

        let mut stats = RunStats::from_artifacts(&artifacts);
        stats.orgs_requested = ids.len() as u32;

        self.store.save_report(&run_id, &stats)?;
        run_log.save(&self.store.run_dir(&run_id), &stats)?;
        info!(run_id = %run_id, succeeded = stats.orgs_succeeded, failed = stats.orgs_failed, "run finished");

        Ok(RunOutcome {
            run_id,
            artifacts,
            refs,
            stats,
        })
    }
}

/// One organization end to end: fetch, normalize, enrich, gate. The timeout
/// budget wraps fetch and enrichment; gate evaluation is local and cheap.
#[allow(clippy::too_many_arguments)]
async fn harvest_org(
    org: &Organization,
    adapter: Arc<dyn Adapter>,
    fetcher: &Fetcher,
    enricher: &Enricher,
    gate: &QualityGate,
    baselines: &dyn BaselineStore,
    run_log: &RunLog,
    run_id: &str,
    opts: &RunOptions,
) -> RunArtifact {
    run_log.log(EventKind::OrgStarted {
        org: org.id.to_string(),
        adapter: adapter.name().to_string(),
    });

    let scoped = fetcher.scoped();
    let started = Instant::now();

    let budget = opts.org_timeout;
    let work = async {
        let raw = match adapter.fetch(&scoped).await {
            Ok(raw) => raw,
            Err(e) => {
                return (
                    FetchOutcome::Failure {
                        error: e.into_harvest(),
                    },
                    EnrichmentStatus::Skipped,
                )
            }
        };
        let raw_count = raw.len();
        let (mut listings, violations) = normalize(org, raw, run_log);
        run_log.log(EventKind::OrgFetched {
            org: org.id.to_string(),
            raw_listings: raw_count as u32,
            attempts: scoped.attempts_made(),
            duration_ms: started.elapsed().as_millis() as u64,
        });

        let enrichment = if opts.enrich && !listings.is_empty() {
            let report = enricher.enrich(org, &mut listings, &scoped).await;
            run_log.log(EventKind::EnrichmentDone {
                org: org.id.to_string(),
                status: format!("{:?}", report.status).to_lowercase(),
                enriched: report.enriched,
                failed: report.failed,
                skipped: report.skipped,
            });
            report.status
        } else {
            EnrichmentStatus::Skipped
        };

        let outcome = if violations > 0 {
            FetchOutcome::Partial {
                listings,
                violations,
            }
        } else {
            FetchOutcome::Success { listings }
        };
        (outcome, enrichment)
    };

    let (outcome, enrichment) = match tokio::time::timeout(budget, work).await {
        Ok(result) => result,
        Err(_) => (
            FetchOutcome::Failure {
                error: HarvestError::Timeout {
                    org: org.id.to_string(),
                    budget_secs: budget.as_secs(),
                },
            },
            EnrichmentStatus::Skipped,
        ),
    };

    let (status, listings, violations, error) = match outcome {
        FetchOutcome::Success { listings } => (FetchStatus::Success, listings, 0, String::new()),
        FetchOutcome::Partial {
            listings,
            violations,
        } => (FetchStatus::Partial, listings, violations, String::new()),
        FetchOutcome::Failure { error } => {
            warn!(org = %org.id, error = %error, "organization failed");
            run_log.log(EventKind::OrgFailed {
                org: org.id.to_string(),
                error: error.to_string(),
            });
            (FetchStatus::Failure, Vec::new(), 0, error.to_string())
        }
    };

    let mut artifact = RunArtifact {
        org: org.id.clone(),
        org_name: org.name.clone(),
        run_id: run_id.to_string(),
        generated_at: Utc::now(),
        schema_version: SCHEMA_VERSION,
        fetch: FetchSummary {
            status,
            attempts: scoped.attempts_made(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            listing_count: listings.len(),
            violation_count: violations,
            error,
        },
        listings,
        enrichment,
        gate: None,
    };

    // A failed org has nothing to gate; it is already a failure.
    if opts.validate && status != FetchStatus::Failure {
        let baseline = baselines.get(&org.id);
        let result = gate.evaluate(&artifact, org, baseline.as_ref());
        run_log.log(EventKind::GateEvaluated {
            org: org.id.to_string(),
            pass: result.pass,
            violations: result.violations.clone(),
        });
        artifact.gate = Some(result);
    }

    artifact
}

/// Validate raw listings and collapse duplicate normalized urls, first
/// occurrence wins. Invalid listings are dropped and counted, never fatal.
fn normalize(org: &Organization, raw: Vec<RawListing>, run_log: &RunLog) -> (Vec<JobListing>, u32) {
    let mut listings = Vec::with_capacity(raw.len());
    let mut seen = HashSet::new();
    let mut violations = 0u32;

    for candidate in raw {
        match JobListing::from_raw(candidate, &org.base_url) {
            Ok(listing) => {
                if seen.insert(listing.url.clone()) {
                    listings.push(listing);
                } else {
                    run_log.log(EventKind::DuplicateCollapsed {
                        org: org.id.to_string(),
                        url: listing.url,
                    });
                }
            }
            Err(e) => {
                violations += 1;
                run_log.log(EventKind::ListingDropped {
                    org: org.id.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    (listings, violations)
}

fn new_run_id() -> String {
    format!(
        "run-{}-{}",
        Utc::now().format("%Y%m%dT%H%M%SZ"),
        &Uuid::new_v4().simple().to_string()[..8]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::FixedBaselines;
    use crate::fetch::RetryPolicy;
    use crate::gate::GateConfig;
    use crate::registry::RegistryBuilder;
    use crate::testing::{status, ScriptedTransport, SingleFetchAdapter, StalledAdapter, StaticAdapter};
    use jobharvest_common::RawListing;
    use tempfile::tempdir;

    fn org(abbrev: &str) -> Organization {
        Organization {
            id: OrgId::new(abbrev),
            name: format!("Test Org [{abbrev}]"),
            base_url: "https://example.org".to_string(),
            allow_http: false,
            zero_tolerant: false,
            enabled: true,
            detail_delay_ms: None,
        }
    }

    fn raws(org: &str, count: usize) -> Vec<RawListing> {
        (0..count)
            .map(|i| {
                RawListing::new(
                    &format!("{org} job {i}"),
                    &format!("https://example.org/{org}/jobs/{i}"),
                )
            })
            .collect()
    }

    fn coordinator(
        registry: AdapterRegistry,
        transport: Arc<ScriptedTransport>,
        data_dir: &std::path::Path,
    ) -> RunCoordinator {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::from_millis(1),
            min_delay: Duration::ZERO,
        };
        RunCoordinator::new(
            Arc::new(registry),
            Arc::new(Fetcher::new(transport, policy.clone())),
            Arc::new(Enricher::with_policy(policy, 1, Duration::ZERO)),
            Arc::new(QualityGate::new(GateConfig::default())),
            Arc::new(FixedBaselines::default()),
            Arc::new(ArtifactStore::new(data_dir)),
        )
    }

    fn opts() -> RunOptions {
        RunOptions {
            concurrency: 3,
            org_timeout: Duration::from_secs(5),
            enrich: false,
            validate: true,
            run_id: Some("run-test".to_string()),
        }
    }

    #[tokio::test]
    async fn artifacts_come_back_in_request_order_at_any_concurrency() {
        let dir = tempdir().unwrap();
        let names = ["AAA", "BBB", "CCC", "DDD", "EEE"];
        let build = || {
            let mut builder = RegistryBuilder::new();
            for (i, name) in names.iter().enumerate() {
                builder = builder
                    .register(
                        org(name),
                        Arc::new(StaticAdapter::new(name, raws(name, i + 1))),
                    )
                    .unwrap();
            }
            builder.build()
        };

        let wide = coordinator(build(), ScriptedTransport::unreachable(), dir.path());
        let narrow = coordinator(build(), ScriptedTransport::unreachable(), dir.path());

        let mut wide_opts = opts();
        wide_opts.concurrency = 3;
        let mut narrow_opts = opts();
        narrow_opts.concurrency = 1;
        narrow_opts.run_id = Some("run-test-2".to_string());

        let a = wide.run(&[], wide_opts).await.unwrap();
        let b = narrow.run(&[], narrow_opts).await.unwrap();

        let order_a: Vec<&str> = a.artifacts.iter().map(|x| x.org.as_str()).collect();
        let order_b: Vec<&str> = b.artifacts.iter().map(|x| x.org.as_str()).collect();
        assert_eq!(order_a, names.to_vec());
        assert_eq!(order_a, order_b);
        for (i, artifact) in a.artifacts.iter().enumerate() {
            assert_eq!(artifact.listings.len(), i + 1);
        }
    }

    #[tokio::test]
    async fn unknown_org_fails_before_any_work() {
        let dir = tempdir().unwrap();
        let registry = RegistryBuilder::new()
            .register(org("WCC"), Arc::new(StaticAdapter::new("wcc", raws("WCC", 2))))
            .unwrap()
            .build();
        let coordinator = coordinator(registry, ScriptedTransport::unreachable(), dir.path());

        let err = coordinator
            .run(&[OrgId::new("WCC"), OrgId::new("NOPE")], opts())
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::UnknownOrg(_)));
        assert!(!dir.path().join("runs").exists());
    }

    #[tokio::test]
    async fn invalid_listings_are_dropped_and_counted() {
        let dir = tempdir().unwrap();
        let mut raw = raws("WCC", 3);
        raw.push(RawListing::new("", "https://example.org/WCC/jobs/99"));
        raw.push(RawListing::new("No url job", ""));
        let registry = RegistryBuilder::new()
            .register(org("WCC"), Arc::new(StaticAdapter::new("wcc", raw)))
            .unwrap()
            .build();
        let coordinator = coordinator(registry, ScriptedTransport::unreachable(), dir.path());

        let outcome = coordinator.run(&[OrgId::new("WCC")], opts()).await.unwrap();
        let artifact = &outcome.artifacts[0];
        assert_eq!(artifact.fetch.status, FetchStatus::Partial);
        assert_eq!(artifact.listings.len(), 3);
        assert_eq!(artifact.fetch.violation_count, 2);
    }

    #[tokio::test]
    async fn all_invalid_is_partial_with_zero_listings_not_failure() {
        let dir = tempdir().unwrap();
        let raw = vec![RawListing::new("", ""), RawListing::new(" ", "")];
        let registry = RegistryBuilder::new()
            .register(org("WCC"), Arc::new(StaticAdapter::new("wcc", raw)))
            .unwrap()
            .build();
        let coordinator = coordinator(registry, ScriptedTransport::unreachable(), dir.path());

        let outcome = coordinator.run(&[OrgId::new("WCC")], opts()).await.unwrap();
        let artifact = &outcome.artifacts[0];
        assert_eq!(artifact.fetch.status, FetchStatus::Partial);
        assert!(artifact.listings.is_empty());
        assert_eq!(artifact.fetch.violation_count, 2);
    }

    #[tokio::test]
    async fn duplicate_urls_collapse_to_first_occurrence() {
        let dir = tempdir().unwrap();
        let mut raw = raws("WCC", 9);
        // Same page as jobs/0 modulo tracking params.
        raw.push(RawListing::new(
            "WCC job 0 again",
            "https://example.org/WCC/jobs/0?utm_source=feed",
        ));
        let registry = RegistryBuilder::new()
            .register(org("WCC"), Arc::new(StaticAdapter::new("wcc", raw)))
            .unwrap()
            .build();
        let coordinator = coordinator(registry, ScriptedTransport::unreachable(), dir.path());

        let outcome = coordinator.run(&[OrgId::new("WCC")], opts()).await.unwrap();
        let artifact = &outcome.artifacts[0];
        assert_eq!(artifact.fetch.status, FetchStatus::Success);
        assert_eq!(artifact.listings.len(), 9);
        assert_eq!(artifact.listings[0].title, "WCC job 0");
    }

    #[tokio::test]
    async fn timed_out_org_fails_alone() {
        let dir = tempdir().unwrap();
        let registry = RegistryBuilder::new()
            .register(org("SLOW"), Arc::new(StalledAdapter::new("slow")))
            .unwrap()
            .register(org("FAST"), Arc::new(StaticAdapter::new("fast", raws("FAST", 4))))
            .unwrap()
            .build();
        let coordinator = coordinator(registry, ScriptedTransport::unreachable(), dir.path());

        let mut opts = opts();
        opts.org_timeout = Duration::from_millis(50);
        let outcome = coordinator.run(&[], opts).await.unwrap();

        assert_eq!(outcome.artifacts[0].fetch.status, FetchStatus::Failure);
        assert!(outcome.artifacts[0].fetch.error.contains("run budget"));
        assert_eq!(outcome.artifacts[1].fetch.status, FetchStatus::Success);
        assert_eq!(outcome.artifacts[1].listings.len(), 4);
        assert_eq!(outcome.stats.orgs_failed, 1);
        assert_eq!(outcome.stats.orgs_succeeded, 1);
    }

    #[tokio::test]
    async fn permanent_http_failure_fails_org_after_one_attempt() {
        let dir = tempdir().unwrap();
        let registry = RegistryBuilder::new()
            .register(
                org("WCC"),
                Arc::new(SingleFetchAdapter::new("wcc", "https://example.org/list", Vec::new())),
            )
            .unwrap()
            .build();
        let transport = ScriptedTransport::new(vec![status(403)]);
        let coordinator = coordinator(registry, transport, dir.path());

        let outcome = coordinator.run(&[OrgId::new("WCC")], opts()).await.unwrap();
        let artifact = &outcome.artifacts[0];
        assert_eq!(artifact.fetch.status, FetchStatus::Failure);
        assert_eq!(artifact.fetch.attempts, 1);
        assert!(artifact.gate.is_none());
    }
}
