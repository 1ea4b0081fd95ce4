//! Enrichment stage: fetch full description text for each listing.
//! Failures degrade a listing, never remove it, and never fail the run.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use futures::{stream, StreamExt};
use ego_tree::NodeRef;
use scraper::{Html, Node};
use tracing::{debug, info, warn};

use jobharvest_common::{EnrichmentStatus, HarvestConfig, HarvestError, JobListing, Organization};

use crate::fetch::{FetchTarget, Fetcher, RetryPolicy};

/// Consecutive 429-classified failures before remaining detail fetches for
/// the organization are skipped.
const RATE_LIMIT_BREAKER_THRESHOLD: u32 = 3;

/// Cap on extracted description text, in characters.
const MAX_DESCRIPTION_CHARS: usize = 50_000;

#[derive(Debug)]
pub struct EnrichmentReport {
    pub status: EnrichmentStatus,
    pub enriched: u32,
    pub failed: u32,
    pub skipped: u32,
}

enum DetailResult {
    Enriched(String),
    Failed,
    Skipped,
}

/// Tracks consecutive rate-limit hits for one organization's detail fetches.
struct RateLimitBreaker {
    consecutive: AtomicU32,
    open: AtomicBool,
    threshold: u32,
}

impl RateLimitBreaker {
    fn new(threshold: u32) -> Self {
        Self {
            consecutive: AtomicU32::new(0),
            open: AtomicBool::new(false),
            threshold,
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }

    fn record_rate_limited(&self) -> bool {
        let seen = self.consecutive.fetch_add(1, Ordering::Relaxed) + 1;
        if seen >= self.threshold {
            self.open.store(true, Ordering::Relaxed);
            return true;
        }
        false
    }

    fn record_ok(&self) {
        self.consecutive.store(0, Ordering::Relaxed);
    }
}

pub struct Enricher {
    policy: RetryPolicy,
    concurrency: usize,
    default_min_delay: Duration,
}

impl Enricher {
    pub fn new(cfg: &HarvestConfig) -> Self {
        Self {
            policy: RetryPolicy::polite(cfg, cfg.enrich_min_delay_ms),
            concurrency: cfg.enrich_concurrency,
            default_min_delay: Duration::from_millis(cfg.enrich_min_delay_ms),
        }
    }

    pub fn with_policy(policy: RetryPolicy, concurrency: usize, min_delay: Duration) -> Self {
        Self {
            policy,
            concurrency,
            default_min_delay: min_delay,
        }
    }

    /// Fetch detail text for each listing, bounded by the enrichment
    /// concurrency limit and paced per organization host.
    pub async fn enrich(
        &self,
        org: &Organization,
        listings: &mut [JobListing],
        fetcher: &Fetcher,
    ) -> EnrichmentReport {
        if listings.is_empty() {
            return EnrichmentReport {
                status: EnrichmentStatus::Complete,
                enriched: 0,
                failed: 0,
                skipped: 0,
            };
        }

        let min_delay = org
            .detail_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_min_delay);
        let mut policy = self.policy.clone();
        policy.min_delay = policy.min_delay.max(min_delay);
        let polite = fetcher.with_policy(policy);
        let polite = &polite;

        let breaker = RateLimitBreaker::new(RATE_LIMIT_BREAKER_THRESHOLD);
        let breaker = &breaker;
        // Spaces out request starts against the same host; the lock is held
        // across the wait so starts stay min_delay apart.
        let pacer = tokio::sync::Mutex::new(Instant::now().checked_sub(min_delay));
        let pacer = &pacer;
        let org_id = org.id.clone();
        let org_id = &org_id;

        let urls: Vec<String> = listings.iter().map(|l| l.url.clone()).collect();
        let results: Vec<DetailResult> = stream::iter(urls)
            .map(|url| async move {
                if breaker.is_open() {
                    debug!(org = %org_id, url = %url, "skipping detail fetch, rate limit breaker open");
                    return DetailResult::Skipped;
                }

                {
                    let mut last = pacer.lock().await;
                    if let Some(at) = *last {
                        let since = at.elapsed();
                        if since < min_delay {
                            tokio::time::sleep(min_delay - since).await;
                        }
                    }
                    *last = Some(Instant::now());
                }

                match polite.fetch(&FetchTarget::get(&url)).await {
                    Ok(resp) => {
                        breaker.record_ok();
                        DetailResult::Enriched(extract_description(&resp.body))
                    }
                    Err(failure) => {
                        if is_rate_limited(&failure.error) {
                            if breaker.record_rate_limited() {
                                warn!(
                                    org = %org_id,
                                    threshold = RATE_LIMIT_BREAKER_THRESHOLD,
                                    "rate limit breaker open, skipping remaining detail fetches"
                                );
                            }
                        } else {
                            breaker.record_ok();
                        }
                        debug!(org = %org_id, url = %url, error = %failure.error, "detail fetch failed");
                        DetailResult::Failed
                    }
                }
            })
            .buffered(self.concurrency.max(1))
            .collect()
            .await;

        let mut enriched = 0u32;
        let mut failed = 0u32;
        let mut skipped = 0u32;
        for (listing, result) in listings.iter_mut().zip(results) {
            match result {
                DetailResult::Enriched(description) => {
                    listing.description = description;
                    enriched += 1;
                }
                DetailResult::Failed => failed += 1,
                DetailResult::Skipped => skipped += 1,
            }
        }

        let status = if failed == 0 && skipped == 0 {
            EnrichmentStatus::Complete
        } else {
            EnrichmentStatus::Partial
        };
        info!(org = %org.id, enriched, failed, skipped, ?status, "enrichment done");

        EnrichmentReport {
            status,
            enriched,
            failed,
            skipped,
        }
    }
}

fn is_rate_limited(error: &HarvestError) -> bool {
    error.to_string().contains("429")
}

/// Plain-text extraction from a detail page body: parse the HTML, walk the
/// tree skipping non-content elements, collapse whitespace, cap the length.
fn extract_description(body: &str) -> String {
    let document = Html::parse_document(body);
    let mut text = String::new();
    collect_text(document.tree.root(), &mut text);
    truncate_chars(&text, MAX_DESCRIPTION_CHARS)
}

fn collect_text(node: NodeRef<'_, Node>, out: &mut String) {
    for child in node.children() {
        match child.value() {
            Node::Text(t) => {
                for word in t.split_whitespace() {
                    if !out.is_empty() {
                        out.push(' ');
                    }
                    out.push_str(word);
                }
            }
            Node::Element(el)
                if matches!(el.name(), "script" | "style" | "noscript" | "template") => {}
            _ => collect_text(child, out),
        }
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
