//! Resilient fetch primitive: one network retrieval with retry, backoff and
//! error classification. Knows nothing about any source's semantics.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tracing::{debug, warn};

use jobharvest_common::{HarvestConfig, HarvestError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// What to retrieve: method, URL, headers, optional JSON body.
#[derive(Debug, Clone)]
pub struct FetchTarget {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl FetchTarget {
    pub fn get(url: &str) -> Self {
        Self {
            method: Method::Get,
            url: url.to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post_json(url: &str, body: serde_json::Value) -> Self {
        Self {
            method: Method::Post,
            url: url.to_string(),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: Some(body),
        }
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }
}

/// Raw transport result before retry classification of the status code.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub retry_after: Option<String>,
    pub body: String,
}

/// Seam for tests: the fetcher retries over whatever sends the bytes.
/// Transport-level errors arrive already classified transient/permanent.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, target: &FetchTarget) -> Result<TransportResponse, HarvestError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(cfg: &HarvestConfig) -> Result<Self, HarvestError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.http_timeout_secs))
            .user_agent(cfg.user_agent.clone())
            .build()
            .map_err(|e| HarvestError::Config(format!("failed to build http client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, target: &FetchTarget) -> Result<TransportResponse, HarvestError> {
        let mut req = match target.method {
            Method::Get => self.client.get(&target.url),
            Method::Post => self.client.post(&target.url),
        };
        for (key, value) in &target.headers {
            req = req.header(key, value);
        }
        if let Some(body) = &target.body {
            req = req.json(body);
        }

        let resp = req.send().await.map_err(classify_reqwest_error)?;
        let status = resp.status().as_u16();
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.text().await.map_err(classify_reqwest_error)?;

        Ok(TransportResponse {
            status,
            retry_after,
            body,
        })
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> HarvestError {
    // TLS failures surface somewhere in the source chain of a connect error.
    let mut chain = e.to_string();
    let mut source = std::error::Error::source(&e);
    while let Some(s) = source {
        chain.push_str(": ");
        chain.push_str(&s.to_string());
        source = s.source();
    }
    let lower = chain.to_lowercase();

    if lower.contains("certificate") || lower.contains("ssl") || lower.contains("tls") {
        return HarvestError::PermanentNetwork(chain);
    }
    if e.is_decode() || e.is_builder() {
        return HarvestError::PermanentNetwork(chain);
    }
    // Timeouts, connection resets, DNS hiccups — retry-eligible.
    HarvestError::TransientNetwork(chain)
}

fn is_transient_status(status: u16) -> bool {
    status >= 500 || status == 429
}

/// Parse a Retry-After header: either delay-seconds or an HTTP-date.
fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        let delta = dt.with_timezone(&Utc) - Utc::now();
        return Some(delta.to_std().unwrap_or(Duration::ZERO));
    }
    None
}

const JITTER_MAX_MS: u64 = 250;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    /// Floor on the computed backoff. The enrichment policy raises this for
    /// politeness against detail-page hosts.
    pub min_delay: Duration,
}

impl RetryPolicy {
    pub fn standard(cfg: &HarvestConfig) -> Self {
        Self {
            max_attempts: cfg.fetch_max_attempts,
            backoff_base: Duration::from_millis(cfg.fetch_backoff_base_ms),
            min_delay: Duration::ZERO,
        }
    }

    pub fn polite(cfg: &HarvestConfig, min_delay_ms: u64) -> Self {
        Self {
            max_attempts: cfg.fetch_max_attempts,
            backoff_base: Duration::from_millis(cfg.fetch_backoff_base_ms),
            min_delay: Duration::from_millis(min_delay_ms),
        }
    }

    /// Exponential backoff with random jitter: `base * 2^(attempt-1) + 0..250ms`.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.backoff_base * 2u32.saturating_pow(attempt.saturating_sub(1));
        let jitter = Duration::from_millis(rand::rng().random_range(0..JITTER_MAX_MS));
        (exp + jitter).max(self.min_delay)
    }
}

/// One timestamped attempt, kept for observability on the outcome.
#[derive(Debug, Clone, Serialize)]
pub struct FetchAttempt {
    pub attempt: u32,
    pub at: DateTime<Utc>,
    pub outcome: String,
}

#[derive(Debug)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
    pub attempts: u32,
    pub elapsed: Duration,
    pub attempt_log: Vec<FetchAttempt>,
}

#[derive(Debug)]
pub struct FetchFailure {
    pub error: HarvestError,
    pub attempts: u32,
    pub elapsed: Duration,
    pub attempt_log: Vec<FetchAttempt>,
}

/// Retrying fetcher. Cheap to scope per organization so that attempt counts
/// aggregate per run without shared mutable state across organizations.
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    attempts_made: AtomicU32,
}

impl Fetcher {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            attempts_made: AtomicU32::new(0),
        }
    }

    /// Fresh fetcher over the same transport with a zeroed attempt counter.
    pub fn scoped(&self) -> Fetcher {
        Fetcher::new(Arc::clone(&self.transport), self.policy.clone())
    }

    /// Same transport, different retry policy (used by enrichment).
    pub fn with_policy(&self, policy: RetryPolicy) -> Fetcher {
        Fetcher::new(Arc::clone(&self.transport), policy)
    }

    /// Total attempts issued through this fetcher instance.
    pub fn attempts_made(&self) -> u32 {
        self.attempts_made.load(Ordering::Relaxed)
    }

    pub async fn fetch(&self, target: &FetchTarget) -> Result<FetchResponse, FetchFailure> {
        let started = Instant::now();
        let mut attempt_log = Vec::new();
        let mut last_transient: Option<HarvestError> = None;

        for attempt in 1..=self.policy.max_attempts {
            self.attempts_made.fetch_add(1, Ordering::Relaxed);
            let at = Utc::now();

            match self.transport.send(target).await {
                Ok(resp) if (200..300).contains(&resp.status) => {
                    attempt_log.push(FetchAttempt {
                        attempt,
                        at,
                        outcome: format!("http_{}", resp.status),
                    });
                    debug!(url = %target.url, attempt, status = resp.status, "fetch ok");
                    return Ok(FetchResponse {
                        status: resp.status,
                        body: resp.body,
                        attempts: attempt,
                        elapsed: started.elapsed(),
                        attempt_log,
                    });
                }
                Ok(resp) => {
                    attempt_log.push(FetchAttempt {
                        attempt,
                        at,
                        outcome: format!("http_{}", resp.status),
                    });
                    if !is_transient_status(resp.status) {
                        return Err(FetchFailure {
                            error: HarvestError::PermanentNetwork(format!(
                                "HTTP {} from {}",
                                resp.status, target.url
                            )),
                            attempts: attempt,
                            elapsed: started.elapsed(),
                            attempt_log,
                        });
                    }
                    last_transient = Some(HarvestError::TransientNetwork(format!(
                        "HTTP {} from {}",
                        resp.status, target.url
                    )));
                    if attempt < self.policy.max_attempts {
                        // A server-supplied Retry-After overrides computed backoff.
                        let delay = resp
                            .retry_after
                            .as_deref()
                            .and_then(parse_retry_after)
                            .unwrap_or_else(|| self.policy.delay_for(attempt));
                        warn!(
                            url = %target.url,
                            attempt,
                            status = resp.status,
                            delay_ms = delay.as_millis() as u64,
                            "transient HTTP failure, retrying after backoff"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) if e.is_transient() => {
                    attempt_log.push(FetchAttempt {
                        attempt,
                        at,
                        outcome: e.to_string(),
                    });
                    last_transient = Some(e);
                    if attempt < self.policy.max_attempts {
                        let delay = self.policy.delay_for(attempt);
                        warn!(
                            url = %target.url,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "transient transport failure, retrying after backoff"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => {
                    attempt_log.push(FetchAttempt {
                        attempt,
                        at,
                        outcome: e.to_string(),
                    });
                    return Err(FetchFailure {
                        error: e,
                        attempts: attempt,
                        elapsed: started.elapsed(),
                        attempt_log,
                    });
                }
            }
        }

        // Retry budget exhausted — surface the last transient error, never
        // silently empty data.
        Err(FetchFailure {
            error: last_transient.unwrap_or_else(|| {
                HarvestError::TransientNetwork(format!("retries exhausted for {}", target.url))
            }),
            attempts: self.policy.max_attempts,
            elapsed: started.elapsed(),
            attempt_log,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ok_body, status, ScriptedTransport};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff_base: Duration::from_millis(1),
            min_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn transient_failures_then_success_counts_attempts() {
        let transport = ScriptedTransport::new(vec![status(503), status(503), ok_body("hi")]);
        let fetcher = Fetcher::new(transport, fast_policy(5));

        let resp = fetcher.fetch(&FetchTarget::get("https://x.test/")).await.unwrap();
        assert_eq!(resp.attempts, 3);
        assert_eq!(resp.body, "hi");
        assert_eq!(fetcher.attempts_made(), 3);
        assert_eq!(resp.attempt_log.len(), 3);
    }

    #[tokio::test]
    async fn permanent_failure_returns_after_one_attempt() {
        let transport = ScriptedTransport::new(vec![status(403)]);
        let fetcher = Fetcher::new(transport, fast_policy(5));

        let failure = fetcher
            .fetch(&FetchTarget::get("https://x.test/"))
            .await
            .unwrap_err();
        assert_eq!(failure.attempts, 1);
        assert!(matches!(failure.error, HarvestError::PermanentNetwork(_)));
    }

    #[tokio::test]
    async fn exhausted_retries_surface_last_transient_error() {
        let transport = ScriptedTransport::new(vec![status(500), status(502), status(503)]);
        let fetcher = Fetcher::new(transport, fast_policy(3));

        let failure = fetcher
            .fetch(&FetchTarget::get("https://x.test/"))
            .await
            .unwrap_err();
        assert_eq!(failure.attempts, 3);
        assert!(matches!(failure.error, HarvestError::TransientNetwork(_)));
        assert!(failure.error.to_string().contains("503"));
    }

    #[tokio::test]
    async fn transient_transport_error_is_retried() {
        let transport = ScriptedTransport::new(vec![
            Err(HarvestError::TransientNetwork("connection reset".into())),
            ok_body("ok"),
        ]);
        let fetcher = Fetcher::new(transport, fast_policy(3));

        let resp = fetcher.fetch(&FetchTarget::get("https://x.test/")).await.unwrap();
        assert_eq!(resp.attempts, 2);
    }

    #[tokio::test]
    async fn permanent_transport_error_is_not_retried() {
        let transport = ScriptedTransport::new(vec![Err(HarvestError::PermanentNetwork(
            "invalid peer certificate".into(),
        ))]);
        let fetcher = Fetcher::new(transport, fast_policy(3));

        let failure = fetcher
            .fetch(&FetchTarget::get("https://x.test/"))
            .await
            .unwrap_err();
        assert_eq!(failure.attempts, 1);
    }

    #[tokio::test]
    async fn retry_after_seconds_overrides_backoff() {
        let transport = ScriptedTransport::new(vec![
            Ok(TransportResponse {
                status: 429,
                retry_after: Some("0".to_string()),
                body: String::new(),
            }),
            ok_body("ok"),
        ]);
        // Huge base backoff: only the Retry-After override keeps this fast.
        let fetcher = Fetcher::new(
            transport,
            RetryPolicy {
                max_attempts: 3,
                backoff_base: Duration::from_secs(3600),
                min_delay: Duration::ZERO,
            },
        );

        let started = Instant::now();
        let resp = fetcher.fetch(&FetchTarget::get("https://x.test/")).await.unwrap();
        assert_eq!(resp.attempts, 2);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn retry_after_parses_both_forms() {
        assert_eq!(parse_retry_after("2"), Some(Duration::from_secs(2)));
        // A past HTTP-date clamps to zero.
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_retry_after("not-a-date"), None);
    }

    #[test]
    fn status_classification() {
        assert!(is_transient_status(500));
        assert!(is_transient_status(503));
        assert!(is_transient_status(429));
        assert!(!is_transient_status(404));
        assert!(!is_transient_status(403));
        assert!(!is_transient_status(200));
    }
}
