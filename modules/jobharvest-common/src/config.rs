use std::env;
use std::path::PathBuf;

/// Runtime configuration loaded from environment variables.
/// Everything has a default; nothing is required.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// Root data directory for artifacts, baselines and batch reports.
    pub data_dir: PathBuf,

    // Fetcher
    pub fetch_max_attempts: u32,
    pub fetch_backoff_base_ms: u64,
    pub http_timeout_secs: u64,
    pub user_agent: String,

    // Run coordinator
    pub org_timeout_secs: u64,

    // Enrichment
    pub enrich_concurrency: usize,
    pub enrich_min_delay_ms: u64,

    // Quality gate
    pub gate_drop_ratio: f64,
    pub gate_spike_multiplier: f64,
}

impl HarvestConfig {
    pub fn from_env() -> Self {
        Self {
            data_dir: PathBuf::from(env_or("DATA_DIR", "data")),
            fetch_max_attempts: parsed_env("FETCH_MAX_ATTEMPTS", 3),
            fetch_backoff_base_ms: parsed_env("FETCH_BACKOFF_BASE_MS", 500),
            http_timeout_secs: parsed_env("HTTP_TIMEOUT_SECS", 30),
            user_agent: env_or(
                "USER_AGENT",
                "jobharvest/0.1 (+https://github.com/jobharvest)",
            ),
            org_timeout_secs: parsed_env("ORG_TIMEOUT_SECS", 120),
            enrich_concurrency: parsed_env("ENRICH_CONCURRENCY", 4),
            enrich_min_delay_ms: parsed_env("ENRICH_MIN_DELAY_MS", 1500),
            gate_drop_ratio: parsed_env("GATE_DROP_RATIO", 0.2),
            gate_spike_multiplier: parsed_env("GATE_SPIKE_MULTIPLIER", 5.0),
        }
    }
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parsed_env<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
