use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarvestError {
    /// Retry-eligible: connection timeouts/resets, DNS hiccups, HTTP 5xx, HTTP 429.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// Immediately terminal: HTTP 4xx (other than 429), TLS failures, malformed bodies.
    #[error("permanent network error: {0}")]
    PermanentNetwork(String),

    /// Adapter returned data missing required fields.
    #[error("contract violation: {0}")]
    ContractViolation(String),

    #[error("organization {org} exceeded its {budget_secs}s run budget")]
    Timeout { org: String, budget_secs: u64 },

    #[error("quality gate violation: {0}")]
    GateViolation(String),

    #[error("invalid batch transition: batch {batch} is already {state}")]
    InvalidBatchTransition { batch: String, state: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown organization: {0}")]
    UnknownOrg(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl HarvestError {
    /// Whether the retry loop in the fetcher may attempt this again.
    pub fn is_transient(&self) -> bool {
        matches!(self, HarvestError::TransientNetwork(_))
    }
}
