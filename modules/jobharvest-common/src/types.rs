use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::HarvestError;
use crate::urlnorm;

/// Artifact schema version. Bump when fields are added; older artifacts stay
/// readable through serde defaults.
pub const SCHEMA_VERSION: u32 = 2;

/// Stable organization identifier — an uppercase abbreviation like `WCC`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrgId(String);

impl OrgId {
    pub fn new(abbrev: &str) -> Self {
        Self(abbrev.trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One registered source organization. Immutable after registry construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrgId,
    pub name: String,
    pub base_url: String,
    /// Gate rule 1 normally requires https; set for orgs stuck on plain http.
    #[serde(default)]
    pub allow_http: bool,
    /// Org legitimately has zero vacancies most of the time — exempt from the
    /// count-collapse gate rule.
    #[serde(default)]
    pub zero_tolerant: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Per-org override for the minimum delay between enrichment fetches.
    #[serde(default)]
    pub detail_delay_ms: Option<u64>,
}

fn default_true() -> bool {
    true
}

/// Unvalidated adapter output: whatever fields the source happened to expose.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawListing {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl RawListing {
    pub fn new(title: &str, url: &str) -> Self {
        Self {
            title: title.to_string(),
            url: url.to_string(),
            extra: BTreeMap::new(),
        }
    }

    pub fn with_extra(mut self, key: &str, value: &str) -> Self {
        self.extra.insert(key.to_string(), value.to_string());
        self
    }
}

/// Normalized vacancy record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobListing {
    pub title: String,
    /// Absolute, normalized, unique within a run.
    pub url: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub posted_date: Option<String>,
    #[serde(default)]
    pub closing_date: Option<String>,
    /// Filled by the enrichment stage; empty when enrichment failed or was skipped.
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl JobListing {
    /// Validate and normalize a raw listing. A missing `title` or `url` is a
    /// contract violation; callers drop the listing and count it, never abort
    /// the run.
    pub fn from_raw(raw: RawListing, base_url: &str) -> Result<Self, HarvestError> {
        let title = raw.title.trim().to_string();
        if title.is_empty() {
            return Err(HarvestError::ContractViolation(
                "listing missing title".to_string(),
            ));
        }
        let url_field = raw.url.trim();
        if url_field.is_empty() {
            return Err(HarvestError::ContractViolation(format!(
                "listing '{title}' missing url"
            )));
        }
        let url = urlnorm::normalize(url_field, Some(base_url))?;

        let mut extra = raw.extra;
        let location = extra.remove("location").filter(|v| !v.is_empty());
        let department = extra.remove("department").filter(|v| !v.is_empty());
        let posted_date = extra.remove("posted_date").filter(|v| !v.is_empty());
        let closing_date = extra.remove("closing_date").filter(|v| !v.is_empty());

        Ok(Self {
            title,
            url,
            location,
            department,
            posted_date,
            closing_date,
            description: String::new(),
            extra,
        })
    }
}

/// Result of one organization's fetch pass.
#[derive(Debug)]
pub enum FetchOutcome {
    Success {
        listings: Vec<JobListing>,
    },
    /// Some listings survived, some were dropped as contract violations —
    /// or every raw listing was invalid (zero listings, all counted).
    Partial {
        listings: Vec<JobListing>,
        violations: u32,
    },
    Failure {
        error: HarvestError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Success,
    Partial,
    Failure,
}

/// Serializable fetch summary carried on the artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSummary {
    pub status: FetchStatus,
    pub attempts: u32,
    pub elapsed_ms: u64,
    pub listing_count: usize,
    #[serde(default)]
    pub violation_count: u32,
    #[serde(default)]
    pub error: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentStatus {
    Complete,
    Partial,
    #[default]
    Skipped,
}

/// Durable, versioned output of one organization's run. Constructed only by
/// the run coordinator; never mutated in place — a re-run writes a new one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunArtifact {
    pub org: OrgId,
    pub org_name: String,
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub listings: Vec<JobListing>,
    pub fetch: FetchSummary,
    #[serde(default)]
    pub enrichment: EnrichmentStatus,
    #[serde(default)]
    pub gate: Option<QualityGateResult>,
}

fn default_schema_version() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityGateResult {
    pub pass: bool,
    pub violations: Vec<String>,
    #[serde(default)]
    pub baseline: Option<BaselineStat>,
    pub org: OrgId,
    pub run_id: String,
}

/// Rolling listing-count statistic for one organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineStat {
    pub avg_count: f64,
    pub runs: u32,
    pub updated_at: DateTime<Utc>,
}

/// Pointer to a persisted artifact — batches reference, never copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub org: OrgId,
    pub run_id: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ApprovalState {
    Pending,
    Approved,
    Rejected { reason: String },
}

impl ApprovalState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalState::Pending)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ApprovalState::Pending => "pending",
            ApprovalState::Approved => "approved",
            ApprovalState::Rejected { .. } => "rejected",
        }
    }
}

/// Human-review grouping over already-produced artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: String,
    pub orgs: Vec<OrgId>,
    pub artifacts: Vec<ArtifactRef>,
    pub state: ApprovalState,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}
