pub mod config;
pub mod error;
pub mod types;
pub mod urlnorm;

pub use config::HarvestConfig;
pub use error::HarvestError;
pub use types::{
    ApprovalState, ArtifactRef, BaselineStat, BatchReport, EnrichmentStatus, FetchOutcome,
    FetchStatus, FetchSummary, JobListing, OrgId, Organization, QualityGateResult, RawListing,
    RunArtifact, SCHEMA_VERSION,
};
