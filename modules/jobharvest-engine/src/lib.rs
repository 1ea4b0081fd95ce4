//! Harvesting engine: resilient fetching, source adapters, the parallel run
//! coordinator, enrichment, quality gating and batch review.

pub mod adapter;
pub mod artifact;
pub mod baseline;
pub mod batch;
pub mod coordinator;
pub mod enrichment;
pub mod fetch;
pub mod gate;
pub mod registry;
pub mod run_log;
pub mod sources;
pub mod stats;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use adapter::{Adapter, AdapterError, JsonApiAdapter};
pub use artifact::ArtifactStore;
pub use baseline::{BaselineStore, FixedBaselines, JsonBaselineStore};
pub use batch::BatchReviewer;
pub use coordinator::{RunCoordinator, RunOptions, RunOutcome};
pub use enrichment::Enricher;
pub use fetch::{Fetcher, HttpTransport, RetryPolicy, Transport};
pub use gate::{GateConfig, QualityGate};
pub use registry::{AdapterRegistry, RegistryBuilder};
pub use run_log::RunLog;
pub use stats::RunStats;
