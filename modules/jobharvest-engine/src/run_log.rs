//! Run log — persisted JSON timeline of every action taken during a run.
//!
//! Each run produces a single `{DATA_DIR}/runs/{run_id}/run_log.json` file
//! containing an ordered list of events with timestamps.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use jobharvest_common::HarvestError;

use crate::stats::RunStats;

pub struct RunLog {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    inner: Mutex<Inner>,
}

struct Inner {
    events: Vec<RunEvent>,
    seq: u32,
}

#[derive(Serialize)]
struct RunEvent {
    seq: u32,
    ts: DateTime<Utc>,
    #[serde(flatten)]
    kind: EventKind,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    OrgStarted {
        org: String,
        adapter: String,
    },
    OrgFetched {
        org: String,
        raw_listings: u32,
        attempts: u32,
        duration_ms: u64,
    },
    ListingDropped {
        org: String,
        reason: String,
    },
    DuplicateCollapsed {
        org: String,
        url: String,
    },
    EnrichmentDone {
        org: String,
        status: String,
        enriched: u32,
        failed: u32,
        skipped: u32,
    },
    GateEvaluated {
        org: String,
        pass: bool,
        violations: Vec<String>,
    },
    OrgFailed {
        org: String,
        error: String,
    },
    ArtifactWritten {
        org: String,
        path: String,
    },
}

impl RunLog {
    pub fn new(run_id: String) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            inner: Mutex::new(Inner {
                events: Vec::new(),
                seq: 0,
            }),
        }
    }

    /// Append one event. Called from concurrent org workers.
    pub fn log(&self, kind: EventKind) {
        let mut inner = self.inner.lock().unwrap();
        let seq = inner.seq;
        inner.events.push(RunEvent {
            seq,
            ts: Utc::now(),
            kind,
        });
        inner.seq += 1;
    }

    /// Serialize the run log to JSON and write to disk.
    /// Returns the file path on success.
    pub fn save(&self, run_dir: &Path, stats: &RunStats) -> Result<PathBuf, HarvestError> {
        std::fs::create_dir_all(run_dir)?;
        let path = run_dir.join("run_log.json");

        let inner = self.inner.lock().unwrap();
        let output = SerializedRunLog {
            run_id: &self.run_id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            stats,
            events: &inner.events,
        };

        std::fs::write(&path, serde_json::to_string_pretty(&output)?)?;
        info!(path = %path.display(), events = inner.events.len(), "run log saved");

        Ok(path)
    }
}

#[derive(Serialize)]
struct SerializedRunLog<'a> {
    run_id: &'a str,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    stats: &'a RunStats,
    events: &'a [RunEvent],
}
