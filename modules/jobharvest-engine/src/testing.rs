//! Test support: scripted transports and canned adapters. Compiled only for
//! tests and the `test-support` feature.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use jobharvest_common::{HarvestError, RawListing};

use crate::adapter::{Adapter, AdapterError};
use crate::fetch::{FetchTarget, Fetcher, Transport, TransportResponse};

/// Transport that plays back a scripted sequence of results.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<TransportResponse, HarvestError>>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Result<TransportResponse, HarvestError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
        })
    }

    /// Transport for runs that must not touch the network at all.
    pub fn unreachable() -> Arc<Self> {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, _target: &FetchTarget) -> Result<TransportResponse, HarvestError> {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .expect("scripted transport ran out of responses")
    }
}

pub fn status(status: u16) -> Result<TransportResponse, HarvestError> {
    Ok(TransportResponse {
        status,
        retry_after: None,
        body: String::new(),
    })
}

pub fn ok_body(body: &str) -> Result<TransportResponse, HarvestError> {
    Ok(TransportResponse {
        status: 200,
        retry_after: None,
        body: body.to_string(),
    })
}

pub fn json_body(body: &str) -> Result<TransportResponse, HarvestError> {
    ok_body(body)
}

/// Adapter yielding the same canned listings on every run.
pub struct StaticAdapter {
    name: String,
    listings: Vec<RawListing>,
}

impl StaticAdapter {
    pub fn new(name: &str, listings: Vec<RawListing>) -> Self {
        Self {
            name: name.to_string(),
            listings,
        }
    }
}

#[async_trait]
impl Adapter for StaticAdapter {
    async fn fetch(&self, _fetcher: &Fetcher) -> Result<Vec<RawListing>, AdapterError> {
        Ok(self.listings.clone())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Adapter that issues one fetch through the resilient fetcher and maps the
/// failure, for exercising retry/attempt accounting end to end.
pub struct SingleFetchAdapter {
    name: String,
    url: String,
    listings: Vec<RawListing>,
}

impl SingleFetchAdapter {
    pub fn new(name: &str, url: &str, listings: Vec<RawListing>) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            listings,
        }
    }
}

#[async_trait]
impl Adapter for SingleFetchAdapter {
    async fn fetch(&self, fetcher: &Fetcher) -> Result<Vec<RawListing>, AdapterError> {
        fetcher
            .fetch(&FetchTarget::get(&self.url))
            .await
            .map_err(AdapterError::from)?;
        Ok(self.listings.clone())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Adapter that never completes within any sane org timeout.
pub struct StalledAdapter {
    name: String,
}

impl StalledAdapter {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl Adapter for StalledAdapter {
    async fn fetch(&self, _fetcher: &Fetcher) -> Result<Vec<RawListing>, AdapterError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
