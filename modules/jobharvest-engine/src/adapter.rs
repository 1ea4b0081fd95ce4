//! Adapter contract: one capability, produce raw listings for one
//! organization. Whether that takes a single page fetch, a pagination loop or
//! a browser session is invisible to the run coordinator.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use jobharvest_common::{HarvestError, RawListing};

use crate::fetch::{FetchFailure, FetchTarget, Fetcher};

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("network: {error}")]
    Network {
        #[source]
        error: HarvestError,
        attempts: u32,
    },
    #[error("parse: {0}")]
    Parse(String),
    #[error("contract: {0}")]
    Contract(String),
}

impl AdapterError {
    pub fn into_harvest(self) -> HarvestError {
        match self {
            AdapterError::Network { error, .. } => error,
            AdapterError::Parse(msg) | AdapterError::Contract(msg) => {
                HarvestError::ContractViolation(msg)
            }
        }
    }
}

impl From<FetchFailure> for AdapterError {
    fn from(failure: FetchFailure) -> Self {
        AdapterError::Network {
            error: failure.error,
            attempts: failure.attempts,
        }
    }
}

/// Source-specific extraction logic for one organization.
#[async_trait]
pub trait Adapter: Send + Sync {
    async fn fetch(&self, fetcher: &Fetcher) -> Result<Vec<RawListing>, AdapterError>;
    fn name(&self) -> &str;
}

/// One page of adapter output plus the server-reported total, if any.
#[derive(Debug, Default)]
pub struct Page {
    pub listings: Vec<RawListing>,
    pub total: Option<usize>,
}

impl Page {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Upper bound on pagination for servers that keep returning the same page.
pub const MAX_PAGES: u32 = 200;

/// Drive a pagination loop: yield pages lazily, stop on the first empty page
/// or once the reported total is reached. Carries no delay policy of its own —
/// the coordinator's per-organization timeout wraps the whole loop.
pub async fn drain_pages<F, Fut>(
    max_pages: u32,
    mut fetch_page: F,
) -> Result<Vec<RawListing>, AdapterError>
where
    F: FnMut(u32, usize) -> Fut,
    Fut: std::future::Future<Output = Result<Page, AdapterError>>,
{
    let mut all = Vec::new();
    for page in 0..max_pages {
        let fetched = fetch_page(page, all.len()).await?;
        if fetched.listings.is_empty() {
            break;
        }
        all.extend(fetched.listings);
        if let Some(total) = fetched.total {
            if all.len() >= total {
                break;
            }
        }
    }
    Ok(all)
}

// --- JSON API adapter ---

/// Paginated JSON vacancy API, the shape used by several hosted career
/// portals: POST `{limit, offset}` against a search endpoint, read
/// `jobPostings` out of the response until `total` is reached.
pub struct JsonApiAdapter {
    name: String,
    base_url: String,
    api_url: String,
    page_size: usize,
}

#[derive(Debug, Deserialize)]
struct JsonApiResponse {
    #[serde(default, rename = "jobPostings")]
    job_postings: Vec<JsonApiPosting>,
    #[serde(default)]
    total: usize,
}

#[derive(Debug, Deserialize)]
struct JsonApiPosting {
    #[serde(default)]
    title: String,
    #[serde(default, rename = "externalPath")]
    external_path: String,
    #[serde(default, rename = "locationsText")]
    locations_text: String,
}

impl JsonApiAdapter {
    pub fn new(name: &str, base_url: &str, api_url: &str) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_url: api_url.to_string(),
            page_size: 20,
        }
    }

    /// Tenant site segment, e.g. `/External` from `…/External/jobs`.
    /// Detail paths from the API commonly start at `/job/…` and need it
    /// prepended.
    fn site_prefix(&self) -> String {
        let parts: Vec<&str> = self.api_url.trim_end_matches('/').split('/').collect();
        match parts.len().checked_sub(2).and_then(|i| parts.get(i)) {
            Some(site) if !site.is_empty() => format!("/{site}"),
            _ => "/External".to_string(),
        }
    }

    fn to_raw(&self, posting: JsonApiPosting, site_prefix: &str) -> RawListing {
        let mut path = posting.external_path;
        if !path.is_empty() && !path.starts_with('/') {
            path.insert(0, '/');
        }
        let full_path = if path.starts_with(&format!("{site_prefix}/")) {
            path
        } else {
            format!("{site_prefix}{path}")
        };
        let mut raw = RawListing::new(&posting.title, &format!("{}{}", self.base_url, full_path));
        if !posting.locations_text.is_empty() {
            raw = raw.with_extra("location", &posting.locations_text);
        }
        raw
    }
}

#[async_trait]
impl Adapter for JsonApiAdapter {
    async fn fetch(&self, fetcher: &Fetcher) -> Result<Vec<RawListing>, AdapterError> {
        let site_prefix = self.site_prefix();
        let site_prefix = &site_prefix;
        drain_pages(MAX_PAGES, |page, _collected| {
            let payload = serde_json::json!({
                "appliedFacets": {},
                "limit": self.page_size,
                "offset": page as usize * self.page_size,
                "searchText": "",
            });
            let target = FetchTarget::post_json(&self.api_url, payload)
                .with_header("Accept", "application/json");
            async move {
                let resp = fetcher.fetch(&target).await.map_err(AdapterError::from)?;
                let parsed: JsonApiResponse = match serde_json::from_str(&resp.body) {
                    Ok(parsed) => parsed,
                    // Some tenants intermittently serve an HTML maintenance
                    // page; end pagination instead of failing the org.
                    Err(_) => return Ok(Page::empty()),
                };
                let listings = parsed
                    .job_postings
                    .into_iter()
                    .map(|p| self.to_raw(p, site_prefix))
                    .collect();
                Ok(Page {
                    listings,
                    total: Some(parsed.total),
                })
            }
        })
        .await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
