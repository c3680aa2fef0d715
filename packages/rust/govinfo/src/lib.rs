//! GovInfo bill API client: collection paging, package detail resolution,
//! and bill-status XML parsing.
//!
//! This crate provides:
//! - [`GovInfoClient`]: shared HTTP client that appends the API key to every call
//! - [`collection`]: cursor-following collection fetcher
//! - [`detail`]: per-package detail + status resolution, with bounded fan-out
//! - [`status`]: explicit-shape bill-status document parser

pub mod collection;
pub mod detail;
pub mod status;

use std::time::Duration;

use billsync_shared::{ApiConfig, BillSyncError, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::debug;

pub use detail::{Resolution, ResolveOutcome};
pub use status::{BillStatus, StatusMember, parse_bill_status};

/// User-Agent string for API requests.
const USER_AGENT: &str = concat!("billsync/", env!("CARGO_PKG_VERSION"));

/// Maximum number of redirects to follow.
const MAX_REDIRECTS: usize = 5;

/// Connection settings for [`GovInfoClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Collections endpoint root, e.g. `https://api.govinfo.gov/collections`.
    pub base_url: String,
    /// Collection code, e.g. `BILLS`.
    pub collection: String,
    pub api_key: String,
    pub congress: u32,
    pub page_size: u32,
    pub timeout_secs: u64,
}

impl ClientOptions {
    /// Build options from the `[api]` config section and a resolved key.
    pub fn from_config(api: &ApiConfig, api_key: String) -> Self {
        Self {
            base_url: api.base_url.clone(),
            collection: api.collection.clone(),
            api_key,
            congress: api.congress,
            page_size: api.page_size,
            timeout_secs: api.timeout_secs,
        }
    }
}

/// HTTP client for the bill API. Cheap to share by reference.
pub struct GovInfoClient {
    client: Client,
    opts: ClientOptions,
}

impl GovInfoClient {
    /// Create a client with a per-request timeout.
    pub fn new(opts: ClientOptions) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(Duration::from_secs(opts.timeout_secs))
            .build()
            .map_err(|e| BillSyncError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, opts })
    }

    pub fn options(&self) -> &ClientOptions {
        &self.opts
    }

    /// GET `url` with `query` plus the API key, returning the body text.
    async fn get_text(&self, url: &str, query: &[(&str, String)]) -> Result<String> {
        debug!(%url, "GET");

        let response = self
            .client
            .get(url)
            .query(query)
            .query(&[("api_key", self.opts.api_key.as_str())])
            .send()
            .await
            .map_err(|e| BillSyncError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BillSyncError::Network(format!("{url}: HTTP {status}")));
        }

        response
            .text()
            .await
            .map_err(|e| BillSyncError::Network(format!("{url}: body read failed: {e}")))
    }

    /// GET `url` and decode the body as JSON.
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let body = self.get_text(url, query).await?;
        serde_json::from_str(&body)
            .map_err(|e| BillSyncError::parse(format!("{url}: unexpected JSON: {e}")))
    }
}
