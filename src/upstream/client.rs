// =============================================================================
// Snapshot Client — REST reads that seed the live collections
// =============================================================================
//
// The console never writes through this client. It only pulls the position
// and watchlist collections that live events then update in place.
//
// SECURITY: the bearer token is sent as a header and never logged.
// =============================================================================

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::live::records::{PositionSnapshot, WatchlistRecord};
use crate::runtime_config::RuntimeConfig;

/// Read-only client for the upstream REST collections.
#[derive(Clone)]
pub struct SnapshotClient {
    positions_url: String,
    watchlist_url: String,
    client: reqwest::Client,
}

impl SnapshotClient {
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        if let Some(token) = &config.upstream_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .context("upstream token is not a valid header value")?;
            default_headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(config.request_timeout())
            .build()
            .context("failed to build reqwest client")?;

        debug!(base_url = %config.api_base_url, "SnapshotClient initialised");

        Ok(Self {
            positions_url: config.rest_endpoint("positions"),
            watchlist_url: config.rest_endpoint("watchlist"),
            client,
        })
    }

    /// GET /positions
    #[instrument(skip(self), name = "upstream::fetch_positions")]
    pub async fn fetch_positions(&self) -> Result<Vec<PositionSnapshot>> {
        self.get_collection(&self.positions_url).await
    }

    /// GET /watchlist
    #[instrument(skip(self), name = "upstream::fetch_watchlist")]
    pub async fn fetch_watchlist(&self) -> Result<Vec<WatchlistRecord>> {
        self.get_collection(&self.watchlist_url).await
    }

    async fn get_collection<T: DeserializeOwned>(&self, url: &str) -> Result<Vec<T>> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {url} request failed"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("GET {url} returned {status}: {body}");
        }

        let items: Vec<T> = resp
            .json()
            .await
            .with_context(|| format!("failed to parse collection from {url}"))?;

        debug!(url, count = items.len(), "collection retrieved");
        Ok(items)
    }
}
