//! [`Fetcher`] over a real HTTP client.

use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use crate::error::Result;
use crate::host::{FetchResponse, Fetcher, RequestOptions};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    /// Non-2xx answers are returned as responses, not errors; only transport
    /// failures fail.
    async fn get(&self, url: &str, _options: RequestOptions) -> Result<FetchResponse> {
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        trace!(url, status, "fetched");
        Ok(FetchResponse { status, body })
    }
}
