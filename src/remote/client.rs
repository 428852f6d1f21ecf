// HTTP dataset fetcher.
// Downloads a JSON document from a URL and hands it to the cache as a payload.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    Client, Response,
    header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT},
};
use tracing::debug;

use crate::error::{DataFileError, Result};
use crate::registry::DatasetFetcher;

use super::types::DatasetPayload;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT_VALUE: &str = concat!("datafiles/", env!("CARGO_PKG_VERSION"));

/// Fetches a dataset document over HTTP.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    url: String,
}

impl HttpFetcher {
    /// Create a fetcher for `url` with the default timeout.
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(DataFileError::Http)?;

        Ok(Self::with_client(client, url))
    }

    /// Share an existing client between fetchers.
    pub fn with_client(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Check response status and convert errors.
    async fn check_response(&self, key: &str, response: Response) -> Result<Response> {
        match response.status() {
            status if status.is_success() => Ok(response),
            status => Err(DataFileError::fetch(
                key,
                format!(
                    "HTTP {} from {}: {}",
                    status,
                    self.url,
                    response.text().await.unwrap_or_default()
                ),
            )),
        }
    }
}

#[async_trait]
impl DatasetFetcher for HttpFetcher {
    async fn fetch(&self, key: &str) -> Result<DatasetPayload> {
        debug!(key, url = %self.url, "Requesting data file");
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| DataFileError::fetch(key, e.to_string()))?;

        let response = self.check_response(key, response).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| DataFileError::fetch(key, e.to_string()))?;

        DatasetPayload::from_bytes(&body)
            .map_err(|e| DataFileError::fetch(key, format!("invalid JSON from {}: {}", self.url, e)))
    }
}
