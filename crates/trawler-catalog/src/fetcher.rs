//! HTTP document fetcher.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::storage::DocumentFetcher;
use crate::{CatalogError, Result};

/// Configuration for [`HttpFetcher`].
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub timeout: Duration,
    pub user_agent: String,
    /// Bodies longer than this are truncated (at a char boundary).
    pub max_document_bytes: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: "MCP-Tool-Crawler/1.0".to_string(),
            max_document_bytes: 512 * 1024,
        }
    }
}

/// Fetches documents over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    config: FetchConfig,
}

impl HttpFetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| CatalogError::InvalidData(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl DocumentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        tracing::debug!(url, "Fetching document");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CatalogError::fetch(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::fetch(url, format!("HTTP {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| CatalogError::fetch(url, e))?;
        Ok(truncate_at_char_boundary(body, self.config.max_document_bytes))
    }
}

/// Cut `text` to at most `max_bytes` without splitting a character.
pub fn truncate_at_char_boundary(mut text: String, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
    text
}
