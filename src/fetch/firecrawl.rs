use super::{ContentFetcher, FetchError, RawContent};
use crate::config::FetchConfig;
use crate::query::FetchTarget;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Firecrawl scrape adapter. Every call carries the same extraction options.
pub struct FirecrawlClient {
    http: Client,
    config: FetchConfig,
}

impl FirecrawlClient {
    pub fn new(http: Client, config: FetchConfig) -> Self {
        Self { http, config }
    }

    pub fn target_url(&self, target: &FetchTarget) -> String {
        format!("{}/{}", self.config.marketplace_url, target.path_segment())
    }

    fn scrape_request(&self, url: String) -> ScrapeRequest {
        ScrapeRequest {
            url,
            only_main_content: true,
            max_age: self.config.max_age.as_millis() as u64,
            proxy: "stealth",
            parsers: vec!["pdf"],
            formats: vec!["markdown"],
            wait_for: self.config.wait_for.as_millis() as u64,
        }
    }
}

#[async_trait]
impl ContentFetcher for FirecrawlClient {
    async fn fetch(&self, target: &FetchTarget) -> Result<RawContent, FetchError> {
        let url = self.target_url(target);
        let body = self.scrape_request(url.clone());
        debug!(target = "halcon.fetch", url = %url, "scrape_request");

        let response = self
            .http
            .post(format!("{}/v2/scrape", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| FetchError::Failed(err.to_string()))?;

        if !response.status().is_success() {
            return Err(FetchError::Failed(format!("HTTP {}", response.status())));
        }

        let payload: ScrapeResponse = response
            .json()
            .await
            .map_err(|err| FetchError::Failed(err.to_string()))?;

        payload.into_content(&url)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScrapeRequest {
    url: String,
    only_main_content: bool,
    max_age: u64,
    proxy: &'static str,
    parsers: Vec<&'static str>,
    formats: Vec<&'static str>,
    wait_for: u64,
}

#[derive(Debug, Deserialize)]
struct ScrapeResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: Option<ScrapeData>,
}

#[derive(Debug, Deserialize)]
struct ScrapeData {
    #[serde(default)]
    markdown: Option<String>,
}

impl ScrapeResponse {
    fn into_content(self, url: &str) -> Result<RawContent, FetchError> {
        if self.success == Some(false) {
            return Err(FetchError::Failed(
                self.error.unwrap_or_else(|| "scrape unsuccessful".into()),
            ));
        }
        match self.data.and_then(|d| d.markdown) {
            Some(markdown) if !markdown.trim().is_empty() => Ok(RawContent::new(markdown)),
            _ => Err(FetchError::Empty(url.to_string())),
        }
    }
}
