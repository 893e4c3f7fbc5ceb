pub mod firecrawl;

use crate::query::FetchTarget;
use async_trait::async_trait;
use thiserror::Error;

pub use firecrawl::FirecrawlClient;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetch failed: {0}")]
    Failed(String),
    #[error("fetch returned no content for {0}")]
    Empty(String),
}

/// Rendered page text. Never inspected here beyond handing it to extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawContent(String);

impl RawContent {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, target: &FetchTarget) -> Result<RawContent, FetchError>;
}
