use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScrapeParams {
    #[serde(default)]
    pub output_busqueda: Option<String>,
}

/// A single `{name, url}` record as guaranteed by the extraction service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedItem {
    pub name: String,
    pub url: String,
}

/// An item that may still be filling in while the extraction streams.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialItem {
    pub name: Option<String>,
    pub url: Option<String>,
}

impl PartialItem {
    pub fn is_complete(&self) -> bool {
        filled(&self.name) && filled(&self.url)
    }

    /// Missing fields become empty strings; used to assemble intermediate frames.
    pub fn to_item_lossy(&self) -> ExtractedItem {
        ExtractedItem {
            name: self.name.clone().unwrap_or_default(),
            url: self.url.clone().unwrap_or_default(),
        }
    }
}

impl From<ExtractedItem> for PartialItem {
    fn from(item: ExtractedItem) -> Self {
        Self {
            name: Some(item.name),
            url: Some(item.url),
        }
    }
}

fn filled(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

/// Accumulated extraction output. Earlier items are settled; only the last one
/// may still be incomplete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PartialExtractionState {
    pub products: Vec<PartialItem>,
}

impl PartialExtractionState {
    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn lossy_items(&self) -> Vec<ExtractedItem> {
        self.products.iter().map(PartialItem::to_item_lossy).collect()
    }

    /// Commits the state, failing on the first item with a blank field.
    pub fn into_complete(self) -> Result<Vec<ExtractedItem>, usize> {
        if let Some(idx) = self.products.iter().position(|item| !item.is_complete()) {
            return Err(idx);
        }
        Ok(self
            .products
            .into_iter()
            .map(|item| item.to_item_lossy())
            .collect())
    }
}

impl From<Vec<ExtractedItem>> for PartialExtractionState {
    fn from(items: Vec<ExtractedItem>) -> Self {
        Self {
            products: items.into_iter().map(PartialItem::from).collect(),
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductResult {
    pub title: String,
    pub price: f64,
    pub currency: String,
    pub condition: String,
    pub thumbnail: Option<String>,
    pub url: String,
    pub seller_reputation: Option<String>,
    pub free_shipping: bool,
    pub location: Option<String>,
}

/// Condition filter echoed in `structured_request`. The scrape pipeline never
/// narrows by condition, so `any` is the only value it produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductCondition {
    Any,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredRequest {
    pub product_name: String,
    pub condition: ProductCondition,
    pub num_results: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub success: bool,
    pub query: String,
    pub structured_request: StructuredRequest,
    pub results: Vec<ProductResult>,
    pub total_found: usize,
    pub execution_time_ms: f64,
    pub timestamp: DateTime<Utc>,
}

/// One SSE frame: the assembled response plus the raw state it was built from.
#[derive(Debug, Clone, Serialize)]
pub struct StreamFrame {
    #[serde(flatten)]
    pub response: SearchResponse,
    pub products: Vec<PartialItem>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}
