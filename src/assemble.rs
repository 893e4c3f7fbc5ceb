use crate::models::{
    ExtractedItem, ProductCondition, ProductResult, SearchResponse, StructuredRequest,
};
use chrono::Utc;
use std::time::Instant;

pub const DEFAULT_CONDITION: &str = "Nuevo";

/// Maps extracted `{name, url}` records onto the response contract. Fields the
/// extraction step never produces get fixed defaults.
#[derive(Debug, Clone)]
pub struct Assembler {
    currency: String,
    results_cap: usize,
}

impl Assembler {
    pub fn new(currency: impl Into<String>, results_cap: usize) -> Self {
        Self {
            currency: currency.into(),
            results_cap,
        }
    }

    pub fn assemble(&self, items: &[ExtractedItem], query: &str, started: Instant) -> SearchResponse {
        let results: Vec<ProductResult> = items.iter().map(|item| self.product(item)).collect();
        let total_found = results.len();
        SearchResponse {
            success: true,
            query: query.to_string(),
            structured_request: StructuredRequest {
                product_name: query.to_string(),
                condition: ProductCondition::Any,
                num_results: if total_found == 0 {
                    self.results_cap
                } else {
                    total_found
                },
            },
            results,
            total_found,
            execution_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            timestamp: Utc::now(),
        }
    }

    fn product(&self, item: &ExtractedItem) -> ProductResult {
        ProductResult {
            title: item.name.clone(),
            price: 0.0,
            currency: self.currency.clone(),
            condition: DEFAULT_CONDITION.to_string(),
            thumbnail: None,
            url: item.url.clone(),
            seller_reputation: None,
            free_shipping: false,
            location: None,
        }
    }
}
