//! Product extraction on top of a schema-constrained language model.
//!
//! Both modes send the same instruction and schema. Whatever the model
//! returns is validated here; callers only ever see [`ExtractedItem`]s,
//! [`PartialExtractionState`]s or [`ExtractionError::Failed`].

use crate::fetch::RawContent;
use crate::llm::{ExtractionService, partial::parse_partial};
use crate::models::{ExtractedItem, PartialExtractionState, PartialItem};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("extraction failed: {0}")]
    Failed(String),
}

#[derive(Clone)]
pub struct Extractor {
    service: Arc<dyn ExtractionService>,
    max_items: usize,
    channel_capacity: usize,
    schema: Arc<Value>,
}

impl Extractor {
    pub fn new(
        service: Arc<dyn ExtractionService>,
        max_items: usize,
        channel_capacity: usize,
    ) -> Self {
        Self {
            service,
            max_items,
            channel_capacity: channel_capacity.max(1),
            schema: Arc::new(product_schema()),
        }
    }

    pub fn prompt(&self, content: &RawContent, query: &str) -> String {
        format!(
            "Extract the top {max} related products with their URLs from the following content related to the keyword: {query}.\n\
             For each product, provide its name and the full URL in a list.\n\n\
             Content:\n{content}",
            max = self.max_items,
            content = content.as_str(),
        )
    }

    /// Blocks until the model returns the whole list.
    pub async fn extract_all(
        &self,
        content: &RawContent,
        query: &str,
    ) -> Result<Vec<ExtractedItem>, ExtractionError> {
        let prompt = self.prompt(content, query);
        let value = self
            .service
            .generate_object(&prompt, &self.schema)
            .await
            .map_err(|err| ExtractionError::Failed(err.to_string()))?;
        let mut items = validate(value)?;
        items.truncate(self.max_items);
        Ok(items)
    }

    /// Opens a fresh extraction channel. Each `Partial` is the full list so far;
    /// the channel ends with exactly one `Final` or one error.
    pub fn extract_stream(&self, content: RawContent, query: &str) -> PartialStream {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let prompt = self.prompt(&content, query);
        let service = self.service.clone();
        let schema = self.schema.clone();
        let max_items = self.max_items;

        tokio::spawn(async move {
            produce(service, prompt, schema, max_items, tx).await;
        });

        PartialStream { rx, done: false }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionUpdate {
    Partial(PartialExtractionState),
    /// The whole document, strictly parsed and validated.
    Final(PartialExtractionState),
}

/// Consumer side of an extraction channel. Dropping it closes the channel.
pub struct PartialStream {
    rx: mpsc::Receiver<Result<ExtractionUpdate, ExtractionError>>,
    done: bool,
}

impl PartialStream {
    /// A channel that closes before `Final` or an error (producer panicked or
    /// was aborted) yields one `ExtractionError` instead of ending quietly.
    pub async fn next(&mut self) -> Option<Result<ExtractionUpdate, ExtractionError>> {
        if self.done {
            return None;
        }
        match self.rx.recv().await {
            Some(Ok(ExtractionUpdate::Partial(state))) => {
                Some(Ok(ExtractionUpdate::Partial(state)))
            }
            Some(terminal) => {
                self.done = true;
                Some(terminal)
            }
            None => {
                self.done = true;
                warn!(target = "halcon.extract", "producer_vanished");
                Some(Err(ExtractionError::Failed(
                    "extraction ended without a final result".into(),
                )))
            }
        }
    }

    pub fn close(&mut self) {
        self.rx.close();
    }
}

type UpdateSender = mpsc::Sender<Result<ExtractionUpdate, ExtractionError>>;

async fn produce(
    service: Arc<dyn ExtractionService>,
    prompt: String,
    schema: Arc<Value>,
    max_items: usize,
    tx: UpdateSender,
) {
    let mut deltas = match service.stream_object(&prompt, &schema).await {
        Ok(stream) => stream,
        Err(err) => {
            let _ = tx.send(Err(ExtractionError::Failed(err.to_string()))).await;
            return;
        }
    };

    let mut buffer = String::new();
    let mut last: Option<PartialExtractionState> = None;

    while let Some(delta) = deltas.next().await {
        let text = match delta {
            Ok(text) => text,
            Err(err) => {
                let _ = tx.send(Err(ExtractionError::Failed(err.to_string()))).await;
                return;
            }
        };
        buffer.push_str(&text);

        let Some(value) = parse_partial(&buffer) else {
            continue;
        };
        let mut state = partial_state(&value);
        state.products.truncate(max_items);
        if last.as_ref() == Some(&state) {
            continue;
        }
        last = Some(state.clone());
        if tx.send(Ok(ExtractionUpdate::Partial(state))).await.is_err() {
            debug!(target = "halcon.extract", "consumer_closed");
            return;
        }
    }

    let committed = serde_json::from_str::<Value>(&buffer)
        .map_err(|err| ExtractionError::Failed(format!("incomplete document: {err}")))
        .and_then(validate);
    match committed {
        Ok(mut items) => {
            items.truncate(max_items);
            let state = PartialExtractionState::from(items);
            let _ = tx.send(Ok(ExtractionUpdate::Final(state))).await;
        }
        Err(err) => {
            warn!(target = "halcon.extract", error = %err, "stream_final_invalid");
            let _ = tx.send(Err(err)).await;
        }
    }
}

fn product_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "products": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": {
                            "type": "string",
                            "description": "The name or title of the product"
                        },
                        "url": {
                            "type": "string",
                            "description": "The URL link to the product page"
                        }
                    },
                    "required": ["name", "url"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["products"],
        "additionalProperties": false
    })
}

#[derive(Debug, Deserialize)]
struct Envelope {
    products: Vec<ExtractedItem>,
}

fn validate(value: Value) -> Result<Vec<ExtractedItem>, ExtractionError> {
    let envelope: Envelope = serde_json::from_value(value)
        .map_err(|err| ExtractionError::Failed(format!("schema mismatch: {err}")))?;
    for (idx, item) in envelope.products.iter().enumerate() {
        if item.name.trim().is_empty() || item.url.trim().is_empty() {
            return Err(ExtractionError::Failed(format!(
                "schema mismatch: product {idx} has a blank field"
            )));
        }
    }
    Ok(envelope.products)
}

/// Reads whatever shape has arrived so far; unknown or mistyped parts are
/// treated as not yet written.
fn partial_state(value: &Value) -> PartialExtractionState {
    let products = value
        .get("products")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| PartialItem {
                    name: string_field(item, "name"),
                    url: string_field(item, "url"),
                })
                .collect()
        })
        .unwrap_or_default();
    PartialExtractionState { products }
}

fn string_field(item: &Value, key: &str) -> Option<String> {
    item.get(key).and_then(Value::as_str).map(str::to_string)
}
