pub mod openai;
pub mod partial;
pub mod streaming;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use thiserror::Error;

pub use openai::OpenAiClient;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("http error: {0}")]
    Http(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Stream of raw text deltas making up one JSON document.
pub type TextDeltaStream = BoxStream<'static, Result<String, LlmError>>;

/// Language-model service that answers with JSON conforming to a schema.
#[async_trait]
pub trait ExtractionService: Send + Sync {
    async fn generate_object(&self, prompt: &str, schema: &Value) -> Result<Value, LlmError>;

    async fn stream_object(&self, prompt: &str, schema: &Value)
    -> Result<TextDeltaStream, LlmError>;
}

/// Leading `max_chars` characters of `text`, for error messages.
pub(crate) fn excerpt(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}
