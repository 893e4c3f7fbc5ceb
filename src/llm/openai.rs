use super::streaming::DeltaStream;
use super::{ExtractionService, LlmError, TextDeltaStream};
use crate::config::LlmConfig;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const SCHEMA_NAME: &str = "product_list";

/// Chat-completions client using strict JSON-schema structured output.
pub struct OpenAiClient {
    http: Client,
    config: LlmConfig,
}

impl OpenAiClient {
    pub fn new(http: Client, config: LlmConfig) -> Self {
        Self { http, config }
    }

    fn request(&self, prompt: &str, schema: &Value, stream: bool) -> RequestBuilder {
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            response_format: ResponseFormat {
                r#type: "json_schema",
                json_schema: JsonSchemaFormat {
                    name: SCHEMA_NAME,
                    strict: true,
                    schema,
                },
            },
            stream,
        };
        self.http
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&body)
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, LlmError> {
        let response = request
            .send()
            .await
            .map_err(|err| LlmError::Http(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Http(format!(
                "HTTP {status}: {}",
                super::excerpt(&text, 200)
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl ExtractionService for OpenAiClient {
    async fn generate_object(&self, prompt: &str, schema: &Value) -> Result<Value, LlmError> {
        let response = self.send(self.request(prompt, schema, false)).await?;
        let payload: ChatResponse = response
            .json()
            .await
            .map_err(|err| LlmError::InvalidResponse(err.to_string()))?;
        payload.into_object()
    }

    async fn stream_object(
        &self,
        prompt: &str,
        schema: &Value,
    ) -> Result<TextDeltaStream, LlmError> {
        let response = self.send(self.request(prompt, schema, true)).await?;
        Ok(DeltaStream::new(response.bytes_stream()).boxed())
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    response_format: ResponseFormat<'a>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat<'a> {
    r#type: &'static str,
    json_schema: JsonSchemaFormat<'a>,
}

#[derive(Debug, Serialize)]
struct JsonSchemaFormat<'a> {
    name: &'static str,
    strict: bool,
    schema: &'a Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

impl ChatResponse {
    fn into_object(self) -> Result<Value, LlmError> {
        let message = self
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| LlmError::InvalidResponse("no choices".into()))?;
        if let Some(refusal) = message.refusal {
            return Err(LlmError::InvalidResponse(format!("refused: {refusal}")));
        }
        let text = message
            .content
            .ok_or_else(|| LlmError::InvalidResponse("missing content".into()))?;
        serde_json::from_str(&text).map_err(|err| LlmError::InvalidResponse(err.to_string()))
    }
}
