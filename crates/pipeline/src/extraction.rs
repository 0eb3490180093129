use base64::{engine::general_purpose, Engine as _};
use kesef_import::{ExtractionBackend, ExtractionError, ExtractionRequest, ExtractionResponse};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

pub const TOOL_NAME: &str = "extract_transactions";

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    /// JSON-encoded arguments, as a string.
    arguments: String,
}

/// Pull the forced tool call out of a completion and decode its arguments.
fn decode_tool_call(response: ChatCompletionResponse) -> Result<ExtractionResponse, ExtractionError> {
    let call = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.tool_calls?.into_iter().next())
        .ok_or(ExtractionError::NoToolCall)?;
    Ok(serde_json::from_str(&call.function.arguments)?)
}

/// Structured extraction through an OpenAI-compatible `/chat/completions`
/// endpoint that supports function tools and file parts given as data URLs.
#[derive(Clone)]
pub struct ChatCompletionsExtractor {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl ChatCompletionsExtractor {
    pub fn new(
        endpoint: &str,
        model: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, ExtractionError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|_| ExtractionError::Request("API key is not a valid header value".into()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .pool_max_idle_per_host(2)
            .build()
            .map_err(|e| ExtractionError::Request(e.to_string()))?;

        Ok(Self {
            client,
            url: format!("{}/chat/completions", endpoint.trim_end_matches('/')),
            model: model.to_string(),
        })
    }

    fn request_body(&self, request: &ExtractionRequest) -> Value {
        let encoded = general_purpose::STANDARD.encode(&request.document);
        json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": request.instruction },
                    {
                        "type": "image_url",
                        "image_url": { "url": format!("data:{};base64,{encoded}", request.mime_type) }
                    }
                ]
            }],
            "tools": [{
                "type": "function",
                "function": {
                    "name": TOOL_NAME,
                    "description": "Extract structured transaction data from a bank or credit card statement",
                    "parameters": request.schema
                }
            }],
            "tool_choice": { "type": "function", "function": { "name": TOOL_NAME } }
        })
    }
}

impl ExtractionBackend for ChatCompletionsExtractor {
    async fn extract(&self, request: ExtractionRequest) -> Result<ExtractionResponse, ExtractionError> {
        let body = self.request_body(&request);
        tracing::debug!(url = %self.url, model = %self.model, bytes = request.document.len(), "requesting extraction");

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExtractionError::Request("request timed out".into())
                } else {
                    ExtractionError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), %body, "extraction service error");
            return Err(ExtractionError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let data: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ExtractionError::Decode(e.to_string()))?;
        let extracted = decode_tool_call(data)?;
        tracing::info!(transactions = extracted.transactions.len(), "extraction response received");
        Ok(extracted)
    }
}
