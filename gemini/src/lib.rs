//! Minimal Google Gemini API client.
//!
//! This crate provides a focused client for Gemini's `generateContent` API with:
//! - Non-streaming and streaming completions
//! - Mixed text and image response modalities
//! - Proper SSE parsing for streaming responses
//!
//! Inline image data is base64 on the wire and raw bytes everywhere else.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use thiserror::Error;
use tokio_stream::Stream;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.5-flash-image-preview";

/// Errors that can occur when using the Gemini client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("API key not configured")]
    NoApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Type alias for a boxed stream of partial responses.
pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<Response, Error>> + Send>>;

/// Gemini API client.
#[derive(Clone)]
pub struct Gemini {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl Gemini {
    /// Create a new Gemini client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            api_key: api_key.into().trim().to_string(),
            model: DEFAULT_MODEL.to_string(),
            base_url: API_BASE.to_string(),
        }
    }

    /// Create a Gemini client from the GEMINI_API_KEY environment variable.
    pub fn from_env() -> Result<Self, Error> {
        let api_key = std::env::var("GEMINI_API_KEY").map_err(|_| Error::NoApiKey)?;
        if api_key.trim().is_empty() {
            return Err(Error::NoApiKey);
        }
        Ok(Self::new(api_key))
    }

    /// Set the default model for this client.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point the client at a different API root (proxies, test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// The default model used when a request does not name one.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send a completion request and return the full response.
    pub async fn complete(&self, request: Request) -> Result<Response, Error> {
        let url = self.endpoint(&request, "generateContent");
        let api_request = build_api_request(&request);
        let headers = self.build_headers()?;

        let response = self
            .client
            .post(url)
            .headers(headers)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: extract_error_message(&body),
            });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        convert_response(api_response)
    }

    /// Send a completion request and stream the partial responses.
    ///
    /// Each item is one `GenerateContentResponse` chunk; image parts usually
    /// arrive whole in a single chunk while text may be split across many.
    pub async fn stream(&self, request: Request) -> Result<ResponseStream, Error> {
        let url = format!("{}?alt=sse", self.endpoint(&request, "streamGenerateContent"));
        let api_request = build_api_request(&request);
        let headers = self.build_headers()?;

        let response = self
            .client
            .post(url)
            .headers(headers)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: extract_error_message(&body),
            });
        }

        // Raw bytes are buffered so a character split across chunks is
        // decoded only once its line is complete.
        let stream = response
            .bytes_stream()
            .scan(Vec::new(), |buffer, result| {
                let events = match result {
                    Ok(bytes) => {
                        buffer.extend_from_slice(&bytes);
                        parse_sse_events_buffered(buffer)
                    }
                    Err(e) => vec![Err(Error::Network(e.to_string()))],
                };
                futures::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(stream))
    }

    fn endpoint(&self, request: &Request, method: &str) -> String {
        let model = request.model.as_deref().unwrap_or(&self.model);
        format!("{}/models/{model}:{method}", self.base_url)
    }

    fn build_headers(&self) -> Result<HeaderMap, Error> {
        if self.api_key.is_empty() {
            return Err(Error::NoApiKey);
        }
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| Error::Config(format!("Invalid API key: {e}")))?,
        );
        Ok(headers)
    }
}

// ============================================================================
// Public types
// ============================================================================

/// A completion request to send to Gemini.
#[derive(Debug, Clone)]
pub struct Request {
    pub model: Option<String>,
    pub contents: Vec<Content>,
    pub response_modalities: Vec<Modality>,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<usize>,
}

impl Request {
    /// Create a new request with the given contents.
    pub fn new(contents: Vec<Content>) -> Self {
        Self {
            model: None,
            contents,
            response_modalities: vec![Modality::Text],
            temperature: None,
            max_output_tokens: None,
        }
    }

    /// Create a single-turn request from a user prompt.
    pub fn prompt(text: impl Into<String>) -> Self {
        Self::new(vec![Content::user(text)])
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_modalities(mut self, modalities: Vec<Modality>) -> Self {
        self.response_modalities = modalities;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: usize) -> Self {
        self.max_output_tokens = Some(max_output_tokens);
        self
    }
}

/// One turn of the conversation.
#[derive(Debug, Clone)]
pub struct Content {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Content {
    /// Create a user turn with text content.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part::Text(text.into())],
        }
    }

    /// Create a model turn with text content.
    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            parts: vec![Part::Text(text.into())],
        }
    }
}

/// The author of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Model,
}

impl Role {
    fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

/// Output kinds the model may produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modality {
    Text,
    Image,
}

impl Modality {
    fn as_str(&self) -> &'static str {
        match self {
            Modality::Text => "TEXT",
            Modality::Image => "IMAGE",
        }
    }
}

/// Binary payload attached to a part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineData {
    /// Media type reported by the API, if any.
    pub mime_type: Option<String>,
    /// Decoded bytes.
    pub data: Vec<u8>,
}

/// A piece of content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Text(String),
    InlineData(InlineData),
}

impl Part {
    /// Extract text from a Text part.
    pub fn as_text(&self) -> Option<&str> {
        if let Part::Text(text) = self {
            Some(text)
        } else {
            None
        }
    }

    /// Extract the payload from an InlineData part.
    pub fn as_inline_data(&self) -> Option<&InlineData> {
        if let Part::InlineData(data) = self {
            Some(data)
        } else {
            None
        }
    }
}

/// A completion response (or one streamed chunk of it).
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub candidates: Vec<Candidate>,
    pub usage: Option<Usage>,
    pub model_version: Option<String>,
}

impl Response {
    /// Text of the first candidate, concatenated.
    pub fn text(&self) -> String {
        self.parts()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("")
    }

    /// The first inline payload of the first candidate.
    pub fn inline_data(&self) -> Option<&InlineData> {
        self.parts().find_map(Part::as_inline_data)
    }

    /// Parts of the first candidate.
    pub fn parts(&self) -> impl Iterator<Item = &Part> {
        self.candidates
            .first()
            .map(|c| c.parts.iter())
            .into_iter()
            .flatten()
    }

    /// Why the first candidate stopped, if reported.
    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.candidates.first().and_then(|c| c.finish_reason)
    }
}

/// One generated alternative.
#[derive(Debug, Clone, Default)]
pub struct Candidate {
    pub parts: Vec<Part>,
    pub finish_reason: Option<FinishReason>,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    MaxTokens,
    Safety,
    Recitation,
    Other,
}

impl FinishReason {
    fn parse(s: &str) -> Self {
        match s {
            "STOP" => FinishReason::Stop,
            "MAX_TOKENS" => FinishReason::MaxTokens,
            "SAFETY" => FinishReason::Safety,
            "RECITATION" => FinishReason::Recitation,
            _ => FinishReason::Other,
        }
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub candidates_tokens: usize,
}

// ============================================================================
// Internal API types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiRequest {
    contents: Vec<ApiContent>,
    generation_config: ApiGenerationConfig,
}

#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ApiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<ApiPart>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ApiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<ApiInlineData>,
    /// Reasoning summaries; never surfaced as output text.
    #[serde(default, skip_serializing)]
    thought: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiInlineData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mime_type: Option<String>,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiGenerationConfig {
    response_modalities: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    #[serde(default)]
    candidates: Vec<ApiCandidate>,
    #[serde(default)]
    usage_metadata: Option<ApiUsage>,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiCandidate {
    #[serde(default)]
    content: Option<ApiContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiUsage {
    #[serde(default)]
    prompt_token_count: usize,
    #[serde(default)]
    candidates_token_count: usize,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

fn build_api_request(request: &Request) -> ApiRequest {
    let contents = request
        .contents
        .iter()
        .map(|c| ApiContent {
            role: Some(c.role.as_str().to_string()),
            parts: c.parts.iter().map(ApiPart::from).collect(),
        })
        .collect();

    ApiRequest {
        contents,
        generation_config: ApiGenerationConfig {
            response_modalities: request
                .response_modalities
                .iter()
                .map(Modality::as_str)
                .collect(),
            temperature: request.temperature,
            max_output_tokens: request.max_output_tokens,
        },
    }
}

impl From<&Part> for ApiPart {
    fn from(part: &Part) -> Self {
        match part {
            Part::Text(text) => ApiPart {
                text: Some(text.clone()),
                ..Default::default()
            },
            Part::InlineData(inline) => ApiPart {
                inline_data: Some(ApiInlineData {
                    mime_type: inline.mime_type.clone(),
                    data: BASE64.encode(&inline.data),
                }),
                ..Default::default()
            },
        }
    }
}

fn convert_response(api_response: ApiResponse) -> Result<Response, Error> {
    let mut candidates = Vec::with_capacity(api_response.candidates.len());

    for candidate in api_response.candidates {
        let mut parts = Vec::new();
        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if part.thought == Some(true) {
                continue;
            }
            if let Some(inline) = part.inline_data {
                let data = BASE64
                    .decode(inline.data.trim())
                    .map_err(|e| Error::Parse(format!("invalid inline data: {e}")))?;
                parts.push(Part::InlineData(InlineData {
                    mime_type: inline.mime_type,
                    data,
                }));
            } else if let Some(text) = part.text {
                parts.push(Part::Text(text));
            }
        }

        candidates.push(Candidate {
            parts,
            finish_reason: candidate.finish_reason.as_deref().map(FinishReason::parse),
        });
    }

    Ok(Response {
        candidates,
        usage: api_response.usage_metadata.map(|u| Usage {
            prompt_tokens: u.prompt_token_count,
            candidates_tokens: u.candidates_token_count,
        }),
        model_version: api_response.model_version,
    })
}

/// Pull the human-readable message out of an error body, falling back to the raw text.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<ApiErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| body.to_string())
}

/// Parse SSE events from a buffer, consuming complete events and leaving incomplete data.
///
/// Only `data:` lines carry payloads; everything else is SSE metadata. A line
/// whose JSON is cut off mid-object stays in the buffer until the next chunk.
fn parse_sse_events_buffered(buffer: &mut Vec<u8>) -> Vec<Result<Response, Error>> {
    let mut events = Vec::new();

    loop {
        let Some(newline_pos) = buffer.iter().position(|&b| b == b'\n') else {
            break;
        };

        let line = String::from_utf8_lossy(&buffer[..newline_pos]);
        let line = line.trim_end_matches('\r');

        if let Some(json_str) = line.strip_prefix("data:") {
            let json_str = json_str.trim_start();
            if !json_str.is_empty() && json_str != "[DONE]" {
                match serde_json::from_str::<ApiResponse>(json_str) {
                    Ok(event) => events.push(convert_response(event)),
                    Err(e) => {
                        if e.is_eof() {
                            break;
                        }
                        events.push(Err(Error::Parse(format!("SSE parse error: {e}"))));
                    }
                }
            }
        }

        buffer.drain(..=newline_pos);
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = Gemini::new("test-key");
        assert_eq!(client.model, DEFAULT_MODEL);
        assert_eq!(client.base_url, API_BASE);
    }

    #[test]
    fn test_client_with_model() {
        let client = Gemini::new("test-key").with_model("gemini-2.0-flash");
        assert_eq!(client.model(), "gemini-2.0-flash");
    }

    #[test]
    fn test_endpoint_uses_request_model_override() {
        let client = Gemini::new("k").with_base_url("http://localhost:9000/");
        let request = Request::prompt("hi").with_model("other-model");
        assert_eq!(
            client.endpoint(&request, "generateContent"),
            "http://localhost:9000/models/other-model:generateContent"
        );

        let request = Request::prompt("hi");
        assert_eq!(
            client.endpoint(&request, "streamGenerateContent"),
            format!("http://localhost:9000/models/{DEFAULT_MODEL}:streamGenerateContent")
        );
    }

    #[test]
    fn test_empty_key_is_rejected_before_sending() {
        let client = Gemini::new("   ");
        assert!(matches!(client.build_headers(), Err(Error::NoApiKey)));
    }

    #[test]
    fn test_request_serialization() {
        let request = Request::prompt("Draw a fox")
            .with_modalities(vec![Modality::Image, Modality::Text])
            .with_temperature(0.5);
        let json = serde_json::to_value(build_api_request(&request)).unwrap();

        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "Draw a fox");
        assert_eq!(
            json["generationConfig"]["responseModalities"],
            serde_json::json!(["IMAGE", "TEXT"])
        );
        assert_eq!(json["generationConfig"]["temperature"], 0.5);
        assert!(json["generationConfig"].get("maxOutputTokens").is_none());
    }

    #[test]
    fn test_inline_data_is_decoded() {
        let body = r#"{
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "A fox in the snow."},
                    {"inlineData": {"mimeType": "image/png", "data": "AQID"}}
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 3}
        }"#;
        let api: ApiResponse = serde_json::from_str(body).unwrap();
        let response = convert_response(api).unwrap();

        assert_eq!(response.text(), "A fox in the snow.");
        let inline = response.inline_data().unwrap();
        assert_eq!(inline.mime_type.as_deref(), Some("image/png"));
        assert_eq!(inline.data, vec![1, 2, 3]);
        assert_eq!(response.finish_reason(), Some(FinishReason::Stop));
        assert_eq!(response.usage.unwrap().prompt_tokens, 12);
    }

    #[test]
    fn test_invalid_inline_data_is_a_parse_error() {
        let body = r#"{"candidates":[{"content":{"parts":[{"inlineData":{"data":"!!!"}}]}}]}"#;
        let api: ApiResponse = serde_json::from_str(body).unwrap();
        assert!(matches!(convert_response(api), Err(Error::Parse(_))));
    }

    #[test]
    fn test_thought_parts_are_skipped() {
        let body = r#"{"candidates":[{"content":{"parts":[
            {"text":"planning...","thought":true},
            {"text":"Once upon a time"}
        ]}}]}"#;
        let api: ApiResponse = serde_json::from_str(body).unwrap();
        assert_eq!(convert_response(api).unwrap().text(), "Once upon a time");
    }

    #[test]
    fn test_sse_buffer_keeps_partial_lines() {
        let mut buffer = b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hel\"}]}}]}\r\n\r\ndata: {\"candidates\":[{\"con"
            .to_vec();
        let events = parse_sse_events_buffered(&mut buffer);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap().text(), "Hel");
        assert!(buffer.starts_with(b"data: {\"candidates\""));

        buffer.extend_from_slice(b"tent\":{\"parts\":[{\"text\":\"lo\"}]}}]}\n\n");
        let events = parse_sse_events_buffered(&mut buffer);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap().text(), "lo");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_sse_buffer_joins_split_characters() {
        let line = "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Café au lait\"}]}}]}\n\n";
        let bytes = line.as_bytes();
        let split = line.find('é').unwrap() + 1;

        let mut buffer = bytes[..split].to_vec();
        assert!(parse_sse_events_buffered(&mut buffer).is_empty());

        buffer.extend_from_slice(&bytes[split..]);
        let events = parse_sse_events_buffered(&mut buffer);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap().text(), "Café au lait");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_error_message_extraction() {
        let body = r#"{"error":{"code":400,"message":"API key not valid","status":"INVALID_ARGUMENT"}}"#;
        assert_eq!(extract_error_message(body), "API key not valid");
        assert_eq!(extract_error_message("plain failure"), "plain failure");
    }
}
