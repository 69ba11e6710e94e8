//! Gemini streaming client (`streamGenerateContent` over server-sent events).

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use reqwest_eventsource::{retry::Never, Event, EventSource};
use serde::{Deserialize, Serialize};

use super::error::LlmError;
use super::{GenerationRequest, TextGenerator, TextStream};

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

/// Gemini API client.
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiClient {
    /// Create a client for the public endpoint and default model.
    pub fn new(api_key: String) -> Self {
        Self::with_endpoint(api_key, DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL)
    }

    /// Create a client for a specific endpoint and model.
    pub fn with_endpoint(
        api_key: String,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: Client::new(),
            api_key,
            base_url,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn stream_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.model
        )
    }

    /// Turn an event-source failure into an `LlmError`, reading the error
    /// body when the provider sent one.
    async fn map_error(error: reqwest_eventsource::Error) -> LlmError {
        use reqwest_eventsource::Error as SseError;

        match error {
            SseError::InvalidStatusCode(status, response) => {
                let body = response.text().await.unwrap_or_default();
                LlmError::from_status(status.as_u16(), error_message(&body))
            }
            SseError::InvalidContentType(content_type, _) => LlmError::parse_error(format!(
                "Unexpected content type: {:?}",
                content_type
            )),
            SseError::Transport(e) => {
                if e.is_timeout() {
                    LlmError::network_error(format!("Request timeout: {}", e))
                } else if e.is_connect() {
                    LlmError::network_error(format!("Connection failed: {}", e))
                } else {
                    LlmError::network_error(format!("Request failed: {}", e))
                }
            }
            SseError::StreamEnded => {
                LlmError::network_error("Stream ended before it opened".to_string())
            }
            other => LlmError::parse_error(other.to_string()),
        }
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn stream_text(&self, request: &GenerationRequest) -> Result<TextStream, LlmError> {
        let body = GeminiRequest {
            system_instruction: GeminiContent {
                role: None,
                parts: vec![GeminiPart {
                    text: &request.system_instruction,
                }],
            },
            contents: vec![GeminiContent {
                role: Some("user"),
                parts: vec![GeminiPart {
                    text: &request.user_prompt,
                }],
            }],
        };

        let builder = self
            .client
            .post(self.stream_url())
            .header("x-goog-api-key", &self.api_key)
            .json(&body);

        let mut source = EventSource::new(builder)
            .map_err(|e| LlmError::network_error(format!("Request cannot be streamed: {}", e)))?;
        source.set_retry_policy(Box::new(Never));

        tracing::debug!("Opening Gemini stream: model={}", self.model);

        // Wait for the connection so failures before the first byte are
        // reported to the caller instead of inside the stream.
        let mut first_data = None;
        match source.next().await {
            Some(Ok(Event::Open)) => {}
            Some(Ok(Event::Message(message))) => first_data = Some(message.data),
            Some(Err(e)) => {
                source.close();
                let err = Self::map_error(e).await;
                tracing::error!("Gemini stream failed to open: {}", err);
                return Err(err);
            }
            None => {
                return Err(LlmError::network_error(
                    "Connection closed before the stream opened".to_string(),
                ))
            }
        }

        let stream = async_stream::stream! {
            let mut failed = false;
            if let Some(data) = first_data {
                match parse_chunk(&data) {
                    Ok(Some(text)) => yield Ok(text),
                    Ok(None) => {}
                    Err(e) => {
                        failed = true;
                        yield Err(e);
                    }
                }
            }

            while !failed {
                let Some(event) = source.next().await else {
                    break;
                };
                match event {
                    Ok(Event::Open) => {}
                    Ok(Event::Message(message)) => match parse_chunk(&message.data) {
                        Ok(Some(text)) => yield Ok(text),
                        Ok(None) => {}
                        Err(e) => {
                            failed = true;
                            yield Err(e);
                        }
                    },
                    Err(reqwest_eventsource::Error::StreamEnded) => break,
                    Err(e) => {
                        failed = true;
                        yield Err(GeminiClient::map_error(e).await);
                    }
                }
            }
            if failed {
                tracing::warn!("Gemini stream ended with an error");
            }
            source.close();
        };

        Ok(Box::pin(stream))
    }
}

/// Extract the text fragment carried by one SSE payload.
///
/// Returns `Ok(None)` for payloads with no visible text (usage-only chunks,
/// thought parts, empty deltas).
fn parse_chunk(data: &str) -> Result<Option<String>, LlmError> {
    let chunk: GeminiChunk = serde_json::from_str(data).map_err(|e| {
        LlmError::parse_error(format!("Failed to parse stream chunk: {}, data: {}", e, data))
    })?;

    if let Some(error) = chunk.error {
        return Err(LlmError::upstream(error.message));
    }
    if let Some(reason) = chunk.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(LlmError::upstream(format!("Prompt blocked: {}", reason)));
    }

    let text: String = chunk
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter(|p| !p.thought)
                .filter_map(|p| p.text)
                .collect()
        })
        .unwrap_or_default();

    Ok((!text.is_empty()).then_some(text))
}

/// Pull a readable message out of an error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let envelope = match &parsed {
        Some(serde_json::Value::Array(items)) => items.first(),
        other => other.as_ref(),
    };
    envelope
        .and_then(|v| v.get("error"))
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest<'a> {
    system_instruction: GeminiContent<'a>,
    contents: Vec<GeminiContent<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiContent<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiChunk {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    prompt_feedback: Option<GeminiPromptFeedback>,
    #[serde(default)]
    error: Option<GeminiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiCandidateContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    #[serde(default)]
    text: Option<String>,
    /// Set on reasoning parts of thinking models.
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorBody {
    #[serde(default)]
    message: String,
}
