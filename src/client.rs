//! Typed client for the relay's generate endpoint.
//!
//! Turns the relay's byte stream into [`StreamEvent`]s. Every failure the
//! consumer could care about is reported in-band as an `error` event, so a
//! caller only ever drains one stream.

use futures::{Stream, StreamExt};
use reqwest::{RequestBuilder, Response, StatusCode};

use crate::api::types::GenerateRequest;
use crate::ndjson;
use crate::protocol::StreamEvent;

pub const EMPTY_BODY_ERROR: &str = "Response body is empty.";

/// HTTP client for a running relay.
#[derive(Debug, Clone)]
pub struct RelayClient {
    client: reqwest::Client,
    base_url: String,
}

impl RelayClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }

    /// Submit `query` and stream back the agent's events.
    ///
    /// `is_cancelled` is polled before each body read and before each event
    /// is yielded; once it returns true the stream ends and the response is
    /// dropped.
    pub fn generate_task_stream<C>(
        &self,
        query: &str,
        is_cancelled: C,
    ) -> impl Stream<Item = StreamEvent> + Send + 'static
    where
        C: Fn() -> bool + Send + 'static,
    {
        let request = self
            .client
            .post(self.generate_url())
            .json(&GenerateRequest::new(query));

        async_stream::stream! {
            match open(request).await {
                Err(event) => {
                    if !is_cancelled() {
                        yield event;
                    }
                }
                Ok(response) => {
                    let events = ndjson::decode_stream::<StreamEvent, _, _, _>(response.bytes_stream());
                    futures::pin_mut!(events);

                    loop {
                        // No body read once cancelled.
                        if is_cancelled() {
                            tracing::debug!("Event stream cancelled by consumer");
                            break;
                        }
                        let Some(item) = events.next().await else {
                            break;
                        };
                        if is_cancelled() {
                            tracing::debug!("Event stream cancelled by consumer");
                            break;
                        }
                        match item {
                            Ok(event) => yield event,
                            Err(e) => {
                                tracing::error!("Event stream failed: {}", e);
                                yield StreamEvent::error(format!("An error occurred: {}", e));
                                break;
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Send the request and vet the response before any body is read.
async fn open(request: RequestBuilder) -> Result<Response, StreamEvent> {
    let response = request.send().await.map_err(|e| {
        tracing::error!("Relay request failed: {}", e);
        StreamEvent::error(format!("An error occurred: {}", e))
    })?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        tracing::warn!("Relay returned {}: {}", status, text);
        return Err(StreamEvent::error(format!(
            "Server error: {} {}",
            status.as_u16(),
            text
        )));
    }

    if status == StatusCode::NO_CONTENT || response.content_length() == Some(0) {
        return Err(StreamEvent::error(EMPTY_BODY_ERROR));
    }

    Ok(response)
}
