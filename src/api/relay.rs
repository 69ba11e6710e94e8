//! `POST /api/generate`: pipe upstream text fragments to the client.
//!
//! Fragments are forwarded as they arrive. The relay does not buffer or
//! validate them; reassembling NDJSON lines is the client's job.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
};
use futures::{Stream, StreamExt};
use uuid::Uuid;

use super::error::ApiError;
use super::routes::AppState;
use super::types::GenerateRequest;
use crate::llm::{GenerationRequest, TextStream};

pub const STREAM_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

pub async fn generate(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let query = GenerateRequest::query_from_body(&body).ok_or(ApiError::MissingQuery)?;

    let Some(generator) = state.generator.as_ref() else {
        tracing::error!("Generate request refused: API_KEY is not configured");
        return Err(ApiError::MissingCredential);
    };

    let request_id = Uuid::new_v4();
    tracing::info!(%request_id, query_chars = query.chars().count(), "Opening upstream stream");

    let upstream = generator
        .stream_text(&GenerationRequest::for_task(&query))
        .await
        .map_err(|e| {
            tracing::error!(%request_id, error = %e, "Upstream call failed before streaming");
            ApiError::Upstream(e)
        })?;

    let mut response = Body::from_stream(relay_body(upstream, request_id)).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(STREAM_CONTENT_TYPE));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    Ok(response)
}

/// Forward non-empty fragments until the upstream ends or fails.
///
/// Once headers are out an error can no longer change the status, so a
/// mid-stream failure just ends the body.
fn relay_body(
    mut upstream: TextStream,
    request_id: Uuid,
) -> impl Stream<Item = Result<Bytes, Infallible>> {
    async_stream::stream! {
        let mut fragments = 0usize;
        let mut bytes = 0usize;

        while let Some(item) = upstream.next().await {
            match item {
                Ok(text) => {
                    if text.is_empty() {
                        continue;
                    }
                    fragments += 1;
                    bytes += text.len();
                    yield Ok(Bytes::from(text));
                }
                Err(e) => {
                    tracing::warn!(%request_id, error = %e, "Upstream failed mid-stream, closing response");
                    break;
                }
            }
        }

        tracing::info!(%request_id, fragments, bytes, "Relay stream finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use futures::stream;

    #[tokio::test]
    async fn test_relay_body_forwards_verbatim_and_skips_empty() {
        let upstream: TextStream = Box::pin(stream::iter(vec![
            Ok("{\"type\":\"sta".to_string()),
            Ok(String::new()),
            Ok("tus\",\"message\":\"x\"}\n".to_string()),
        ]));
        let chunks: Vec<Bytes> = relay_body(upstream, Uuid::new_v4())
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(
            chunks,
            vec![
                Bytes::from_static(b"{\"type\":\"sta"),
                Bytes::from_static(b"tus\",\"message\":\"x\"}\n"),
            ]
        );
    }

    #[tokio::test]
    async fn test_relay_body_stops_at_upstream_error() {
        let upstream: TextStream = Box::pin(stream::iter(vec![
            Ok("first".to_string()),
            Err(LlmError::network_error("reset".to_string())),
            Ok("never sent".to_string()),
        ]));
        let chunks: Vec<Bytes> = relay_body(upstream, Uuid::new_v4())
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(chunks, vec![Bytes::from_static(b"first")]);
    }
}
