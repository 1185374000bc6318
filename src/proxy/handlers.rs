//! HTTP request handlers.

use axum::{
    body::Bytes,
    extract::{Extension, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;

use super::relay::relay_body;
use super::server::{AppState, RequestId};
use super::types::{ChatRequest, UpstreamRequest};
use crate::error::Error;

/// Fixed application identifier sent upstream with every request.
const APP_TITLE: &str = "AI Persona Cards";

/// Upstream attribution headers (OpenRouter convention).
const REFERER_HEADER: &str = "HTTP-Referer";
const TITLE_HEADER: &str = "X-Title";

/// Cap on how much of an upstream error body is read for message extraction.
const MAX_ERROR_BODY_BYTES: usize = 64 * 1024;

/// Fallback when upstream's error body yields no message.
const GENERIC_UPSTREAM_ERROR: &str = "API call failed";

/// Handle POST /api/chat
///
/// Forwards the reshaped request to the configured upstream endpoint and
/// streams the response back as line-framed `text/event-stream` output.
/// Failures before streaming begins surface as a single `{error, status}`
/// JSON body; once streaming has started, an upstream fault only ends the
/// stream.
pub async fn chat(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, Error> {
    // The body is parsed by hand rather than via the Json extractor so a
    // malformed payload maps to this service's own error contract.
    let request: ChatRequest =
        serde_json::from_slice(&body).map_err(|e| Error::MalformedRequest(e.to_string()))?;

    let api_key = state
        .config
        .upstream
        .api_key
        .as_ref()
        .ok_or(Error::MissingApiKey)?;

    let upstream = UpstreamRequest::new(&request, &state.config.upstream.default_model);

    tracing::info!(
        request_id = %request_id,
        model = %upstream.model,
        messages = upstream.messages.len(),
        "Forwarding chat request upstream"
    );

    let mut upstream_call = state
        .http_client
        .post(&state.config.upstream.url)
        .header(
            header::AUTHORIZATION,
            format!("Bearer {}", api_key.expose_secret()),
        )
        .header(header::CONTENT_TYPE, "application/json")
        .header(TITLE_HEADER, APP_TITLE)
        .json(&upstream);

    // Attribution passthrough: the client's own Origin becomes the referer.
    if let Some(origin) = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok()) {
        upstream_call = upstream_call.header(REFERER_HEADER, origin);
    }

    let upstream_response = upstream_call.send().await.map_err(|e| {
        tracing::error!(request_id = %request_id, error = %e, "Failed to reach upstream");
        Error::Upstream(e)
    })?;

    let status = upstream_response.status();
    if status != StatusCode::OK {
        let message = upstream_error_message(upstream_response).await;
        tracing::error!(
            request_id = %request_id,
            status = %status,
            message = %message,
            "Upstream rejected request"
        );
        return Err(Error::UpstreamRejection {
            status: status.as_u16(),
            message,
        });
    }

    // 200: start relaying immediately, before upstream has finished sending.
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(relay_body(upstream_response.bytes_stream()))
        .unwrap();

    Ok(response)
}

/// Read at most [`MAX_ERROR_BODY_BYTES`] of a non-200 upstream body and
/// extract a human-readable message from it.
async fn upstream_error_message(response: reqwest::Response) -> String {
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(bytes) = chunk else { break };
        body.extend_from_slice(&bytes);
        if body.len() >= MAX_ERROR_BODY_BYTES {
            break;
        }
    }
    error_message_from_body(&body).unwrap_or_else(|| GENERIC_UPSTREAM_ERROR.to_string())
}

/// Best-effort `error.message` extraction from a JSON error body.
fn error_message_from_body(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value
        .pointer("/error/message")
        .and_then(|m| m.as_str())
        .map(str::to_owned)
}

/// Handle GET /health
///
/// Reports process status and whether an upstream key is configured. Never
/// contacts upstream.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "api_key_configured": state.config.upstream.api_key.is_some(),
    }))
}
