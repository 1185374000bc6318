//! Client request and upstream payload types.

use serde::{Deserialize, Serialize};

/// Chat request submitted by the client.
///
/// Message semantics are opaque to the relay: elements are kept as raw JSON
/// so content shapes the relay has never heard of (multimodal parts, tool
/// calls) survive passthrough untouched. Validating conversational structure
/// is upstream's job.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<serde_json::Value>,
    pub model: Option<String>,
}

/// Payload forwarded to the upstream chat-completions endpoint.
///
/// Borrows the client request; adds the forced `stream: true` flag and
/// substitutes the configured default model when the client named none.
#[derive(Debug, Serialize)]
pub struct UpstreamRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [serde_json::Value],
    pub stream: bool,
}

impl<'a> UpstreamRequest<'a> {
    pub fn new(request: &'a ChatRequest, default_model: &'a str) -> Self {
        Self {
            model: request.model.as_deref().unwrap_or(default_model),
            messages: &request.messages,
            stream: true,
        }
    }
}
