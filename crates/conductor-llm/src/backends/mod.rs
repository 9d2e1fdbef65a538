/// Anthropic Messages.
pub mod anthropic;
/// Ollama generate.
pub mod ollama;
/// OpenAI-compatible chat completions.
pub mod openai;

use crate::config::{ProviderConfig, ProviderKind};
use crate::model::ModelReply;
use conductor_core::ProviderError;

/// Resolved generation parameters for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// Model name sent to the provider.
    pub model: String,
    /// Prompt text.
    pub prompt: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Generation cap.
    pub max_tokens: u32,
}

/// A backend-specific HTTP request, ready to send as a JSON POST.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    /// Full endpoint URL.
    pub url: String,
    /// Auth and version headers.
    pub headers: Vec<(String, String)>,
    /// JSON body.
    pub body: serde_json::Value,
}

/// Wire format of one provider family.
///
/// Each family builds its own request shape and unwraps its own response
/// envelope into a [`ModelReply`]. To add a family:
/// 1. Create a module in `backends/`
/// 2. Implement `ProviderBackend` for a struct
/// 3. Add the variant to `ProviderKind` in `config.rs`
/// 4. Map it in [`backend_for`]
pub trait ProviderBackend: Send + Sync {
    /// Shapes the HTTP request for one completion.
    fn build_request(
        &self,
        config: &ProviderConfig,
        api_key: Option<&str>,
        request: &CompletionRequest,
    ) -> ProviderRequest;

    /// Unwraps a success-status body, rejecting application-level errors.
    fn parse_response(
        &self,
        config: &ProviderConfig,
        body: &serde_json::Value,
    ) -> Result<ModelReply, ProviderError>;

    /// Extracts a readable message from an error body.
    fn error_message(&self, body: &serde_json::Value) -> Option<String>;
}

/// Selects the wire format for a provider kind.
pub fn backend_for(kind: ProviderKind) -> Box<dyn ProviderBackend> {
    match kind {
        ProviderKind::Ollama => Box::new(ollama::OllamaBackend),
        ProviderKind::OpenAi | ProviderKind::OpenRouter | ProviderKind::Groq => {
            Box::new(openai::OpenAiBackend)
        }
        ProviderKind::Anthropic => Box::new(anthropic::AnthropicBackend),
    }
}

/// Builds the normalized metadata block.
pub(crate) fn reply_metadata(
    config: &ProviderConfig,
    body: &serde_json::Value,
    usage: Option<serde_json::Value>,
) -> serde_json::Value {
    let model = body
        .get("model")
        .and_then(|m| m.as_str())
        .unwrap_or(&config.model);
    let mut metadata = serde_json::json!({
        "provider": config.id,
        "model": model,
    });
    if let Some(usage) = usage {
        metadata["usage"] = usage;
    }
    metadata
}
