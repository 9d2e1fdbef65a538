use async_trait::async_trait;
use conductor_core::ConductorResult;
use serde::{Deserialize, Serialize};

/// Normalized response shape shared by every provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelReply {
    /// Generated text.
    pub content: String,
    /// Provider id, model and token usage when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ModelReply {
    /// A reply without metadata.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: None,
        }
    }
}

/// Per-call overrides of the provider's generation defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Replaces the provider's temperature.
    pub temperature: Option<f32>,
    /// Replaces the provider's token cap.
    pub max_tokens: Option<u32>,
}

/// One completion request as issued by the orchestrator.
#[derive(Debug, Clone)]
pub struct ModelCall {
    /// Calling agent, used for logging.
    pub agent: String,
    /// Provider id; the router default when absent.
    pub provider: Option<String>,
    /// Model override; the provider's model when absent.
    pub model: Option<String>,
    /// Fully rendered prompt.
    pub prompt: String,
    /// Per-call overrides.
    pub options: GenerationOptions,
}

impl ModelCall {
    /// A call on the default provider with no overrides.
    pub fn new(agent: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            provider: None,
            model: None,
            prompt: prompt.into(),
            options: GenerationOptions::default(),
        }
    }

    /// Pins the provider and model named by the agent.
    pub fn with_provider(mut self, provider: Option<String>, model: Option<String>) -> Self {
        self.provider = provider;
        self.model = model;
        self
    }
}

/// Anything that turns a prompt into a reply.
///
/// Implemented by [`crate::ProviderRouter`]; tests substitute scripted models.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Sends one prompt and returns the normalized reply.
    async fn complete(&self, call: ModelCall) -> ConductorResult<ModelReply>;
}
