//! Language-model routing for Conductor.
//!
//! [`ProviderRouter`] sends a prompt to one configured provider and returns a
//! normalized [`ModelReply`]. Each provider family implements
//! [`backends::ProviderBackend`]: Ollama's single-prompt format, the
//! OpenAI-compatible chat format (OpenAI, OpenRouter, Groq) and Anthropic
//! Messages.

/// Provider wire formats.
pub mod backends;
/// Provider and router configuration.
pub mod config;
/// The `LanguageModel` seam and normalized reply types.
pub mod model;
/// Provider router.
pub mod router;

pub use config::{ProviderConfig, ProviderKind, RouterConfig};
pub use model::{GenerationOptions, LanguageModel, ModelCall, ModelReply};
pub use router::ProviderRouter;
