use serde::{Deserialize, Serialize};

/// Supported provider families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Local Ollama server, single-prompt completion format.
    Ollama,
    /// OpenAI chat completions.
    OpenAi,
    /// OpenRouter, OpenAI-compatible API.
    OpenRouter,
    /// Groq cloud inference, OpenAI-compatible API.
    Groq,
    /// Anthropic Messages API.
    Anthropic,
}

impl ProviderKind {
    /// Environment variable consulted when no API key is configured.
    pub fn api_key_env(self) -> Option<&'static str> {
        match self {
            ProviderKind::Ollama => None,
            ProviderKind::OpenAi => Some("OPENAI_API_KEY"),
            ProviderKind::OpenRouter => Some("OPENROUTER_API_KEY"),
            ProviderKind::Groq => Some("GROQ_API_KEY"),
            ProviderKind::Anthropic => Some("ANTHROPIC_API_KEY"),
        }
    }

    /// Public base URL of the provider family.
    pub fn default_endpoint(self) -> &'static str {
        match self {
            ProviderKind::Ollama => "http://localhost:11434",
            ProviderKind::OpenAi => "https://api.openai.com",
            ProviderKind::OpenRouter => "https://openrouter.ai/api",
            ProviderKind::Groq => "https://api.groq.com/openai",
            ProviderKind::Anthropic => "https://api.anthropic.com",
        }
    }
}

/// Configuration of one provider, looked up by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Name agents refer to.
    pub id: String,
    /// Wire format and defaults.
    pub kind: ProviderKind,
    /// Base URL; defaults per kind.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Model used when the agent does not override it.
    pub model: String,
    /// Generation cap per reply.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Inline key; never serialized back out.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.7
}

fn default_timeout_secs() -> u64 {
    60
}

impl ProviderConfig {
    /// A config with default limits.
    pub fn new(id: impl Into<String>, kind: ProviderKind, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            endpoint: None,
            model: model.into(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
            api_key: None,
        }
    }

    /// Overrides the base URL.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets an inline API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Endpoint without a trailing slash.
    pub fn base_url(&self) -> &str {
        match &self.endpoint {
            Some(url) => url.trim_end_matches('/'),
            None => self.kind.default_endpoint(),
        }
    }

    /// The configured key, else the kind's environment variable.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| {
                self.kind
                    .api_key_env()
                    .and_then(|var| std::env::var(var).ok())
                    .filter(|k| !k.is_empty())
            })
    }
}

/// Provider table plus the provider used when an agent names none.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Provider id used when an agent names none.
    #[serde(default = "default_provider")]
    pub default_provider: String,
    /// Every configured provider.
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_providers() -> Vec<ProviderConfig> {
    vec![ProviderConfig::new("ollama", ProviderKind::Ollama, "llama3.1")]
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            providers: default_providers(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_defaults() {
        let config: RouterConfig = from_json(
            r#"{"providers": [{"id": "groq", "kind": "groq", "model": "llama-3.1-8b-instant"}]}"#,
        );
        assert_eq!(config.default_provider, "ollama");
        let groq = &config.providers[0];
        assert_eq!(groq.max_tokens, 4096);
        assert_eq!(groq.timeout_secs, 60);
        assert_eq!(groq.base_url(), "https://api.groq.com/openai");
    }

    fn from_json(json: &str) -> RouterConfig {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_endpoint_override_trims_slash() {
        let config = ProviderConfig::new("local", ProviderKind::Ollama, "qwen")
            .with_endpoint("http://10.0.0.2:11434/");
        assert_eq!(config.base_url(), "http://10.0.0.2:11434");
    }

    #[test]
    fn test_explicit_api_key_wins() {
        let config = ProviderConfig::new("oa", ProviderKind::OpenAi, "gpt-4o-mini")
            .with_api_key("sk-test");
        assert_eq!(config.resolved_api_key().as_deref(), Some("sk-test"));
        let local = ProviderConfig::new("ollama", ProviderKind::Ollama, "llama3.1");
        assert!(local.resolved_api_key().is_none());
    }

    #[test]
    fn test_kind_names() {
        let kind: ProviderKind = serde_json::from_str("\"openrouter\"").unwrap();
        assert_eq!(kind, ProviderKind::OpenRouter);
        let kind: ProviderKind = serde_json::from_str("\"openai\"").unwrap();
        assert_eq!(kind, ProviderKind::OpenAi);
    }
}
