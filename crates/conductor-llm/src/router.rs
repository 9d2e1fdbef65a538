use crate::backends::{backend_for, CompletionRequest, ProviderBackend};
use crate::config::{ProviderConfig, RouterConfig};
use crate::model::{LanguageModel, ModelCall, ModelReply};
use async_trait::async_trait;
use conductor_core::{ConductorError, ConductorResult, ProviderError};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

struct ProviderEntry {
    config: ProviderConfig,
    backend: Box<dyn ProviderBackend>,
}

/// Routes completion calls to the configured provider.
///
/// Provider selection is static per call: there is no retry and no fallback
/// to another provider. Unknown providers and missing credentials fail with
/// a configuration error before any request is sent.
pub struct ProviderRouter {
    default_provider: String,
    providers: HashMap<String, ProviderEntry>,
    http: reqwest::Client,
}

impl ProviderRouter {
    /// Builds the router; duplicate provider ids are a configuration error.
    pub fn new(config: RouterConfig) -> ConductorResult<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ConductorError::Configuration(format!("HTTP client: {e}")))?;

        let mut providers = HashMap::new();
        for provider in config.providers {
            if providers.contains_key(&provider.id) {
                return Err(ConductorError::Configuration(format!(
                    "provider '{}' configured twice",
                    provider.id
                )));
            }
            info!(provider = %provider.id, kind = ?provider.kind, model = %provider.model, "Configured provider");
            let backend = backend_for(provider.kind);
            providers.insert(
                provider.id.clone(),
                ProviderEntry {
                    config: provider,
                    backend,
                },
            );
        }

        Ok(Self {
            default_provider: config.default_provider,
            providers,
            http,
        })
    }

    /// Id used when a call names no provider.
    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }

    /// Configured providers, sorted by id.
    pub fn providers(&self) -> Vec<&ProviderConfig> {
        let mut list: Vec<_> = self.providers.values().map(|e| &e.config).collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    fn resolve(&self, provider: Option<&str>) -> ConductorResult<&ProviderEntry> {
        let id = provider.unwrap_or(&self.default_provider);
        self.providers.get(id).ok_or_else(|| {
            ConductorError::Configuration(format!("provider '{id}' is not configured"))
        })
    }

    async fn send(
        &self,
        entry: &ProviderEntry,
        request: &CompletionRequest,
    ) -> Result<ModelReply, ProviderError> {
        let config = &entry.config;
        let api_key = config.resolved_api_key();
        let wire = entry
            .backend
            .build_request(config, api_key.as_deref(), request);
        let timeout = Duration::from_secs(config.timeout_secs);

        let mut builder = self.http.post(&wire.url).timeout(timeout);
        for (name, value) in &wire.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let resp = builder
            .json(&wire.body)
            .send()
            .await
            .map_err(|e| transport_error(config, e))?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| transport_error(config, e))?;
        let body: Option<serde_json::Value> = serde_json::from_str(&text).ok();

        if !status.is_success() {
            let message = body
                .as_ref()
                .and_then(|b| entry.backend.error_message(b))
                .unwrap_or_else(|| truncate(&text, 500));
            return Err(ProviderError::new(&config.id, message).with_status(status.as_u16()));
        }

        let body = body.ok_or_else(|| {
            ProviderError::new(&config.id, "malformed response: body is not JSON")
                .with_status(status.as_u16())
        })?;
        entry
            .backend
            .parse_response(config, &body)
            .map_err(|e| e.with_status(status.as_u16()))
    }
}

fn transport_error(config: &ProviderConfig, e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::timeout(&config.id, config.timeout_secs)
    } else {
        ProviderError::new(&config.id, e.to_string())
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[async_trait]
impl LanguageModel for ProviderRouter {
    async fn complete(&self, call: ModelCall) -> ConductorResult<ModelReply> {
        let entry = self.resolve(call.provider.as_deref())?;
        let config = &entry.config;
        if config.kind.api_key_env().is_some() && config.resolved_api_key().is_none() {
            return Err(ConductorError::Configuration(format!(
                "provider '{}' has no API key",
                config.id
            )));
        }

        let request = CompletionRequest {
            model: call.model.unwrap_or_else(|| config.model.clone()),
            prompt: call.prompt,
            temperature: call.options.temperature.unwrap_or(config.temperature),
            max_tokens: call.options.max_tokens.unwrap_or(config.max_tokens),
        };

        debug!(agent = %call.agent, provider = %config.id, model = %request.model, "Sending completion request");
        match self.send(entry, &request).await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                warn!(agent = %call.agent, provider = %config.id, error = %e, "Provider call failed");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;

    #[test]
    fn test_duplicate_provider_rejected() {
        let config = RouterConfig {
            default_provider: "a".into(),
            providers: vec![
                ProviderConfig::new("a", ProviderKind::Ollama, "m"),
                ProviderConfig::new("a", ProviderKind::Ollama, "m2"),
            ],
        };
        assert!(matches!(
            ProviderRouter::new(config),
            Err(ConductorError::Configuration(_))
        ));
    }

    #[test]
    fn test_providers_sorted() {
        let config = RouterConfig {
            default_provider: "b".into(),
            providers: vec![
                ProviderConfig::new("b", ProviderKind::Ollama, "m"),
                ProviderConfig::new("a", ProviderKind::Groq, "m"),
            ],
        };
        let router = ProviderRouter::new(config).unwrap();
        let ids: Vec<_> = router.providers().iter().map(|p| p.id.clone()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(router.default_provider(), "b");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("ab", 3), "ab");
    }
}
