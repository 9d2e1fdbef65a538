use super::{reply_metadata, CompletionRequest, ProviderBackend, ProviderRequest};
use crate::config::ProviderConfig;
use crate::model::ModelReply;
use conductor_core::ProviderError;

/// Local single-prompt completion format (`/api/generate`).
pub struct OllamaBackend;

impl ProviderBackend for OllamaBackend {
    fn build_request(
        &self,
        config: &ProviderConfig,
        _api_key: Option<&str>,
        request: &CompletionRequest,
    ) -> ProviderRequest {
        ProviderRequest {
            url: format!("{}/api/generate", config.base_url()),
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: serde_json::json!({
                "model": request.model,
                "prompt": request.prompt,
                "stream": false,
                "options": {
                    "temperature": request.temperature,
                    "num_predict": request.max_tokens,
                },
            }),
        }
    }

    fn parse_response(
        &self,
        config: &ProviderConfig,
        body: &serde_json::Value,
    ) -> Result<ModelReply, ProviderError> {
        if let Some(message) = self.error_message(body) {
            return Err(ProviderError::new(&config.id, message));
        }
        parse_ollama_response(config, body)
    }

    fn error_message(&self, body: &serde_json::Value) -> Option<String> {
        body.get("error").and_then(|e| e.as_str()).map(String::from)
    }
}

/// Reads the `response` field of a generate reply.
pub fn parse_ollama_response(
    config: &ProviderConfig,
    body: &serde_json::Value,
) -> Result<ModelReply, ProviderError> {
    let content = body["response"].as_str().ok_or_else(|| {
        ProviderError::new(&config.id, "malformed response: missing 'response' field")
    })?;

    let usage = match (body["prompt_eval_count"].as_u64(), body["eval_count"].as_u64()) {
        (None, None) => None,
        (input, output) => Some(serde_json::json!({
            "input_tokens": input,
            "output_tokens": output,
        })),
    };

    Ok(ModelReply {
        content: content.to_string(),
        metadata: Some(reply_metadata(config, body, usage)),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;

    fn config() -> ProviderConfig {
        ProviderConfig::new("ollama", ProviderKind::Ollama, "llama3.1")
    }

    #[test]
    fn test_request_shape() {
        let req = OllamaBackend.build_request(
            &config(),
            None,
            &CompletionRequest {
                model: "llama3.1".into(),
                prompt: "hi".into(),
                temperature: 0.2,
                max_tokens: 128,
            },
        );
        assert_eq!(req.url, "http://localhost:11434/api/generate");
        assert_eq!(req.body["stream"], false);
        assert_eq!(req.body["options"]["num_predict"], 128);
        assert!(req.headers.iter().all(|(k, _)| k != "Authorization"));
    }

    #[test]
    fn test_parse_response_with_usage() {
        let body = serde_json::json!({
            "model": "llama3.1",
            "response": "{\"result\": \"ok\"}",
            "done": true,
            "prompt_eval_count": 12,
            "eval_count": 5
        });
        let reply = OllamaBackend.parse_response(&config(), &body).unwrap();
        assert_eq!(reply.content, "{\"result\": \"ok\"}");
        let meta = reply.metadata.unwrap();
        assert_eq!(meta["provider"], "ollama");
        assert_eq!(meta["usage"]["output_tokens"], 5);
    }

    #[test]
    fn test_parse_error_field() {
        let body = serde_json::json!({"error": "model 'x' not found"});
        let err = OllamaBackend.parse_response(&config(), &body).unwrap_err();
        assert_eq!(err.provider, "ollama");
        assert!(err.message.contains("not found"));
    }

    #[test]
    fn test_parse_missing_response() {
        let err = parse_ollama_response(&config(), &serde_json::json!({})).unwrap_err();
        assert!(err.message.contains("malformed"));
    }
}
