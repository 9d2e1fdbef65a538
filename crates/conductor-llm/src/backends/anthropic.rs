use super::{reply_metadata, CompletionRequest, ProviderBackend, ProviderRequest};
use crate::config::ProviderConfig;
use crate::model::ModelReply;
use conductor_core::ProviderError;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Messages API format.
pub struct AnthropicBackend;

impl ProviderBackend for AnthropicBackend {
    fn build_request(
        &self,
        config: &ProviderConfig,
        api_key: Option<&str>,
        request: &CompletionRequest,
    ) -> ProviderRequest {
        let mut headers = vec![
            ("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string()),
            ("content-type".to_string(), "application/json".to_string()),
        ];
        if let Some(key) = api_key {
            headers.push(("x-api-key".into(), key.to_string()));
        }

        ProviderRequest {
            url: format!("{}/v1/messages", config.base_url()),
            headers,
            body: serde_json::json!({
                "model": request.model,
                "max_tokens": request.max_tokens,
                "temperature": request.temperature,
                "messages": [{"role": "user", "content": request.prompt}],
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
        parse_anthropic_response(config, body)
    }

    fn error_message(&self, body: &serde_json::Value) -> Option<String> {
        if body["type"] != "error" {
            return None;
        }
        Some(
            body["error"]["message"]
                .as_str()
                .map(String::from)
                .unwrap_or_else(|| body["error"].to_string()),
        )
    }
}

/// Joins the text blocks of a Messages response.
pub fn parse_anthropic_response(
    config: &ProviderConfig,
    body: &serde_json::Value,
) -> Result<ModelReply, ProviderError> {
    let blocks = body["content"].as_array().ok_or_else(|| {
        ProviderError::new(&config.id, "malformed response: missing content")
    })?;
    let texts: Vec<&str> = blocks
        .iter()
        .filter(|b| b["type"] == "text")
        .filter_map(|b| b["text"].as_str())
        .collect();
    if texts.is_empty() {
        return Err(ProviderError::new(
            &config.id,
            "malformed response: no text content block",
        ));
    }
    let content = texts.concat();

    let usage = body.get("usage").map(|u| {
        serde_json::json!({
            "input_tokens": u["input_tokens"],
            "output_tokens": u["output_tokens"],
        })
    });

    Ok(ModelReply {
        content,
        metadata: Some(reply_metadata(config, body, usage)),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;

    fn config() -> ProviderConfig {
        ProviderConfig::new("anthropic", ProviderKind::Anthropic, "claude-sonnet")
    }

    #[test]
    fn test_request_headers() {
        let req = AnthropicBackend.build_request(
            &config(),
            Some("sk-ant"),
            &CompletionRequest {
                model: "claude-sonnet".into(),
                prompt: "hi".into(),
                temperature: 0.5,
                max_tokens: 100,
            },
        );
        assert_eq!(req.url, "https://api.anthropic.com/v1/messages");
        assert!(req
            .headers
            .contains(&("x-api-key".to_string(), "sk-ant".to_string())));
        assert!(req
            .headers
            .contains(&("anthropic-version".to_string(), "2023-06-01".to_string())));
    }

    #[test]
    fn test_parse_text_block() {
        let body = serde_json::json!({
            "type": "message",
            "content": [{"type": "text", "text": "{\"result\": \"done\"}"}],
            "usage": {"input_tokens": 20, "output_tokens": 4}
        });
        let reply = AnthropicBackend.parse_response(&config(), &body).unwrap();
        assert_eq!(reply.content, "{\"result\": \"done\"}");
        assert_eq!(reply.metadata.unwrap()["usage"]["input_tokens"], 20);
    }

    #[test]
    fn test_parse_error_payload() {
        let body = serde_json::json!({
            "type": "error",
            "error": {"type": "overloaded_error", "message": "Overloaded"}
        });
        let err = AnthropicBackend.parse_response(&config(), &body).unwrap_err();
        assert_eq!(err.message, "Overloaded");
    }

    #[test]
    fn test_parse_without_text() {
        let body = serde_json::json!({"type": "message", "content": []});
        assert!(AnthropicBackend.parse_response(&config(), &body).is_err());
    }
}
