use super::{reply_metadata, CompletionRequest, ProviderBackend, ProviderRequest};
use crate::config::{ProviderConfig, ProviderKind};
use crate::model::ModelReply;
use conductor_core::ProviderError;

/// OpenAI-compatible chat completions format.
///
/// Serves OpenAI, OpenRouter and Groq.
pub struct OpenAiBackend;

impl ProviderBackend for OpenAiBackend {
    fn build_request(
        &self,
        config: &ProviderConfig,
        api_key: Option<&str>,
        request: &CompletionRequest,
    ) -> ProviderRequest {
        let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        if let Some(key) = api_key {
            headers.push(("Authorization".into(), format!("Bearer {key}")));
        }
        // OpenRouter requires extra headers
        if config.kind == ProviderKind::OpenRouter {
            headers.push(("HTTP-Referer".into(), "https://github.com/conductor-rs/conductor".into()));
            headers.push(("X-Title".into(), "Conductor".into()));
        }

        ProviderRequest {
            url: format!("{}/v1/chat/completions", config.base_url()),
            headers,
            body: serde_json::json!({
                "model": request.model,
                "messages": [{"role": "user", "content": request.prompt}],
                "max_tokens": request.max_tokens,
                "temperature": request.temperature,
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
        parse_openai_response(config, body)
    }

    fn error_message(&self, body: &serde_json::Value) -> Option<String> {
        let error = body.get("error")?;
        error["message"]
            .as_str()
            .or_else(|| error.as_str())
            .map(String::from)
            .or_else(|| Some(error.to_string()))
    }
}

/// Reads the first choice of a chat completion.
pub fn parse_openai_response(
    config: &ProviderConfig,
    body: &serde_json::Value,
) -> Result<ModelReply, ProviderError> {
    let content = body["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| {
            ProviderError::new(
                &config.id,
                "malformed response: missing choices[0].message.content",
            )
        })?;

    let usage = body.get("usage").map(|u| {
        serde_json::json!({
            "input_tokens": u["prompt_tokens"],
            "output_tokens": u["completion_tokens"],
        })
    });

    Ok(ModelReply {
        content: content.to_string(),
        metadata: Some(reply_metadata(config, body, usage)),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "gpt-4o-mini".into(),
            prompt: "hello".into(),
            temperature: 0.7,
            max_tokens: 256,
        }
    }

    #[test]
    fn test_request_has_bearer_and_messages() {
        let config = ProviderConfig::new("openai", ProviderKind::OpenAi, "gpt-4o-mini");
        let req = OpenAiBackend.build_request(&config, Some("sk-1"), &request());
        assert_eq!(req.url, "https://api.openai.com/v1/chat/completions");
        assert!(req
            .headers
            .contains(&("Authorization".to_string(), "Bearer sk-1".to_string())));
        assert_eq!(req.body["messages"][0]["role"], "user");
        assert_eq!(req.body["messages"][0]["content"], "hello");
        assert_eq!(req.body["max_tokens"], 256);
    }

    #[test]
    fn test_openrouter_extra_headers() {
        let config = ProviderConfig::new("or", ProviderKind::OpenRouter, "meta/llama");
        let req = OpenAiBackend.build_request(&config, Some("k"), &request());
        assert!(req.headers.iter().any(|(k, _)| k == "X-Title"));
        assert_eq!(req.url, "https://openrouter.ai/api/v1/chat/completions");
    }

    #[test]
    fn test_parse_choice_content() {
        let config = ProviderConfig::new("groq", ProviderKind::Groq, "llama");
        let body = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "{\"result\": 1}"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 3}
        });
        let reply = OpenAiBackend.parse_response(&config, &body).unwrap();
        assert_eq!(reply.content, "{\"result\": 1}");
        let meta = reply.metadata.unwrap();
        assert_eq!(meta["model"], "llama");
        assert_eq!(meta["usage"]["input_tokens"], 10);
    }

    #[test]
    fn test_parse_error_object() {
        let config = ProviderConfig::new("openai", ProviderKind::OpenAi, "gpt");
        let body = serde_json::json!({"error": {"message": "Invalid API key", "type": "auth"}});
        let err = OpenAiBackend.parse_response(&config, &body).unwrap_err();
        assert_eq!(err.message, "Invalid API key");
    }
}
