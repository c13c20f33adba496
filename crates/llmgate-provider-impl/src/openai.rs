use bytes::Bytes;

use llmgate_protocol::openai::create_chat_completions::request::CreateChatCompletionRequestBody;
use llmgate_provider_core::{ProviderConfig, ProviderError, ProviderResult};

use crate::headers;
use crate::request::{HttpMethod, UpstreamRequest};

/// `openai`: POST `{base}/chat/completions`, auth `Authorization: Bearer …`,
/// stream uses `data: …\n\n` lines terminated by `data: [DONE]`.
pub fn build_chat_completions(
    config: &ProviderConfig,
    provider_model: &str,
    body: &CreateChatCompletionRequestBody,
) -> ProviderResult<UpstreamRequest> {
    let cfg = match config {
        ProviderConfig::OpenAi(cfg) => cfg,
        _ => {
            return Err(ProviderError::InvalidConfig(
                "expected ProviderConfig::OpenAi".to_string(),
            ));
        }
    };

    let mut body = body.clone();
    body.model = provider_model.to_string();
    let is_stream = body.stream.unwrap_or(false);

    let url = format!(
        "{}/chat/completions",
        cfg.base_url.trim_end_matches('/')
    );
    let payload =
        serde_json::to_vec(&body).map_err(|err| ProviderError::Other(err.to_string()))?;

    let mut req = UpstreamRequest {
        method: HttpMethod::Post,
        url,
        headers: Vec::new(),
        body: Some(Bytes::from(payload)),
        is_stream,
    };
    headers::set_bearer(&mut req, &cfg.api_key);
    headers::set_accept_json(&mut req);
    headers::set_content_type_json(&mut req);
    Ok(req)
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmgate_provider_core::config::OpenAiConfig;

    fn body(stream: bool) -> CreateChatCompletionRequestBody {
        serde_json::from_value(serde_json::json!({
            "model": "ignored",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": stream,
        }))
        .unwrap()
    }

    #[test]
    fn rewrites_model_to_binding_model_and_sets_bearer_auth() {
        let cfg = ProviderConfig::OpenAi(OpenAiConfig {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: "sk-test".to_string(),
        });
        let req = build_chat_completions(&cfg, "gpt-4o-mini", &body(false)).unwrap();
        assert_eq!(req.url, "https://api.openai.com/v1/chat/completions");
        assert!(
            req.headers
                .iter()
                .any(|(k, v)| k == "Authorization" && v == "Bearer sk-test")
        );
        let sent: serde_json::Value = serde_json::from_slice(&req.body.unwrap()).unwrap();
        assert_eq!(sent["model"], "gpt-4o-mini");
    }

    #[test]
    fn carries_stream_flag_into_is_stream() {
        let cfg = ProviderConfig::OpenAi(OpenAiConfig {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: "sk-test".to_string(),
        });
        let req = build_chat_completions(&cfg, "gpt-4o-mini", &body(true)).unwrap();
        assert!(req.is_stream);
    }

    #[test]
    fn rejects_mismatched_provider_config() {
        let cfg = ProviderConfig::Gemini(Default::default());
        let err = build_chat_completions(&cfg, "gpt-4o-mini", &body(false)).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidConfig(_)));
    }
}
