use bytes::Bytes;

use llmgate_protocol::openai::create_response::request::CreateResponseRequestBody;
use llmgate_provider_core::{ProviderConfig, ProviderError, ProviderResult};

use crate::headers;
use crate::request::{HttpMethod, UpstreamRequest};

/// `openai-res`: POST `{base}/responses`, same bearer auth, event-typed SSE
/// (`response.output_text.delta`, …) with usage in the terminal
/// `response.completed` event.
pub fn build_responses(
    config: &ProviderConfig,
    provider_model: &str,
    body: &CreateResponseRequestBody,
) -> ProviderResult<UpstreamRequest> {
    let cfg = match config {
        ProviderConfig::OpenAiRes(cfg) => cfg,
        _ => {
            return Err(ProviderError::InvalidConfig(
                "expected ProviderConfig::OpenAiRes".to_string(),
            ));
        }
    };

    let mut body = body.clone();
    body.model = provider_model.to_string();
    let is_stream = body.stream.unwrap_or(false);

    let url = format!("{}/responses", cfg.base_url.trim_end_matches('/'));
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

    fn body() -> CreateResponseRequestBody {
        serde_json::from_value(serde_json::json!({
            "model": "ignored",
            "input": "hello",
        }))
        .unwrap()
    }

    #[test]
    fn posts_to_responses_endpoint_with_rewritten_model() {
        let cfg = ProviderConfig::OpenAiRes(OpenAiConfig {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: "sk-test".to_string(),
        });
        let req = build_responses(&cfg, "gpt-4.1", &body()).unwrap();
        assert_eq!(req.url, "https://api.openai.com/v1/responses");
        let sent: serde_json::Value = serde_json::from_slice(&req.body.unwrap()).unwrap();
        assert_eq!(sent["model"], "gpt-4.1");
    }
}
