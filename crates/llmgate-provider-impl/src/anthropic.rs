use bytes::Bytes;

use llmgate_provider_core::{ProviderConfig, ProviderError, ProviderResult};
use llmgate_protocol::claude::count_tokens::types::Model;
use llmgate_protocol::claude::create_message::request::CreateMessageRequestBody;

use crate::headers;
use crate::request::{HttpMethod, UpstreamRequest};

/// `anthropic`: POST `{base}/v1/messages`, auth via `x-api-key` +
/// `anthropic-version`, SSE with typed events carrying usage in
/// `message_start`/`message_delta`.
pub fn build_messages(
    config: &ProviderConfig,
    provider_model: &str,
    body: &CreateMessageRequestBody,
) -> ProviderResult<UpstreamRequest> {
    let cfg = match config {
        ProviderConfig::Anthropic(cfg) => cfg,
        _ => {
            return Err(ProviderError::InvalidConfig(
                "expected ProviderConfig::Anthropic".to_string(),
            ));
        }
    };

    let mut body = body.clone();
    body.model = Model::Custom(provider_model.to_string());
    let is_stream = body.stream.unwrap_or(false);

    let url = format!("{}/v1/messages", cfg.base_url.trim_end_matches('/'));
    let payload =
        serde_json::to_vec(&body).map_err(|err| ProviderError::Other(err.to_string()))?;

    let mut req = UpstreamRequest {
        method: HttpMethod::Post,
        url,
        headers: Vec::new(),
        body: Some(Bytes::from(payload)),
        is_stream,
    };
    headers::set_x_api_key(&mut req, &cfg.api_key);
    req.set_header("anthropic-version", cfg.version.clone());
    headers::set_accept_json(&mut req);
    headers::set_content_type_json(&mut req);
    Ok(req)
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmgate_provider_core::config::AnthropicConfig;

    fn body() -> CreateMessageRequestBody {
        serde_json::from_value(serde_json::json!({
            "model": "ignored",
            "max_tokens": 256,
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .unwrap()
    }

    #[test]
    fn posts_to_messages_endpoint_with_x_api_key_and_version() {
        let cfg = ProviderConfig::Anthropic(AnthropicConfig {
            base_url: "https://api.anthropic.com".to_string(),
            api_key: "sk-ant-test".to_string(),
            version: "2023-06-01".to_string(),
        });
        let req = build_messages(&cfg, "claude-3-7-sonnet", &body()).unwrap();
        assert_eq!(req.url, "https://api.anthropic.com/v1/messages");
        assert!(
            req.headers
                .iter()
                .any(|(k, v)| k == "x-api-key" && v == "sk-ant-test")
        );
        assert!(
            req.headers
                .iter()
                .any(|(k, v)| k == "anthropic-version" && v == "2023-06-01")
        );
        let sent: serde_json::Value = serde_json::from_slice(&req.body.unwrap()).unwrap();
        assert_eq!(sent["model"], "claude-3-7-sonnet");
    }
}
