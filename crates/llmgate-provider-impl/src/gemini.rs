use bytes::Bytes;

use llmgate_protocol::gemini::generate_content::request::GenerateContentRequestBody;
use llmgate_provider_core::{ProviderConfig, ProviderError, ProviderResult};

use crate::headers;
use crate::request::{HttpMethod, UpstreamRequest};

/// `gemini`: POST `{base}/{version}/models/{providerModel}:generateContent`
/// or `:streamGenerateContent`, auth header `x-goog-api-key`, stream frames
/// are JSON objects separated by `\n\n` with usage in `usageMetadata`.
pub fn build_generate_content(
    config: &ProviderConfig,
    provider_model: &str,
    body: &GenerateContentRequestBody,
    stream: bool,
) -> ProviderResult<UpstreamRequest> {
    let cfg = match config {
        ProviderConfig::Gemini(cfg) => cfg,
        _ => {
            return Err(ProviderError::InvalidConfig(
                "expected ProviderConfig::Gemini".to_string(),
            ));
        }
    };

    let mut body = body.clone();
    body.model = None;

    let method_name = if stream {
        "streamGenerateContent"
    } else {
        "generateContent"
    };
    // Gemini's streaming shape here is newline-delimited JSON objects, not
    // SSE, so the `alt=sse` query param is deliberately not set.
    let url = format!(
        "{}/{}/models/{}:{}",
        cfg.base_url.trim_end_matches('/'),
        cfg.version,
        provider_model,
        method_name
    );

    let payload =
        serde_json::to_vec(&body).map_err(|err| ProviderError::Other(err.to_string()))?;

    let mut req = UpstreamRequest {
        method: HttpMethod::Post,
        url,
        headers: Vec::new(),
        body: Some(Bytes::from(payload)),
        is_stream: stream,
    };
    headers::set_x_goog_api_key(&mut req, &cfg.api_key);
    headers::set_accept_json(&mut req);
    headers::set_content_type_json(&mut req);
    Ok(req)
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmgate_provider_core::config::GeminiConfig;

    fn body() -> GenerateContentRequestBody {
        serde_json::from_value(serde_json::json!({
            "contents": [{"role": "user", "parts": [{"text": "hi"}]}],
        }))
        .unwrap()
    }

    fn cfg() -> ProviderConfig {
        ProviderConfig::Gemini(GeminiConfig {
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            api_key: "goog-test".to_string(),
            version: "v1beta".to_string(),
        })
    }

    #[test]
    fn unary_url_uses_generate_content_method() {
        let req = build_generate_content(&cfg(), "gemini-2.5-flash", &body(), false).unwrap();
        assert_eq!(
            req.url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent"
        );
        assert!(!req.is_stream);
        assert!(
            req.headers
                .iter()
                .any(|(k, v)| k == "x-goog-api-key" && v == "goog-test")
        );
    }

    #[test]
    fn stream_url_uses_stream_generate_content_method_without_sse_param() {
        let req = build_generate_content(&cfg(), "gemini-2.5-flash", &body(), true).unwrap();
        assert_eq!(
            req.url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:streamGenerateContent"
        );
        assert!(req.is_stream);
    }
}
