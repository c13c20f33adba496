//! Concrete per-dialect HTTP construction. Given a binding's resolved
//! provider configuration, the upstream-facing model string, and an
//! already-translated request body (produced by `llmgate-transform`), builds
//! the outbound HTTP request the dispatcher opens against the provider.
//!
//! This crate performs no IO of its own beyond exposing a shared outbound
//! `wreq::Client` — sending the request and relaying the response belongs to
//! the dispatcher, which needs to interleave it with breaker/log bookkeeping.

pub mod anthropic;
pub mod gemini;
pub mod headers;
pub mod http;
pub mod openai;
pub mod openai_res;
pub mod request;

pub use request::{HttpMethod, UpstreamRequest};

use llmgate_provider_core::{GenerateContentRequest, ProviderConfig, ProviderResult};

/// Builds the outbound HTTP request for a `GenerateContent`/`StreamGenerateContent`
/// call, dispatching to the adapter matching the request's own dialect. The
/// caller (the dispatcher) has already picked `request`'s variant to match
/// the binding's provider type via the dispatch table in `llmgate-provider-core`.
pub fn build_request(
    config: &ProviderConfig,
    provider_model: &str,
    request: &GenerateContentRequest,
) -> ProviderResult<UpstreamRequest> {
    match request {
        GenerateContentRequest::Claude(body) => {
            anthropic::build_messages(config, provider_model, &body.body)
        }
        GenerateContentRequest::OpenAIChat(body) => {
            openai::build_chat_completions(config, provider_model, &body.body)
        }
        GenerateContentRequest::OpenAIResponse(body) => {
            openai_res::build_responses(config, provider_model, &body.body)
        }
        GenerateContentRequest::Gemini(req) => {
            gemini::build_generate_content(config, provider_model, &req.body, false)
        }
        GenerateContentRequest::GeminiStream(req) => {
            gemini::build_generate_content(config, provider_model, &req.body, true)
        }
    }
}

/// Provider type names, used for config validation and admin surfaces.
pub fn provider_kind_name(config: &ProviderConfig) -> &'static str {
    match config {
        ProviderConfig::OpenAi(_) => "openai",
        ProviderConfig::OpenAiRes(_) => "openai-res",
        ProviderConfig::Anthropic(_) => "anthropic",
        ProviderConfig::Gemini(_) => "gemini",
    }
}
