//! Shared provider abstractions: per-provider-type configuration and the
//! dispatch table that tells the dispatcher whether a binding's provider
//! type can serve an inbound request natively or needs a dialect transform.
//!
//! This crate intentionally does not perform network IO and does not know
//! about credentials beyond the opaque `api_key` carried in `ProviderConfig`
//! — upstream HTTP construction lives in `llmgate-provider-impl`.

pub mod config;
pub mod errors;

pub use config::{
    AnthropicConfig, DispatchRule, DispatchTable, GeminiConfig, ModelRecord, ModelTable,
    OpenAiConfig, OperationKind, ProviderConfig,
};
pub use errors::{ProviderError, ProviderResult};

// Re-export the protocol/transform typed enums from llmgate-transform so
// downstream crates depend on one place for the dialect vocabulary.
pub use llmgate_transform::middleware::{
    CountTokensRequest, CountTokensResponse, GenerateContentRequest, GenerateContentResponse,
    ModelGetRequest, ModelGetResponse, ModelListRequest, ModelListResponse, Op, Proto, Request,
    Response, StreamEvent, StreamFormat, TransformContext, TransformError, stream_format,
};

// Re-export usage helpers used by the dispatcher/log sink layer.
pub use llmgate_transform::middleware::{
    CountTokensFn, OutputAccumulator, UsageAccumulator, UsageError, UsageSummary,
    fallback_usage_with_count_tokens, output_for_counting, usage_from_response,
};
