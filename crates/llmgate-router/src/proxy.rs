use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, RawQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::json;

use llmgate_core::engine::{dispatch, DispatchBody, DispatchContext, DispatchOutcome};
use llmgate_core::error::ProxyError;
use llmgate_core::request::ProxyRequest;
use llmgate_core::state::AppState;
use llmgate_protocol::claude;
use llmgate_protocol::gemini;
use llmgate_protocol::openai;

/// Axum routes for the inbound dialect surface (§6): one handler per
/// endpoint, each building the matching `ProxyRequest` variant from the
/// deserialized dialect body and handing it to the dispatcher. Model
/// listing, model retrieval and count-tokens never reach an upstream —
/// `dispatch` answers those from the live snapshot itself.
pub fn proxy_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(openai_chat_completions))
        .route("/v1/responses", post(openai_responses))
        .route("/v1/responses/input_tokens", post(openai_input_tokens))
        .route("/v1/messages", post(claude_messages))
        .route("/v1/messages/count_tokens", post(claude_count_tokens))
        .route("/v1/models", get(models_list))
        .route("/v1/models/{model}", get(models_get))
        .route("/v1beta/models", get(gemini_models_list))
        .route(
            "/v1beta/models/{model}",
            get(gemini_models_get).post(gemini_post),
        )
        .with_state(state)
}

// ---- auth / dispatch plumbing ----

/// Resolves the caller's identity against the live `AuthStore` and wraps
/// any failure as an axum response (no generic error middleware layer —
/// each handler needs the admission context inline to build `DispatchContext`).
fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<llmgate_core::auth::AdmissionContext, Response> {
    state.auth.authenticate(headers).map_err(proxy_error_response)
}

fn dispatch_context(state: &AppState, headers: &HeaderMap) -> Result<DispatchContext, Response> {
    let admission = authenticate(state, headers)?;
    Ok(DispatchContext {
        admission,
        client_ip: client_ip(headers),
        user_agent: user_agent(headers),
    })
}

/// The gateway runs behind a reverse proxy, so the accepted-socket peer
/// address is never the caller's real address; IP-stickiness and
/// provider IP-locks key off `X-Forwarded-For`'s first hop instead.
fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| "unknown".to_string())
}

fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn proxy_error_response(err: ProxyError) -> Response {
    let body = json!({"error": String::from_utf8_lossy(&err.body)});
    (err.status, Json(body)).into_response()
}

fn outcome_to_response(outcome: DispatchOutcome) -> Response {
    let builder = Response::builder()
        .status(outcome.status)
        .header(axum::http::header::CONTENT_TYPE, outcome.content_type);
    let body = match outcome.body {
        DispatchBody::Buffered(bytes) => Body::from(bytes),
        DispatchBody::Stream(stream) => Body::from_stream(stream.map(Ok::<Bytes, Infallible>)),
    };
    builder
        .body(body)
        .unwrap_or_else(|_| (StatusCode::INTERNAL_SERVER_ERROR, "response_build_failed").into_response())
}

async fn run(state: &AppState, req: ProxyRequest, ctx: DispatchContext) -> Response {
    match dispatch(state, req, ctx).await {
        Ok(outcome) => outcome_to_response(outcome),
        Err(err) => proxy_error_response(err),
    }
}

// ---- anthropic-style header parsing ----

fn anthropic_headers(headers: &HeaderMap) -> claude::types::AnthropicHeaders {
    let anthropic_version = headers
        .get("anthropic-version")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| serde_json::from_value(json!(v)).ok())
        .unwrap_or_default();
    let anthropic_beta = headers.get("anthropic-beta").and_then(|v| v.to_str().ok()).and_then(|raw| {
        let betas: Vec<claude::types::AnthropicBeta> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(|token| serde_json::from_value(json!(token)).ok())
            .collect();
        match betas.len() {
            0 => None,
            1 => Some(claude::types::AnthropicBetaHeader::Single(betas.into_iter().next().unwrap())),
            _ => Some(claude::types::AnthropicBetaHeader::Multiple(betas)),
        }
    });
    claude::types::AnthropicHeaders {
        anthropic_version,
        anthropic_beta,
    }
}

/// `/v1/models` is shared by the OpenAI and Anthropic dialects (both expose
/// a bare model-list endpoint at this path); the presence of an
/// `anthropic-version` header is the only signal distinguishing the caller.
fn is_anthropic_caller(headers: &HeaderMap) -> bool {
    headers.contains_key("anthropic-version")
}

// ---- claude ----

async fn claude_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<claude::create_message::request::CreateMessageRequestBody>,
) -> Response {
    let ctx = match dispatch_context(&state, &headers) {
        Ok(ctx) => ctx,
        Err(resp) => return resp,
    };
    let stream = body.stream.unwrap_or(false);
    let req = claude::create_message::request::CreateMessageRequest {
        headers: anthropic_headers(&headers),
        body,
    };
    let req = if stream {
        ProxyRequest::ClaudeMessagesStream(req)
    } else {
        ProxyRequest::ClaudeMessages(req)
    };
    run(&state, req, ctx).await
}

async fn claude_count_tokens(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<claude::count_tokens::request::CountTokensRequestBody>,
) -> Response {
    let ctx = match dispatch_context(&state, &headers) {
        Ok(ctx) => ctx,
        Err(resp) => return resp,
    };
    let req = claude::count_tokens::request::CountTokensRequest {
        headers: anthropic_headers(&headers),
        body,
    };
    run(&state, ProxyRequest::ClaudeCountTokens(req), ctx).await
}

// ---- openai ----

async fn openai_chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<openai::create_chat_completions::request::CreateChatCompletionRequestBody>,
) -> Response {
    let ctx = match dispatch_context(&state, &headers) {
        Ok(ctx) => ctx,
        Err(resp) => return resp,
    };
    let stream = body.stream.unwrap_or(false);
    let req = openai::create_chat_completions::request::CreateChatCompletionRequest { body };
    let req = if stream {
        ProxyRequest::OpenAIChatStream(req)
    } else {
        ProxyRequest::OpenAIChat(req)
    };
    run(&state, req, ctx).await
}

async fn openai_responses(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<openai::create_response::request::CreateResponseRequestBody>,
) -> Response {
    let ctx = match dispatch_context(&state, &headers) {
        Ok(ctx) => ctx,
        Err(resp) => return resp,
    };
    let stream = body.stream.unwrap_or(false);
    let req = openai::create_response::request::CreateResponseRequest { body };
    let req = if stream {
        ProxyRequest::OpenAIResponsesStream(req)
    } else {
        ProxyRequest::OpenAIResponses(req)
    };
    run(&state, req, ctx).await
}

async fn openai_input_tokens(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<openai::count_tokens::request::InputTokenCountRequestBody>,
) -> Response {
    let ctx = match dispatch_context(&state, &headers) {
        Ok(ctx) => ctx,
        Err(resp) => return resp,
    };
    let req = openai::count_tokens::request::InputTokenCountRequest { body };
    run(&state, ProxyRequest::OpenAIInputTokens(req), ctx).await
}

// ---- shared /v1/models listing (openai & anthropic) ----

async fn models_list(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let ctx = match dispatch_context(&state, &headers) {
        Ok(ctx) => ctx,
        Err(resp) => return resp,
    };
    let req = if is_anthropic_caller(&headers) {
        ProxyRequest::ClaudeModelsList(claude::list_models::request::ListModelsRequest {
            query: claude::list_models::request::ListModelsQuery::default(),
            headers: anthropic_headers(&headers),
        })
    } else {
        ProxyRequest::OpenAIModelsList(openai::list_models::request::ListModelsRequest)
    };
    run(&state, req, ctx).await
}

async fn models_get(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(model): Path<String>) -> Response {
    let ctx = match dispatch_context(&state, &headers) {
        Ok(ctx) => ctx,
        Err(resp) => return resp,
    };
    let req = if is_anthropic_caller(&headers) {
        ProxyRequest::ClaudeModelsGet(claude::get_model::request::GetModelRequest {
            path: claude::get_model::request::GetModelPath { model_id: model },
            headers: anthropic_headers(&headers),
        })
    } else {
        ProxyRequest::OpenAIModelsGet(openai::get_model::request::GetModelRequest {
            path: openai::get_model::request::GetModelPath { model },
        })
    };
    run(&state, req, ctx).await
}

// ---- gemini ----

async fn gemini_models_list(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<gemini::list_models::request::ListModelsQuery>,
) -> Response {
    let ctx = match dispatch_context(&state, &headers) {
        Ok(ctx) => ctx,
        Err(resp) => return resp,
    };
    let req = gemini::list_models::request::ListModelsRequest { query };
    run(&state, ProxyRequest::GeminiModelsList(req), ctx).await
}

async fn gemini_models_get(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Response {
    let ctx = match dispatch_context(&state, &headers) {
        Ok(ctx) => ctx,
        Err(resp) => return resp,
    };
    let req = gemini::get_model::request::GetModelRequest {
        path: gemini::get_model::request::GetModelPath { name },
    };
    run(&state, ProxyRequest::GeminiModelsGet(req), ctx).await
}

/// Gemini addresses `generateContent`/`streamGenerateContent`/`countTokens`
/// as a suffix on the model path segment (`models/{model}:generateContent`)
/// rather than as a distinct URL path, so one POST handler demuxes on the
/// `:action` suffix after axum captures the whole segment.
async fn gemini_post(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(model_action): Path<String>,
    RawQuery(query): RawQuery,
    Json(body): Json<gemini::generate_content::request::GenerateContentRequestBody>,
) -> Response {
    let ctx = match dispatch_context(&state, &headers) {
        Ok(ctx) => ctx,
        Err(resp) => return resp,
    };
    let Some((model, action)) = model_action.split_once(':') else {
        return (StatusCode::NOT_FOUND, "missing action suffix").into_response();
    };
    let path = gemini::generate_content::request::GenerateContentPath {
        model: model.to_string(),
    };
    let req = match action {
        "generateContent" => ProxyRequest::GeminiGenerate(gemini::generate_content::request::GenerateContentRequest { path, body }),
        "streamGenerateContent" => {
            ProxyRequest::GeminiGenerateStream(gemini::stream_content::request::StreamGenerateContentRequest { path, body, query })
        }
        "countTokens" => {
            let count_path = gemini::count_tokens::request::CountTokensPath { model: path.model };
            let count_body = gemini::count_tokens::request::CountTokensRequestBody {
                contents: Some(body.contents),
                generate_content_request: None,
            };
            ProxyRequest::GeminiCountTokens(gemini::count_tokens::request::CountTokensRequest {
                path: count_path,
                body: count_body,
            })
        }
        _ => return (StatusCode::NOT_FOUND, "unknown gemini action").into_response(),
    };
    run(&state, req, ctx).await
}
