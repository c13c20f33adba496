use std::pin::Pin;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use http::StatusCode;
use serde_json::json;
use tokio::sync::mpsc;

use llmgate_provider_core::{
    usage_from_response, GenerateContentRequest, GenerateContentResponse, Op, Proto,
    ProviderConfig, Request, Response, StreamEvent, TransformContext, UsageAccumulator,
    UsageSummary,
};
use llmgate_storage::snapshot::ModelRow;
use llmgate_storage::NewChatLog;
use llmgate_transform::middleware::{
    transform_request, transform_response, NostreamToStream, StreamToNostream, StreamTransformer,
};

use crate::auth::AdmissionContext;
use crate::breaker::Outcome;
use crate::error::ProxyError;
use crate::request::ProxyRequest;
use crate::resolver::{resolve_candidates, Candidate};
use crate::selector::{lottery_pick, Strategy};
use crate::shape::{dispatch_table_for, resolve_call_shape, GenerateMode, ResolvedCall};
use crate::state::AppState;
use crate::wire::{content_type_for_stream, encode_openai_chat_done, encode_stream_event, StreamDecoder};

/// Caller identity and connection metadata threaded through a dispatch for
/// admission, stickiness, rate limiting and the eventual log row (§4.J/§4.K).
pub struct DispatchContext {
    pub admission: AdmissionContext,
    pub client_ip: String,
    pub user_agent: Option<String>,
}

pub enum DispatchBody {
    Buffered(Bytes),
    Stream(Pin<Box<dyn Stream<Item = Bytes> + Send>>),
}

pub struct DispatchOutcome {
    pub status: StatusCode,
    pub content_type: &'static str,
    pub body: DispatchBody,
}

/// Entry point for the inbound HTTP surface (§4.L). Classifies the request
/// into either a local read (list/get model, count-tokens — §4.I "never hit
/// an upstream") or a generate-content call, in which case the full
/// PICK/retry loop (§4.J) runs against the resolved candidate pool.
pub async fn dispatch(
    state: &AppState,
    req: ProxyRequest,
    ctx: DispatchContext,
) -> Result<DispatchOutcome, ProxyError> {
    if let Some(outcome) = local_answer(state, &req, &ctx)? {
        return Ok(outcome);
    }

    let proto = req.proto();
    let is_stream = req.is_stream();
    let capabilities = req.required_capabilities();
    let model_name = req
        .model_name()
        .ok_or_else(|| ProxyError::bad_request("missing model name"))?;

    if !ctx.admission.permits_model(&model_name) {
        return Err(ProxyError::unauthorized(format!(
            "auth key {} is not permitted to use model: {model_name}",
            ctx.admission.auth_key_name
        )));
    }

    let Some((user_op, generate_req)) = to_generate_request(req) else {
        return Err(ProxyError::bad_request("unsupported operation for this dialect"));
    };

    let snapshot = state.snapshot.load();
    let (model, mut candidates) =
        resolve_candidates(&snapshot, &state.cache, &state.health, &model_name, capabilities)?;
    if candidates.is_empty() {
        return Err(ProxyError::no_upstream(format!(
            "no binding available for model: {model_name}"
        )));
    }
    candidates.sort_by_key(|c| c.binding.id);

    let global = state.global.load();
    let run = DispatchRun {
        state,
        ctx,
        proto,
        is_stream,
        model,
        candidates,
        outbound_proxy: global.outbound_proxy.clone(),
        default_ip_lock_minutes: global.default_ip_lock_minutes,
        default_token_lock_seconds: global.default_token_lock_seconds,
        default_breaker_threshold: global.default_breaker_threshold,
        default_breaker_cooldown_seconds: global.default_breaker_cooldown_seconds,
        log_body_cap_bytes: global.log_body_cap_bytes,
    };

    run.execute(generate_req, user_op).await
}

/// Answers `list_models`/`get_model`/`count_tokens` directly from the live
/// snapshot, without touching the resolver/selector/breaker loop (§4.I: these
/// never hit an upstream). Returns `None` for every other request variant.
fn local_answer(
    state: &AppState,
    req: &ProxyRequest,
    ctx: &DispatchContext,
) -> Result<Option<DispatchOutcome>, ProxyError> {
    let snapshot = state.snapshot.load();
    let names: Vec<&str> = snapshot
        .models
        .iter()
        .map(|m| m.name.as_str())
        .filter(|name| ctx.admission.permits_model(name))
        .collect();

    let body = match req {
        ProxyRequest::ClaudeModelsList(_) => json!({
            "data": names.iter().map(|n| json!({"id": n, "type": "model", "display_name": n})).collect::<Vec<_>>(),
            "has_more": false,
        }),
        ProxyRequest::OpenAIModelsList(_) => json!({
            "object": "list",
            "data": names.iter().map(|n| json!({"id": n, "object": "model", "owned_by": "llmgate"})).collect::<Vec<_>>(),
        }),
        ProxyRequest::GeminiModelsList(_) => json!({
            "models": names.iter().map(|n| json!({"name": format!("models/{n}"), "displayName": n})).collect::<Vec<_>>(),
        }),
        ProxyRequest::ClaudeModelsGet(r) => {
            return Ok(Some(local_get_model(&snapshot.models, &r.path.model_id, ctx)?));
        }
        ProxyRequest::OpenAIModelsGet(r) => {
            return Ok(Some(local_get_model(&snapshot.models, &r.path.model, ctx)?));
        }
        ProxyRequest::GeminiModelsGet(r) => {
            return Ok(Some(local_get_model(&snapshot.models, &r.path.name, ctx)?));
        }
        ProxyRequest::ClaudeCountTokens(_)
        | ProxyRequest::OpenAIInputTokens(_)
        | ProxyRequest::GeminiCountTokens(_) => {
            return Ok(Some(local_count_tokens(req)));
        }
        _ => return Ok(None),
    };

    Ok(Some(DispatchOutcome {
        status: StatusCode::OK,
        content_type: "application/json",
        body: DispatchBody::Buffered(Bytes::from(serde_json::to_vec(&body).unwrap_or_default())),
    }))
}

fn local_get_model(models: &[ModelRow], name: &str, ctx: &DispatchContext) -> Result<DispatchOutcome, ProxyError> {
    if !ctx.admission.permits_model(name) {
        return Err(ProxyError::unauthorized(format!(
            "auth key is not permitted to use model: {name}"
        )));
    }
    let found = models
        .iter()
        .find(|m| m.name == name)
        .ok_or_else(|| ProxyError::not_found(format!("unknown model: {name}")))?;
    let body = json!({"id": found.name, "name": format!("models/{}", found.name), "display_name": found.remark});
    Ok(DispatchOutcome {
        status: StatusCode::OK,
        content_type: "application/json",
        body: DispatchBody::Buffered(Bytes::from(serde_json::to_vec(&body).unwrap_or_default())),
    })
}

/// Token count is estimated locally (roughly 4 characters per token of the
/// serialized request body) rather than dialed upstream: no provider-impl
/// adapter builds a count-tokens call, and the endpoint estimates tokens for
/// a request that hasn't been sent yet, which fits a local computation.
fn local_count_tokens(req: &ProxyRequest) -> DispatchOutcome {
    let value = req_body_for_estimate(req);
    let chars = serde_json::to_string(&value).map(|s| s.len()).unwrap_or(0);
    let estimated = ((chars as f64) / 4.0).ceil() as u64;
    let body = json!({"input_tokens": estimated});
    DispatchOutcome {
        status: StatusCode::OK,
        content_type: "application/json",
        body: DispatchBody::Buffered(Bytes::from(serde_json::to_vec(&body).unwrap_or_default())),
    }
}

fn req_body_for_estimate(req: &ProxyRequest) -> serde_json::Value {
    match req {
        ProxyRequest::ClaudeCountTokens(r) => serde_json::to_value(&r.body).unwrap_or_default(),
        ProxyRequest::OpenAIInputTokens(r) => serde_json::to_value(&r.body).unwrap_or_default(),
        ProxyRequest::GeminiCountTokens(r) => serde_json::to_value(&r.body).unwrap_or_default(),
        _ => serde_json::Value::Null,
    }
}

/// Maps a classified inbound request onto the transform layer's
/// `GenerateContentRequest` vocabulary. `None` for non-generate ops, which
/// `local_answer` has already handled.
fn to_generate_request(req: ProxyRequest) -> Option<(Op, GenerateContentRequest)> {
    match req {
        ProxyRequest::ClaudeMessages(r) => Some((Op::GenerateContent, GenerateContentRequest::Claude(r))),
        ProxyRequest::ClaudeMessagesStream(r) => {
            Some((Op::StreamGenerateContent, GenerateContentRequest::Claude(r)))
        }
        ProxyRequest::OpenAIChat(r) => Some((Op::GenerateContent, GenerateContentRequest::OpenAIChat(r))),
        ProxyRequest::OpenAIChatStream(r) => {
            Some((Op::StreamGenerateContent, GenerateContentRequest::OpenAIChat(r)))
        }
        ProxyRequest::OpenAIResponses(r) => {
            Some((Op::GenerateContent, GenerateContentRequest::OpenAIResponse(r)))
        }
        ProxyRequest::OpenAIResponsesStream(r) => {
            Some((Op::StreamGenerateContent, GenerateContentRequest::OpenAIResponse(r)))
        }
        ProxyRequest::GeminiGenerate(r) => Some((Op::GenerateContent, GenerateContentRequest::Gemini(r))),
        ProxyRequest::GeminiGenerateStream(r) => {
            Some((Op::StreamGenerateContent, GenerateContentRequest::GeminiStream(r)))
        }
        _ => None,
    }
}

struct DispatchRun<'a> {
    state: &'a AppState,
    ctx: DispatchContext,
    proto: Proto,
    is_stream: bool,
    model: ModelRow,
    candidates: Vec<Candidate>,
    outbound_proxy: Option<String>,
    default_ip_lock_minutes: u32,
    default_token_lock_seconds: u32,
    default_breaker_threshold: u32,
    default_breaker_cooldown_seconds: u32,
    log_body_cap_bytes: u32,
}

impl<'a> DispatchRun<'a> {
    fn deadline(&self) -> Option<Instant> {
        if self.model.time_out_seconds <= 0 {
            None
        } else {
            Some(Instant::now() + Duration::from_secs(self.model.time_out_seconds as u64))
        }
    }

    fn remaining(&self, deadline: Option<Instant>) -> Duration {
        match deadline {
            None => Duration::from_secs(3600),
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
        }
    }

    fn deadline_exceeded(&self, deadline: Option<Instant>) -> bool {
        matches!(deadline, Some(d) if Instant::now() >= d)
    }

    /// Filters a pool of untried binding ids against breaker/rate-limit/IP-lock
    /// state (§4.J step c). A binding already pinned by this auth key's token
    /// lock to a *different* binding is excluded as a soft skip, never a hard
    /// failure.
    fn eligible(&self, pool: &[i64]) -> Vec<i64> {
        let mut eligible = Vec::new();
        for &binding_id in pool {
            let Some(candidate) = self.candidates.iter().find(|c| c.binding.id == binding_id) else {
                continue;
            };

            if self.model.breaker
                && !self.state.health.is_eligible(
                    binding_id,
                    Duration::from_secs(u64::from(self.default_breaker_cooldown_seconds)),
                )
            {
                continue;
            }

            let rpm_limit = candidate.provider.rpm_limit.max(0) as u32;
            if !self.state.ratelimit.try_acquire(candidate.provider.id, rpm_limit) {
                continue;
            }

            let ip_lock_minutes = if candidate.provider.ip_lock_minutes > 0 {
                candidate.provider.ip_lock_minutes.max(0) as u32
            } else {
                self.default_ip_lock_minutes
            };
            if !self
                .state
                .stickiness
                .ip_lock_permits(candidate.provider.id, &self.ctx.client_ip, ip_lock_minutes)
            {
                continue;
            }

            if let Some(pinned) = self.state.stickiness.token_lock_binding(self.ctx.admission.auth_key_id) {
                if pinned != binding_id {
                    continue;
                }
            }

            eligible.push(binding_id);
        }
        eligible
    }

    fn pick(&self, eligible: &[i64]) -> Candidate {
        let pool: Vec<Candidate> = self
            .candidates
            .iter()
            .filter(|c| eligible.contains(&c.binding.id))
            .cloned()
            .collect();
        let picked_id = match Strategy::from_str_or_lottery(&self.model.strategy) {
            Strategy::Lottery => lottery_pick(&pool).binding.id,
            Strategy::Rotor => self.state.rotor.pick(self.model.id, &pool).binding.id,
        };
        self.candidates
            .iter()
            .find(|c| c.binding.id == picked_id)
            .cloned()
            .expect("picked id came from candidates")
    }

    fn record(&self, binding_id: i64, outcome: Outcome) {
        let threshold = self.default_breaker_threshold.max(1);
        self.state.health.record(
            binding_id,
            outcome,
            threshold,
            Duration::from_secs(u64::from(self.default_breaker_cooldown_seconds)),
        );
    }

    async fn execute(self, req: GenerateContentRequest, user_op: Op) -> Result<DispatchOutcome, ProxyError> {
        let started_at = Instant::now();
        let deadline = self.deadline();
        let attempts_cap = self.model.max_retry.max(1) as u32;
        let all_ids: Vec<i64> = self.candidates.iter().map(|c| c.binding.id).collect();
        let input_body = self.model.io_log.then(|| self.render_request_body(&req));

        let mut tried = std::collections::HashSet::new();
        let mut attempt_count: u32 = 0;
        let mut last_err: Option<ProxyError> = None;

        loop {
            if self.deadline_exceeded(deadline) {
                break;
            }
            let pool: Vec<i64> = all_ids.iter().copied().filter(|id| !tried.contains(id)).collect();
            if pool.is_empty() {
                break;
            }

            let mut eligible = self.eligible(&pool);
            if eligible.is_empty() {
                // Soft skips (breaker/rate-limit/lock) exhausted: give the
                // full untried pool a chance rather than stall forever.
                eligible = pool.clone();
            }
            if eligible.is_empty() {
                break;
            }

            let candidate = self.pick(&eligible);
            let binding_id = candidate.binding.id;

            if !self.state.stickiness.token_lock_permits(
                self.ctx.admission.auth_key_id,
                binding_id,
                self.default_token_lock_seconds,
            ) {
                // Lost a race against another request pinning this binding;
                // retry without counting it as a failed attempt.
                tried.insert(binding_id);
                continue;
            }

            let config: ProviderConfig = match serde_json::from_value(candidate.provider.config_json.clone()) {
                Ok(config) => config,
                Err(err) => {
                    last_err = Some(ProxyError::internal(format!("invalid provider config: {err}")));
                    self.record(binding_id, Outcome::Failure);
                    tried.insert(binding_id);
                    attempt_count += 1;
                    if attempt_count >= attempts_cap {
                        break;
                    }
                    continue;
                }
            };
            let native = provider_native_proto(&config);
            let dispatch_table = dispatch_table_for(native);

            let Some(resolved) = resolve_call_shape(&dispatch_table, self.proto, user_op) else {
                last_err = Some(ProxyError::no_upstream("binding cannot serve this dialect/op"));
                tried.insert(binding_id);
                attempt_count += 1;
                if attempt_count >= attempts_cap {
                    break;
                }
                continue;
            };

            match self
                .attempt(&candidate, &config, resolved, &req, user_op, self.remaining(deadline))
                .await
            {
                Ok(AttemptOutcome::Success {
                    status,
                    content_type,
                    body,
                    first_chunk_ms,
                    usage,
                    response_size_bytes,
                    output_body,
                }) => {
                    self.record(binding_id, Outcome::Success);
                    let proxy_ms = started_at.elapsed().as_millis() as i64;
                    let io = input_body.clone().zip(output_body);
                    self.write_log(
                        &candidate,
                        attempt_count,
                        None,
                        proxy_ms,
                        first_chunk_ms,
                        usage,
                        response_size_bytes,
                        io,
                    );
                    return Ok(DispatchOutcome { status, content_type, body });
                }
                Ok(AttemptOutcome::Retry(err)) => {
                    self.record(binding_id, Outcome::Failure);
                    tried.insert(binding_id);
                    attempt_count += 1;
                    last_err = Some(err);
                    if attempt_count >= attempts_cap {
                        break;
                    }
                }
                Err(err) => {
                    self.record(binding_id, Outcome::Failure);
                    let proxy_ms = started_at.elapsed().as_millis() as i64;
                    let io = input_body
                        .clone()
                        .map(|input| (input, format!("error: {}", String::from_utf8_lossy(&err.body))));
                    self.write_log(
                        &candidate,
                        attempt_count,
                        Some(err.kind.code().to_string()),
                        proxy_ms,
                        None,
                        None,
                        0,
                        io,
                    );
                    return Err(err);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| ProxyError::no_upstream("no eligible binding")))
    }

    /// Renders the inbound request body for ChatIO persistence (§3, §4.K),
    /// truncated to the configured cap.
    fn render_request_body(&self, req: &GenerateContentRequest) -> String {
        let value = match req {
            GenerateContentRequest::Claude(r) => serde_json::to_value(&r.body),
            GenerateContentRequest::OpenAIChat(r) => serde_json::to_value(&r.body),
            GenerateContentRequest::OpenAIResponse(r) => serde_json::to_value(&r.body),
            GenerateContentRequest::Gemini(r) => serde_json::to_value(&r.body),
            GenerateContentRequest::GeminiStream(r) => serde_json::to_value(&r.body),
        }
        .unwrap_or_default();
        truncate_body(&value.to_string(), self.log_body_cap_bytes as usize)
    }

    #[allow(clippy::too_many_arguments)]
    fn write_log(
        &self,
        candidate: &Candidate,
        attempt_count: u32,
        error: Option<String>,
        proxy_ms: i64,
        first_chunk_ms: Option<i64>,
        usage: Option<UsageSummary>,
        response_size_bytes: i64,
        io: Option<(String, String)>,
    ) {
        let status = if error.is_some() { "error" } else { "ok" }.to_string();
        let chunk_ms = first_chunk_ms.map(|fc| (proxy_ms - fc).max(0));
        let prompt_tokens = usage.as_ref().and_then(|u| u.input_tokens).unwrap_or(0) as i64;
        let completion_tokens = usage.as_ref().and_then(|u| u.output_tokens).unwrap_or(0) as i64;
        let cached_tokens = usage
            .as_ref()
            .and_then(|u| u.cache_read_input_tokens)
            .map(i64::from);
        let total_tokens = prompt_tokens + completion_tokens;
        let tps = if completion_tokens > 0 && proxy_ms > 0 {
            Some(completion_tokens as f64 / (proxy_ms as f64 / 1000.0))
        } else {
            None
        };
        let auth_key_id = self.ctx.admission.auth_key_id;
        let entry = NewChatLog {
            auth_key_id,
            model_name: self.model.name.clone(),
            provider_name: candidate.provider.name.clone(),
            provider_model: candidate.binding.provider_model.clone(),
            dialect: candidate.provider.kind.clone(),
            status,
            user_agent: self.ctx.user_agent.clone(),
            remote_ip: Some(self.ctx.client_ip.clone()),
            error,
            retry_count: attempt_count as i32,
            proxy_ms,
            first_chunk_ms,
            chunk_ms,
            tps,
            response_size_bytes,
            prompt_tokens,
            completion_tokens,
            total_tokens,
            cached_tokens,
            io,
        };
        let storage = self.state.storage.clone();
        tokio::spawn(async move {
            let _ = storage.write_chat_log(entry).await;
            let _ = storage.record_auth_key_usage(auth_key_id).await;
        });
    }

    async fn attempt(
        &self,
        candidate: &Candidate,
        config: &ProviderConfig,
        resolved: ResolvedCall,
        req: &GenerateContentRequest,
        user_op: Op,
        timeout: Duration,
    ) -> Result<AttemptOutcome, ProxyError> {
        let ctx_same = TransformContext {
            src: self.proto,
            dst: resolved.provider_proto,
            src_op: user_op,
            dst_op: resolved.provider_op,
        };

        let translated = transform_request(&ctx_same, Request::GenerateContent(clone_generate_request(req)))
            .map_err(|err| ProxyError::bad_request(format!("unsupported translation: {err:?}")))?;
        let Request::GenerateContent(translated) = translated else {
            return Err(ProxyError::internal("transform produced wrong request kind"));
        };

        let mut upstream_req =
            llmgate_provider_impl::build_request(config, &candidate.binding.provider_model, &translated)
                .map_err(|err| ProxyError::bad_request(err.to_string()))?;
        apply_binding_headers(&mut upstream_req, candidate);

        let send_result = crate::http_client::send(&upstream_req, self.outbound_proxy.as_deref(), timeout).await;
        let upstream = match send_result {
            Ok(upstream) => upstream,
            Err(err) if err.kind.is_retryable() => return Ok(AttemptOutcome::Retry(err)),
            Err(err) => return Err(err),
        };

        match resolved.mode {
            GenerateMode::Same if resolved.provider_op == Op::StreamGenerateContent => {
                self.finish_stream(upstream, resolved, user_op).await
            }
            GenerateMode::Same => self.finish_unary(upstream, resolved, user_op).await,
            GenerateMode::NonToStream => self.finish_non_to_stream(upstream, resolved).await,
            GenerateMode::StreamToNon => self.finish_stream_to_unary(upstream, resolved).await,
        }
    }

    async fn finish_unary(
        &self,
        upstream: crate::http_client::UpstreamResponse,
        resolved: ResolvedCall,
        user_op: Op,
    ) -> Result<AttemptOutcome, ProxyError> {
        let body = match upstream.body {
            crate::http_client::UpstreamBody::Buffered(body) => body,
            crate::http_client::UpstreamBody::Stream(_) => {
                return Err(ProxyError::internal("expected buffered response for unary attempt"));
            }
        };

        let provider_resp = decode_generate_response(resolved.provider_proto, &body)
            .map_err(|err| ProxyError::upstream_error(upstream.status, err))?;
        let usage = usage_from_response(resolved.provider_proto, &provider_resp);

        let ctx_back = TransformContext {
            src: resolved.provider_proto,
            dst: self.proto,
            src_op: resolved.provider_op,
            dst_op: user_op,
        };
        let client_resp = transform_response(&ctx_back, Response::GenerateContent(provider_resp))
            .map_err(|err| ProxyError::internal(format!("response translation failed: {err:?}")))?;
        let Response::GenerateContent(client_resp) = client_resp else {
            return Err(ProxyError::internal("transform produced wrong response kind"));
        };

        let encoded = encode_generate_response(self.proto, &client_resp)?;
        let output_body = self
            .model
            .io_log
            .then(|| truncate_body(&String::from_utf8_lossy(&encoded), self.log_body_cap_bytes as usize));
        Ok(AttemptOutcome::Success {
            status: upstream.status,
            content_type: "application/json",
            response_size_bytes: encoded.len() as i64,
            body: DispatchBody::Buffered(encoded),
            first_chunk_ms: None,
            usage,
            output_body,
        })
    }

    async fn finish_non_to_stream(
        &self,
        upstream: crate::http_client::UpstreamResponse,
        resolved: ResolvedCall,
    ) -> Result<AttemptOutcome, ProxyError> {
        let body = match upstream.body {
            crate::http_client::UpstreamBody::Buffered(body) => body,
            crate::http_client::UpstreamBody::Stream(_) => {
                return Err(ProxyError::internal("expected buffered response for non-to-stream attempt"));
            }
        };
        let provider_resp = decode_generate_response(resolved.provider_proto, &body)
            .map_err(|err| ProxyError::upstream_error(upstream.status, err))?;
        let usage = usage_from_response(resolved.provider_proto, &provider_resp);

        let mid_ctx = TransformContext {
            src: resolved.provider_proto,
            dst: self.proto,
            src_op: Op::GenerateContent,
            dst_op: Op::StreamGenerateContent,
        };
        let mut streamifier = NostreamToStream::new(&mid_ctx).map_err(|err| ProxyError::internal(format!("{err:?}")))?;
        let events = streamifier
            .transform_response(Response::GenerateContent(provider_resp))
            .map_err(|err| ProxyError::internal(format!("{err:?}")))?;

        let mut out = Vec::new();
        for event in &events {
            if let Some(bytes) = encode_stream_event(self.proto, event) {
                out.extend_from_slice(&bytes);
            }
        }
        if matches!(self.proto, Proto::OpenAIChat) {
            out.extend_from_slice(&encode_openai_chat_done());
        }
        let output_body = self
            .model
            .io_log
            .then(|| truncate_body(&String::from_utf8_lossy(&out), self.log_body_cap_bytes as usize));
        Ok(AttemptOutcome::Success {
            status: upstream.status,
            content_type: content_type_for_stream(self.proto),
            response_size_bytes: out.len() as i64,
            body: DispatchBody::Buffered(Bytes::from(out)),
            first_chunk_ms: Some(0),
            usage,
            output_body,
        })
    }

    /// Provider only speaks streaming for this op; the caller wants a unary
    /// response, so the whole upstream stream is consumed and accumulated
    /// into one response before answering (§4.I stream-to-unary fallback).
    async fn finish_stream_to_unary(
        &self,
        upstream: crate::http_client::UpstreamResponse,
        resolved: ResolvedCall,
    ) -> Result<AttemptOutcome, ProxyError> {
        let mut upstream_stream = into_byte_stream(upstream.body);

        let ctx = TransformContext {
            src: resolved.provider_proto,
            dst: self.proto,
            src_op: Op::StreamGenerateContent,
            dst_op: Op::GenerateContent,
        };
        let mut accumulator = StreamToNostream::new(&ctx).map_err(|err| ProxyError::internal(format!("{err:?}")))?;
        let format = llmgate_provider_core::stream_format(resolved.provider_proto)
            .ok_or_else(|| ProxyError::internal("provider dialect has no stream format"))?;
        let mut decoder = StreamDecoder::new(resolved.provider_proto, format);
        let mut usage_acc = UsageAccumulator::new(resolved.provider_proto);
        let mut result = None;

        while let Some(chunk) = upstream_stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => return Ok(AttemptOutcome::Retry(crate::http_client::classify_stream_error(&err, false))),
            };
            for event in decoder.push_bytes(&chunk) {
                usage_acc.push(&event);
                if let Some(resp) = accumulator.push(event).map_err(|err| ProxyError::internal(format!("{err:?}")))? {
                    result = Some(resp);
                }
            }
        }
        for event in decoder.finish() {
            usage_acc.push(&event);
            if let Some(resp) = accumulator.push(event).map_err(|err| ProxyError::internal(format!("{err:?}")))? {
                result = Some(resp);
            }
        }
        if result.is_none() {
            result = accumulator
                .finalize_on_eof()
                .map_err(|err| ProxyError::internal(format!("{err:?}")))?;
        }

        let Some(Response::GenerateContent(client_resp)) = result else {
            return Err(ProxyError::upstream_stream_broken_pre("stream ended without a complete response"));
        };
        let encoded = encode_generate_response(self.proto, &client_resp)?;
        let output_body = self
            .model
            .io_log
            .then(|| truncate_body(&String::from_utf8_lossy(&encoded), self.log_body_cap_bytes as usize));
        Ok(AttemptOutcome::Success {
            status: upstream.status,
            content_type: "application/json",
            response_size_bytes: encoded.len() as i64,
            body: DispatchBody::Buffered(encoded),
            first_chunk_ms: None,
            usage: usage_acc.finalize(),
            output_body,
        })
    }

    async fn finish_stream(
        &self,
        upstream: crate::http_client::UpstreamResponse,
        resolved: ResolvedCall,
        user_op: Op,
    ) -> Result<AttemptOutcome, ProxyError> {
        let mut upstream_stream = into_byte_stream(upstream.body);

        let needs_shape_transform = resolved.provider_proto != self.proto || resolved.provider_op != user_op;
        let stream_ctx = TransformContext {
            src: resolved.provider_proto,
            dst: self.proto,
            src_op: resolved.provider_op,
            dst_op: user_op,
        };
        let mut transformer = if needs_shape_transform {
            Some(StreamTransformer::new(&stream_ctx).map_err(|err| ProxyError::internal(format!("{err:?}")))?)
        } else {
            None
        };

        let format = llmgate_provider_core::stream_format(resolved.provider_proto)
            .ok_or_else(|| ProxyError::internal("provider dialect has no stream format"))?;
        let mut decoder = StreamDecoder::new(resolved.provider_proto, format);
        let mut usage_acc = UsageAccumulator::new(resolved.provider_proto);
        let dst_proto = self.proto;
        let content_type = content_type_for_stream(dst_proto);
        let io_log = self.model.io_log;
        let cap = self.log_body_cap_bytes as usize;

        let (tx, rx) = mpsc::unbounded_channel::<Bytes>();
        let mut bytes_flushed = false;
        let mut bytes_sent: i64 = 0;
        let mut output_buf = io_log.then(String::new);
        let mut first_chunk_ms: Option<i64> = None;
        let started_at = Instant::now();

        while let Some(chunk) = upstream_stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    let classified = crate::http_client::classify_stream_error(&err, bytes_flushed);
                    if bytes_flushed {
                        let frame = encode_error_frame(dst_proto, &classified);
                        bytes_sent += frame.len() as i64;
                        let _ = tx.send(frame);
                        return Ok(AttemptOutcome::Success {
                            status: upstream.status,
                            content_type,
                            response_size_bytes: bytes_sent,
                            body: DispatchBody::Stream(Box::pin(tokio_stream_from_receiver(rx))),
                            first_chunk_ms,
                            usage: usage_acc.finalize(),
                            output_body: output_buf.map(|b| truncate_body(&b, cap)),
                        });
                    }
                    return Ok(AttemptOutcome::Retry(classified));
                }
            };
            if first_chunk_ms.is_none() {
                first_chunk_ms = Some(started_at.elapsed().as_millis() as i64);
            }
            for event in decoder.push_bytes(&chunk) {
                usage_acc.push(&event);
                emit_stream_event(
                    event,
                    &mut transformer,
                    dst_proto,
                    &tx,
                    &mut bytes_flushed,
                    &mut bytes_sent,
                    &mut output_buf,
                    cap,
                )?;
            }
        }
        for event in decoder.finish() {
            usage_acc.push(&event);
            emit_stream_event(
                event,
                &mut transformer,
                dst_proto,
                &tx,
                &mut bytes_flushed,
                &mut bytes_sent,
                &mut output_buf,
                cap,
            )?;
        }
        if matches!(dst_proto, Proto::OpenAIChat) {
            let done = encode_openai_chat_done();
            bytes_sent += done.len() as i64;
            let _ = tx.send(done);
        }

        Ok(AttemptOutcome::Success {
            status: upstream.status,
            content_type,
            response_size_bytes: bytes_sent,
            body: DispatchBody::Stream(Box::pin(tokio_stream_from_receiver(rx))),
            first_chunk_ms,
            usage: usage_acc.finalize(),
            output_body: output_buf.map(|b| truncate_body(&b, cap)),
        })
    }
}

#[allow(clippy::too_many_arguments)]
fn emit_stream_event(
    event: StreamEvent,
    transformer: &mut Option<StreamTransformer>,
    dst_proto: Proto,
    tx: &mpsc::UnboundedSender<Bytes>,
    bytes_flushed: &mut bool,
    bytes_sent: &mut i64,
    output_buf: &mut Option<String>,
    cap: usize,
) -> Result<(), ProxyError> {
    let out_events: Vec<StreamEvent> = match transformer {
        Some(transformer) => transformer.push(event).map_err(|err| ProxyError::internal(format!("{err:?}")))?,
        None => vec![event],
    };
    for out_event in out_events {
        if let Some(bytes) = encode_stream_event(dst_proto, &out_event) {
            *bytes_flushed = true;
            *bytes_sent += bytes.len() as i64;
            if let Some(buf) = output_buf {
                if buf.len() < cap {
                    buf.push_str(&String::from_utf8_lossy(&bytes));
                }
            }
            let _ = tx.send(bytes);
        }
    }
    Ok(())
}

enum AttemptOutcome {
    Success {
        status: StatusCode,
        content_type: &'static str,
        body: DispatchBody,
        first_chunk_ms: Option<i64>,
        usage: Option<UsageSummary>,
        response_size_bytes: i64,
        output_body: Option<String>,
    },
    Retry(ProxyError),
}

fn truncate_body(body: &str, cap: usize) -> String {
    if body.len() <= cap {
        return body.to_string();
    }
    let mut end = cap;
    while end > 0 && !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

fn tokio_stream_from_receiver(mut rx: mpsc::UnboundedReceiver<Bytes>) -> impl Stream<Item = Bytes> {
    futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx))
}

fn into_byte_stream(
    body: crate::http_client::UpstreamBody,
) -> Pin<Box<dyn Stream<Item = Result<Bytes, wreq::Error>> + Send>> {
    match body {
        crate::http_client::UpstreamBody::Stream(stream) => stream,
        crate::http_client::UpstreamBody::Buffered(body) => {
            Box::pin(futures_util::stream::once(async move { Ok(body) }))
        }
    }
}

fn provider_native_proto(config: &ProviderConfig) -> Proto {
    match config {
        ProviderConfig::OpenAi(_) => Proto::OpenAIChat,
        ProviderConfig::OpenAiRes(_) => Proto::OpenAIResponse,
        ProviderConfig::Anthropic(_) => Proto::Claude,
        ProviderConfig::Gemini(_) => Proto::Gemini,
    }
}

fn clone_generate_request(req: &GenerateContentRequest) -> GenerateContentRequest {
    match req {
        GenerateContentRequest::Claude(r) => GenerateContentRequest::Claude(r.clone()),
        GenerateContentRequest::OpenAIChat(r) => GenerateContentRequest::OpenAIChat(r.clone()),
        GenerateContentRequest::OpenAIResponse(r) => GenerateContentRequest::OpenAIResponse(r.clone()),
        GenerateContentRequest::Gemini(r) => GenerateContentRequest::Gemini(r.clone()),
        GenerateContentRequest::GeminiStream(r) => GenerateContentRequest::GeminiStream(r.clone()),
    }
}

fn apply_binding_headers(req: &mut llmgate_provider_impl::UpstreamRequest, candidate: &Candidate) {
    if !candidate.binding.with_header {
        return;
    }
    let Some(custom) = candidate.binding.customer_headers.as_object() else {
        return;
    };
    let pairs: Vec<(String, String)> = custom
        .iter()
        .filter_map(|(key, value)| value.as_str().map(|v| (key.clone(), v.to_string())))
        .collect();
    llmgate_provider_impl::headers::apply_custom_headers(req, &pairs);
}

fn decode_generate_response(proto: Proto, body: &Bytes) -> Result<GenerateContentResponse, String> {
    match proto {
        Proto::Claude => serde_json::from_slice(body).map(GenerateContentResponse::Claude).map_err(|err| err.to_string()),
        Proto::OpenAIChat => serde_json::from_slice(body)
            .map(GenerateContentResponse::OpenAIChat)
            .map_err(|err| err.to_string()),
        Proto::OpenAIResponse => serde_json::from_slice(body)
            .map(GenerateContentResponse::OpenAIResponse)
            .map_err(|err| err.to_string()),
        Proto::Gemini => serde_json::from_slice(body).map(GenerateContentResponse::Gemini).map_err(|err| err.to_string()),
        Proto::OpenAI => Err("openai dialect has no generate-content shape".to_string()),
    }
}

fn encode_generate_response(proto: Proto, resp: &GenerateContentResponse) -> Result<Bytes, ProxyError> {
    let value = match (proto, resp) {
        (Proto::Claude, GenerateContentResponse::Claude(r)) => serde_json::to_vec(r),
        (Proto::OpenAIChat, GenerateContentResponse::OpenAIChat(r)) => serde_json::to_vec(r),
        (Proto::OpenAIResponse, GenerateContentResponse::OpenAIResponse(r)) => serde_json::to_vec(r),
        (Proto::Gemini, GenerateContentResponse::Gemini(r)) => serde_json::to_vec(r),
        _ => return Err(ProxyError::internal("response dialect mismatch")),
    };
    value.map(Bytes::from).map_err(|err| ProxyError::internal(err.to_string()))
}

fn encode_error_frame(proto: Proto, err: &ProxyError) -> Bytes {
    let payload = json!({"error": {"type": err.kind.code(), "message": String::from_utf8_lossy(&err.body)}});
    let data = serde_json::to_string(&payload).unwrap_or_default();
    match proto {
        Proto::Gemini => Bytes::from(format!("{data}\n")),
        _ => Bytes::from(format!("event: error\ndata: {data}\n\n")),
    }
}
