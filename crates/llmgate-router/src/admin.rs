use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use llmgate_core::state::AppState;
use llmgate_storage::{
    LogCleanupFilter, NewAuthKey, NewBinding, NewModel, NewProvider, Page, Storage, StorageError,
};

/// The peripheral CRUD surface (§1, §4.A) — providers/models/bindings/auth-keys
/// plus log cleanup. Every mutation writes through `Storage` then calls
/// `AppState::reload_snapshot` so the dispatcher never observes a stale
/// binding list (§4.B's namespace-bump guarantee).
#[derive(Clone)]
pub struct AdminState {
    pub app: Arc<AppState>,
    pub storage: Arc<dyn Storage>,
}

pub fn admin_router(app: Arc<AppState>, storage: Arc<dyn Storage>) -> Router {
    let state = AdminState { app, storage };

    Router::new()
        .route("/health", get(health))
        .route("/global_config", get(get_global).put(put_global))
        .route("/providers", get(list_providers).post(create_provider))
        .route(
            "/providers/{id}",
            put(update_provider).delete(delete_provider),
        )
        .route("/models", get(list_models).post(create_model))
        .route("/models/{id}", put(update_model).delete(delete_model))
        .route("/bindings", get(list_bindings).post(create_binding))
        .route("/bindings/{id}", put(update_binding).delete(delete_binding))
        .route("/auth_keys", get(list_auth_keys).post(create_auth_key))
        .route(
            "/auth_keys/{id}",
            put(update_auth_key).delete(delete_auth_key),
        )
        .route("/logs/cleanup", post(cleanup_logs))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth))
        .with_state(state)
}

// ---- envelope (§6 "Response envelope for admin routes") ----

fn ok(data: JsonValue) -> Response {
    (
        StatusCode::OK,
        Json(json!({"code": 200, "message": "ok", "data": data})),
    )
        .into_response()
}

fn err(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({"code": status.as_u16(), "message": message.into(), "data": JsonValue::Null})),
    )
        .into_response()
}

fn storage_err(e: StorageError) -> Response {
    match e {
        StorageError::NotFound => err(StatusCode::NOT_FOUND, "not found"),
        other => err(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}

async fn reload_or_err(state: &AdminState) -> Option<Response> {
    match state.app.reload_snapshot().await {
        Ok(()) => None,
        Err(e) => Some(storage_err(e)),
    }
}

// ---- auth middleware ----

async fn admin_auth(
    State(state): State<AdminState>,
    headers: HeaderMap,
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let Some(key) = extract_admin_key(&headers) else {
        return Err(err(StatusCode::UNAUTHORIZED, "missing admin key"));
    };
    let expected = state.app.global.load().admin_key_hash.clone();
    if blake3::hash(key.as_bytes()).to_hex().to_string() != expected {
        return Err(err(StatusCode::UNAUTHORIZED, "invalid admin key"));
    }
    Ok(next.run(req).await)
}

fn extract_admin_key(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get("x-admin-key")
        && let Ok(s) = value.to_str()
    {
        let s = s.trim();
        if !s.is_empty() {
            return Some(s.to_string());
        }
    }
    let value = headers.get(header::AUTHORIZATION)?;
    let auth = value.to_str().ok()?.trim();
    let prefix = "Bearer ";
    if auth.len() > prefix.len() && auth[..prefix.len()].eq_ignore_ascii_case(prefix) {
        let token = auth[prefix.len()..].trim();
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }
    None
}

async fn health() -> Response {
    ok(json!({"ok": true}))
}

// ---- global config ----

async fn get_global(State(state): State<AdminState>) -> Response {
    let global = state.app.global.load();
    ok(json!({
        "host": global.host,
        "port": global.port,
        "outbound_proxy": global.outbound_proxy,
        "dsn": global.dsn,
        "event_redact_sensitive": global.event_redact_sensitive,
        "log_body_cap_bytes": global.log_body_cap_bytes,
        "default_ip_lock_minutes": global.default_ip_lock_minutes,
        "default_token_lock_seconds": global.default_token_lock_seconds,
        "default_breaker_threshold": global.default_breaker_threshold,
        "default_breaker_cooldown_seconds": global.default_breaker_cooldown_seconds,
        "default_health_window": global.default_health_window,
    }))
}

#[derive(Debug, Deserialize)]
struct PutGlobalBody {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub outbound_proxy: Option<String>,
    pub event_redact_sensitive: Option<bool>,
    pub log_body_cap_bytes: Option<u32>,
    pub default_ip_lock_minutes: Option<u32>,
    pub default_token_lock_seconds: Option<u32>,
    pub default_breaker_threshold: Option<u32>,
    pub default_breaker_cooldown_seconds: Option<u32>,
    pub default_health_window: Option<u32>,
}

async fn put_global(State(state): State<AdminState>, Json(body): Json<PutGlobalBody>) -> Response {
    let mut patch = llmgate_common::GlobalConfigPatch::from(state.app.global.load().as_ref().clone());
    patch.overlay(llmgate_common::GlobalConfigPatch {
        host: body.host,
        port: body.port,
        admin_key_hash: None,
        outbound_proxy: body.outbound_proxy,
        dsn: None,
        event_redact_sensitive: body.event_redact_sensitive,
        log_body_cap_bytes: body.log_body_cap_bytes,
        default_ip_lock_minutes: body.default_ip_lock_minutes,
        default_token_lock_seconds: body.default_token_lock_seconds,
        default_breaker_threshold: body.default_breaker_threshold,
        default_breaker_cooldown_seconds: body.default_breaker_cooldown_seconds,
        default_health_window: body.default_health_window,
    });
    let next = match patch.into_config() {
        Ok(v) => v,
        Err(e) => return err(StatusCode::BAD_REQUEST, e.to_string()),
    };
    if let Err(e) = state.storage.upsert_global_config(&next).await {
        return storage_err(e);
    }
    state.app.apply_global_config(next);
    ok(json!({"ok": true}))
}

// ---- pagination helper ----

#[derive(Debug, Deserialize)]
struct PageQuery {
    page: Option<u64>,
    page_size: Option<u64>,
}

impl From<PageQuery> for Page {
    fn from(q: PageQuery) -> Self {
        Page {
            page: q.page.unwrap_or(1),
            page_size: q.page_size.unwrap_or(20),
        }
    }
}

fn paged_response(rows: Vec<JsonValue>, total: u64) -> Response {
    ok(json!({"rows": rows, "total": total}))
}

fn provider_json(p: &llmgate_storage::entities::providers::Model) -> JsonValue {
    json!({
        "id": p.id,
        "name": p.name,
        "kind": p.kind,
        "config_json": p.config_json,
        "console_url": p.console_url,
        "rpm_limit": p.rpm_limit,
        "ip_lock_minutes": p.ip_lock_minutes,
        "created_at": p.created_at.format(&Rfc3339).unwrap_or_default(),
        "updated_at": p.updated_at.format(&Rfc3339).unwrap_or_default(),
    })
}

// ---- providers ----

async fn list_providers(State(state): State<AdminState>, Query(q): Query<PageQuery>) -> Response {
    match state.storage.list_providers(q.into()).await {
        Ok(r) => paged_response(r.rows.iter().map(provider_json).collect(), r.total),
        Err(e) => storage_err(e),
    }
}

#[derive(Debug, Deserialize)]
struct ProviderBody {
    name: String,
    kind: String,
    config_json: JsonValue,
    console_url: Option<String>,
    #[serde(default)]
    rpm_limit: i32,
    #[serde(default)]
    ip_lock_minutes: i32,
}

impl From<ProviderBody> for NewProvider {
    fn from(b: ProviderBody) -> Self {
        NewProvider {
            name: b.name,
            kind: b.kind,
            config_json: b.config_json,
            console_url: b.console_url,
            rpm_limit: b.rpm_limit,
            ip_lock_minutes: b.ip_lock_minutes,
        }
    }
}

async fn create_provider(State(state): State<AdminState>, Json(body): Json<ProviderBody>) -> Response {
    let id = match state.storage.create_provider(body.into()).await {
        Ok(id) => id,
        Err(e) => return storage_err(e),
    };
    if let Some(resp) = reload_or_err(&state).await {
        return resp;
    }
    ok(json!({"id": id}))
}

async fn update_provider(
    State(state): State<AdminState>,
    Path(id): Path<i64>,
    Json(body): Json<ProviderBody>,
) -> Response {
    if let Err(e) = state.storage.update_provider(id, body.into()).await {
        return storage_err(e);
    }
    if let Some(resp) = reload_or_err(&state).await {
        return resp;
    }
    ok(json!({"id": id}))
}

async fn delete_provider(State(state): State<AdminState>, Path(id): Path<i64>) -> Response {
    let row_count = match state.storage.soft_delete_provider(id).await {
        Ok(n) => n,
        Err(e) => return storage_err(e),
    };
    if let Some(resp) = reload_or_err(&state).await {
        return resp;
    }
    ok(json!({"row_count": row_count}))
}

// ---- models ----

fn model_json(m: &llmgate_storage::entities::models::Model) -> JsonValue {
    json!({
        "id": m.id,
        "name": m.name,
        "remark": m.remark,
        "max_retry": m.max_retry,
        "time_out_seconds": m.time_out_seconds,
        "io_log": m.io_log,
        "strategy": m.strategy,
        "breaker": m.breaker,
        "created_at": m.created_at.format(&Rfc3339).unwrap_or_default(),
        "updated_at": m.updated_at.format(&Rfc3339).unwrap_or_default(),
    })
}

async fn list_models(State(state): State<AdminState>, Query(q): Query<PageQuery>) -> Response {
    match state.storage.list_models(q.into()).await {
        Ok(r) => paged_response(r.rows.iter().map(model_json).collect(), r.total),
        Err(e) => storage_err(e),
    }
}

#[derive(Debug, Deserialize)]
struct ModelBody {
    name: String,
    remark: Option<String>,
    #[serde(default)]
    max_retry: i32,
    #[serde(default)]
    time_out_seconds: i32,
    #[serde(default)]
    io_log: bool,
    #[serde(default = "default_strategy")]
    strategy: String,
    #[serde(default)]
    breaker: bool,
}

fn default_strategy() -> String {
    "lottery".to_string()
}

impl From<ModelBody> for NewModel {
    fn from(b: ModelBody) -> Self {
        NewModel {
            name: b.name,
            remark: b.remark,
            max_retry: b.max_retry,
            time_out_seconds: b.time_out_seconds,
            io_log: b.io_log,
            strategy: b.strategy,
            breaker: b.breaker,
        }
    }
}

async fn create_model(State(state): State<AdminState>, Json(body): Json<ModelBody>) -> Response {
    let id = match state.storage.create_model(body.into()).await {
        Ok(id) => id,
        Err(e) => return storage_err(e),
    };
    if let Some(resp) = reload_or_err(&state).await {
        return resp;
    }
    ok(json!({"id": id}))
}

async fn update_model(
    State(state): State<AdminState>,
    Path(id): Path<i64>,
    Json(body): Json<ModelBody>,
) -> Response {
    if let Err(e) = state.storage.update_model(id, body.into()).await {
        return storage_err(e);
    }
    if let Some(resp) = reload_or_err(&state).await {
        return resp;
    }
    ok(json!({"id": id}))
}

async fn delete_model(State(state): State<AdminState>, Path(id): Path<i64>) -> Response {
    let row_count = match state.storage.soft_delete_model(id).await {
        Ok(n) => n,
        Err(e) => return storage_err(e),
    };
    if let Some(resp) = reload_or_err(&state).await {
        return resp;
    }
    ok(json!({"row_count": row_count}))
}

// ---- bindings ----

fn binding_json(b: &llmgate_storage::entities::bindings::Model) -> JsonValue {
    json!({
        "id": b.id,
        "model_id": b.model_id,
        "provider_id": b.provider_id,
        "provider_model": b.provider_model,
        "cap_tool_call": b.cap_tool_call,
        "cap_structured_output": b.cap_structured_output,
        "cap_image": b.cap_image,
        "with_header": b.with_header,
        "customer_headers": b.customer_headers,
        "status": b.status,
        "weight": b.weight,
        "created_at": b.created_at.format(&Rfc3339).unwrap_or_default(),
        "updated_at": b.updated_at.format(&Rfc3339).unwrap_or_default(),
    })
}

async fn list_bindings(State(state): State<AdminState>, Query(q): Query<PageQuery>) -> Response {
    match state.storage.list_bindings(q.into()).await {
        Ok(r) => paged_response(r.rows.iter().map(binding_json).collect(), r.total),
        Err(e) => storage_err(e),
    }
}

#[derive(Debug, Deserialize)]
struct BindingBody {
    model_id: i64,
    provider_id: i64,
    provider_model: String,
    #[serde(default)]
    cap_tool_call: bool,
    #[serde(default)]
    cap_structured_output: bool,
    #[serde(default)]
    cap_image: bool,
    #[serde(default)]
    with_header: bool,
    #[serde(default)]
    customer_headers: JsonValue,
    #[serde(default = "default_true")]
    status: bool,
    #[serde(default = "default_weight")]
    weight: i32,
}

fn default_true() -> bool {
    true
}

fn default_weight() -> i32 {
    1
}

impl From<BindingBody> for NewBinding {
    fn from(b: BindingBody) -> Self {
        NewBinding {
            model_id: b.model_id,
            provider_id: b.provider_id,
            provider_model: b.provider_model,
            cap_tool_call: b.cap_tool_call,
            cap_structured_output: b.cap_structured_output,
            cap_image: b.cap_image,
            with_header: b.with_header,
            customer_headers: b.customer_headers,
            status: b.status,
            weight: b.weight,
        }
    }
}

async fn create_binding(State(state): State<AdminState>, Json(body): Json<BindingBody>) -> Response {
    let id = match state.storage.create_binding(body.into()).await {
        Ok(id) => id,
        Err(e) => return storage_err(e),
    };
    if let Some(resp) = reload_or_err(&state).await {
        return resp;
    }
    ok(json!({"id": id}))
}

async fn update_binding(
    State(state): State<AdminState>,
    Path(id): Path<i64>,
    Json(body): Json<BindingBody>,
) -> Response {
    if let Err(e) = state.storage.update_binding(id, body.into()).await {
        return storage_err(e);
    }
    if let Some(resp) = reload_or_err(&state).await {
        return resp;
    }
    ok(json!({"id": id}))
}

async fn delete_binding(State(state): State<AdminState>, Path(id): Path<i64>) -> Response {
    let row_count = match state.storage.soft_delete_binding(id).await {
        Ok(n) => n,
        Err(e) => return storage_err(e),
    };
    if let Some(resp) = reload_or_err(&state).await {
        return resp;
    }
    ok(json!({"row_count": row_count}))
}

// ---- auth keys ----

fn auth_key_json(k: &llmgate_storage::entities::auth_keys::Model) -> JsonValue {
    json!({
        "id": k.id,
        "name": k.name,
        "key": k.key,
        "status": k.status,
        "allow_all": k.allow_all,
        "models": k.models,
        "expires_at": k.expires_at.and_then(|t| t.format(&Rfc3339).ok()),
        "usage_count": k.usage_count,
        "last_used_at": k.last_used_at.and_then(|t| t.format(&Rfc3339).ok()),
        "created_at": k.created_at.format(&Rfc3339).unwrap_or_default(),
        "updated_at": k.updated_at.format(&Rfc3339).unwrap_or_default(),
    })
}

async fn list_auth_keys(State(state): State<AdminState>, Query(q): Query<PageQuery>) -> Response {
    match state.storage.list_auth_keys(q.into()).await {
        Ok(r) => paged_response(r.rows.iter().map(auth_key_json).collect(), r.total),
        Err(e) => storage_err(e),
    }
}

#[derive(Debug, Deserialize)]
struct AuthKeyBody {
    name: String,
    #[serde(default = "generate_key")]
    key: String,
    #[serde(default = "default_true")]
    status: bool,
    #[serde(default)]
    allow_all: bool,
    #[serde(default)]
    models: JsonValue,
    expires_at: Option<String>,
}

fn generate_key() -> String {
    format!("sk-{}", uuid::Uuid::new_v4())
}

impl TryFrom<AuthKeyBody> for NewAuthKey {
    type Error = Response;

    fn try_from(b: AuthKeyBody) -> Result<Self, Response> {
        let expires_at = match b.expires_at {
            None => None,
            Some(raw) => Some(
                OffsetDateTime::parse(&raw, &Rfc3339)
                    .map_err(|e| err(StatusCode::BAD_REQUEST, format!("invalid expires_at: {e}")))?,
            ),
        };
        Ok(NewAuthKey {
            name: b.name,
            key: b.key,
            status: b.status,
            allow_all: b.allow_all,
            models: b.models,
            expires_at,
        })
    }
}

async fn create_auth_key(State(state): State<AdminState>, Json(body): Json<AuthKeyBody>) -> Response {
    let input = match NewAuthKey::try_from(body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let id = match state.storage.create_auth_key(input).await {
        Ok(id) => id,
        Err(e) => return storage_err(e),
    };
    if let Some(resp) = reload_or_err(&state).await {
        return resp;
    }
    ok(json!({"id": id}))
}

async fn update_auth_key(
    State(state): State<AdminState>,
    Path(id): Path<i64>,
    Json(body): Json<AuthKeyBody>,
) -> Response {
    let input = match NewAuthKey::try_from(body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(e) = state.storage.update_auth_key(id, input).await {
        return storage_err(e);
    }
    if let Some(resp) = reload_or_err(&state).await {
        return resp;
    }
    ok(json!({"id": id}))
}

async fn delete_auth_key(State(state): State<AdminState>, Path(id): Path<i64>) -> Response {
    let row_count = match state.storage.soft_delete_auth_key(id).await {
        Ok(n) => n,
        Err(e) => return storage_err(e),
    };
    if let Some(resp) = reload_or_err(&state).await {
        return resp;
    }
    ok(json!({"row_count": row_count}))
}

// ---- log cleanup (§8 scenario 6) ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum CleanupType {
    Count,
    Age,
}

#[derive(Debug, Deserialize)]
struct CleanupBody {
    #[serde(rename = "type")]
    kind: CleanupType,
    value: i64,
}

async fn cleanup_logs(State(state): State<AdminState>, Json(body): Json<CleanupBody>) -> Response {
    let filter = match body.kind {
        CleanupType::Count => LogCleanupFilter {
            keep_count: Some(body.value.max(0) as u64),
            older_than: None,
        },
        CleanupType::Age => {
            let cutoff = OffsetDateTime::now_utc() - time::Duration::seconds(body.value.max(0));
            LogCleanupFilter {
                keep_count: None,
                older_than: Some(cutoff),
            }
        }
    };
    match state.storage.cleanup_logs(filter).await {
        Ok(deleted) => ok(json!({"deleted_count": deleted})),
        Err(e) => storage_err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_key_prefers_x_admin_key_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-admin-key", "secret".parse().unwrap());
        assert_eq!(extract_admin_key(&headers), Some("secret".to_string()));
    }

    #[test]
    fn admin_key_falls_back_to_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(extract_admin_key(&headers), Some("abc".to_string()));
    }

    #[test]
    fn admin_key_absent_returns_none() {
        let headers = HeaderMap::new();
        assert_eq!(extract_admin_key(&headers), None);
    }
}
