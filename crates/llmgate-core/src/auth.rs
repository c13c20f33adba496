use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use http::HeaderMap;
use llmgate_storage::snapshot::AuthKeyRow;
use time::OffsetDateTime;

use crate::error::ProxyError;

/// An admitted caller, resolved from the inbound auth header against the
/// current `AuthSnapshot`.
#[derive(Debug, Clone)]
pub struct AdmissionContext {
    pub auth_key_id: i64,
    pub auth_key_name: String,
    pub allow_all: bool,
    pub allowed_models: Vec<String>,
}

impl AdmissionContext {
    pub fn permits_model(&self, model_name: &str) -> bool {
        self.allow_all || self.allowed_models.iter().any(|m| m == model_name)
    }
}

#[derive(Debug, Clone)]
struct AuthKeyEntry {
    id: i64,
    name: String,
    status: bool,
    allow_all: bool,
    allowed_models: Vec<String>,
    expires_at: Option<OffsetDateTime>,
}

/// Snapshot of `auth_keys`, indexed by the raw key value for O(1) lookup on
/// the hot path. Rebuilt wholesale on every bootstrap/admin mutation.
#[derive(Debug, Default)]
pub struct AuthSnapshot {
    by_key: HashMap<String, AuthKeyEntry>,
}

impl AuthSnapshot {
    pub fn from_rows(rows: &[AuthKeyRow]) -> Self {
        let mut by_key = HashMap::with_capacity(rows.len());
        for row in rows {
            let allowed_models = row
                .models
                .as_array()
                .map(|values| {
                    values
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            by_key.insert(
                row.key.clone(),
                AuthKeyEntry {
                    id: row.id,
                    name: row.name.clone(),
                    status: row.status,
                    allow_all: row.allow_all,
                    allowed_models,
                    expires_at: row.expires_at,
                },
            );
        }
        Self { by_key }
    }
}

/// Hot-swappable holder for the current `AuthSnapshot`, bumped whenever the
/// storage snapshot is reloaded.
pub struct AuthStore {
    snapshot: ArcSwap<AuthSnapshot>,
}

impl AuthStore {
    pub fn new(snapshot: AuthSnapshot) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(snapshot),
        }
    }

    pub fn replace(&self, snapshot: AuthSnapshot) {
        self.snapshot.store(Arc::new(snapshot));
    }

    /// Authenticates the inbound request against the live snapshot. Header
    /// precedence is `Authorization: Bearer` → `x-api-key` → `x-goog-api-key`,
    /// first non-empty wins, matching the three dialects' native auth schemes.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<AdmissionContext, ProxyError> {
        let key = extract_api_key(headers)
            .ok_or_else(|| ProxyError::unauthorized("missing api key"))?;

        let snapshot = self.snapshot.load();
        let entry = snapshot
            .by_key
            .get(key.as_str())
            .ok_or_else(|| ProxyError::unauthorized("invalid api key"))?;

        if !entry.status {
            return Err(ProxyError::unauthorized("api key disabled"));
        }
        if let Some(expires_at) = entry.expires_at {
            if expires_at <= now() {
                return Err(ProxyError::unauthorized("api key expired"));
            }
        }

        Ok(AdmissionContext {
            auth_key_id: entry.id,
            auth_key_name: entry.name.clone(),
            allow_all: entry.allow_all,
            allowed_models: entry.allowed_models.clone(),
        })
    }
}

fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = bearer_token(headers) {
        return Some(token);
    }
    if let Some(value) = non_empty_header(headers, "x-api-key") {
        return Some(value);
    }
    non_empty_header(headers, "x-goog-api-key")
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = non_empty_header(headers, "authorization")?;
    let trimmed = raw.trim();
    for prefix in ["Bearer ", "bearer "] {
        if let Some(token) = trimmed.strip_prefix(prefix) {
            let token = token.trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }
    None
}

fn non_empty_header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(key: &str) -> AuthKeyRow {
        AuthKeyRow {
            id: 1,
            name: "default".to_string(),
            key: key.to_string(),
            status: true,
            allow_all: false,
            models: json!(["gpt-4o", "claude-3-7-sonnet"]),
            expires_at: None,
            usage_count: 0,
            last_used_at: None,
        }
    }

    fn store_with(key: &str) -> AuthStore {
        AuthStore::new(AuthSnapshot::from_rows(&[row(key)]))
    }

    #[test]
    fn bearer_header_takes_precedence_over_api_key_headers() {
        let store = store_with("secret-key");
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer secret-key".parse().unwrap());
        headers.insert("x-api-key", "wrong".parse().unwrap());
        let ctx = store.authenticate(&headers).unwrap();
        assert_eq!(ctx.auth_key_name, "default");
    }

    #[test]
    fn falls_back_to_x_api_key_then_x_goog_api_key() {
        let store = store_with("secret-key");
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "secret-key".parse().unwrap());
        assert!(store.authenticate(&headers).is_ok());

        let store = store_with("goog-key");
        let mut headers = HeaderMap::new();
        headers.insert("x-goog-api-key", "goog-key".parse().unwrap());
        assert!(store.authenticate(&headers).is_ok());
    }

    #[test]
    fn rejects_missing_unknown_and_disabled_keys() {
        let store = store_with("secret-key");
        assert!(store.authenticate(&HeaderMap::new()).is_err());

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "unknown".parse().unwrap());
        assert!(store.authenticate(&headers).is_err());

        let mut disabled = row("disabled-key");
        disabled.status = false;
        let store = AuthStore::new(AuthSnapshot::from_rows(&[disabled]));
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "disabled-key".parse().unwrap());
        assert!(store.authenticate(&headers).is_err());
    }

    #[test]
    fn permits_model_respects_allow_all_and_allow_list() {
        let ctx = AdmissionContext {
            auth_key_id: 1,
            auth_key_name: "default".to_string(),
            allow_all: false,
            allowed_models: vec!["gpt-4o".to_string()],
        };
        assert!(ctx.permits_model("gpt-4o"));
        assert!(!ctx.permits_model("claude-3-7-sonnet"));

        let ctx = AdmissionContext {
            allow_all: true,
            ..ctx
        };
        assert!(ctx.permits_model("anything"));
    }
}
