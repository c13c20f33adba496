use llmgate_common::GlobalConfig;
use serde_json::Value as JsonValue;
use time::OffsetDateTime;

#[derive(Debug, Clone)]
pub struct GlobalConfigRow {
    pub id: i64,
    pub config: GlobalConfig,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct ProviderRow {
    pub id: i64,
    pub name: String,
    pub kind: String,
    pub config_json: JsonValue,
    pub console_url: Option<String>,
    pub rpm_limit: i32,
    pub ip_lock_minutes: i32,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct ModelRow {
    pub id: i64,
    pub name: String,
    pub remark: Option<String>,
    pub max_retry: i32,
    pub time_out_seconds: i32,
    pub io_log: bool,
    pub strategy: String,
    pub breaker: bool,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct BindingRow {
    pub id: i64,
    pub model_id: i64,
    pub provider_id: i64,
    pub provider_model: String,
    pub cap_tool_call: bool,
    pub cap_structured_output: bool,
    pub cap_image: bool,
    pub with_header: bool,
    pub customer_headers: JsonValue,
    pub status: bool,
    pub weight: i32,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct AuthKeyRow {
    pub id: i64,
    pub name: String,
    pub key: String,
    pub status: bool,
    pub allow_all: bool,
    pub models: JsonValue,
    pub expires_at: Option<OffsetDateTime>,
    pub usage_count: i64,
    pub last_used_at: Option<OffsetDateTime>,
}

/// Everything the dispatcher needs, loaded in one pass at bootstrap and
/// after every admin mutation. The hot path never touches the database;
/// it reads through an `ArcSwap<StorageSnapshot>` instead.
#[derive(Debug, Clone, Default)]
pub struct StorageSnapshot {
    pub global_config: Option<GlobalConfigRow>,
    pub providers: Vec<ProviderRow>,
    pub models: Vec<ModelRow>,
    pub bindings: Vec<BindingRow>,
    pub auth_keys: Vec<AuthKeyRow>,
}
