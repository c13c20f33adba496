use async_trait::async_trait;
use serde_json::Value as JsonValue;
use time::OffsetDateTime;

use llmgate_common::GlobalConfig;

use crate::snapshot::StorageSnapshot;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("db error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("serde json error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("not found")]
    NotFound,
}

#[derive(Debug, Clone, Default)]
pub struct Page {
    pub page: u64,
    pub page_size: u64,
}

impl Page {
    pub fn limit_offset(&self) -> (u64, u64) {
        let page_size = self.page_size.max(1);
        let page = self.page.max(1);
        (page_size, (page - 1) * page_size)
    }
}

#[derive(Debug, Clone)]
pub struct PagedResult<T> {
    pub rows: Vec<T>,
    pub total: u64,
}

#[derive(Debug, Clone, Default)]
pub struct NewProvider {
    pub name: String,
    pub kind: String,
    pub config_json: JsonValue,
    pub console_url: Option<String>,
    pub rpm_limit: i32,
    pub ip_lock_minutes: i32,
}

#[derive(Debug, Clone, Default)]
pub struct NewModel {
    pub name: String,
    pub remark: Option<String>,
    pub max_retry: i32,
    pub time_out_seconds: i32,
    pub io_log: bool,
    pub strategy: String,
    pub breaker: bool,
}

#[derive(Debug, Clone, Default)]
pub struct NewBinding {
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
}

#[derive(Debug, Clone, Default)]
pub struct NewAuthKey {
    pub name: String,
    pub key: String,
    pub status: bool,
    pub allow_all: bool,
    pub models: JsonValue,
    pub expires_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone)]
pub struct NewChatLog {
    pub auth_key_id: i64,
    pub model_name: String,
    pub provider_name: String,
    pub provider_model: String,
    pub dialect: String,
    pub status: String,
    pub user_agent: Option<String>,
    pub remote_ip: Option<String>,
    pub error: Option<String>,
    pub retry_count: i32,
    pub proxy_ms: i64,
    pub first_chunk_ms: Option<i64>,
    pub chunk_ms: Option<i64>,
    pub tps: Option<f64>,
    pub response_size_bytes: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub cached_tokens: Option<i64>,
    pub io: Option<(String, String)>,
}

#[derive(Debug, Clone, Default)]
pub struct LogCleanupFilter {
    /// delete all rows with id <= (max_id - keep_count)
    pub keep_count: Option<u64>,
    pub older_than: Option<OffsetDateTime>,
}

/// Storage is used for bootstrap (`load_snapshot`), admin mutations, and
/// log writes. Runtime dispatch reads must never hit the database directly —
/// they read from the in-memory `StorageSnapshot` published after each
/// mutation.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Entity-first schema sync (SeaORM 2.0). Run once at bootstrap.
    async fn sync(&self) -> StorageResult<()>;

    async fn load_global_config(&self) -> StorageResult<Option<GlobalConfig>>;
    async fn upsert_global_config(&self, config: &GlobalConfig) -> StorageResult<()>;

    /// Loads every live (non soft-deleted) row in one pass.
    async fn load_snapshot(&self) -> StorageResult<StorageSnapshot>;

    // Providers
    async fn create_provider(&self, input: NewProvider) -> StorageResult<i64>;
    async fn update_provider(&self, id: i64, input: NewProvider) -> StorageResult<()>;
    async fn soft_delete_provider(&self, id: i64) -> StorageResult<u64>;
    async fn list_providers(&self, page: Page) -> StorageResult<PagedResult<crate::entities::providers::Model>>;

    // Models
    async fn create_model(&self, input: NewModel) -> StorageResult<i64>;
    async fn update_model(&self, id: i64, input: NewModel) -> StorageResult<()>;
    async fn soft_delete_model(&self, id: i64) -> StorageResult<u64>;
    async fn list_models(&self, page: Page) -> StorageResult<PagedResult<crate::entities::models::Model>>;

    // Bindings
    async fn create_binding(&self, input: NewBinding) -> StorageResult<i64>;
    async fn update_binding(&self, id: i64, input: NewBinding) -> StorageResult<()>;
    async fn soft_delete_binding(&self, id: i64) -> StorageResult<u64>;
    async fn list_bindings(&self, page: Page) -> StorageResult<PagedResult<crate::entities::bindings::Model>>;

    // Auth keys
    async fn create_auth_key(&self, input: NewAuthKey) -> StorageResult<i64>;
    async fn update_auth_key(&self, id: i64, input: NewAuthKey) -> StorageResult<()>;
    async fn soft_delete_auth_key(&self, id: i64) -> StorageResult<u64>;
    async fn list_auth_keys(&self, page: Page) -> StorageResult<PagedResult<crate::entities::auth_keys::Model>>;
    async fn record_auth_key_usage(&self, id: i64) -> StorageResult<()>;

    // Chat log / chat io
    async fn write_chat_log(&self, entry: NewChatLog) -> StorageResult<i64>;
    async fn cleanup_logs(&self, filter: LogCleanupFilter) -> StorageResult<u64>;
}
