use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "chat_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub created_at: OffsetDateTime,
    /// 0 == admin-originated request (no auth key row).
    pub auth_key_id: i64,
    pub model_name: String,
    pub provider_name: String,
    pub provider_model: String,
    pub dialect: String,
    /// `success` or `error`.
    pub status: String,
    pub user_agent: Option<String>,
    pub remote_ip: Option<String>,
    pub error: Option<String>,
    pub retry_count: i32,
    pub proxy_ms: i64,
    pub first_chunk_ms: Option<i64>,
    pub chunk_ms: Option<i64>,
    pub tps: Option<f64>,
    pub io_recorded: bool,
    pub response_size_bytes: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub cached_tokens: Option<i64>,
    #[sea_orm(has_one)]
    pub chat_io: HasOne<super::chat_io::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
