use sea_orm::entity::prelude::*;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "chat_io")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique_key = "chat_io_log_id")]
    pub log_id: i64,
    /// Raw inbound body, truncated to `GlobalConfig.log_body_cap_bytes`.
    pub input: String,
    /// Unary body as a single string, or an ordered JSON array of SSE frame payloads.
    pub output: String,
    #[sea_orm(belongs_to, from = "log_id", to = "id", on_delete = "Cascade")]
    pub log: HasOne<super::chat_logs::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
