use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "providers")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique_key = "provider_name")]
    pub name: String,
    /// One of `openai`, `openai-res`, `anthropic`, `gemini`.
    pub kind: String,
    /// Opaque JSON: at least `base_url`/`api_key`; gemini/anthropic carry `version`.
    pub config_json: Json,
    pub console_url: Option<String>,
    pub rpm_limit: i32,
    pub ip_lock_minutes: i32,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub deleted_at: Option<OffsetDateTime>,
    #[sea_orm(has_many)]
    pub bindings: HasMany<super::bindings::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
