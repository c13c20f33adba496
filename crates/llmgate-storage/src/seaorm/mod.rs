use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, ConnectionTrait, Database, DatabaseBackend,
    DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Schema,
};
use time::OffsetDateTime;

use llmgate_common::GlobalConfig;

use crate::entities;
use crate::snapshot::{AuthKeyRow, BindingRow, GlobalConfigRow, ModelRow, ProviderRow, StorageSnapshot};
use crate::storage::{
    LogCleanupFilter, NewAuthKey, NewBinding, NewChatLog, NewModel, NewProvider, Page, PagedResult,
    Storage, StorageError, StorageResult,
};

#[derive(Clone)]
pub struct SeaOrmStorage {
    db: DatabaseConnection,
}

impl SeaOrmStorage {
    pub async fn connect(dsn: &str) -> StorageResult<Self> {
        let db = Database::connect(dsn).await?;
        if db.get_database_backend() == DatabaseBackend::Sqlite {
            db.execute_unprepared("PRAGMA foreign_keys = ON").await?;
        }
        Ok(Self { db })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

#[async_trait::async_trait]
impl Storage for SeaOrmStorage {
    async fn sync(&self) -> StorageResult<()> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::GlobalConfig)
            .register(entities::Providers)
            .register(entities::Models)
            .register(entities::Bindings)
            .register(entities::AuthKeys)
            .register(entities::ChatLogs)
            .register(entities::ChatIo)
            .sync(&self.db)
            .await?;
        Ok(())
    }

    async fn load_global_config(&self) -> StorageResult<Option<GlobalConfig>> {
        use entities::global_config::Column;
        let row = entities::GlobalConfig::find()
            .order_by_asc(Column::Id)
            .one(&self.db)
            .await?;
        Ok(match row {
            Some(m) => Some(serde_json::from_value(m.config_json)?),
            None => None,
        })
    }

    async fn upsert_global_config(&self, config: &GlobalConfig) -> StorageResult<()> {
        use entities::global_config::ActiveModel as GlobalActive;

        let now = OffsetDateTime::now_utc();
        let id = 1_i64;
        let existing = entities::GlobalConfig::find_by_id(id).one(&self.db).await?;
        let config_json = serde_json::to_value(config)?;

        match existing {
            Some(model) => {
                let mut active: GlobalActive = model.into();
                active.config_json = ActiveValue::Set(config_json);
                active.updated_at = ActiveValue::Set(now);
                active.update(&self.db).await?;
            }
            None => {
                let active = GlobalActive {
                    id: ActiveValue::Set(id),
                    config_json: ActiveValue::Set(config_json),
                    updated_at: ActiveValue::Set(now),
                };
                entities::GlobalConfig::insert(active).exec(&self.db).await?;
            }
        }
        Ok(())
    }

    async fn load_snapshot(&self) -> StorageResult<StorageSnapshot> {
        use entities::auth_keys::Column as AuthKeyColumn;
        use entities::bindings::Column as BindingColumn;
        use entities::models::Column as ModelColumn;
        use entities::providers::Column as ProviderColumn;

        let global_config = entities::GlobalConfig::find()
            .order_by_asc(entities::global_config::Column::Id)
            .one(&self.db)
            .await?
            .map(|m| -> StorageResult<GlobalConfigRow> {
                Ok(GlobalConfigRow {
                    id: m.id,
                    config: serde_json::from_value(m.config_json)?,
                    updated_at: m.updated_at,
                })
            })
            .transpose()?;

        let providers = entities::Providers::find()
            .filter(ProviderColumn::DeletedAt.is_null())
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| ProviderRow {
                id: m.id,
                name: m.name,
                kind: m.kind,
                config_json: m.config_json,
                console_url: m.console_url,
                rpm_limit: m.rpm_limit,
                ip_lock_minutes: m.ip_lock_minutes,
                updated_at: m.updated_at,
            })
            .collect();

        let models = entities::Models::find()
            .filter(ModelColumn::DeletedAt.is_null())
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| ModelRow {
                id: m.id,
                name: m.name,
                remark: m.remark,
                max_retry: m.max_retry,
                time_out_seconds: m.time_out_seconds,
                io_log: m.io_log,
                strategy: m.strategy,
                breaker: m.breaker,
                updated_at: m.updated_at,
            })
            .collect();

        let bindings = entities::Bindings::find()
            .filter(BindingColumn::DeletedAt.is_null())
            .filter(BindingColumn::Status.eq(true))
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| BindingRow {
                id: m.id,
                model_id: m.model_id,
                provider_id: m.provider_id,
                provider_model: m.provider_model,
                cap_tool_call: m.cap_tool_call,
                cap_structured_output: m.cap_structured_output,
                cap_image: m.cap_image,
                with_header: m.with_header,
                customer_headers: m.customer_headers,
                status: m.status,
                weight: m.weight,
                updated_at: m.updated_at,
            })
            .collect();

        let auth_keys = entities::AuthKeys::find()
            .filter(AuthKeyColumn::DeletedAt.is_null())
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| AuthKeyRow {
                id: m.id,
                name: m.name,
                key: m.key,
                status: m.status,
                allow_all: m.allow_all,
                models: m.models,
                expires_at: m.expires_at,
                usage_count: m.usage_count,
                last_used_at: m.last_used_at,
            })
            .collect();

        Ok(StorageSnapshot {
            global_config,
            providers,
            models,
            bindings,
            auth_keys,
        })
    }

    async fn create_provider(&self, input: NewProvider) -> StorageResult<i64> {
        use entities::providers::ActiveModel as ProviderActive;
        let now = OffsetDateTime::now_utc();
        let active = ProviderActive {
            id: ActiveValue::NotSet,
            name: ActiveValue::Set(input.name),
            kind: ActiveValue::Set(input.kind),
            config_json: ActiveValue::Set(input.config_json),
            console_url: ActiveValue::Set(input.console_url),
            rpm_limit: ActiveValue::Set(input.rpm_limit),
            ip_lock_minutes: ActiveValue::Set(input.ip_lock_minutes),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
            deleted_at: ActiveValue::Set(None),
        };
        let inserted = entities::Providers::insert(active).exec(&self.db).await?;
        Ok(inserted.last_insert_id)
    }

    async fn update_provider(&self, id: i64, input: NewProvider) -> StorageResult<()> {
        use entities::providers::ActiveModel as ProviderActive;
        let existing = entities::Providers::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or(StorageError::NotFound)?;
        let mut active: ProviderActive = existing.into();
        active.name = ActiveValue::Set(input.name);
        active.kind = ActiveValue::Set(input.kind);
        active.config_json = ActiveValue::Set(input.config_json);
        active.console_url = ActiveValue::Set(input.console_url);
        active.rpm_limit = ActiveValue::Set(input.rpm_limit);
        active.ip_lock_minutes = ActiveValue::Set(input.ip_lock_minutes);
        active.updated_at = ActiveValue::Set(OffsetDateTime::now_utc());
        active.update(&self.db).await?;
        Ok(())
    }

    async fn soft_delete_provider(&self, id: i64) -> StorageResult<u64> {
        use entities::providers::ActiveModel as ProviderActive;
        let Some(existing) = entities::Providers::find_by_id(id).one(&self.db).await? else {
            return Ok(0);
        };
        let mut active: ProviderActive = existing.into();
        active.deleted_at = ActiveValue::Set(Some(OffsetDateTime::now_utc()));
        active.update(&self.db).await?;
        Ok(1)
    }

    async fn list_providers(
        &self,
        page: Page,
    ) -> StorageResult<PagedResult<entities::providers::Model>> {
        use entities::providers::Column;
        let (limit, offset) = page.limit_offset();
        let query = entities::Providers::find().filter(Column::DeletedAt.is_null());
        let total = query.clone().count(&self.db).await?;
        let rows = query
            .order_by_desc(Column::Id)
            .offset(offset)
            .limit(limit)
            .all(&self.db)
            .await?;
        Ok(PagedResult { rows, total })
    }

    async fn create_model(&self, input: NewModel) -> StorageResult<i64> {
        use entities::models::ActiveModel as ModelActive;
        let now = OffsetDateTime::now_utc();
        let active = ModelActive {
            id: ActiveValue::NotSet,
            name: ActiveValue::Set(input.name),
            remark: ActiveValue::Set(input.remark),
            max_retry: ActiveValue::Set(input.max_retry),
            time_out_seconds: ActiveValue::Set(input.time_out_seconds),
            io_log: ActiveValue::Set(input.io_log),
            strategy: ActiveValue::Set(input.strategy),
            breaker: ActiveValue::Set(input.breaker),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
            deleted_at: ActiveValue::Set(None),
        };
        let inserted = entities::Models::insert(active).exec(&self.db).await?;
        Ok(inserted.last_insert_id)
    }

    async fn update_model(&self, id: i64, input: NewModel) -> StorageResult<()> {
        use entities::models::ActiveModel as ModelActive;
        let existing = entities::Models::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or(StorageError::NotFound)?;
        let mut active: ModelActive = existing.into();
        active.name = ActiveValue::Set(input.name);
        active.remark = ActiveValue::Set(input.remark);
        active.max_retry = ActiveValue::Set(input.max_retry);
        active.time_out_seconds = ActiveValue::Set(input.time_out_seconds);
        active.io_log = ActiveValue::Set(input.io_log);
        active.strategy = ActiveValue::Set(input.strategy);
        active.breaker = ActiveValue::Set(input.breaker);
        active.updated_at = ActiveValue::Set(OffsetDateTime::now_utc());
        active.update(&self.db).await?;
        Ok(())
    }

    async fn soft_delete_model(&self, id: i64) -> StorageResult<u64> {
        use entities::models::ActiveModel as ModelActive;
        let Some(existing) = entities::Models::find_by_id(id).one(&self.db).await? else {
            return Ok(0);
        };
        let mut active: ModelActive = existing.into();
        active.deleted_at = ActiveValue::Set(Some(OffsetDateTime::now_utc()));
        active.update(&self.db).await?;
        Ok(1)
    }

    async fn list_models(&self, page: Page) -> StorageResult<PagedResult<entities::models::Model>> {
        use entities::models::Column;
        let (limit, offset) = page.limit_offset();
        let query = entities::Models::find().filter(Column::DeletedAt.is_null());
        let total = query.clone().count(&self.db).await?;
        let rows = query
            .order_by_desc(Column::Id)
            .offset(offset)
            .limit(limit)
            .all(&self.db)
            .await?;
        Ok(PagedResult { rows, total })
    }

    async fn create_binding(&self, input: NewBinding) -> StorageResult<i64> {
        use entities::bindings::ActiveModel as BindingActive;
        let now = OffsetDateTime::now_utc();
        let active = BindingActive {
            id: ActiveValue::NotSet,
            model_id: ActiveValue::Set(input.model_id),
            provider_id: ActiveValue::Set(input.provider_id),
            provider_model: ActiveValue::Set(input.provider_model),
            cap_tool_call: ActiveValue::Set(input.cap_tool_call),
            cap_structured_output: ActiveValue::Set(input.cap_structured_output),
            cap_image: ActiveValue::Set(input.cap_image),
            with_header: ActiveValue::Set(input.with_header),
            customer_headers: ActiveValue::Set(input.customer_headers),
            status: ActiveValue::Set(input.status),
            weight: ActiveValue::Set(input.weight.max(1)),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
            deleted_at: ActiveValue::Set(None),
        };
        let inserted = entities::Bindings::insert(active).exec(&self.db).await?;
        Ok(inserted.last_insert_id)
    }

    async fn update_binding(&self, id: i64, input: NewBinding) -> StorageResult<()> {
        use entities::bindings::ActiveModel as BindingActive;
        let existing = entities::Bindings::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or(StorageError::NotFound)?;
        let mut active: BindingActive = existing.into();
        active.model_id = ActiveValue::Set(input.model_id);
        active.provider_id = ActiveValue::Set(input.provider_id);
        active.provider_model = ActiveValue::Set(input.provider_model);
        active.cap_tool_call = ActiveValue::Set(input.cap_tool_call);
        active.cap_structured_output = ActiveValue::Set(input.cap_structured_output);
        active.cap_image = ActiveValue::Set(input.cap_image);
        active.with_header = ActiveValue::Set(input.with_header);
        active.customer_headers = ActiveValue::Set(input.customer_headers);
        active.status = ActiveValue::Set(input.status);
        active.weight = ActiveValue::Set(input.weight.max(1));
        active.updated_at = ActiveValue::Set(OffsetDateTime::now_utc());
        active.update(&self.db).await?;
        Ok(())
    }

    async fn soft_delete_binding(&self, id: i64) -> StorageResult<u64> {
        use entities::bindings::ActiveModel as BindingActive;
        let Some(existing) = entities::Bindings::find_by_id(id).one(&self.db).await? else {
            return Ok(0);
        };
        let mut active: BindingActive = existing.into();
        active.deleted_at = ActiveValue::Set(Some(OffsetDateTime::now_utc()));
        active.update(&self.db).await?;
        Ok(1)
    }

    async fn list_bindings(
        &self,
        page: Page,
    ) -> StorageResult<PagedResult<entities::bindings::Model>> {
        use entities::bindings::Column;
        let (limit, offset) = page.limit_offset();
        let query = entities::Bindings::find().filter(Column::DeletedAt.is_null());
        let total = query.clone().count(&self.db).await?;
        let rows = query
            .order_by_desc(Column::Id)
            .offset(offset)
            .limit(limit)
            .all(&self.db)
            .await?;
        Ok(PagedResult { rows, total })
    }

    async fn create_auth_key(&self, input: NewAuthKey) -> StorageResult<i64> {
        use entities::auth_keys::ActiveModel as AuthKeyActive;
        let now = OffsetDateTime::now_utc();
        let active = AuthKeyActive {
            id: ActiveValue::NotSet,
            name: ActiveValue::Set(input.name),
            key: ActiveValue::Set(input.key),
            status: ActiveValue::Set(input.status),
            allow_all: ActiveValue::Set(input.allow_all),
            models: ActiveValue::Set(input.models),
            expires_at: ActiveValue::Set(input.expires_at),
            usage_count: ActiveValue::Set(0),
            last_used_at: ActiveValue::Set(None),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
            deleted_at: ActiveValue::Set(None),
        };
        let inserted = entities::AuthKeys::insert(active).exec(&self.db).await?;
        Ok(inserted.last_insert_id)
    }

    async fn update_auth_key(&self, id: i64, input: NewAuthKey) -> StorageResult<()> {
        use entities::auth_keys::ActiveModel as AuthKeyActive;
        let existing = entities::AuthKeys::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or(StorageError::NotFound)?;
        let mut active: AuthKeyActive = existing.into();
        active.name = ActiveValue::Set(input.name);
        active.status = ActiveValue::Set(input.status);
        active.allow_all = ActiveValue::Set(input.allow_all);
        active.models = ActiveValue::Set(input.models);
        active.expires_at = ActiveValue::Set(input.expires_at);
        active.updated_at = ActiveValue::Set(OffsetDateTime::now_utc());
        active.update(&self.db).await?;
        Ok(())
    }

    async fn soft_delete_auth_key(&self, id: i64) -> StorageResult<u64> {
        use entities::auth_keys::ActiveModel as AuthKeyActive;
        let Some(existing) = entities::AuthKeys::find_by_id(id).one(&self.db).await? else {
            return Ok(0);
        };
        let mut active: AuthKeyActive = existing.into();
        active.deleted_at = ActiveValue::Set(Some(OffsetDateTime::now_utc()));
        active.update(&self.db).await?;
        Ok(1)
    }

    async fn list_auth_keys(
        &self,
        page: Page,
    ) -> StorageResult<PagedResult<entities::auth_keys::Model>> {
        use entities::auth_keys::Column;
        let (limit, offset) = page.limit_offset();
        let query = entities::AuthKeys::find().filter(Column::DeletedAt.is_null());
        let total = query.clone().count(&self.db).await?;
        let rows = query
            .order_by_desc(Column::Id)
            .offset(offset)
            .limit(limit)
            .all(&self.db)
            .await?;
        Ok(PagedResult { rows, total })
    }

    async fn record_auth_key_usage(&self, id: i64) -> StorageResult<()> {
        use entities::auth_keys::ActiveModel as AuthKeyActive;
        let Some(existing) = entities::AuthKeys::find_by_id(id).one(&self.db).await? else {
            return Ok(());
        };
        let usage_count = existing.usage_count + 1;
        let mut active: AuthKeyActive = existing.into();
        active.usage_count = ActiveValue::Set(usage_count);
        active.last_used_at = ActiveValue::Set(Some(OffsetDateTime::now_utc()));
        active.update(&self.db).await?;
        Ok(())
    }

    async fn write_chat_log(&self, entry: NewChatLog) -> StorageResult<i64> {
        use entities::chat_io::ActiveModel as ChatIoActive;
        use entities::chat_logs::ActiveModel as ChatLogActive;

        let now = OffsetDateTime::now_utc();
        let io_recorded = entry.io.is_some();
        let active = ChatLogActive {
            id: ActiveValue::NotSet,
            created_at: ActiveValue::Set(now),
            auth_key_id: ActiveValue::Set(entry.auth_key_id),
            model_name: ActiveValue::Set(entry.model_name),
            provider_name: ActiveValue::Set(entry.provider_name),
            provider_model: ActiveValue::Set(entry.provider_model),
            dialect: ActiveValue::Set(entry.dialect),
            status: ActiveValue::Set(entry.status),
            user_agent: ActiveValue::Set(entry.user_agent),
            remote_ip: ActiveValue::Set(entry.remote_ip),
            error: ActiveValue::Set(entry.error),
            retry_count: ActiveValue::Set(entry.retry_count),
            proxy_ms: ActiveValue::Set(entry.proxy_ms),
            first_chunk_ms: ActiveValue::Set(entry.first_chunk_ms),
            chunk_ms: ActiveValue::Set(entry.chunk_ms),
            tps: ActiveValue::Set(entry.tps),
            io_recorded: ActiveValue::Set(io_recorded),
            response_size_bytes: ActiveValue::Set(entry.response_size_bytes),
            prompt_tokens: ActiveValue::Set(entry.prompt_tokens),
            completion_tokens: ActiveValue::Set(entry.completion_tokens),
            total_tokens: ActiveValue::Set(entry.total_tokens),
            cached_tokens: ActiveValue::Set(entry.cached_tokens),
        };
        let inserted = entities::ChatLogs::insert(active).exec(&self.db).await?;
        let log_id = inserted.last_insert_id;

        if let Some((input, output)) = entry.io {
            let io_active = ChatIoActive {
                id: ActiveValue::NotSet,
                log_id: ActiveValue::Set(log_id),
                input: ActiveValue::Set(input),
                output: ActiveValue::Set(output),
            };
            entities::ChatIo::insert(io_active).exec(&self.db).await?;
        }

        Ok(log_id)
    }

    async fn cleanup_logs(&self, filter: LogCleanupFilter) -> StorageResult<u64> {
        use entities::chat_logs::Column;

        if let Some(cutoff) = filter.older_than {
            let result = entities::ChatLogs::delete_many()
                .filter(Column::CreatedAt.lt(cutoff))
                .exec(&self.db)
                .await?;
            return Ok(result.rows_affected);
        }

        if let Some(keep_count) = filter.keep_count {
            let total = entities::ChatLogs::find().count(&self.db).await?;
            if total <= keep_count {
                return Ok(0);
            }
            let to_delete = total - keep_count;
            let boundary_id = entities::ChatLogs::find()
                .order_by_asc(Column::Id)
                .offset(to_delete.saturating_sub(1))
                .limit(1)
                .one(&self.db)
                .await?
                .map(|m| m.id);
            let Some(boundary_id) = boundary_id else {
                return Ok(0);
            };
            let result = entities::ChatLogs::delete_many()
                .filter(Column::Id.lte(boundary_id))
                .exec(&self.db)
                .await?;
            return Ok(result.rows_affected);
        }

        Ok(0)
    }
}
