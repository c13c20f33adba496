use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use llmgate_common::{GlobalConfig, GlobalConfigPatch};
use llmgate_storage::{SeaOrmStorage, Storage};

use crate::state::AppState;

/// CLI surface for the gateway binary. Every field doubles as an env var so
/// container deployments never need a flags array, only an environment.
#[derive(Debug, Clone, Parser)]
#[command(name = "llmgate", version, about = "Multi-dialect LLM API gateway")]
pub struct CliArgs {
    /// Database DSN (sqlite/postgres). Required to bootstrap the rest of config.
    #[arg(long, env = "LLMGATE_DSN")]
    pub dsn: Option<String>,

    /// Bind host.
    #[arg(long, env = "LLMGATE_HOST")]
    pub host: Option<String>,

    /// Bind port.
    #[arg(long, env = "LLMGATE_PORT")]
    pub port: Option<String>,

    /// Admin key (plaintext). Stored as a blake3 hash, never persisted as-is.
    #[arg(long, env = "LLMGATE_ADMIN_KEY")]
    pub admin_key: Option<String>,

    /// Optional outbound proxy for upstream requests.
    #[arg(long, env = "LLMGATE_OUTBOUND_PROXY")]
    pub outbound_proxy: Option<String>,

    /// Redact sensitive headers/body fields in persisted chat logs.
    #[arg(long, env = "LLMGATE_EVENT_REDACT_SENSITIVE")]
    pub event_redact_sensitive: Option<String>,

    /// Cap, in bytes, on persisted request/response bodies.
    #[arg(long, env = "LLMGATE_LOG_BODY_CAP_BYTES")]
    pub log_body_cap_bytes: Option<String>,

    #[arg(long, env = "LLMGATE_DEFAULT_IP_LOCK_MINUTES")]
    pub default_ip_lock_minutes: Option<String>,

    #[arg(long, env = "LLMGATE_DEFAULT_TOKEN_LOCK_SECONDS")]
    pub default_token_lock_seconds: Option<String>,

    #[arg(long, env = "LLMGATE_DEFAULT_BREAKER_THRESHOLD")]
    pub default_breaker_threshold: Option<String>,

    #[arg(long, env = "LLMGATE_DEFAULT_BREAKER_COOLDOWN_SECONDS")]
    pub default_breaker_cooldown_seconds: Option<String>,

    #[arg(long, env = "LLMGATE_DEFAULT_HEALTH_WINDOW")]
    pub default_health_window: Option<String>,
}

pub struct Bootstrap {
    pub storage: Arc<SeaOrmStorage>,
    pub state: Arc<AppState>,
}

pub async fn bootstrap_from_env() -> anyhow::Result<Bootstrap> {
    let args = CliArgs::parse();
    bootstrap(args).await
}

pub async fn bootstrap(args: CliArgs) -> anyhow::Result<Bootstrap> {
    let dsn = sanitize_dsn_value(args.dsn.clone());
    ensure_sqlite_parent_dir(&dsn)?;

    let storage = Arc::new(
        SeaOrmStorage::connect(&dsn)
            .await
            .context("connect storage")?,
    );
    storage.sync().await.context("schema sync")?;

    let db_global = storage
        .load_global_config()
        .await
        .context("load db global_config")?;
    let mut merged = db_global
        .map(|row| GlobalConfigPatch::from(row.config))
        .unwrap_or_default();

    let mut admin_key_hash_override = None;
    if let Some(key_plain) = sanitize_optional_env_value(args.admin_key.clone()) {
        admin_key_hash_override = Some(hash_admin_key(&key_plain));
    } else if merged.admin_key_hash.is_none() {
        let key_plain = generate_admin_key();
        eprintln!("generated admin key: {key_plain}");
        admin_key_hash_override = Some(hash_admin_key(&key_plain));
    }

    let cli_patch = GlobalConfigPatch {
        host: sanitize_optional_env_value(args.host.clone()),
        port: parse_u16_env_value(args.port.clone(), "LLMGATE_PORT")?,
        admin_key_hash: admin_key_hash_override,
        outbound_proxy: sanitize_optional_env_value(args.outbound_proxy.clone()),
        dsn: Some(dsn.clone()),
        event_redact_sensitive: parse_bool_env_value(
            args.event_redact_sensitive.clone(),
            "LLMGATE_EVENT_REDACT_SENSITIVE",
        )?,
        log_body_cap_bytes: parse_u32_env_value(
            args.log_body_cap_bytes.clone(),
            "LLMGATE_LOG_BODY_CAP_BYTES",
        )?,
        default_ip_lock_minutes: parse_u32_env_value(
            args.default_ip_lock_minutes.clone(),
            "LLMGATE_DEFAULT_IP_LOCK_MINUTES",
        )?,
        default_token_lock_seconds: parse_u32_env_value(
            args.default_token_lock_seconds.clone(),
            "LLMGATE_DEFAULT_TOKEN_LOCK_SECONDS",
        )?,
        default_breaker_threshold: parse_u32_env_value(
            args.default_breaker_threshold.clone(),
            "LLMGATE_DEFAULT_BREAKER_THRESHOLD",
        )?,
        default_breaker_cooldown_seconds: parse_u32_env_value(
            args.default_breaker_cooldown_seconds.clone(),
            "LLMGATE_DEFAULT_BREAKER_COOLDOWN_SECONDS",
        )?,
        default_health_window: parse_u32_env_value(
            args.default_health_window.clone(),
            "LLMGATE_DEFAULT_HEALTH_WINDOW",
        )?,
    };
    merged.overlay(cli_patch);

    let global: GlobalConfig = merged.into_config().context("finalize merged global config")?;

    storage
        .upsert_global_config(&global)
        .await
        .context("upsert global_config")?;

    let snapshot = storage.load_snapshot().await.context("load snapshot")?;
    let state = AppState::new(storage.clone(), global, snapshot);

    Ok(Bootstrap { storage, state })
}

fn sanitize_optional_env_value(value: Option<String>) -> Option<String> {
    let trimmed = value?.trim().to_string();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with("${") && trimmed.ends_with('}') {
        return None;
    }
    Some(trimmed)
}

fn sanitize_dsn_value(value: Option<String>) -> String {
    sanitize_optional_env_value(value).unwrap_or_else(default_dsn)
}

fn default_dsn() -> String {
    if let Some(data_dir) = sanitize_optional_env_value(std::env::var("LLMGATE_DATA_DIR").ok()) {
        let dir = data_dir.trim_end_matches('/');
        return format!("sqlite://{dir}/llmgate.db?mode=rwc");
    }
    "sqlite://llmgate.db?mode=rwc".to_string()
}

fn ensure_sqlite_parent_dir(dsn: &str) -> anyhow::Result<()> {
    let Some(db_path) = sqlite_file_path_from_dsn(dsn) else {
        return Ok(());
    };
    let Some(parent) = db_path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent)
        .with_context(|| format!("create sqlite parent dir {}", parent.display()))?;
    Ok(())
}

fn sqlite_file_path_from_dsn(dsn: &str) -> Option<PathBuf> {
    let rest = dsn.strip_prefix("sqlite:")?;
    let path_part = rest.split(['?', '#']).next()?.trim();
    if path_part.is_empty() {
        return None;
    }

    let mut normalized = path_part;
    if let Some(stripped) = normalized.strip_prefix("//") {
        normalized = stripped;
    }

    if normalized.to_ascii_lowercase() == ":memory:" {
        return None;
    }

    Some(PathBuf::from(normalized))
}

fn parse_u16_env_value(value: Option<String>, env_name: &str) -> anyhow::Result<Option<u16>> {
    let Some(raw) = sanitize_optional_env_value(value) else {
        return Ok(None);
    };
    let parsed = raw
        .parse::<u16>()
        .with_context(|| format!("invalid {env_name} value: {raw}"))?;
    Ok(Some(parsed))
}

fn parse_u32_env_value(value: Option<String>, env_name: &str) -> anyhow::Result<Option<u32>> {
    let Some(raw) = sanitize_optional_env_value(value) else {
        return Ok(None);
    };
    let parsed = raw
        .parse::<u32>()
        .with_context(|| format!("invalid {env_name} value: {raw}"))?;
    Ok(Some(parsed))
}

fn parse_bool_env_value(value: Option<String>, env_name: &str) -> anyhow::Result<Option<bool>> {
    let Some(raw) = sanitize_optional_env_value(value) else {
        return Ok(None);
    };
    let parsed = match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => return Err(anyhow::anyhow!("invalid {env_name} value: {raw}")),
    };
    Ok(Some(parsed))
}

fn hash_admin_key(key: &str) -> String {
    blake3::hash(key.as_bytes()).to_hex().to_string()
}

fn generate_admin_key() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::sqlite_file_path_from_dsn;

    #[test]
    fn sqlite_dsn_resolves_relative_path() {
        let path = sqlite_file_path_from_dsn("sqlite://llmgate.db?mode=rwc").unwrap();
        assert_eq!(path.to_string_lossy(), "llmgate.db");
    }

    #[test]
    fn sqlite_dsn_resolves_absolute_path() {
        let path = sqlite_file_path_from_dsn("sqlite://app/data/llmgate.db?mode=rwc").unwrap();
        assert_eq!(path.to_string_lossy(), "/app/data/llmgate.db");
    }

    #[test]
    fn sqlite_memory_dsn_is_ignored() {
        assert!(sqlite_file_path_from_dsn("sqlite::memory:").is_none());
        assert!(sqlite_file_path_from_dsn("sqlite://:memory:").is_none());
    }
}
