use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum GlobalConfigError {
    #[error("missing required global config field: {0}")]
    MissingField(&'static str),
}

/// Final, merged global configuration used by the running process.
///
/// Merge order (after DB connection): CLI > ENV > DB, then persist back to DB
/// so the next cold start sees the same effective configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub host: String,
    pub port: u16,
    /// Stored as a hash (not plaintext).
    pub admin_key_hash: String,
    /// Optional outbound proxy (for upstream egress).
    pub outbound_proxy: Option<String>,
    /// Database DSN used for this process.
    pub dsn: String,
    /// Whether to redact sensitive fields in emitted events.
    pub event_redact_sensitive: bool,
    /// Cap, in bytes, on persisted ChatIO input/output bodies.
    pub log_body_cap_bytes: u32,
    /// Default provider IP-lock duration when a provider doesn't override it.
    pub default_ip_lock_minutes: u32,
    /// Default token-binding stickiness lock duration.
    pub default_token_lock_seconds: u32,
    /// Consecutive failures before a binding's breaker opens.
    pub default_breaker_threshold: u32,
    /// Breaker cooldown after opening.
    pub default_breaker_cooldown_seconds: u32,
    /// Health ring sample window size (number of samples retained per binding).
    pub default_health_window: u32,
}

/// Optional layer used for merging global config across CLI/env/DB sources.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub admin_key_hash: Option<String>,
    pub outbound_proxy: Option<String>,
    pub dsn: Option<String>,
    pub event_redact_sensitive: Option<bool>,
    pub log_body_cap_bytes: Option<u32>,
    pub default_ip_lock_minutes: Option<u32>,
    pub default_token_lock_seconds: Option<u32>,
    pub default_breaker_threshold: Option<u32>,
    pub default_breaker_cooldown_seconds: Option<u32>,
    pub default_health_window: Option<u32>,
}

impl GlobalConfigPatch {
    /// Layers `other` on top of `self`, letting any field `other` sets win.
    /// Callers apply this twice: env-patch.overlay(cli-patch) gives CLI the
    /// final say, then the db-patch is overlaid underneath via `overlay_under`.
    pub fn overlay(&mut self, other: GlobalConfigPatch) {
        macro_rules! take {
            ($field:ident) => {
                if other.$field.is_some() {
                    self.$field = other.$field;
                }
            };
        }
        take!(host);
        take!(port);
        take!(admin_key_hash);
        take!(outbound_proxy);
        take!(dsn);
        take!(event_redact_sensitive);
        take!(log_body_cap_bytes);
        take!(default_ip_lock_minutes);
        take!(default_token_lock_seconds);
        take!(default_breaker_threshold);
        take!(default_breaker_cooldown_seconds);
        take!(default_health_window);
    }

    /// Fills any field still unset in `self` from `base` (lower precedence).
    pub fn overlay_under(&mut self, base: GlobalConfigPatch) {
        let mut merged = base;
        merged.overlay(self.clone());
        *self = merged;
    }

    pub fn into_config(self) -> Result<GlobalConfig, GlobalConfigError> {
        Ok(GlobalConfig {
            host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: self.port.unwrap_or(8787),
            admin_key_hash: self
                .admin_key_hash
                .ok_or(GlobalConfigError::MissingField("admin_key_hash"))?,
            outbound_proxy: self.outbound_proxy,
            dsn: self.dsn.ok_or(GlobalConfigError::MissingField("dsn"))?,
            event_redact_sensitive: self.event_redact_sensitive.unwrap_or(true),
            log_body_cap_bytes: self.log_body_cap_bytes.unwrap_or(32 * 1024),
            default_ip_lock_minutes: self.default_ip_lock_minutes.unwrap_or(0),
            default_token_lock_seconds: self.default_token_lock_seconds.unwrap_or(120),
            default_breaker_threshold: self.default_breaker_threshold.unwrap_or(3),
            default_breaker_cooldown_seconds: self.default_breaker_cooldown_seconds.unwrap_or(30),
            default_health_window: self.default_health_window.unwrap_or(100),
        })
    }
}

impl From<GlobalConfig> for GlobalConfigPatch {
    fn from(value: GlobalConfig) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            admin_key_hash: Some(value.admin_key_hash),
            outbound_proxy: value.outbound_proxy,
            dsn: Some(value.dsn),
            event_redact_sensitive: Some(value.event_redact_sensitive),
            log_body_cap_bytes: Some(value.log_body_cap_bytes),
            default_ip_lock_minutes: Some(value.default_ip_lock_minutes),
            default_token_lock_seconds: Some(value.default_token_lock_seconds),
            default_breaker_threshold: Some(value.default_breaker_threshold),
            default_breaker_cooldown_seconds: Some(value.default_breaker_cooldown_seconds),
            default_health_window: Some(value.default_health_window),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_lets_later_patch_win() {
        let mut base = GlobalConfigPatch {
            port: Some(1),
            dsn: Some("sqlite://base".into()),
            ..Default::default()
        };
        base.overlay(GlobalConfigPatch {
            port: Some(2),
            ..Default::default()
        });
        assert_eq!(base.port, Some(2));
        assert_eq!(base.dsn.as_deref(), Some("sqlite://base"));
    }

    #[test]
    fn overlay_under_keeps_higher_precedence_values() {
        let mut cli = GlobalConfigPatch {
            port: Some(9999),
            ..Default::default()
        };
        cli.overlay_under(GlobalConfigPatch {
            port: Some(1111),
            dsn: Some("sqlite://db".into()),
            ..Default::default()
        });
        assert_eq!(cli.port, Some(9999));
        assert_eq!(cli.dsn.as_deref(), Some("sqlite://db"));
    }

    #[test]
    fn into_config_applies_defaults() {
        let cfg = GlobalConfigPatch {
            admin_key_hash: Some("hash".into()),
            dsn: Some("sqlite://x".into()),
            ..Default::default()
        }
        .into_config()
        .unwrap();
        assert_eq!(cfg.port, 8787);
        assert_eq!(cfg.default_breaker_threshold, 3);
        assert_eq!(cfg.default_token_lock_seconds, 120);
    }

    #[test]
    fn into_config_requires_admin_key_hash() {
        let err = GlobalConfigPatch {
            dsn: Some("sqlite://x".into()),
            ..Default::default()
        }
        .into_config()
        .unwrap_err();
        assert!(matches!(err, GlobalConfigError::MissingField("admin_key_hash")));
    }
}
