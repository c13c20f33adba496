use llmgate_storage::snapshot::{BindingRow, ModelRow, ProviderRow, StorageSnapshot};

use crate::breaker::{BreakerState, HealthStore};
use crate::cache::Cache;
use crate::error::ProxyError;
use crate::request::RequiredCapabilities;

/// A binding paired with its live provider and a read-only snapshot of its
/// health, ready for the selector to pick from.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub binding: BindingRow,
    pub provider: ProviderRow,
    pub stats: BindingStats,
}

#[derive(Debug, Clone, Copy)]
pub struct BindingStats {
    pub success_rate: f64,
    pub breaker_state: BreakerState,
}

const CACHE_NAMESPACE: &str = "bindings";

/// Resolves `model_name` to its live bindings, filtered by required
/// capabilities. Does not apply breaker/rate-limit/stickiness filtering or
/// perform any ordering beyond the storage snapshot's own order — that is
/// the dispatcher's job at each attempt, since health/rate state changes
/// between attempts within the same request.
pub fn resolve_candidates(
    snapshot: &StorageSnapshot,
    cache: &Cache,
    health: &HealthStore,
    model_name: &str,
    capabilities: RequiredCapabilities,
) -> Result<(ModelRow, Vec<Candidate>), ProxyError> {
    let model = snapshot
        .models
        .iter()
        .find(|m| m.name == model_name)
        .cloned()
        .ok_or_else(|| ProxyError::not_found(format!("unknown model: {model_name}")))?;

    let cache_key = format!("{}:{}", model.id, capability_mask(capabilities));
    let binding_ids = match cache.get_json(CACHE_NAMESPACE, &cache_key) {
        Some(value) => serde_json::from_value::<Vec<i64>>(value).unwrap_or_default(),
        None => {
            let ids: Vec<i64> = matching_bindings(snapshot, &model, capabilities)
                .map(|b| b.id)
                .collect();
            if let Ok(value) = serde_json::to_value(&ids) {
                cache.set_json(CACHE_NAMESPACE, &cache_key, value, None);
            }
            ids
        }
    };

    let candidates = binding_ids
        .into_iter()
        .filter_map(|id| build_candidate(snapshot, health, id))
        .collect();
    Ok((model, candidates))
}

fn matching_bindings<'a>(
    snapshot: &'a StorageSnapshot,
    model: &ModelRow,
    capabilities: RequiredCapabilities,
) -> impl Iterator<Item = &'a BindingRow> {
    snapshot
        .bindings
        .iter()
        .filter(move |b| b.model_id == model.id)
        .filter(move |b| satisfies(b, capabilities))
}

fn satisfies(binding: &BindingRow, capabilities: RequiredCapabilities) -> bool {
    binding.status
        && (!capabilities.tool_call || binding.cap_tool_call)
        && (!capabilities.structured_output || binding.cap_structured_output)
        && (!capabilities.image || binding.cap_image)
}

fn build_candidate(snapshot: &StorageSnapshot, health: &HealthStore, binding_id: i64) -> Option<Candidate> {
    let binding = snapshot.bindings.iter().find(|b| b.id == binding_id)?.clone();
    let provider = snapshot
        .providers
        .iter()
        .find(|p| p.id == binding.provider_id)?
        .clone();
    let stats = BindingStats {
        success_rate: health.success_rate(binding.id),
        breaker_state: health.state(binding.id),
    };
    Some(Candidate {
        binding,
        provider,
        stats,
    })
}

fn capability_mask(capabilities: RequiredCapabilities) -> u8 {
    let mut mask = 0u8;
    if capabilities.tool_call {
        mask |= 0b001;
    }
    if capabilities.structured_output {
        mask |= 0b010;
    }
    if capabilities.image {
        mask |= 0b100;
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::OffsetDateTime;

    fn provider(id: i64) -> ProviderRow {
        ProviderRow {
            id,
            name: format!("provider-{id}"),
            kind: "openai".to_string(),
            config_json: json!({"kind": "openai", "config": {"base_url": "https://x", "api_key": "k"}}),
            console_url: None,
            rpm_limit: 0,
            ip_lock_minutes: 0,
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    fn binding(id: i64, model_id: i64, provider_id: i64, cap_tool_call: bool) -> BindingRow {
        BindingRow {
            id,
            model_id,
            provider_id,
            provider_model: "gpt-demo".to_string(),
            cap_tool_call,
            cap_structured_output: false,
            cap_image: false,
            with_header: false,
            customer_headers: json!({}),
            status: true,
            weight: 1,
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    fn model(id: i64) -> ModelRow {
        ModelRow {
            id,
            name: "gpt-demo".to_string(),
            remark: None,
            max_retry: 1,
            time_out_seconds: 30,
            io_log: false,
            strategy: "lottery".to_string(),
            breaker: true,
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    fn snapshot_with(bindings: Vec<BindingRow>, providers: Vec<ProviderRow>, models: Vec<ModelRow>) -> StorageSnapshot {
        StorageSnapshot {
            global_config: None,
            providers,
            models,
            bindings,
            auth_keys: vec![],
        }
    }

    #[test]
    fn filters_by_capability_and_caches_ids() {
        let snapshot = snapshot_with(
            vec![binding(1, 10, 100, false), binding(2, 10, 100, true)],
            vec![provider(100)],
            vec![model(10)],
        );
        let cache = Cache::new();
        let health = HealthStore::new(100);

        let caps = RequiredCapabilities {
            tool_call: true,
            ..Default::default()
        };
        let (found_model, candidates) =
            resolve_candidates(&snapshot, &cache, &health, "gpt-demo", caps).unwrap();
        assert_eq!(found_model.id, 10);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].binding.id, 2);

        // Second call should hit the cache (same result either way).
        let (_, candidates_again) =
            resolve_candidates(&snapshot, &cache, &health, "gpt-demo", caps).unwrap();
        assert_eq!(candidates_again.len(), 1);
    }

    #[test]
    fn unknown_model_is_not_found() {
        let snapshot = snapshot_with(vec![], vec![], vec![]);
        let cache = Cache::new();
        let health = HealthStore::new(100);
        let err = resolve_candidates(&snapshot, &cache, &health, "missing", RequiredCapabilities::default())
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NotFound);
    }

    #[test]
    fn namespace_bump_invalidates_binding_cache() {
        let snapshot = snapshot_with(
            vec![binding(1, 10, 100, true)],
            vec![provider(100)],
            vec![model(10)],
        );
        let cache = Cache::new();
        let health = HealthStore::new(100);
        let caps = RequiredCapabilities::default();
        let (_, first) = resolve_candidates(&snapshot, &cache, &health, "gpt-demo", caps).unwrap();
        assert_eq!(first.len(), 1);

        cache.bump_namespace(CACHE_NAMESPACE);

        let snapshot_empty = snapshot_with(vec![], vec![provider(100)], vec![model(10)]);
        let (_, second) = resolve_candidates(&snapshot_empty, &cache, &health, "gpt-demo", caps).unwrap();
        assert!(second.is_empty());
    }
}
