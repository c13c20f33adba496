use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// A versioned namespace bump counter plus a small TTL'd key-value store,
/// used for the candidate-resolver cache (§4.D) and the stickiness CAS locks
/// (§4.H). Namespaces let a single admin mutation invalidate every cached
/// entry derived from a table without walking the whole map.
pub struct Cache {
    namespaces: RwLock<HashMap<&'static str, u64>>,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

struct CacheEntry {
    namespace: &'static str,
    namespace_version: u64,
    expires_at: Option<Instant>,
    value: serde_json::Value,
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache {
    pub fn new() -> Self {
        Self {
            namespaces: RwLock::new(HashMap::new()),
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn namespace_version(&self, namespace: &'static str) -> u64 {
        self.namespaces
            .read()
            .unwrap()
            .get(namespace)
            .copied()
            .unwrap_or(0)
    }

    /// Invalidates every entry tagged with `namespace` by advancing its
    /// version; readers compare versions lazily instead of eagerly purging.
    pub fn bump_namespace(&self, namespace: &'static str) {
        let mut namespaces = self.namespaces.write().unwrap();
        *namespaces.entry(namespace).or_insert(0) += 1;
    }

    pub fn get_json(&self, namespace: &'static str, key: &str) -> Option<serde_json::Value> {
        let current = self.namespace_version(namespace);
        let entries = self.entries.read().unwrap();
        let entry = entries.get(key)?;
        if entry.namespace != namespace || entry.namespace_version != current {
            return None;
        }
        if let Some(expires_at) = entry.expires_at {
            if Instant::now() >= expires_at {
                return None;
            }
        }
        Some(entry.value.clone())
    }

    pub fn set_json(
        &self,
        namespace: &'static str,
        key: impl Into<String>,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) {
        let namespace_version = self.namespace_version(namespace);
        let mut entries = self.entries.write().unwrap();
        entries.insert(
            key.into(),
            CacheEntry {
                namespace,
                namespace_version,
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
                value,
            },
        );
    }
}

/// CAS+TTL lock keyed by an arbitrary string, used for provider IP-lock and
/// per-(auth_key,binding) token-lock stickiness (§4.H). `holder` identifies
/// who currently owns the lock; `try_acquire` succeeds when the lock is
/// absent, expired, or already held by the same holder (renewal).
pub struct LockTable {
    locks: RwLock<HashMap<String, LockEntry>>,
}

#[derive(Clone)]
struct LockEntry {
    holder: String,
    expires_at: Instant,
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}

impl LockTable {
    pub fn new() -> Self {
        Self {
            locks: RwLock::new(HashMap::new()),
        }
    }

    pub fn try_acquire(&self, key: &str, holder: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        let mut locks = self.locks.write().unwrap();
        match locks.get(key) {
            Some(existing) if existing.expires_at > now && existing.holder != holder => false,
            _ => {
                locks.insert(
                    key.to_string(),
                    LockEntry {
                        holder: holder.to_string(),
                        expires_at: now + ttl,
                    },
                );
                true
            }
        }
    }

    /// Returns the current holder of `key` if the lock is live, without
    /// attempting to acquire it.
    pub fn current_holder(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let locks = self.locks.read().unwrap();
        locks
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.holder.clone())
    }

    pub fn release(&self, key: &str, holder: &str) {
        let mut locks = self.locks.write().unwrap();
        if locks.get(key).is_some_and(|entry| entry.holder == holder) {
            locks.remove(key);
        }
    }
}

/// Monotonic counter used to give each dispatch a process-unique id for
/// tracing/log correlation without pulling in a UUID for the hot path.
#[derive(Default)]
pub struct Sequence(AtomicU64);

impl Sequence {
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_namespace_invalidates_cached_entries() {
        let cache = Cache::new();
        cache.set_json("models", "k", serde_json::json!(1), None);
        assert!(cache.get_json("models", "k").is_some());
        cache.bump_namespace("models");
        assert!(cache.get_json("models", "k").is_none());
    }

    #[test]
    fn ttl_expires_entries() {
        let cache = Cache::new();
        cache.set_json("models", "k", serde_json::json!(1), Some(Duration::from_millis(1)));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get_json("models", "k").is_none());
    }

    #[test]
    fn lock_table_enforces_exclusivity_until_expiry_or_release() {
        let locks = LockTable::new();
        assert!(locks.try_acquire("provider:1", "ip-a", Duration::from_secs(60)));
        assert!(!locks.try_acquire("provider:1", "ip-b", Duration::from_secs(60)));
        assert!(locks.try_acquire("provider:1", "ip-a", Duration::from_secs(60)));
        locks.release("provider:1", "ip-a");
        assert!(locks.try_acquire("provider:1", "ip-b", Duration::from_secs(60)));
    }

    #[test]
    fn lock_table_allows_reacquire_after_expiry() {
        let locks = LockTable::new();
        assert!(locks.try_acquire("k", "a", Duration::from_millis(1)));
        std::thread::sleep(Duration::from_millis(5));
        assert!(locks.try_acquire("k", "b", Duration::from_secs(60)));
    }
}
