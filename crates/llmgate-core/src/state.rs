use std::sync::Arc;

use arc_swap::ArcSwap;
use llmgate_common::GlobalConfig;
use llmgate_storage::snapshot::StorageSnapshot;
use llmgate_storage::{Storage, StorageResult};

use crate::auth::{AuthSnapshot, AuthStore};
use crate::breaker::HealthStore;
use crate::cache::{Cache, Sequence};
use crate::ratelimit::RateLimiter;
use crate::selector::RotorTable;
use crate::stickiness::StickinessStore;

/// Cache namespaces bumped whenever the snapshot is reloaded, covering every
/// entity family the resolver/auth layers key their cached reads on.
const INVALIDATED_NAMESPACES: &[&str] = &["bindings", "providers", "models", "auth_keys"];

/// Process-wide runtime state (§5 "Global state"): everything the dispatcher
/// borrows but never owns. `storage` is the only handle touched off the hot
/// path — reads go through `snapshot`, which is rebuilt and atomically
/// swapped after bootstrap and after every admin mutation.
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub global: ArcSwap<GlobalConfig>,
    pub snapshot: ArcSwap<StorageSnapshot>,
    pub auth: AuthStore,
    pub cache: Cache,
    pub health: HealthStore,
    pub ratelimit: RateLimiter,
    pub stickiness: StickinessStore,
    pub rotor: RotorTable,
    pub sequence: Sequence,
}

impl AppState {
    pub fn new(storage: Arc<dyn Storage>, global: GlobalConfig, snapshot: StorageSnapshot) -> Arc<Self> {
        let health = HealthStore::new(global.default_health_window as usize);
        let auth = AuthStore::new(AuthSnapshot::from_rows(&snapshot.auth_keys));
        Arc::new(Self {
            storage,
            global: ArcSwap::from_pointee(global),
            snapshot: ArcSwap::from_pointee(snapshot),
            auth,
            cache: Cache::new(),
            health,
            ratelimit: RateLimiter::new(),
            stickiness: StickinessStore::new(),
            rotor: RotorTable::new(),
            sequence: Sequence::default(),
        })
    }

    /// Reloads the snapshot from storage and bumps every cache namespace
    /// derived from it, so a resolver/auth cache hit can never straddle an
    /// admin mutation (§4.B's versioned-namespace guarantee).
    pub async fn reload_snapshot(&self) -> StorageResult<()> {
        let snapshot = self.storage.load_snapshot().await?;
        self.auth.replace(AuthSnapshot::from_rows(&snapshot.auth_keys));
        self.snapshot.store(Arc::new(snapshot));
        for namespace in INVALIDATED_NAMESPACES {
            self.cache.bump_namespace(namespace);
        }
        Ok(())
    }

    pub fn apply_global_config(&self, config: GlobalConfig) {
        self.global.store(Arc::new(config));
    }
}
