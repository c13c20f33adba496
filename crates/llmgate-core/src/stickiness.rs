use std::time::Duration;

use crate::cache::LockTable;

/// The two independent sticky mechanisms from §4.H, both backed by the same
/// CAS+TTL lock table so neither ever blocks the dispatch loop.
#[derive(Default)]
pub struct StickinessStore {
    ip_locks: LockTable,
    token_locks: LockTable,
}

impl StickinessStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// First IP to contact `provider_id` leases it exclusively for
    /// `lock_minutes`; any other IP is filtered out of the candidate pool,
    /// not counted as a failed attempt. `lock_minutes == 0` disables the
    /// lock entirely.
    pub fn ip_lock_permits(&self, provider_id: i64, client_ip: &str, lock_minutes: u32) -> bool {
        if lock_minutes == 0 {
            return true;
        }
        self.ip_locks.try_acquire(
            &format!("provider:{provider_id}"),
            client_ip,
            Duration::from_secs(u64::from(lock_minutes) * 60),
        )
    }

    /// An auth key pins to a single binding for `lock_seconds`: once it
    /// leases `binding_id` it may not pick a different binding from the
    /// same model while the lease is live, though other auth keys remain
    /// free to use the binding. Callers should fall back to an unrelated
    /// candidate (not treat this as a failed attempt) when the lease is
    /// held by a different binding.
    pub fn token_lock_permits(&self, auth_key_id: i64, binding_id: i64, lock_seconds: u32) -> bool {
        if lock_seconds == 0 {
            return true;
        }
        self.token_locks.try_acquire(
            &format!("auth:{auth_key_id}"),
            &binding_id.to_string(),
            Duration::from_secs(u64::from(lock_seconds)),
        )
    }

    /// The binding currently pinned for `auth_key_id`, if any lease is live.
    pub fn token_lock_binding(&self, auth_key_id: i64) -> Option<i64> {
        self.token_locks
            .current_holder(&format!("auth:{auth_key_id}"))
            .and_then(|holder| holder.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ip_lock_grants_first_ip_and_refuses_others() {
        let store = StickinessStore::new();
        assert!(store.ip_lock_permits(1, "1.1.1.1", 5));
        assert!(!store.ip_lock_permits(1, "2.2.2.2", 5));
        assert!(store.ip_lock_permits(1, "1.1.1.1", 5));
    }

    #[test]
    fn zero_minutes_disables_the_ip_lock() {
        let store = StickinessStore::new();
        assert!(store.ip_lock_permits(1, "1.1.1.1", 0));
        assert!(store.ip_lock_permits(1, "2.2.2.2", 0));
    }

    #[test]
    fn token_lock_pins_auth_key_to_one_binding() {
        let store = StickinessStore::new();
        assert!(store.token_lock_permits(7, 100, 120));
        assert!(!store.token_lock_permits(7, 200, 120));
        assert!(store.token_lock_permits(7, 100, 120));
        assert_eq!(store.token_lock_binding(7), Some(100));
    }

    #[test]
    fn other_auth_keys_are_independent() {
        let store = StickinessStore::new();
        assert!(store.token_lock_permits(1, 100, 120));
        assert!(store.token_lock_permits(2, 100, 120));
    }
}
