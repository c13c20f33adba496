use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const BUCKETS: usize = 60;

struct ProviderWindow {
    counts: [u32; BUCKETS],
    bucket_started_at: [Option<Instant>; BUCKETS],
    start: Instant,
}

impl ProviderWindow {
    fn new() -> Self {
        Self {
            counts: [0; BUCKETS],
            bucket_started_at: [None; BUCKETS],
            start: Instant::now(),
        }
    }

    fn bucket_index(&self, now: Instant) -> usize {
        (now.duration_since(self.start).as_secs() % BUCKETS as u64) as usize
    }

    /// Clears buckets whose recorded second no longer matches `now`'s
    /// second, so stale counts from a full revolution of the ring don't
    /// leak into the current window.
    fn roll(&mut self, now: Instant) {
        let current_second = now.duration_since(self.start).as_secs();
        for i in 0..BUCKETS {
            let bucket_second = current_second.saturating_sub(i as u64);
            if let Some(started) = self.bucket_started_at[i] {
                let started_second = started.duration_since(self.start).as_secs();
                if started_second != bucket_second {
                    self.counts[i] = 0;
                    self.bucket_started_at[i] = None;
                }
            }
        }
    }

    fn sum_last_minute(&self, now: Instant) -> u32 {
        let cutoff = now.checked_sub(Duration::from_secs(BUCKETS as u64));
        self.bucket_started_at
            .iter()
            .zip(self.counts.iter())
            .filter(|(started, _)| match (started, cutoff) {
                (Some(started), Some(cutoff)) => **started >= cutoff,
                (Some(_), None) => true,
                (None, _) => false,
            })
            .map(|(_, count)| *count)
            .sum()
    }

    fn try_acquire(&mut self, rpm_limit: u32, now: Instant) -> bool {
        self.roll(now);
        if rpm_limit == 0 {
            return true;
        }
        if self.sum_last_minute(now) >= rpm_limit {
            return false;
        }
        let idx = self.bucket_index(now);
        self.counts[idx] += 1;
        self.bucket_started_at[idx] = Some(now);
        true
    }
}

/// Per-provider requests-per-minute limiter, implemented as a 60-bucket
/// per-second ring (§4.G). `rpm_limit == 0` means unlimited.
pub struct RateLimiter {
    windows: Mutex<HashMap<i64, ProviderWindow>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn try_acquire(&self, provider_id: i64, rpm_limit: u32) -> bool {
        let mut windows = self.windows.lock().unwrap();
        let window = windows
            .entry(provider_id)
            .or_insert_with(ProviderWindow::new);
        window.try_acquire(rpm_limit, Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_when_rpm_limit_zero() {
        let limiter = RateLimiter::new();
        for _ in 0..1000 {
            assert!(limiter.try_acquire(1, 0));
        }
    }

    #[test]
    fn blocks_once_limit_reached_within_the_window() {
        let limiter = RateLimiter::new();
        for _ in 0..5 {
            assert!(limiter.try_acquire(1, 5));
        }
        assert!(!limiter.try_acquire(1, 5));
    }

    #[test]
    fn providers_are_tracked_independently() {
        let limiter = RateLimiter::new();
        for _ in 0..3 {
            assert!(limiter.try_acquire(1, 3));
        }
        assert!(!limiter.try_acquire(1, 3));
        assert!(limiter.try_acquire(2, 3));
    }
}
