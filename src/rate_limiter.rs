//! C7 — Request-scoped rate limiter (spec.md §4.7).
//!
//! A bounded `key -> (count, window_start)` map, same crate lineage as
//! `openibank-openibank`/`gjwang-zero_x_infinity` for in-process concurrent
//! maps (`dashmap`), plus `crossbeam-queue`'s `SegQueue` as the
//! insertion-order FIFO the spec's "drop oldest-inserted" eviction policy
//! needs. Used both for per-IP auth attempts and per-user cashout attempts
//! (spec §4.5, §4.7) — the same structure, different window/count knobs.

use std::time::{Duration, Instant};

use crossbeam_queue::SegQueue;
use dashmap::DashMap;

struct Window {
    count: u32,
    window_start: Instant,
}

pub struct CheckResult {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: Instant,
    pub retry_after_ms: u64,
}

pub struct RateLimiter {
    window: Duration,
    max_count: u32,
    prune_age: Duration,
    max_entries: usize,
    entries: DashMap<String, Window>,
    insertion_order: SegQueue<String>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_count: u32, prune_age: Duration, max_entries: usize) -> Self {
        Self {
            window,
            max_count,
            prune_age,
            max_entries,
            entries: DashMap::new(),
            insertion_order: SegQueue::new(),
        }
    }

    pub fn check(&self, key: String) -> CheckResult {
        let now = Instant::now();

        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            self.evict_oldest();
        }

        let mut allowed = false;
        let mut remaining = 0;
        let mut reset_at = now + self.window;

        self.entries
            .entry(key.clone())
            .and_modify(|w| {
                if now.duration_since(w.window_start) >= self.window {
                    w.count = 0;
                    w.window_start = now;
                }
                if w.count < self.max_count {
                    w.count += 1;
                    allowed = true;
                }
                remaining = self.max_count.saturating_sub(w.count);
                reset_at = w.window_start + self.window;
            })
            .or_insert_with(|| {
                self.insertion_order.push(key.clone());
                allowed = true;
                remaining = self.max_count.saturating_sub(1);
                reset_at = now + self.window;
                Window {
                    count: 1,
                    window_start: now,
                }
            });

        let retry_after_ms = if allowed {
            0
        } else {
            reset_at.saturating_duration_since(now).as_millis() as u64
        };

        CheckResult {
            allowed,
            remaining,
            reset_at,
            retry_after_ms,
        }
    }

    fn evict_oldest(&self) {
        while let Some(key) = self.insertion_order.pop() {
            if self.entries.remove(&key).is_some() {
                return;
            }
            // Key was already pruned; keep popping for the next real one.
        }
    }

    /// Removes windows idle longer than `prune_age`. Intended to run on a
    /// periodic timer alongside the lazy per-access rollover (spec §4.7).
    pub fn prune(&self) {
        let now = Instant::now();
        self.entries
            .retain(|_, w| now.duration_since(w.window_start) < self.prune_age);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_max_count_then_blocks() {
        let limiter = RateLimiter::new(Duration::from_millis(200), 2, Duration::from_secs(60), 100);
        assert!(limiter.check("k".into()).allowed);
        assert!(limiter.check("k".into()).allowed);
        assert!(!limiter.check("k".into()).allowed);
    }

    #[test]
    fn window_rolls_over_after_expiry() {
        let limiter = RateLimiter::new(Duration::from_millis(20), 1, Duration::from_secs(60), 100);
        assert!(limiter.check("k".into()).allowed);
        assert!(!limiter.check("k".into()).allowed);
        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.check("k".into()).allowed);
    }

    #[test]
    fn prune_removes_stale_entries() {
        let limiter = RateLimiter::new(Duration::from_millis(10), 1, Duration::from_millis(20), 100);
        limiter.check("k".into());
        std::thread::sleep(Duration::from_millis(30));
        limiter.prune();
        assert_eq!(limiter.len(), 0);
    }
}
