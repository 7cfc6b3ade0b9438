//! Per-member config request throttling
//!
//! Members poll for their configuration; a member asking again within the
//! minimum interval is ignored rather than answered.

use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::address::{Address, NetworkId};
use crate::config::{ControllerConfig, RateLimiterConfig};

/// Verdict for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allow,
    Throttle,
}

/// Last-request timestamps keyed by (network, member)
pub struct RequestRateLimiter {
    last_request: DashMap<(NetworkId, Address), i64>,
    /// Time of the last growth-triggered sweep
    last_sweep: AtomicI64,
    min_interval_ms: i64,
    config: RateLimiterConfig,
}

impl RequestRateLimiter {
    pub fn new(min_interval_ms: u64, config: RateLimiterConfig) -> Self {
        Self {
            last_request: DashMap::new(),
            last_sweep: AtomicI64::new(i64::MIN),
            min_interval_ms: i64::try_from(min_interval_ms).unwrap_or(i64::MAX),
            config,
        }
    }

    pub fn from_config(config: &ControllerConfig) -> Self {
        Self::new(config.min_request_interval_ms, config.rate_limiter.clone())
    }

    /// Record a request at `now` (ms) unless it comes too soon after the
    /// previous allowed one. Throttled requests do not move the window.
    pub fn check(&self, network: NetworkId, member: Address, now: i64) -> RateDecision {
        let decision = match self.last_request.entry((network, member)) {
            Entry::Occupied(mut entry) => {
                if now.saturating_sub(*entry.get()) < self.min_interval_ms {
                    RateDecision::Throttle
                } else {
                    entry.insert(now);
                    RateDecision::Allow
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                RateDecision::Allow
            }
        };

        if decision == RateDecision::Allow
            && self.last_request.len() > self.config.max_entries
            && self.claim_sweep(now)
        {
            self.sweep(now);
        }
        decision
    }

    /// Growth sweeps run at most once per request interval
    fn claim_sweep(&self, now: i64) -> bool {
        let last = self.last_sweep.load(Ordering::Relaxed);
        now.saturating_sub(last) >= self.min_interval_ms
            && self
                .last_sweep
                .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
    }

    /// Drop entries idle for longer than the eviction horizon (and never
    /// younger than the request interval); returns how many were removed
    pub fn sweep(&self, now: i64) -> usize {
        let horizon = i64::try_from(self.config.idle_eviction_ms)
            .unwrap_or(i64::MAX)
            .max(self.min_interval_ms);
        let before = self.last_request.len();
        self.last_request
            .retain(|_, last| now.saturating_sub(*last) < horizon);
        let removed = before.saturating_sub(self.last_request.len());
        if removed > 0 {
            debug!(removed, remaining = self.last_request.len(), "Swept idle rate limiter entries");
        }
        removed
    }

    /// Forget every member of a deleted network
    pub fn forget_network(&self, network: NetworkId) {
        self.last_request.retain(|(nwid, _), _| *nwid != network);
    }

    pub fn len(&self) -> usize {
        self.last_request.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_request.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn limiter(max_entries: usize) -> RequestRateLimiter {
        RequestRateLimiter::new(
            1000,
            RateLimiterConfig {
                max_entries,
                idle_eviction_ms: 60_000,
            },
        )
    }

    const NWID: NetworkId = NetworkId::new(0x8056c2e21c000001);

    #[test]
    fn test_second_request_within_window_is_throttled() {
        let rl = limiter(100);
        let a = Address::new(0xaa);
        assert_eq!(rl.check(NWID, a, 10_000), RateDecision::Allow);
        assert_eq!(rl.check(NWID, a, 10_999), RateDecision::Throttle);
        assert_eq!(rl.check(NWID, a, 11_000), RateDecision::Allow);
    }

    #[test]
    fn test_throttled_request_does_not_extend_window() {
        let rl = limiter(100);
        let a = Address::new(0xaa);
        rl.check(NWID, a, 0);
        rl.check(NWID, a, 900);
        assert_eq!(rl.check(NWID, a, 1000), RateDecision::Allow);
    }

    #[test]
    fn test_keys_are_independent() {
        let rl = limiter(100);
        assert_eq!(rl.check(NWID, Address::new(1), 0), RateDecision::Allow);
        assert_eq!(rl.check(NWID, Address::new(2), 0), RateDecision::Allow);
        assert_eq!(
            rl.check(NetworkId::new(0x8056c2e21c000002), Address::new(1), 0),
            RateDecision::Allow
        );
        assert_eq!(rl.len(), 3);
    }

    #[test]
    fn test_growth_triggers_sweep() {
        let rl = limiter(4);
        for i in 0..4 {
            rl.check(NWID, Address::new(i + 1), 0);
        }
        // well past the idle horizon: the old entries go
        rl.check(NWID, Address::new(100), 120_000);
        assert_eq!(rl.len(), 1);
    }

    #[test]
    fn test_growth_sweeps_are_spaced() {
        let rl = limiter(2);
        rl.check(NWID, Address::new(1), 0);
        rl.check(NWID, Address::new(2), 0);
        // over capacity, but nothing is idle yet
        rl.check(NWID, Address::new(3), 59_800);
        assert_eq!(rl.len(), 3);

        // 1 and 2 are now idle, but a sweep ran 300 ms ago
        rl.check(NWID, Address::new(4), 60_100);
        assert_eq!(rl.len(), 4);

        rl.check(NWID, Address::new(5), 60_900);
        assert_eq!(rl.len(), 3);
    }

    #[test]
    fn test_sweep_keeps_recent_entries() {
        let rl = limiter(100);
        rl.check(NWID, Address::new(1), 0);
        rl.check(NWID, Address::new(2), 59_000);
        assert_eq!(rl.sweep(61_000), 1);
        assert_eq!(rl.check(NWID, Address::new(2), 59_500), RateDecision::Throttle);
    }

    #[test]
    fn test_forget_network() {
        let rl = limiter(100);
        rl.check(NWID, Address::new(1), 0);
        rl.check(NetworkId::new(7), Address::new(1), 0);
        rl.forget_network(NWID);
        assert_eq!(rl.len(), 1);
        assert_eq!(rl.check(NWID, Address::new(1), 1), RateDecision::Allow);
    }

    #[test]
    fn test_concurrent_same_key_allows_exactly_one() {
        let rl = Arc::new(limiter(1000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let rl = Arc::clone(&rl);
                std::thread::spawn(move || rl.check(NWID, Address::new(9), 5_000))
            })
            .collect();
        let allowed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|d| *d == RateDecision::Allow)
            .count();
        assert_eq!(allowed, 1);
    }
}
