//! Per-client-IP fixed-window rate limiting with a whitelist.
//!
//! One record per IP: `(window_start, count)`. A request inside the window
//! increments the counter; the first request after the window expires
//! resets it. Whitelisted addresses bypass the table entirely. The table is
//! shared by all connection workers behind a short-held mutex.

use std::{
    collections::{HashMap, HashSet},
    net::IpAddr,
    sync::Mutex,
    time::{Duration, Instant},
};

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    Allowed,
    /// Over the limit; the reply carries `Retry-After` with the seconds
    /// until the window rolls over.
    Denied { retry_after_secs: u64 },
}

#[derive(Debug, Clone, Copy)]
struct Window {
    start: Instant,
    count: u32,
}

#[derive(Debug)]
pub(crate) struct RateLimiter {
    max_requests: u32,
    window: Duration,
    state: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    table: HashMap<IpAddr, Window>,
    whitelist: HashSet<IpAddr>,
}

// Table size at which expired windows are swept out.
const PRUNE_THRESHOLD: usize = 65_536;

impl RateLimiter {
    pub(crate) fn new(max_requests: u32, window: Duration) -> Self {
        RateLimiter {
            max_requests,
            window,
            state: Mutex::new(Inner {
                table: HashMap::new(),
                whitelist: HashSet::new(),
            }),
        }
    }

    pub(crate) fn add_whitelist(&self, ip: IpAddr) {
        self.state.lock().expect("rate limiter lock").whitelist.insert(ip);
    }

    /// Checks and records one connection attempt from `ip`.
    pub(crate) fn check(&self, ip: IpAddr, now: Instant) -> Verdict {
        let mut inner = self.state.lock().expect("rate limiter lock");

        if inner.whitelist.contains(&ip) {
            return Verdict::Allowed;
        }

        if inner.table.len() >= PRUNE_THRESHOLD {
            let window = self.window;
            inner
                .table
                .retain(|_, slot| now.duration_since(slot.start) < window);
        }

        let slot = inner.table.entry(ip).or_insert(Window { start: now, count: 0 });
        if now.duration_since(slot.start) >= self.window {
            slot.start = now;
            slot.count = 1;
            return Verdict::Allowed;
        }

        slot.count += 1;
        if slot.count > self.max_requests {
            let elapsed = now.duration_since(slot.start);
            let remaining = self.window - elapsed;
            let mut secs = remaining.as_secs();
            if remaining.subsec_nanos() > 0 {
                secs += 1;
            }
            return Verdict::Denied {
                retry_after_secs: secs.max(1),
            };
        }
        Verdict::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([203, 0, 113, last])
    }

    #[test]
    fn at_limit_allows_one_over_denies() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let now = Instant::now();

        assert_eq!(limiter.check(ip(1), now), Verdict::Allowed);
        assert_eq!(limiter.check(ip(1), now), Verdict::Allowed);
        match limiter.check(ip(1), now) {
            Verdict::Denied { retry_after_secs } => {
                assert!(retry_after_secs >= 1 && retry_after_secs <= 60)
            }
            verdict => panic!("expected denial, got {verdict:?}"),
        }
    }

    #[test]
    fn addresses_are_counted_independently() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();

        assert_eq!(limiter.check(ip(1), now), Verdict::Allowed);
        assert_eq!(limiter.check(ip(2), now), Verdict::Allowed);
        assert!(matches!(limiter.check(ip(1), now), Verdict::Denied { .. }));
        assert!(matches!(limiter.check(ip(2), now), Verdict::Denied { .. }));
    }

    #[test]
    fn window_expiry_resets_the_counter() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let start = Instant::now();

        assert_eq!(limiter.check(ip(1), start), Verdict::Allowed);
        assert!(matches!(
            limiter.check(ip(1), start + Duration::from_secs(59)),
            Verdict::Denied { .. }
        ));
        // Exactly at the window boundary a fresh window begins.
        assert_eq!(
            limiter.check(ip(1), start + Duration::from_secs(60)),
            Verdict::Allowed
        );
    }

    #[test]
    fn retry_after_reflects_remaining_window() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let start = Instant::now();

        limiter.check(ip(1), start);
        match limiter.check(ip(1), start + Duration::from_secs(20)) {
            Verdict::Denied { retry_after_secs } => assert_eq!(retry_after_secs, 40),
            verdict => panic!("expected denial, got {verdict:?}"),
        }
    }

    #[test]
    fn whitelist_bypasses_the_table() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();
        limiter.add_whitelist(ip(9));

        for _ in 0..5 {
            assert_eq!(limiter.check(ip(9), now), Verdict::Allowed);
        }
        // Other addresses are still limited.
        assert_eq!(limiter.check(ip(1), now), Verdict::Allowed);
        assert!(matches!(limiter.check(ip(1), now), Verdict::Denied { .. }));
    }
}
