//! Sliding-window admission control keyed by requester identity.
//!
//! Each identity keeps the timestamps of its admitted requests from the
//! trailing window. A check purges expired timestamps, admits if fewer than
//! `limit` remain, and records the new timestamp only on admission.
//!
//! Windows live in memory only and are lost on restart.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// The trailing window every limit is measured over.
pub const WINDOW: Duration = Duration::from_secs(60);

pub struct RateLimiter {
    limit: usize,
    window: Duration,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    /// A limiter admitting `limit` requests per identity per minute.
    pub fn per_minute(limit: usize) -> Self {
        Self::new(limit, WINDOW)
    }

    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Admit or reject one request from `identity`.
    pub fn admit(&self, identity: &str) -> bool {
        self.admit_at(identity, Instant::now())
    }

    /// [`admit`](Self::admit) against an explicit clock reading.
    pub fn admit_at(&self, identity: &str, now: Instant) -> bool {
        // Purge, count and record happen under one lock so concurrent
        // checks for the same identity cannot both take the last slot.
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let stamps = windows.entry(identity.to_string()).or_default();
        purge(stamps, now, self.window);

        if stamps.len() >= self.limit {
            tracing::debug!(identity, limit = self.limit, "Rate limit reached");
            return false;
        }
        stamps.push_back(now);
        true
    }

    /// Requests still available to `identity` right now.
    pub fn remaining(&self, identity: &str) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        match windows.get_mut(identity) {
            Some(stamps) => {
                purge(stamps, now, self.window);
                self.limit.saturating_sub(stamps.len())
            }
            None => self.limit,
        }
    }

    /// Drop identities whose window has emptied. Returns how many were dropped.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let before = windows.len();
        windows.retain(|_, stamps| {
            purge(stamps, now, self.window);
            !stamps.is_empty()
        });
        before - windows.len()
    }

    pub fn tracked_identities(&self) -> usize {
        self.windows.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

fn purge(stamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&oldest) = stamps.front() {
        if now.saturating_duration_since(oldest) >= window {
            stamps.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn fourth_request_within_seconds_is_denied() {
        let limiter = RateLimiter::per_minute(3);
        assert!(limiter.admit("u1"));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.admit("u1"));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(limiter.admit("u1"));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!limiter.admit("u1"));
    }

    #[tokio::test(start_paused = true)]
    async fn identities_are_independent() {
        let limiter = RateLimiter::per_minute(1);
        assert!(limiter.admit("u1"));
        assert!(!limiter.admit("u1"));
        assert!(limiter.admit("u2"));
    }

    #[tokio::test(start_paused = true)]
    async fn window_slides() {
        let limiter = RateLimiter::per_minute(3);
        let start = Instant::now();
        assert!(limiter.admit_at("u1", start));
        assert!(limiter.admit_at("u1", start + Duration::from_secs(20)));
        assert!(limiter.admit_at("u1", start + Duration::from_secs(40)));
        assert!(!limiter.admit_at("u1", start + Duration::from_secs(59)));
        // The first stamp has left the window; one slot frees up.
        assert!(limiter.admit_at("u1", start + Duration::from_secs(60)));
        assert!(!limiter.admit_at("u1", start + Duration::from_secs(61)));
    }

    #[tokio::test(start_paused = true)]
    async fn steady_rate_at_ceiling_is_never_denied() {
        // 3 per minute, spread evenly over five minutes.
        let limiter = RateLimiter::per_minute(3);
        let start = Instant::now();
        for i in 0..15u64 {
            let at = start + Duration::from_secs(i * 20);
            assert!(limiter.admit_at("u1", at), "request {i} denied");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn denied_requests_do_not_consume_slots() {
        let limiter = RateLimiter::per_minute(2);
        let start = Instant::now();
        assert!(limiter.admit_at("u1", start));
        assert!(limiter.admit_at("u1", start + Duration::from_secs(30)));
        for s in 31..59 {
            assert!(!limiter.admit_at("u1", start + Duration::from_secs(s)));
        }
        assert!(limiter.admit_at("u1", start + Duration::from_secs(60)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_checks_never_exceed_limit() {
        let limiter = Arc::new(RateLimiter::per_minute(5));
        let admitted = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..50 {
            let limiter = limiter.clone();
            let admitted = admitted.clone();
            handles.push(tokio::spawn(async move {
                if limiter.admit("shared") {
                    admitted.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(admitted.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn prune_drops_idle_identities() {
        let limiter = RateLimiter::per_minute(2);
        limiter.admit("u1");
        limiter.admit("u2");
        assert_eq!(limiter.tracked_identities(), 2);
        assert_eq!(limiter.remaining("u1"), 1);
        tokio::time::advance(WINDOW).await;
        assert_eq!(limiter.prune(), 2);
        assert_eq!(limiter.tracked_identities(), 0);
        assert_eq!(limiter.remaining("u1"), 2);
    }
}
