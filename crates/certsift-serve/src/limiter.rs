//! Per-IP request rate limiting.
//!
//! One process-wide map guarded by one mutex; the visit-and-update is a
//! single critical section. Contention is accepted for simplicity (sharding
//! by IP hash would be a straightforward extension).
//!
//! The window is fixed: the first request from an IP opens a window and is
//! admitted, up to `limit` requests are admitted within `reset` of the
//! window start, and the first request after the window reopens it. Entries
//! idle past the window are evicted while the lock is held, so the map does
//! not grow without bound across unique IPs.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct Visit {
    count: u32,
    window_start: Instant,
}

/// Fixed-window per-IP rate limiter.
pub struct RateLimiter {
    visits: Mutex<HashMap<IpAddr, Visit>>,
    limit: u32,
    reset: Duration,
}

impl RateLimiter {
    pub fn new(limit: u32, reset: Duration) -> Self {
        Self {
            visits: Mutex::new(HashMap::new()),
            limit,
            reset,
        }
    }

    /// Record a visit from `ip`; returns whether the request is admitted.
    pub fn admit(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut visits = self.visits.lock();

        // Evict windows that have fully expired, the requester's included
        // (an expired entry and a fresh one behave identically).
        visits.retain(|_, v| now.duration_since(v.window_start) <= self.reset);

        match visits.get_mut(&ip) {
            None => {
                visits.insert(
                    ip,
                    Visit {
                        count: 1,
                        window_start: now,
                    },
                );
                true
            }
            Some(visit) => {
                if visit.count >= self.limit {
                    false
                } else {
                    visit.count += 1;
                    true
                }
            }
        }
    }

    /// Number of tracked IPs (post-eviction).
    pub fn tracked_ips(&self) -> usize {
        self.visits.lock().len()
    }
}
