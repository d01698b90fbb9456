use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Outcome of a rate-limit check against a source IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    RateLimited,
}

#[derive(Debug, Clone)]
struct Record {
    count: u32,
    first_time: Instant,
    last_time: Instant,
    blocked: bool,
    block_until: Option<Instant>,
}

impl Record {
    fn new(now: Instant) -> Self {
        Self { count: 0, first_time: now, last_time: now, blocked: false, block_until: None }
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_time)
    }
}

/// Sliding-window auth rate limiter, keyed by source IP with the port
/// stripped so a client cannot evade the cap by reconnecting from a new
/// ephemeral port.
///
/// Policy: up to `max_attempts` are allowed within `window`. The attempt
/// that pushes the count past `max_attempts` blocks the IP for
/// `2 * window`; any further attempt that arrives while still blocked
/// extends the block to `3 * window` from the moment it arrived.
pub struct RateLimiter {
    max_attempts: u32,
    window: Duration,
    records: RwLock<HashMap<IpAddr, Record>>,
}

impl RateLimiter {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self { max_attempts, window, records: RwLock::new(HashMap::new()) }
    }

    /// Checks and counts one authentication attempt from `ip`.
    pub fn check(&self, ip: IpAddr) -> RateDecision {
        self.check_at(ip, Instant::now())
    }

    fn check_at(&self, ip: IpAddr, now: Instant) -> RateDecision {
        let mut records = self.records.write();
        let record = records.entry(ip).or_insert_with(|| Record::new(now));

        if !record.blocked && now.duration_since(record.first_time) > self.window {
            record.count = 0;
            record.first_time = now;
        }

        if record.blocked {
            if let Some(until) = record.block_until {
                if now < until {
                    record.block_until = Some(now + self.window * 3);
                    record.last_time = now;
                    return RateDecision::RateLimited;
                }
            }
            record.blocked = false;
            record.block_until = None;
            record.count = 0;
            record.first_time = now;
        }

        record.count += 1;
        record.last_time = now;

        if record.count > self.max_attempts {
            record.blocked = true;
            record.block_until = Some(now + self.window * 2);
            RateDecision::RateLimited
        } else {
            RateDecision::Allowed
        }
    }

    /// Clears the record for `ip` after a successful authentication.
    pub fn reset(&self, ip: IpAddr) {
        self.records.write().remove(&ip);
    }

    /// Background sweep removing records idle for more than `10 * window`,
    /// bounding memory from sources seen once and never again.
    pub async fn sweep_loop(&self, shutdown: CancellationToken) {
        let gc_after = self.window * 10;
        let mut ticker = tokio::time::interval(self.window.max(Duration::from_millis(100)));

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("rate limiter sweep stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let now = Instant::now();
                    let mut records = self.records.write();
                    let before = records.len();
                    records.retain(|_, record| record.idle_for(now) <= gc_after);
                    let removed = before - records.len();
                    if removed > 0 {
                        debug!("rate limiter sweep: removed={removed}, remaining={}", records.len());
                    }
                }
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.records.read().len()
    }
}
