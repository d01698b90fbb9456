use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Process-wide atomic counters. Cheap to update from any session task
/// (no locking, no cross-task synchronization beyond the atomics
/// themselves) and cheap to snapshot for the process-exit statistics
/// report or an external metrics-exposition endpoint to scrape.
#[derive(Debug, Default)]
pub struct Metrics {
    pub connections_accepted: AtomicU64,
    pub connections_rejected: AtomicU64,
    pub connections_active: AtomicU64,
    pub bytes_in: AtomicU64,
    pub bytes_out: AtomicU64,
    pub frames_in: AtomicU64,
    pub frames_out: AtomicU64,
    pub auth_success: AtomicU64,
    pub auth_failure: AtomicU64,
    pub rate_limited_total: AtomicU64,
    pub heartbeat_timeout_total: AtomicU64,
    pub write_timeout_total: AtomicU64,
    pub write_queue_drop_total: AtomicU64,
    pub invalid_frame_total: AtomicU64,
    pub protocol_error_total: AtomicU64,
    pub batches_emitted_total: AtomicU64,
    pub ticks_delivered_total: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            frames_in: self.frames_in.load(Ordering::Relaxed),
            frames_out: self.frames_out.load(Ordering::Relaxed),
            auth_success: self.auth_success.load(Ordering::Relaxed),
            auth_failure: self.auth_failure.load(Ordering::Relaxed),
            rate_limited_total: self.rate_limited_total.load(Ordering::Relaxed),
            heartbeat_timeout_total: self.heartbeat_timeout_total.load(Ordering::Relaxed),
            write_timeout_total: self.write_timeout_total.load(Ordering::Relaxed),
            write_queue_drop_total: self.write_queue_drop_total.load(Ordering::Relaxed),
            invalid_frame_total: self.invalid_frame_total.load(Ordering::Relaxed),
            protocol_error_total: self.protocol_error_total.load(Ordering::Relaxed),
            batches_emitted_total: self.batches_emitted_total.load(Ordering::Relaxed),
            ticks_delivered_total: self.ticks_delivered_total.load(Ordering::Relaxed),
        }
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, amount: u64) {
        counter.fetch_add(amount, Ordering::Relaxed);
    }
}

/// A point-in-time, serializable copy of [`Metrics`] — what `main` prints
/// on clean shutdown and what an external exposition endpoint would
/// render as the scrape payload.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub connections_accepted: u64,
    pub connections_rejected: u64,
    pub connections_active: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub frames_in: u64,
    pub frames_out: u64,
    pub auth_success: u64,
    pub auth_failure: u64,
    pub rate_limited_total: u64,
    pub heartbeat_timeout_total: u64,
    pub write_timeout_total: u64,
    pub write_queue_drop_total: u64,
    pub invalid_frame_total: u64,
    pub protocol_error_total: u64,
    pub batches_emitted_total: u64,
    pub ticks_delivered_total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn snapshot_reflects_updates() {
        let metrics = Metrics::new();
        Metrics::incr(&metrics.connections_accepted);
        Metrics::add(&metrics.bytes_in, 128);
        let snap = metrics.snapshot();
        assert_eq!(snap.connections_accepted, 1);
        assert_eq!(snap.bytes_in, 128);
        assert_eq!(metrics.connections_accepted.load(Ordering::Relaxed), 1);
    }
}
