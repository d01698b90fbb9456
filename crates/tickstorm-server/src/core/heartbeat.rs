use std::time::Duration;

use tokio::time::Instant;

/// Single-shot liveness timer armed on entry to any post-`AwaitAuth`
/// session state. The server never proactively sends heartbeats; it only
/// resets this deadline when the peer sends one and replies in kind.
pub struct HeartbeatMonitor {
    timeout: Duration,
    deadline: Instant,
}

impl HeartbeatMonitor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout, deadline: Instant::now() + timeout }
    }

    pub fn reset(&mut self) {
        self.deadline = Instant::now() + self.timeout;
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn reset_pushes_deadline_forward() {
        let mut monitor = HeartbeatMonitor::new(Duration::from_secs(20));
        let first_deadline = monitor.deadline();

        tokio::time::advance(Duration::from_secs(5)).await;
        monitor.reset();

        assert!(monitor.deadline() > first_deadline);
    }
}
