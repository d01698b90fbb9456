use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tickstorm_proto::{SubscriptionMode, Tick};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// The sole injection point between the delivery pipeline and a tick
/// source. The server core never talks to a concrete market-data feed;
/// everything it knows about ticks comes through this trait, which is why
/// tests and local runs can supply a deterministic fake.
#[async_trait]
pub trait TickProducer: Send + Sync {
    /// Starts producing ticks for a freshly-created subscription and
    /// returns the receiving end of the channel the delivery pipeline
    /// reads from. The producer is responsible for stopping its background
    /// work once `shutdown` fires or the receiver is dropped.
    async fn subscribe(
        &self,
        mode: SubscriptionMode,
        symbols: Vec<String>,
        shutdown: CancellationToken,
    ) -> mpsc::Receiver<Tick>;
}

/// A clock-driven producer emitting one synthetic tick per symbol every
/// `mode.cadence_ms()`. Used as the default producer when no external feed
/// is wired in, and directly by integration tests that need predictable
/// output without a real market-data source.
pub struct ClockTickProducer;

impl ClockTickProducer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ClockTickProducer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TickProducer for ClockTickProducer {
    async fn subscribe(
        &self,
        mode: SubscriptionMode,
        symbols: Vec<String>,
        shutdown: CancellationToken,
    ) -> mpsc::Receiver<Tick> {
        let (tx, rx) = mpsc::channel(256);
        let symbols = if symbols.is_empty() { vec!["TICK".to_string()] } else { symbols };
        let cadence = std::time::Duration::from_millis(mode.cadence_ms());

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cadence);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let timestamp_ms = now_ms();
                        for symbol in &symbols {
                            let tick = Tick {
                                symbol: symbol.clone(),
                                price: 0.0,
                                volume: 0.0,
                                timestamp_ms,
                                mode,
                            };
                            if tx.send(tick).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        });

        rx
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clock_producer_emits_ticks_for_each_symbol() {
        let producer = ClockTickProducer::new();
        let shutdown = CancellationToken::new();
        let mut rx = producer
            .subscribe(SubscriptionMode::Second, vec!["A".into(), "B".into()], shutdown.clone())
            .await;

        let first = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .expect("producer should emit within timeout")
            .expect("channel should not be closed");
        assert_eq!(first.mode, SubscriptionMode::Second);

        shutdown.cancel();
    }
}
