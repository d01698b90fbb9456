use std::sync::Arc;
use std::time::Duration;

use tickstorm_proto::{DataBatch, Tick, DATA_BATCH_SCHEMA_VERSION};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::metrics::Metrics;

/// Overflow policy for the bounded per-connection write queue. Only
/// `DropWithCounter` is wired up; `BlockProducer` exists because the
/// design explicitly names it as a considered-but-unused alternative, not
/// because two code paths are maintained here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    DropWithCounter,
    #[allow(dead_code)]
    BlockProducer,
}

/// Buffers ticks from a producer channel into `DataBatch`es, flushing on
/// whichever comes first: `window` elapsed since the first buffered tick,
/// or `max_size` ticks buffered. Batches are pushed onto `data_tx` with
/// `try_send`; a full queue drops the batch and counts it rather than
/// blocking (the default, and only implemented, overflow policy).
pub struct Batcher {
    window: Duration,
    max_size: usize,
    policy: OverflowPolicy,
    metrics: Arc<Metrics>,
}

impl Batcher {
    pub fn new(window: Duration, max_size: usize, metrics: Arc<Metrics>) -> Self {
        Self { window, max_size, policy: OverflowPolicy::DropWithCounter, metrics }
    }

    pub async fn run(
        &self,
        mut ticks: mpsc::Receiver<Tick>,
        data_tx: mpsc::Sender<DataBatch>,
        shutdown: CancellationToken,
    ) {
        let mut buffer: Vec<Tick> = Vec::with_capacity(self.max_size);
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.flush(&mut buffer, &data_tx);
                    break;
                }
                maybe_tick = ticks.recv() => {
                    match maybe_tick {
                        Some(tick) => {
                            if buffer.is_empty() {
                                deadline = Some(Instant::now() + self.window);
                            }
                            buffer.push(tick);
                            if buffer.len() >= self.max_size {
                                self.flush(&mut buffer, &data_tx);
                                deadline = None;
                            }
                        }
                        None => {
                            self.flush(&mut buffer, &data_tx);
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600))), if deadline.is_some() => {
                    self.flush(&mut buffer, &data_tx);
                    deadline = None;
                }
            }
        }
    }

    fn flush(&self, buffer: &mut Vec<Tick>, data_tx: &mpsc::Sender<DataBatch>) {
        if buffer.is_empty() {
            return;
        }
        let tick_count = buffer.len() as u64;
        let batch =
            DataBatch { schema_version: DATA_BATCH_SCHEMA_VERSION, ticks: std::mem::take(buffer) };

        match self.policy {
            OverflowPolicy::DropWithCounter => match data_tx.try_send(batch) {
                Ok(()) => {
                    Metrics::incr(&self.metrics.batches_emitted_total);
                    Metrics::add(&self.metrics.ticks_delivered_total, tick_count);
                }
                Err(mpsc::error::TrySendError::Full(dropped)) => {
                    Metrics::incr(&self.metrics.write_queue_drop_total);
                    debug!("write queue full, dropping batch of {} ticks", dropped.ticks.len());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            },
            OverflowPolicy::BlockProducer => unreachable!("reserved, not wired"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickstorm_proto::SubscriptionMode;

    fn tick(symbol: &str) -> Tick {
        Tick { symbol: symbol.into(), price: 1.0, volume: 1.0, timestamp_ms: 0, mode: SubscriptionMode::Second }
    }

    #[tokio::test]
    async fn flushes_on_max_size() {
        let metrics = Arc::new(Metrics::new());
        let batcher = Batcher::new(Duration::from_secs(60), 2, metrics);
        let (tick_tx, tick_rx) = mpsc::channel(8);
        let (data_tx, mut data_rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();

        let shutdown_clone = shutdown.clone();
        let handle = tokio::spawn(async move { batcher.run(tick_rx, data_tx, shutdown_clone).await });

        tick_tx.send(tick("A")).await.unwrap();
        tick_tx.send(tick("B")).await.unwrap();

        let batch = data_rx.recv().await.unwrap();
        assert_eq!(batch.ticks.len(), 2);

        shutdown.cancel();
        drop(tick_tx);
        let _ = handle.await;
    }

    #[tokio::test(start_paused = true)]
    async fn flushes_on_window_elapsed() {
        let metrics = Arc::new(Metrics::new());
        let batcher = Batcher::new(Duration::from_millis(50), 100, metrics);
        let (tick_tx, tick_rx) = mpsc::channel(8);
        let (data_tx, mut data_rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();

        let shutdown_clone = shutdown.clone();
        let handle = tokio::spawn(async move { batcher.run(tick_rx, data_tx, shutdown_clone).await });

        tick_tx.send(tick("A")).await.unwrap();
        tokio::time::advance(Duration::from_millis(60)).await;

        let batch = data_rx.recv().await.unwrap();
        assert_eq!(batch.ticks.len(), 1);

        shutdown.cancel();
        drop(tick_tx);
        let _ = handle.await;
    }
}
