use super::{ByteBudget, Pacer, WINDOW};
use crate::jitter::jitter;
use crate::worker::Worker;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Byte budget per one-second tick. Between ticks the loop polls without
/// blocking: send while under budget, otherwise idle for `idle_sleep`.
pub struct DataRateLimitPacer {
    bytes_per_second: u64,
    jitter: f64,
    idle_sleep: Duration,
}

impl DataRateLimitPacer {
    pub fn new(bytes_per_second: u64, jitter: f64, idle_sleep: Duration) -> Self {
        Self {
            bytes_per_second,
            jitter,
            idle_sleep,
        }
    }
}

#[async_trait::async_trait]
impl Pacer for DataRateLimitPacer {
    fn name(&self) -> &'static str {
        "data-rate-limit-bps"
    }

    async fn run(&mut self, worker: &mut Worker, shutdown: &CancellationToken) {
        let mut ticker = interval(WINDOW);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick fires immediately and draws the first budget
        let mut budget = ByteBudget::default();

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if budget.records() > 0 {
                        trace!(worker = worker.index(), bytes = budget.bytes(), "data-rate window closed");
                        worker.close_window().await;
                    }
                    budget = ByteBudget::new(jitter(self.bytes_per_second, self.jitter));
                }
                _ = std::future::ready(()) => {
                    if budget.allows_send() {
                        if let Some(size) = worker.emit_one().await {
                            budget.add(size);
                        }
                        // empty records never exhaust the budget
                        tokio::task::yield_now().await;
                    } else {
                        tokio::time::sleep(self.idle_sleep).await;
                    }
                }
            }
        }
    }
}
