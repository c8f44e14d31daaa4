use super::{Pacer, pause};
use crate::jitter::jitter;
use crate::worker::Worker;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One record, then a jittered sleep. With transactions on, every record is
/// its own transaction and the sleep starts only after it has been settled.
pub struct IntervalPacer {
    interval_ms: u64,
    jitter: f64,
}

impl IntervalPacer {
    pub fn new(interval_ms: u64, jitter: f64) -> Self {
        Self { interval_ms, jitter }
    }
}

#[async_trait::async_trait]
impl Pacer for IntervalPacer {
    fn name(&self) -> &'static str {
        "interval"
    }

    async fn run(&mut self, worker: &mut Worker, shutdown: &CancellationToken) {
        while !shutdown.is_cancelled() {
            if worker.emit_one().await.is_none() {
                // begin failed and already backed off
                continue;
            }
            worker.close_record().await;
            let wait = Duration::from_millis(jitter(self.interval_ms, self.jitter));
            if !pause(wait, shutdown).await {
                break;
            }
        }
    }
}
