use super::{Pacer, RateWindow, pause};
use crate::jitter::jitter;
use crate::worker::Worker;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Burst the window's jittered record count, pad to one second, then close
/// the window's transaction and open the next one.
pub struct RatePerSecondPacer {
    rate: u64,
    jitter: f64,
}

impl RatePerSecondPacer {
    pub fn new(rate: u64, jitter: f64) -> Self {
        Self { rate, jitter }
    }

    fn next_window(&self) -> RateWindow {
        RateWindow::start(jitter(self.rate, self.jitter), Instant::now())
    }
}

#[async_trait::async_trait]
impl Pacer for RatePerSecondPacer {
    fn name(&self) -> &'static str {
        "rate-per-second"
    }

    async fn run(&mut self, worker: &mut Worker, shutdown: &CancellationToken) {
        let mut window = self.next_window();
        while !shutdown.is_cancelled() {
            if !window.is_full() {
                if worker.emit_one().await.is_some() {
                    window.record();
                }
                continue;
            }

            let pad = window.remaining(Instant::now());
            if !pad.is_zero() && !pause(pad, shutdown).await {
                break;
            }
            trace!(worker = worker.index(), sent = window.sent(), "rate window closed");
            worker.close_window().await;
            window = self.next_window();
        }
    }
}
