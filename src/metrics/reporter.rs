use super::latency::{LatencyAggregator, LatencySnapshot};
use crate::output::OutputWriter;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Spawn the periodic reporter. It drains the aggregator once per `period`
/// and drains one last time when `shutdown` fires.
pub fn spawn(
    stats: Arc<LatencyAggregator>,
    period: Duration,
    mut output: Option<OutputWriter>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.cancelled() => break,
            }
            report(&stats.drain_and_reset(), output.as_mut()).await;
        }
        report(&stats.drain_and_reset(), output.as_mut()).await;
    })
}

pub async fn report(snap: &LatencySnapshot, output: Option<&mut OutputWriter>) {
    log_snapshot(snap);
    if let Some(out) = output {
        if let Err(e) = out.write_snapshot(snap).await {
            warn!(error = %e, "failed to write snapshot");
        }
    }
}

pub fn log_snapshot(snap: &LatencySnapshot) {
    if snap.is_empty() {
        info!(
            messages = 0,
            delivery_errors = snap.delivery_errors,
            committed = snap.committed,
            aborted = snap.aborted,
            "number messages : 0"
        );
        return;
    }
    info!(
        messages = snap.count,
        min = ?snap.min.unwrap_or_default(),
        max = ?snap.max.unwrap_or_default(),
        avg = ?snap.avg.unwrap_or_default(),
        p99 = ?snap.p99.unwrap_or_default(),
        delivery_errors = snap.delivery_errors,
        committed = snap.committed,
        aborted = snap.aborted,
        txn_failures = snap.txn_failures,
        "enqueue latency"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn drains_each_period_and_on_shutdown() {
        let stats = Arc::new(LatencyAggregator::new());
        let shutdown = CancellationToken::new();
        let handle = spawn(stats.clone(), Duration::from_secs(1), None, shutdown.clone());

        stats.record(Duration::from_millis(2));
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        // the first full period drained the sample
        assert!(stats.drain_and_reset().is_empty());

        stats.record(Duration::from_millis(4));
        shutdown.cancel();
        handle.await.unwrap();
        assert!(stats.drain_and_reset().is_empty());
    }
}
