use crate::client::{ClientError, ProducerClient};
use crate::metrics::LatencyAggregator;
use crate::pacing::Pacer;
use crate::payload::PayloadGenerator;
use crate::txn::{TransactionController, TxnState};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One producer connection plus its transaction state. Owned by a single task.
pub struct Worker {
    index: usize,
    client: Arc<dyn ProducerClient>,
    txn: TransactionController,
    generator: Arc<dyn PayloadGenerator>,
    stats: Arc<LatencyAggregator>,
}

impl Worker {
    pub fn new(
        index: usize,
        client: Arc<dyn ProducerClient>,
        transactional_id: Option<String>,
        generator: Arc<dyn PayloadGenerator>,
        stats: Arc<LatencyAggregator>,
    ) -> Self {
        let txn = TransactionController::new(client.clone(), transactional_id, stats.clone());
        Self {
            index,
            client,
            txn,
            generator,
            stats,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn txn_state(&self) -> TxnState {
        self.txn.state()
    }

    /// Send one record if a transaction is open (or transactions are off).
    /// Returns the key+value size that was enqueued.
    ///
    /// The recorded latency covers only the enqueue call, not the broker ack.
    pub async fn emit_one(&mut self) -> Option<usize> {
        if !self.txn.ensure_open().await {
            return None;
        }
        let record = self.generator.make();
        let size = record.size();
        let flag = self.txn.error_flag();
        let stats = self.stats.clone();
        let worker = self.index;

        let started = Instant::now();
        self.client.produce(
            record,
            Box::new(move |result| {
                if let Err(e) = result {
                    flag.raise();
                    stats.record_delivery_error();
                    match e {
                        ClientError::Purged => debug!(worker, "record purged"),
                        e => warn!(worker, error = %e, "delivery failed"),
                    }
                }
            }),
        );
        self.stats.record(started.elapsed());
        Some(size)
    }

    /// End of a pacing window: settle and reopen.
    pub async fn close_window(&mut self) {
        self.txn.finalize_and_reopen().await;
    }

    /// End of a single-record transaction.
    pub async fn close_record(&mut self) {
        self.txn.finalize().await;
    }

    /// Drive `pacer` until `shutdown` fires, then settle and disconnect.
    pub async fn run(mut self, mut pacer: Box<dyn Pacer>, shutdown: CancellationToken) {
        info!(worker = self.index, pacing = pacer.name(), "worker started");
        pacer.run(&mut self, &shutdown).await;
        self.shutdown().await;
    }

    async fn shutdown(mut self) {
        self.txn.close().await;
        if let Err(e) = self.client.shutdown().await {
            warn!(worker = self.index, error = %e, "client shutdown failed");
        }
        info!(worker = self.index, "worker stopped");
    }
}
