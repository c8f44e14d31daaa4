//! Per-worker transaction state machine around a [`ProducerClient`].

use crate::client::{ClientError, ProducerClient, TxnOutcome};
use crate::metrics::LatencyAggregator;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff after a failed `begin_transaction`.
pub const BEGIN_BACKOFF: Duration = Duration::from_millis(25);
/// Backoff after a failed end before the single reopen attempt.
pub const END_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxnState {
    /// Transactions are off; every operation is a pass-through.
    Disabled,
    NotOpen,
    Open,
}

/// Raised by completion callbacks when a send in the current window failed.
/// Callbacks run on the client's delivery task, hence the atomic.
#[derive(Clone, Debug, Default)]
pub struct WindowErrorFlag(Arc<AtomicBool>);

impl WindowErrorFlag {
    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Read and clear.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

pub struct TransactionController {
    client: Arc<dyn ProducerClient>,
    transactional_id: Option<String>,
    state: TxnState,
    window_error: WindowErrorFlag,
    stats: Arc<LatencyAggregator>,
}

impl TransactionController {
    /// `transactional_id == None` disables transactions.
    pub fn new(
        client: Arc<dyn ProducerClient>,
        transactional_id: Option<String>,
        stats: Arc<LatencyAggregator>,
    ) -> Self {
        let state = if transactional_id.is_some() {
            TxnState::NotOpen
        } else {
            TxnState::Disabled
        };
        Self {
            client,
            transactional_id,
            state,
            window_error: WindowErrorFlag::default(),
            stats,
        }
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    /// Handle for completion callbacks.
    pub fn error_flag(&self) -> WindowErrorFlag {
        self.window_error.clone()
    }

    /// Sends are allowed only when this returns true. A failed begin backs off
    /// briefly and reports not ready; the caller retries on its next iteration.
    pub async fn ensure_open(&mut self) -> bool {
        match self.state {
            TxnState::Disabled | TxnState::Open => true,
            TxnState::NotOpen => match self.client.begin_transaction().await {
                Ok(()) => {
                    self.state = TxnState::Open;
                    true
                }
                Err(e) => {
                    warn!(transactional_id = ?self.transactional_id, error = %e, "begin transaction failed");
                    self.stats.record_txn_failure();
                    if e.requires_abort() {
                        self.abort_stuck().await;
                    }
                    tokio::time::sleep(BEGIN_BACKOFF).await;
                    false
                }
            },
        }
    }

    /// Close the window: flush, commit when no send failed (abort otherwise),
    /// and open the next transaction in the same step.
    ///
    /// A failed end leaves the controller `NotOpen` after one best-effort
    /// begin; nothing here is fatal. A transaction that can only be aborted
    /// is aborted first.
    pub async fn finalize_and_reopen(&mut self) {
        match self.state {
            TxnState::Disabled => {
                self.window_error.take();
            }
            TxnState::NotOpen => {}
            TxnState::Open => {
                let outcome = self.settle().await;
                match self.client.end_and_begin_transaction(outcome).await {
                    Ok(()) => {
                        self.count(outcome);
                        self.state = TxnState::Open;
                    }
                    Err(ClientError::Reopen(e)) => {
                        self.count(outcome);
                        warn!(transactional_id = ?self.transactional_id, ?outcome, error = %e, "begin after end failed");
                        self.stats.record_txn_failure();
                        self.state = TxnState::NotOpen;
                    }
                    Err(e) => {
                        warn!(transactional_id = ?self.transactional_id, ?outcome, error = %e, "end transaction failed");
                        self.stats.record_txn_failure();
                        self.state = TxnState::NotOpen;
                        if e.requires_abort() {
                            self.abort_stuck().await;
                        }
                        tokio::time::sleep(END_BACKOFF).await;
                        if self.client.begin_transaction().await.is_ok() {
                            self.state = TxnState::Open;
                        } else {
                            debug!(transactional_id = ?self.transactional_id, "reopen after failed end also failed");
                        }
                    }
                }
            }
        }
    }

    /// Like [`finalize_and_reopen`](Self::finalize_and_reopen) but leaves no
    /// transaction open. Used for one-record transactions.
    pub async fn finalize(&mut self) {
        match self.state {
            TxnState::Disabled => {
                self.window_error.take();
            }
            TxnState::NotOpen => {}
            TxnState::Open => {
                let outcome = self.settle().await;
                self.state = TxnState::NotOpen;
                match self.client.end_transaction(outcome).await {
                    Ok(()) => self.count(outcome),
                    Err(e) => {
                        warn!(transactional_id = ?self.transactional_id, ?outcome, error = %e, "end transaction failed");
                        self.stats.record_txn_failure();
                        if e.requires_abort() {
                            self.abort_stuck().await;
                        }
                    }
                }
            }
        }
    }

    /// Shutdown path: settle whatever is in flight and leave nothing open.
    pub async fn close(&mut self) {
        if self.state != TxnState::Open {
            if let Err(e) = self.client.flush().await {
                warn!(error = %e, "flush failed");
            }
        }
        self.finalize().await;
    }

    /// Flush, then decide. The flag is read only after every callback of the
    /// window has run; an abort also drops whatever is still buffered.
    async fn settle(&mut self) -> TxnOutcome {
        let flushed = match self.client.flush().await {
            Ok(()) => true,
            Err(e) => {
                warn!(transactional_id = ?self.transactional_id, error = %e, "flush failed, aborting");
                false
            }
        };
        let had_error = self.window_error.take();
        if flushed && !had_error {
            return TxnOutcome::Commit;
        }
        if let Err(e) = self.client.abort_buffered_records().await {
            warn!(error = %e, "discarding buffered records failed");
        }
        TxnOutcome::Abort
    }

    /// Abort a transaction the producer will no longer commit.
    async fn abort_stuck(&mut self) {
        match self.client.end_transaction(TxnOutcome::Abort).await {
            Ok(()) => self.stats.record_abort(),
            Err(e) => {
                warn!(transactional_id = ?self.transactional_id, error = %e, "abort of unusable transaction failed");
            }
        }
    }

    fn count(&self, outcome: TxnOutcome) {
        match outcome {
            TxnOutcome::Commit => self.stats.record_commit(),
            TxnOutcome::Abort => self.stats.record_abort(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::{MockBroker, MockFaults};
    use crate::client::{ClientFactory, ConnectOptions};
    use crate::payload::Record;

    async fn controller(broker: &MockBroker) -> (TransactionController, Arc<LatencyAggregator>) {
        let opts = ConnectOptions {
            client_id: "w-1".into(),
            transactional_id: Some("dg-1".into()),
            ..Default::default()
        };
        let client = broker.connect(opts).await.unwrap();
        let stats = Arc::new(LatencyAggregator::new());
        let ctl = TransactionController::new(client, Some("dg-1".into()), stats.clone());
        (ctl, stats)
    }

    fn send(ctl: &TransactionController, client: &Arc<dyn ProducerClient>) {
        let flag = ctl.error_flag();
        client.produce(
            Record::new("", "payload"),
            Box::new(move |r| {
                if r.is_err() {
                    flag.raise();
                }
            }),
        );
    }

    #[tokio::test]
    async fn disabled_is_pass_through() {
        let broker = MockBroker::default();
        let client = broker.connect(ConnectOptions::default()).await.unwrap();
        let stats = Arc::new(LatencyAggregator::new());
        let mut ctl = TransactionController::new(client, None, stats);
        assert_eq!(ctl.state(), TxnState::Disabled);
        assert!(ctl.ensure_open().await);
        ctl.finalize_and_reopen().await;
        assert!(broker.log().transactions.is_empty());
    }

    #[tokio::test]
    async fn clean_window_commits_and_failed_window_aborts() {
        let broker = MockBroker::new(MockFaults {
            fail_every_nth_delivery: Some(3),
            ..Default::default()
        });
        let (mut ctl, stats) = controller(&broker).await;
        let client = ctl.client.clone();

        assert!(ctl.ensure_open().await);
        send(&ctl, &client);
        send(&ctl, &client);
        ctl.finalize_and_reopen().await;
        assert_eq!(ctl.state(), TxnState::Open);

        send(&ctl, &client); // third delivery fails
        ctl.finalize_and_reopen().await;
        ctl.close().await;
        assert_eq!(ctl.state(), TxnState::NotOpen);

        let log = broker.log();
        assert!(log.violations.is_empty(), "{:?}", log.violations);
        assert_eq!(log.committed().count(), 2);
        assert_eq!(log.aborted().count(), 1);
        assert!(log.aborted().all(|t| t.had_failure));
        assert_eq!(log.purges, 1);
        let snap = stats.drain_and_reset();
        assert_eq!((snap.committed, snap.aborted), (2, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn begin_failure_reports_not_ready() {
        let broker = MockBroker::new(MockFaults {
            fail_first_begins: 1,
            ..Default::default()
        });
        let (mut ctl, stats) = controller(&broker).await;
        assert!(!ctl.ensure_open().await);
        assert_eq!(ctl.state(), TxnState::NotOpen);
        assert!(ctl.ensure_open().await);
        assert_eq!(ctl.state(), TxnState::Open);
        assert_eq!(stats.drain_and_reset().txn_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_end_reopens_once() {
        let broker = MockBroker::new(MockFaults {
            fail_next_ends: 1,
            ..Default::default()
        });
        let (mut ctl, stats) = controller(&broker).await;
        assert!(ctl.ensure_open().await);
        ctl.finalize_and_reopen().await;
        assert_eq!(ctl.state(), TxnState::Open);

        let log = broker.log();
        assert_eq!(log.transactions.len(), 2);
        assert!(log.transactions[0].end_failed);
        assert!(log.violations.is_empty(), "{:?}", log.violations);
        assert_eq!(stats.drain_and_reset().txn_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn abortable_commit_is_aborted_and_reopened() {
        let broker = MockBroker::new(MockFaults {
            abortable_commit_failures: 1,
            ..Default::default()
        });
        let (mut ctl, stats) = controller(&broker).await;
        let client = ctl.client.clone();
        assert!(ctl.ensure_open().await);
        send(&ctl, &client);
        ctl.finalize_and_reopen().await;
        assert_eq!(ctl.state(), TxnState::Open);

        broker.set_faults(MockFaults {
            abortable_commit_failures: 1,
            ..Default::default()
        });
        send(&ctl, &client);
        ctl.close().await;
        assert_eq!(ctl.state(), TxnState::NotOpen);

        let log = broker.log();
        assert!(log.violations.is_empty(), "{:?}", log.violations);
        assert_eq!(log.transactions.len(), 2);
        assert!(log.transactions.iter().all(|t| t.end_failed));
        assert_eq!(log.aborted().count(), 2);
        let snap = stats.drain_and_reset();
        assert_eq!((snap.committed, snap.aborted, snap.txn_failures), (0, 2, 2));
    }

    #[tokio::test(start_paused = true)]
    async fn commit_is_counted_when_only_the_next_begin_fails() {
        let broker = MockBroker::default();
        let (mut ctl, stats) = controller(&broker).await;
        assert!(ctl.ensure_open().await);
        broker.set_faults(MockFaults {
            fail_first_begins: 2,
            ..Default::default()
        });
        ctl.finalize_and_reopen().await;
        assert_eq!(ctl.state(), TxnState::NotOpen);
        assert!(ctl.ensure_open().await);

        let log = broker.log();
        assert!(log.violations.is_empty(), "{:?}", log.violations);
        assert_eq!(log.committed().count(), 1);
        let snap = stats.drain_and_reset();
        assert_eq!((snap.committed, snap.txn_failures), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_end_and_failed_reopen_leave_not_open() {
        let broker = MockBroker::default();
        let (mut ctl, _stats) = controller(&broker).await;
        assert!(ctl.ensure_open().await);
        broker.set_faults(MockFaults {
            fail_next_ends: 1,
            fail_first_begins: u64::MAX,
            ..Default::default()
        });
        ctl.finalize_and_reopen().await;
        assert_eq!(ctl.state(), TxnState::NotOpen);
    }
}
