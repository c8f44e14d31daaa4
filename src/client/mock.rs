//! In-memory broker (feature `transport-mock`).
//!
//! Completion callbacks run on a separate task fed through a flume channel,
//! like a real client's delivery thread. Every send, transaction boundary and
//! outcome lands in a [`MockLog`], and misuse of the transactional API is
//! recorded as a violation instead of panicking so tests can assert on it.

use super::{
    ClientError, ClientFactory, ConnectOptions, DeliveryCallback, InFlight, ProducerClient,
    TopicProvisioner, TxnOutcome,
};
use crate::payload::Record;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Fault injection knobs.
#[derive(Clone, Debug, Default)]
pub struct MockFaults {
    /// Every Nth delivery (1-based, counted across the broker) reports an error.
    pub fail_every_nth_delivery: Option<u64>,
    /// The first N `begin_transaction` calls fail.
    pub fail_first_begins: u64,
    /// The next N transaction ends fail.
    pub fail_next_ends: u64,
    /// The next N commits fail with an abortable error: the transaction stays
    /// open and only an abort is accepted until then.
    pub abortable_commit_failures: u64,
    /// Delay before each completion callback runs.
    pub delivery_delay: Duration,
    pub refuse_connect: bool,
    pub refuse_topic: bool,
}

#[derive(Clone, Debug)]
pub struct SentRecord {
    pub seq: u64,
    pub client_id: String,
    pub at: Instant,
    pub bytes: usize,
    pub failed: bool,
    /// Index into [`MockLog::transactions`].
    pub txn: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct TxnRecord {
    pub client_id: String,
    pub transactional_id: String,
    pub sends: Vec<u64>,
    pub had_failure: bool,
    pub outcome: Option<TxnOutcome>,
    pub end_failed: bool,
}

#[derive(Clone, Debug, Default)]
pub struct MockLog {
    pub connects: Vec<ConnectOptions>,
    pub topics: Vec<(String, i32, i16)>,
    pub sends: Vec<SentRecord>,
    pub transactions: Vec<TxnRecord>,
    pub violations: Vec<String>,
    pub flushes: u64,
    pub purges: u64,
    pub shutdowns: u64,
}

impl MockLog {
    pub fn committed(&self) -> impl Iterator<Item = &TxnRecord> {
        self.transactions
            .iter()
            .filter(|t| t.outcome == Some(TxnOutcome::Commit))
    }

    pub fn aborted(&self) -> impl Iterator<Item = &TxnRecord> {
        self.transactions
            .iter()
            .filter(|t| t.outcome == Some(TxnOutcome::Abort))
    }

    pub fn sends_by<'a>(&'a self, client_id: &'a str) -> impl Iterator<Item = &'a SentRecord> {
        self.sends.iter().filter(move |s| s.client_id == client_id)
    }
}

#[derive(Default)]
struct BrokerState {
    log: MockLog,
    faults: MockFaults,
    deliveries: u64,
    begins: u64,
}

type Shared = Arc<Mutex<BrokerState>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to one in-memory broker; clones share state.
#[derive(Clone, Default)]
pub struct MockBroker {
    state: Shared,
}

impl MockBroker {
    pub fn new(faults: MockFaults) -> Self {
        let broker = Self::default();
        lock(&broker.state).faults = faults;
        broker
    }

    pub fn set_faults(&self, faults: MockFaults) {
        lock(&self.state).faults = faults;
    }

    pub fn log(&self) -> MockLog {
        lock(&self.state).log.clone()
    }
}

#[async_trait::async_trait]
impl ClientFactory for MockBroker {
    async fn connect(&self, opts: ConnectOptions) -> Result<Arc<dyn ProducerClient>, ClientError> {
        let delay = {
            let mut st = lock(&self.state);
            if st.faults.refuse_connect {
                return Err(ClientError::Connect(format!(
                    "mock broker refused {}",
                    opts.client_id
                )));
            }
            st.log.connects.push(opts.clone());
            st.faults.delivery_delay
        };
        Ok(Arc::new(MockClient::spawn(self.state.clone(), opts, delay)))
    }
}

#[async_trait::async_trait]
impl TopicProvisioner for MockBroker {
    async fn ensure(
        &self,
        name: &str,
        partitions: i32,
        replication_factor: i16,
    ) -> Result<(), ClientError> {
        let mut st = lock(&self.state);
        if st.faults.refuse_topic {
            return Err(ClientError::Topic(format!("mock broker refused topic {name}")));
        }
        if !st.log.topics.iter().any(|(t, _, _)| t == name) {
            st.log
                .topics
                .push((name.to_string(), partitions, replication_factor));
        }
        Ok(())
    }
}

struct Pending {
    seq: u64,
    result: Result<(), ClientError>,
    callback: DeliveryCallback,
}

pub struct MockClient {
    client_id: String,
    transactional_id: Option<String>,
    broker: Shared,
    open_txn: Mutex<Option<usize>>,
    needs_abort: AtomicBool,
    purged_below: Arc<AtomicU64>,
    inflight: Arc<InFlight>,
    tx: flume::Sender<Pending>,
    poller: JoinHandle<()>,
}

impl MockClient {
    fn spawn(broker: Shared, opts: ConnectOptions, delay: Duration) -> Self {
        let (tx, rx) = flume::unbounded::<Pending>();
        let inflight = Arc::new(InFlight::default());
        let purged_below = Arc::new(AtomicU64::new(0));
        let poller = {
            let inflight = inflight.clone();
            let purged_below = purged_below.clone();
            tokio::spawn(async move {
                while let Ok(p) = rx.recv_async().await {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    let result = if p.seq < purged_below.load(Ordering::SeqCst) {
                        Err(ClientError::Purged)
                    } else {
                        p.result
                    };
                    (p.callback)(result);
                    inflight.finish();
                }
            })
        };
        Self {
            client_id: opts.client_id,
            transactional_id: opts.transactional_id,
            broker,
            open_txn: Mutex::new(None),
            needs_abort: AtomicBool::new(false),
            purged_below,
            inflight,
            tx,
            poller,
        }
    }

    fn violation(&self, st: &mut BrokerState, what: impl std::fmt::Display) {
        st.log.violations.push(format!("{}: {what}", self.client_id));
    }
}

#[async_trait::async_trait]
impl ProducerClient for MockClient {
    fn produce(&self, record: Record, on_complete: DeliveryCallback) {
        let open = *lock(&self.open_txn);
        let (seq, failed) = {
            let mut st = lock(&self.broker);
            st.deliveries += 1;
            let seq = st.deliveries;
            let failed = st
                .faults
                .fail_every_nth_delivery
                .is_some_and(|n| n > 0 && seq % n == 0);
            if self.transactional_id.is_some() && open.is_none() {
                self.violation(&mut st, format!("produce #{seq} outside a transaction"));
            }
            if let Some(idx) = open {
                let txn = &mut st.log.transactions[idx];
                txn.sends.push(seq);
                txn.had_failure |= failed;
            }
            st.log.sends.push(SentRecord {
                seq,
                client_id: self.client_id.clone(),
                at: Instant::now(),
                bytes: record.size(),
                failed,
                txn: open,
            });
            (seq, failed)
        };

        let result = if failed {
            Err(ClientError::Produce(format!("injected delivery failure #{seq}")))
        } else {
            Ok(())
        };
        self.inflight.start();
        if let Err(flume::SendError(p)) = self.tx.send(Pending {
            seq,
            result,
            callback: on_complete,
        }) {
            (p.callback)(Err(ClientError::Other("client closed".into())));
            self.inflight.finish();
        }
    }

    async fn flush(&self) -> Result<(), ClientError> {
        self.inflight.wait_idle().await;
        lock(&self.broker).log.flushes += 1;
        Ok(())
    }

    async fn begin_transaction(&self) -> Result<(), ClientError> {
        let Some(transactional_id) = &self.transactional_id else {
            return Err(ClientError::Transaction("client is not transactional".into()));
        };
        if self.needs_abort.load(Ordering::SeqCst) {
            return Err(ClientError::TxnAbortable(
                "transaction must be aborted first".into(),
            ));
        }
        let mut open = lock(&self.open_txn);
        let mut st = lock(&self.broker);
        if open.is_some() {
            self.violation(&mut st, "begin while a transaction is open");
            return Err(ClientError::Transaction("transaction already open".into()));
        }
        st.begins += 1;
        if st.begins <= st.faults.fail_first_begins {
            return Err(ClientError::Transaction(format!(
                "injected begin failure #{}",
                st.begins
            )));
        }
        st.log.transactions.push(TxnRecord {
            client_id: self.client_id.clone(),
            transactional_id: transactional_id.clone(),
            sends: Vec::new(),
            had_failure: false,
            outcome: None,
            end_failed: false,
        });
        *open = Some(st.log.transactions.len() - 1);
        Ok(())
    }

    async fn end_transaction(&self, outcome: TxnOutcome) -> Result<(), ClientError> {
        let mut open = lock(&self.open_txn);
        let mut st = lock(&self.broker);
        let Some(idx) = *open else {
            self.violation(&mut st, "end without an open transaction");
            return Err(ClientError::Transaction("no open transaction".into()));
        };
        let pending = self.inflight.pending();
        if pending > 0 {
            self.violation(&mut st, format!("end with {pending} records in flight"));
        }
        if outcome == TxnOutcome::Commit {
            if self.needs_abort.load(Ordering::SeqCst) {
                return Err(ClientError::TxnAbortable("commit refused".into()));
            }
            if st.faults.abortable_commit_failures > 0 {
                st.faults.abortable_commit_failures -= 1;
                st.log.transactions[idx].end_failed = true;
                self.needs_abort.store(true, Ordering::SeqCst);
                return Err(ClientError::TxnAbortable("injected commit failure".into()));
            }
        } else {
            self.needs_abort.store(false, Ordering::SeqCst);
        }
        *open = None;
        if st.faults.fail_next_ends > 0 {
            st.faults.fail_next_ends -= 1;
            st.log.transactions[idx].end_failed = true;
            return Err(ClientError::Transaction("injected end failure".into()));
        }
        if outcome == TxnOutcome::Commit && st.log.transactions[idx].had_failure {
            self.violation(&mut st, "commit of a transaction with failed records");
        }
        st.log.transactions[idx].outcome = Some(outcome);
        Ok(())
    }

    async fn abort_buffered_records(&self) -> Result<(), ClientError> {
        let mut st = lock(&self.broker);
        self.purged_below.store(st.deliveries + 1, Ordering::SeqCst);
        st.log.purges += 1;
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ClientError> {
        self.inflight.wait_idle().await;
        self.poller.abort();
        lock(&self.broker).log.shutdowns += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn txn_opts(id: &str) -> ConnectOptions {
        ConnectOptions {
            client_id: id.to_string(),
            transactional_id: Some(format!("{id}-txn")),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn callbacks_run_before_flush_returns() {
        let broker = MockBroker::new(MockFaults {
            fail_every_nth_delivery: Some(2),
            delivery_delay: Duration::from_millis(1),
            ..Default::default()
        });
        let client = broker.connect(ConnectOptions::default()).await.unwrap();
        let errors = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let errors = errors.clone();
            client.produce(
                Record::new("k", "v"),
                Box::new(move |r| {
                    if r.is_err() {
                        errors.fetch_add(1, Ordering::SeqCst);
                    }
                }),
            );
        }
        client.flush().await.unwrap();
        assert_eq!(errors.load(Ordering::SeqCst), 2);
        assert_eq!(broker.log().sends.len(), 4);
    }

    #[tokio::test]
    async fn produce_outside_transaction_is_flagged() {
        let broker = MockBroker::default();
        let client = broker.connect(txn_opts("w1")).await.unwrap();
        client.produce(Record::empty(), Box::new(|_| {}));
        client.flush().await.unwrap();
        assert_eq!(broker.log().violations.len(), 1);
    }

    #[tokio::test]
    async fn begin_failures_are_injected_then_clear() {
        let broker = MockBroker::new(MockFaults {
            fail_first_begins: 2,
            ..Default::default()
        });
        let client = broker.connect(txn_opts("w1")).await.unwrap();
        assert!(client.begin_transaction().await.is_err());
        assert!(client.begin_transaction().await.is_err());
        client.begin_transaction().await.unwrap();
        client.produce(Record::new("", "abc"), Box::new(|_| {}));
        client.flush().await.unwrap();
        client.end_and_begin_transaction(TxnOutcome::Commit).await.unwrap();
        client.end_transaction(TxnOutcome::Abort).await.unwrap();

        let log = broker.log();
        assert!(log.violations.is_empty(), "{:?}", log.violations);
        assert_eq!(log.committed().count(), 1);
        assert_eq!(log.aborted().count(), 1);
        assert_eq!(log.transactions[0].sends, vec![1]);
    }

    #[tokio::test]
    async fn abortable_commit_holds_until_abort() {
        let broker = MockBroker::new(MockFaults {
            abortable_commit_failures: 1,
            ..Default::default()
        });
        let client = broker.connect(txn_opts("w1")).await.unwrap();
        client.begin_transaction().await.unwrap();
        let err = client.end_transaction(TxnOutcome::Commit).await.unwrap_err();
        assert!(err.requires_abort());
        assert!(client.begin_transaction().await.unwrap_err().requires_abort());
        client.end_transaction(TxnOutcome::Abort).await.unwrap();
        client.begin_transaction().await.unwrap();

        let log = broker.log();
        assert!(log.violations.is_empty(), "{:?}", log.violations);
        assert_eq!(log.transactions.len(), 2);
        assert_eq!(log.transactions[0].outcome, Some(TxnOutcome::Abort));
        assert!(log.transactions[0].end_failed);
    }

    #[tokio::test]
    async fn failed_begin_after_end_is_a_reopen_error() {
        let broker = MockBroker::default();
        let client = broker.connect(txn_opts("w1")).await.unwrap();
        client.begin_transaction().await.unwrap();
        broker.set_faults(MockFaults {
            fail_first_begins: u64::MAX,
            ..Default::default()
        });
        let err = client.end_and_begin_transaction(TxnOutcome::Commit).await.unwrap_err();
        assert!(matches!(err, ClientError::Reopen(_)));
        assert_eq!(broker.log().committed().count(), 1);
    }

    #[tokio::test]
    async fn purged_records_report_purged() {
        let broker = MockBroker::new(MockFaults {
            delivery_delay: Duration::from_millis(5),
            ..Default::default()
        });
        let client = broker.connect(ConnectOptions::default()).await.unwrap();
        let purged = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let purged = purged.clone();
            client.produce(
                Record::empty(),
                Box::new(move |r| {
                    if matches!(r, Err(ClientError::Purged)) {
                        purged.fetch_add(1, Ordering::SeqCst);
                    }
                }),
            );
        }
        client.abort_buffered_records().await.unwrap();
        client.flush().await.unwrap();
        assert_eq!(purged.load(Ordering::SeqCst), 3);
    }
}
