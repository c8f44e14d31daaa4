//! Broker client abstraction: producer trait, topic provisioning, builder factory.

pub mod config;
#[cfg(feature = "transport-kafka")]
pub mod kafka;
#[cfg(any(test, feature = "transport-mock"))]
pub mod mock;

use crate::payload::Record;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    Kafka,
    Mock,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Kafka => f.write_str("kafka"),
            Backend::Mock => f.write_str("mock"),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConnectOptions {
    pub bootstrap_servers: String,
    pub topic: String,
    pub client_id: String,
    /// Set only for transactional workers (`prefix-index`).
    pub transactional_id: Option<String>,
    /// Backend-specific properties passed through untouched.
    pub params: BTreeMap<String, String>,
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum ClientError {
    #[error("connect: {0}")]
    Connect(String),
    #[error("produce: {0}")]
    Produce(String),
    #[error("flush: {0}")]
    Flush(String),
    #[error("transaction: {0}")]
    Transaction(String),
    /// The transaction can no longer commit; it must be aborted before the
    /// producer accepts another begin.
    #[error("transaction must be aborted: {0}")]
    TxnAbortable(String),
    /// The previous transaction ended but the next begin failed.
    #[error("begin after end: {0}")]
    Reopen(String),
    #[error("topic: {0}")]
    Topic(String),
    #[error("record purged before delivery")]
    Purged,
    #[error("other: {0}")]
    Other(String),
}

impl ClientError {
    /// The open transaction is stuck until an abort clears it.
    pub fn requires_abort(&self) -> bool {
        matches!(self, Self::TxnAbortable(_))
    }
}

/// How the current transaction ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxnOutcome {
    Commit,
    Abort,
}

/// Invoked once per record with the delivery result, possibly on another task.
pub type DeliveryCallback = Box<dyn FnOnce(Result<(), ClientError>) + Send + 'static>;

#[async_trait::async_trait]
pub trait ProducerClient: Send + Sync {
    /// Enqueue a record. Never blocks; failures surface through `on_complete`.
    fn produce(&self, record: Record, on_complete: DeliveryCallback);
    /// Wait until every record issued so far has completed and its callback ran.
    async fn flush(&self) -> Result<(), ClientError>;
    async fn begin_transaction(&self) -> Result<(), ClientError>;
    async fn end_transaction(&self, outcome: TxnOutcome) -> Result<(), ClientError>;
    /// End the open transaction and immediately begin the next one. A failed
    /// begin after a successful end comes back as [`ClientError::Reopen`].
    async fn end_and_begin_transaction(&self, outcome: TxnOutcome) -> Result<(), ClientError> {
        self.end_transaction(outcome).await?;
        self.begin_transaction()
            .await
            .map_err(|e| ClientError::Reopen(e.to_string()))
    }
    /// Drop records that were buffered but not yet sent.
    async fn abort_buffered_records(&self) -> Result<(), ClientError>;
    async fn shutdown(&self) -> Result<(), ClientError> {
        Ok(())
    }
}

#[async_trait::async_trait]
pub trait TopicProvisioner: Send + Sync {
    /// Create the topic when absent. Idempotent.
    async fn ensure(
        &self,
        name: &str,
        partitions: i32,
        replication_factor: i16,
    ) -> Result<(), ClientError>;
}

#[async_trait::async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(&self, opts: ConnectOptions) -> Result<Arc<dyn ProducerClient>, ClientError>;
}

/// Tracks records whose completion callback has not run yet.
#[derive(Default)]
pub struct InFlight {
    pending: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    pub fn start(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    pub fn finish(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Factory for the compiled-in backends.
pub struct ClientBuilder {
    backend: Backend,
    #[cfg(any(test, feature = "transport-mock"))]
    mock: mock::MockBroker,
}

impl ClientBuilder {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            #[cfg(any(test, feature = "transport-mock"))]
            mock: mock::MockBroker::default(),
        }
    }

    /// Provisioner for the configured backend, using `opts` for the admin connection.
    pub fn provisioner(
        &self,
        opts: &ConnectOptions,
    ) -> Result<Arc<dyn TopicProvisioner>, ClientError> {
        match self.backend {
            Backend::Kafka => {
                #[cfg(feature = "transport-kafka")]
                {
                    return Ok(Arc::new(kafka::KafkaProvisioner::new(opts)?));
                }
                #[cfg(not(feature = "transport-kafka"))]
                {
                    let _ = opts;
                    Err(ClientError::Connect("kafka feature disabled".into()))
                }
            }
            Backend::Mock => {
                #[cfg(any(test, feature = "transport-mock"))]
                {
                    let _ = opts;
                    return Ok(Arc::new(self.mock.clone()));
                }
                #[cfg(not(any(test, feature = "transport-mock")))]
                {
                    let _ = opts;
                    Err(ClientError::Connect("mock feature disabled".into()))
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl ClientFactory for ClientBuilder {
    async fn connect(&self, opts: ConnectOptions) -> Result<Arc<dyn ProducerClient>, ClientError> {
        match self.backend {
            Backend::Kafka => {
                #[cfg(feature = "transport-kafka")]
                {
                    return crate::client::kafka::connect(opts).await;
                }
                #[cfg(not(feature = "transport-kafka"))]
                {
                    let _ = opts;
                    Err(ClientError::Connect("kafka feature disabled".into()))
                }
            }
            Backend::Mock => {
                #[cfg(any(test, feature = "transport-mock"))]
                {
                    return self.mock.connect(opts).await;
                }
                #[cfg(not(any(test, feature = "transport-mock")))]
                {
                    let _ = opts;
                    Err(ClientError::Connect("mock feature disabled".into()))
                }
            }
        }
    }
}
