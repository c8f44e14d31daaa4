//! Kafka adapter (feature `transport-kafka`), using rdkafka's FutureProducer.
//!
//! librdkafka's transactional calls block, so they run on the blocking pool.
//! Delivery futures are awaited on spawned tasks which then invoke the
//! completion callback; `flush` waits for librdkafka and for those tasks.

use super::{
    ClientError, ConnectOptions, DeliveryCallback, InFlight, ProducerClient, TopicProvisioner,
    TxnOutcome,
};
use crate::payload::Record;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer, PurgeConfig};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const TRANSACTION_TIMEOUT: Duration = Duration::from_secs(5);
const OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

fn client_config(opts: &ConnectOptions) -> ClientConfig {
    let mut cfg = ClientConfig::new();
    cfg.set("bootstrap.servers", &opts.bootstrap_servers);
    cfg.set("client.id", &opts.client_id);
    match &opts.transactional_id {
        Some(id) => {
            cfg.set("transactional.id", id);
            cfg.set(
                "transaction.timeout.ms",
                TRANSACTION_TIMEOUT.as_millis().to_string(),
            );
            cfg.set("acks", "all");
        }
        None => {
            cfg.set("acks", "0");
            cfg.set("enable.idempotence", "false");
        }
    }
    for (k, v) in &opts.params {
        cfg.set(k, v);
    }
    cfg
}

async fn blocking<F>(f: F, wrap: fn(KafkaError) -> ClientError) -> Result<(), ClientError>
where
    F: FnOnce() -> KafkaResult<()> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(wrap(e)),
        Err(e) => Err(ClientError::Other(e.to_string())),
    }
}

fn txn_error(e: KafkaError) -> ClientError {
    match &e {
        KafkaError::Transaction(rd) if rd.txn_requires_abort() => {
            ClientError::TxnAbortable(e.to_string())
        }
        _ => ClientError::Transaction(e.to_string()),
    }
}

pub async fn connect(opts: ConnectOptions) -> Result<Arc<dyn ProducerClient>, ClientError> {
    let producer: FutureProducer = client_config(&opts)
        .create()
        .map_err(|e| ClientError::Connect(e.to_string()))?;
    if let Some(id) = &opts.transactional_id {
        let p = producer.clone();
        blocking(
            move || p.init_transactions(Timeout::After(OPERATION_TIMEOUT)),
            |e| ClientError::Connect(e.to_string()),
        )
        .await?;
        info!(transactional_id = %id, "transactions initialized");
    }
    Ok(Arc::new(KafkaClient {
        producer,
        topic: opts.topic,
        inflight: Arc::new(InFlight::default()),
    }))
}

pub struct KafkaClient {
    producer: FutureProducer,
    topic: String,
    inflight: Arc<InFlight>,
}

#[async_trait::async_trait]
impl ProducerClient for KafkaClient {
    fn produce(&self, record: Record, on_complete: DeliveryCallback) {
        let mut fr = FutureRecord::<[u8], [u8]>::to(&self.topic)
            .payload(&record.value[..])
            .timestamp(record.timestamp.timestamp_millis());
        if !record.key.is_empty() {
            fr = fr.key(&record.key[..]);
        }
        self.inflight.start();
        match self.producer.send_result(fr) {
            Ok(delivery) => {
                let inflight = self.inflight.clone();
                tokio::spawn(async move {
                    let result = match delivery.await {
                        Ok(Ok(_)) => Ok(()),
                        Ok(Err((e, _))) => Err(ClientError::Produce(e.to_string())),
                        // librdkafka dropped the record, e.g. after a purge
                        Err(_) => Err(ClientError::Purged),
                    };
                    on_complete(result);
                    inflight.finish();
                });
            }
            Err((e, _)) => {
                on_complete(Err(ClientError::Produce(e.to_string())));
                self.inflight.finish();
            }
        }
    }

    async fn flush(&self) -> Result<(), ClientError> {
        let p = self.producer.clone();
        blocking(
            move || p.flush(Timeout::After(OPERATION_TIMEOUT)),
            |e| ClientError::Flush(e.to_string()),
        )
        .await?;
        self.inflight.wait_idle().await;
        Ok(())
    }

    async fn begin_transaction(&self) -> Result<(), ClientError> {
        let p = self.producer.clone();
        blocking(move || p.begin_transaction(), txn_error).await
    }

    async fn end_transaction(&self, outcome: TxnOutcome) -> Result<(), ClientError> {
        let p = self.producer.clone();
        let timeout = Timeout::After(OPERATION_TIMEOUT);
        match outcome {
            TxnOutcome::Commit => {
                blocking(move || p.commit_transaction(timeout), txn_error).await
            }
            TxnOutcome::Abort => {
                blocking(move || p.abort_transaction(timeout), txn_error).await
            }
        }
    }

    async fn abort_buffered_records(&self) -> Result<(), ClientError> {
        self.producer.purge(PurgeConfig::default().queue());
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ClientError> {
        self.flush().await
    }
}

pub struct KafkaProvisioner {
    admin: AdminClient<DefaultClientContext>,
}

impl KafkaProvisioner {
    pub fn new(opts: &ConnectOptions) -> Result<Self, ClientError> {
        let mut cfg = ClientConfig::new();
        cfg.set("bootstrap.servers", &opts.bootstrap_servers);
        // security settings travel with the pass-through properties
        for (k, v) in opts.params.iter().filter(|(k, _)| {
            k.starts_with("security.") || k.starts_with("sasl.") || k.starts_with("ssl.")
        }) {
            cfg.set(k, v);
        }
        let admin = cfg
            .create()
            .map_err(|e| ClientError::Connect(e.to_string()))?;
        Ok(Self { admin })
    }
}

#[async_trait::async_trait]
impl TopicProvisioner for KafkaProvisioner {
    async fn ensure(
        &self,
        name: &str,
        partitions: i32,
        replication_factor: i16,
    ) -> Result<(), ClientError> {
        let topic = NewTopic::new(
            name,
            partitions,
            TopicReplication::Fixed(i32::from(replication_factor)),
        );
        let opts = AdminOptions::new().operation_timeout(Some(Duration::from_secs(10)));
        let results = self
            .admin
            .create_topics(&[topic], &opts)
            .await
            .map_err(|e| ClientError::Topic(e.to_string()))?;
        for result in results {
            match result {
                Ok(created) => {
                    info!(topic = %created, partitions, replication_factor, "topic created");
                    // give the controller a moment to propagate metadata
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Err((existing, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    info!(topic = %existing, "topic already exists");
                }
                Err((topic, code)) => {
                    return Err(ClientError::Topic(format!("create {topic}: {code}")));
                }
            }
        }
        Ok(())
    }
}
