//! Startup and supervision of the worker pool.

use crate::client::{ClientError, ClientFactory, TopicProvisioner};
use crate::config::EngineConfig;
use crate::metrics::LatencyAggregator;
use crate::pacing::build_pacer;
use crate::payload::generator_for;
use crate::worker::Worker;
use futures::future::join_all;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("provision topic {topic}: {source}")]
    Provision {
        topic: String,
        #[source]
        source: ClientError,
    },
    #[error("connect worker {index}: {source}")]
    Connect {
        index: usize,
        #[source]
        source: ClientError,
    },
}

pub struct Engine {
    config: EngineConfig,
    factory: Arc<dyn ClientFactory>,
    provisioner: Arc<dyn TopicProvisioner>,
    stats: Arc<LatencyAggregator>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        factory: Arc<dyn ClientFactory>,
        provisioner: Arc<dyn TopicProvisioner>,
    ) -> Self {
        Self {
            config,
            factory,
            provisioner,
            stats: Arc::new(LatencyAggregator::new()),
        }
    }

    /// Aggregator shared by every worker; hand it to the reporter.
    pub fn stats(&self) -> Arc<LatencyAggregator> {
        self.stats.clone()
    }

    /// Provision the topic and connect every worker. Any failure here is fatal.
    pub async fn prepare(&self) -> Result<Vec<Worker>, EngineError> {
        let cfg = &self.config;
        self.provisioner
            .ensure(
                &cfg.topic.name,
                cfg.topic.partitions,
                cfg.topic.replication_factor,
            )
            .await
            .map_err(|source| EngineError::Provision {
                topic: cfg.topic.name.clone(),
                source,
            })?;

        let generator = generator_for(cfg.payload, cfg.codec);
        let mut workers = Vec::with_capacity(cfg.workers);
        for index in 1..=cfg.workers {
            let opts = cfg.connect_options(index);
            let transactional_id = opts.transactional_id.clone();
            let client = self
                .factory
                .connect(opts)
                .await
                .map_err(|source| EngineError::Connect { index, source })?;
            workers.push(Worker::new(
                index,
                client,
                transactional_id,
                generator.clone(),
                self.stats.clone(),
            ));
        }
        info!(
            workers = workers.len(),
            topic = %cfg.topic.name,
            pacing = ?cfg.pacing.mode,
            nominal = cfg.pacing.nominal,
            jitter = cfg.pacing.jitter,
            transactions = cfg.transactions_enabled(),
            "workers connected"
        );
        Ok(workers)
    }

    /// Run every worker until `shutdown` fires and all of them have settled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), EngineError> {
        let workers = self.prepare().await?;
        let handles = workers.into_iter().map(|worker| {
            let index = worker.index();
            let pacer = build_pacer(&self.config.pacing);
            (index, tokio::spawn(worker.run(pacer, shutdown.clone())))
        });
        let (indices, handles): (Vec<_>, Vec<_>) = handles.unzip();
        for (index, result) in indices.into_iter().zip(join_all(handles).await) {
            // a panicking worker takes only itself down
            if let Err(e) = result {
                error!(worker = index, error = %e, "worker task failed");
            }
        }
        info!("all workers stopped");
        Ok(())
    }
}
