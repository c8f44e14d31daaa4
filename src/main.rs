use anyhow::{Context, Result};
use clap::Parser;
use mq_datagen::client::config::parse_connect_kv;
use mq_datagen::client::{ClientBuilder, ClientFactory};
use mq_datagen::config::{FileConfig, Overrides};
use mq_datagen::engine::Engine;
use mq_datagen::logging;
use mq_datagen::metrics::reporter;
use mq_datagen::output::OutputWriter;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "mq-datagen")]
#[command(about = "Paced, optionally transactional, synthetic load generator for a message broker")]
struct Cli {
    /// YAML configuration file
    #[arg(long, short = 'c')]
    config: Option<String>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Seconds between latency snapshots
    #[arg(long, default_value = "1")]
    snapshot_interval: u64,

    /// Also write snapshots as CSV to this path ("-" for stdout)
    #[arg(long)]
    csv: Option<String>,

    /// Broker addresses, comma separated
    #[arg(long)]
    bootstrap_servers: Option<String>,

    /// Destination topic
    #[arg(long)]
    topic: Option<String>,

    /// Number of producer workers
    #[arg(long)]
    workers: Option<usize>,

    /// Client backend (kafka, mock)
    #[arg(long)]
    backend: Option<String>,

    /// Extra client property as key=value (repeatable)
    #[arg(long = "property", short = 'X')]
    properties: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level)?;

    if let Err(e) = run(cli).await {
        error!(error = %format!("{e:#}"), "fatal");
        return Err(e);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let mut file = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    file.apply(Overrides {
        bootstrap_servers: cli.bootstrap_servers,
        topic: cli.topic,
        workers: cli.workers,
        backend: cli.backend,
        properties: parse_connect_kv(&cli.properties),
    });
    let config = file.resolve().context("invalid configuration")?;
    info!(
        backend = %config.backend,
        bootstrap_servers = %config.bootstrap_servers,
        topic = %config.topic.name,
        "mq-datagen starting"
    );

    let builder = ClientBuilder::new(config.backend);
    let provisioner = builder.provisioner(&config.admin_options())?;
    let factory: Arc<dyn ClientFactory> = Arc::new(builder);
    let engine = Engine::new(config, factory, provisioner);

    let output = match &cli.csv {
        Some(target) => Some(OutputWriter::open(target).await?),
        None => None,
    };
    let report_stop = CancellationToken::new();
    let reporter = reporter::spawn(
        engine.stats(),
        Duration::from_secs(cli.snapshot_interval.max(1)),
        output,
        report_stop.clone(),
    );

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl+C received, settling open transactions");
                shutdown.cancel();
            }
        });
    }

    let result = engine.run(shutdown).await;
    report_stop.cancel();
    if let Err(e) = reporter.await {
        error!(error = %e, "reporter task failed");
    }
    result?;
    Ok(())
}
