//! File configuration and its resolution into an immutable [`EngineConfig`].
//!
//! Everything in the file is optional; defaults match the long-standing
//! behaviour of the tool (100 ms interval, 100 msg/s, 100 B/s, 100-byte
//! messages, one worker, three partitions, replication factor one).

use crate::client::config::parse_backend;
use crate::client::{Backend, ConnectOptions};
use crate::payload::quickstart::QuickstartKind;
use crate::payload::{Codec, PayloadError, PayloadMode};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_INTERVAL_MS: u64 = 100;
pub const DEFAULT_RATE_PER_SECOND: u64 = 100;
pub const DEFAULT_DATA_RATE_BPS: u64 = 100;
pub const DEFAULT_MESSAGE_BYTES: usize = 100;
pub const DEFAULT_PARTITIONS: i32 = 3;
pub const DEFAULT_REPLICATION_FACTOR: i16 = 1;
pub const DEFAULT_IDLE_SLEEP: Duration = Duration::from_micros(300);

/// Upper bound on producer buffer memory when sizing the queue by message size.
const BUFFER_BUDGET_BYTES: usize = 250 << 20;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parse: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("bootstrap-servers is required")]
    MissingBrokers,
    #[error("topic.name is required")]
    MissingTopic,
    #[error("unknown backend {0:?}; expected kafka or mock")]
    UnknownBackend(String),
    #[error("unknown produce mode {0:?}; expected interval, rate-per-second or data-rate-limit-bps")]
    UnknownProduceMode(String),
    #[error("unknown message mode {0:?}; expected quickstart or message-bytes")]
    UnknownMessageMode(String),
    #[error("unknown compression type {0:?}")]
    UnknownCompression(String),
    #[error("jitter must be in [0, 1), got {0}")]
    InvalidJitter(f64),
    #[error("{field} must be {reason}")]
    InvalidValue {
        field: &'static str,
        reason: &'static str,
    },
    #[error(transparent)]
    Payload(#[from] PayloadError),
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FileConfig {
    #[serde(alias = "bootstrap-server")]
    pub bootstrap_servers: Option<String>,
    pub backend: Option<String>,
    pub producer: ProducerSection,
    pub topic: TopicSection,
    pub datagen: DatagenSection,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ProducerSection {
    pub client_id: Option<String>,
    pub transactional_id: Option<String>,
    pub compression_type: Option<String>,
    pub linger_ms: Option<u64>,
    pub max_message_bytes: Option<u64>,
    /// Raw client properties, applied last.
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct TopicSection {
    pub name: Option<String>,
    pub partitions: Option<i32>,
    pub replication_factor: Option<i16>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DatagenSection {
    pub workers: Option<usize>,
    pub jitter: Option<f64>,
    pub idle_sleep_us: Option<u64>,
    pub produce: ProduceSection,
    pub message: MessageSection,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ProduceSection {
    pub mode: Option<String>,
    pub interval: Option<u64>,
    pub rate_per_second: Option<u64>,
    pub data_rate_limit_bps: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct MessageSection {
    pub mode: Option<String>,
    pub quickstart: Option<String>,
    pub message_bytes: Option<usize>,
    pub codec: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacingMode {
    /// Nominal value is milliseconds between records.
    Interval,
    /// Nominal value is records per one-second window.
    RatePerSecond,
    /// Nominal value is key+value bytes per one-second window.
    DataRateLimitBps,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PacingConfig {
    pub mode: PacingMode,
    pub nominal: u64,
    pub jitter: f64,
    /// Sleep while a data-rate window is exhausted.
    pub idle_sleep: Duration,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TopicConfig {
    pub name: String,
    pub partitions: i32,
    pub replication_factor: i16,
}

/// Fully resolved settings. Built once at startup and never mutated.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub backend: Backend,
    pub bootstrap_servers: String,
    pub topic: TopicConfig,
    pub workers: usize,
    pub pacing: PacingConfig,
    pub transactional_id_prefix: Option<String>,
    pub payload: PayloadMode,
    pub codec: Codec,
    pub client_id: String,
    pub client_params: BTreeMap<String, String>,
}

impl EngineConfig {
    pub fn transactions_enabled(&self) -> bool {
        self.transactional_id_prefix.is_some()
    }

    /// Transactional identity of worker `index` (1-based).
    pub fn transactional_id(&self, index: usize) -> Option<String> {
        self.transactional_id_prefix
            .as_ref()
            .map(|prefix| format!("{prefix}-{index}"))
    }

    pub fn connect_options(&self, index: usize) -> ConnectOptions {
        ConnectOptions {
            bootstrap_servers: self.bootstrap_servers.clone(),
            topic: self.topic.name.clone(),
            client_id: format!("{}-{index}", self.client_id),
            transactional_id: self.transactional_id(index),
            params: self.client_params.clone(),
        }
    }

    /// Options for admin/provisioning connections.
    pub fn admin_options(&self) -> ConnectOptions {
        ConnectOptions {
            bootstrap_servers: self.bootstrap_servers.clone(),
            topic: self.topic.name.clone(),
            client_id: format!("{}-admin", self.client_id),
            transactional_id: None,
            params: self.client_params.clone(),
        }
    }
}

/// Values given on the command line take precedence over the file.
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    pub bootstrap_servers: Option<String>,
    pub topic: Option<String>,
    pub workers: Option<usize>,
    pub backend: Option<String>,
    pub properties: BTreeMap<String, String>,
}

impl FileConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn apply(&mut self, o: Overrides) {
        if o.bootstrap_servers.is_some() {
            self.bootstrap_servers = o.bootstrap_servers;
        }
        if o.topic.is_some() {
            self.topic.name = o.topic;
        }
        if o.workers.is_some() {
            self.datagen.workers = o.workers;
        }
        if o.backend.is_some() {
            self.backend = o.backend;
        }
        self.producer.properties.extend(o.properties);
    }

    pub fn resolve(self) -> Result<EngineConfig, ConfigError> {
        let bootstrap_servers = self
            .bootstrap_servers
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::MissingBrokers)?;
        let topic_name = self
            .topic
            .name
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::MissingTopic)?;

        let backend = match self.backend.as_deref() {
            None => Backend::Kafka,
            Some(s) => parse_backend(s).ok_or_else(|| ConfigError::UnknownBackend(s.into()))?,
        };

        let topic = TopicConfig {
            name: topic_name,
            partitions: self.topic.partitions.unwrap_or(DEFAULT_PARTITIONS),
            replication_factor: self
                .topic
                .replication_factor
                .unwrap_or(DEFAULT_REPLICATION_FACTOR),
        };
        if topic.partitions < 1 {
            return Err(ConfigError::InvalidValue {
                field: "topic.partitions",
                reason: "at least 1",
            });
        }
        if topic.replication_factor < 1 {
            return Err(ConfigError::InvalidValue {
                field: "topic.replication-factor",
                reason: "at least 1",
            });
        }

        let d = self.datagen;
        let workers = d.workers.unwrap_or(1);
        if workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "datagen.workers",
                reason: "at least 1",
            });
        }
        let jitter = d.jitter.unwrap_or(0.0);
        if !(0.0..1.0).contains(&jitter) {
            return Err(ConfigError::InvalidJitter(jitter));
        }

        let (mode, nominal) = match d.produce.mode.as_deref().unwrap_or("interval") {
            "interval" => (
                PacingMode::Interval,
                d.produce.interval.unwrap_or(DEFAULT_INTERVAL_MS),
            ),
            "rate-per-second" => (
                PacingMode::RatePerSecond,
                d.produce.rate_per_second.unwrap_or(DEFAULT_RATE_PER_SECOND),
            ),
            "data-rate-limit-bps" => (
                PacingMode::DataRateLimitBps,
                d.produce.data_rate_limit_bps.unwrap_or(DEFAULT_DATA_RATE_BPS),
            ),
            other => return Err(ConfigError::UnknownProduceMode(other.into())),
        };
        if nominal == 0 {
            return Err(ConfigError::InvalidValue {
                field: "datagen.produce",
                reason: "a positive interval, rate or byte limit",
            });
        }
        let pacing = PacingConfig {
            mode,
            nominal,
            jitter,
            idle_sleep: d
                .idle_sleep_us
                .map(Duration::from_micros)
                .unwrap_or(DEFAULT_IDLE_SLEEP),
        };

        let codec = match d.message.codec.as_deref() {
            None => Codec::Json,
            Some(s) => s.parse::<Codec>()?,
        };
        let payload = match d.message.mode.as_deref().unwrap_or("message-bytes") {
            "message-bytes" => {
                let n = d.message.message_bytes.unwrap_or(DEFAULT_MESSAGE_BYTES);
                if n == 0 {
                    return Err(ConfigError::InvalidValue {
                        field: "datagen.message.message-bytes",
                        reason: "at least 1",
                    });
                }
                PayloadMode::MessageBytes(n)
            }
            "quickstart" => {
                let name = d.message.quickstart.as_deref().unwrap_or("user");
                let kind = name
                    .parse::<QuickstartKind>()
                    .map_err(PayloadError::UnknownQuickstart)?;
                PayloadMode::Quickstart(kind)
            }
            other => return Err(ConfigError::UnknownMessageMode(other.into())),
        };

        let p = self.producer;
        let mut client_params = BTreeMap::new();
        if let Some(c) = p.compression_type.as_deref() {
            let codec = match c {
                "uncompressed" | "none" => "none",
                "zstd" | "lz4" | "gzip" | "snappy" => c,
                other => return Err(ConfigError::UnknownCompression(other.into())),
            };
            client_params.insert("compression.type".to_string(), codec.to_string());
        }
        if let Some(ms) = p.linger_ms {
            client_params.insert("linger.ms".to_string(), ms.to_string());
        }
        if let Some(bytes) = p.max_message_bytes {
            client_params.insert("message.max.bytes".to_string(), bytes.to_string());
        }
        if let PayloadMode::MessageBytes(n) = payload {
            let records = BUFFER_BUDGET_BYTES / n.max(1) + 1;
            client_params.insert(
                "queue.buffering.max.messages".to_string(),
                records.min(i32::MAX as usize).to_string(),
            );
        }
        client_params.extend(p.properties);

        Ok(EngineConfig {
            backend,
            bootstrap_servers,
            topic,
            workers,
            pacing,
            transactional_id_prefix: p.transactional_id.filter(|s| !s.is_empty()),
            payload,
            codec,
            client_id: p
                .client_id
                .unwrap_or_else(|| format!("mq-datagen-{}", uuid::Uuid::new_v4())),
            client_params,
        })
    }
}
