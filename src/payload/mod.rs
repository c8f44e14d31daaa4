//! Record construction for the producer loop.

pub mod quickstart;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use quickstart::{Address, Book, Car, Contact, Job, Movie, Person, QuickstartKind};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use tracing::error;

/// Key/value unit handed to the broker client.
#[derive(Debug, Clone)]
pub struct Record {
    pub key: Bytes,
    pub value: Bytes,
    pub timestamp: DateTime<Utc>,
}

impl Record {
    pub fn new(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Bytes::new(), Bytes::new())
    }

    /// Bytes counted against a data-rate budget.
    pub fn size(&self) -> usize {
        self.key.len() + self.value.len()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PayloadError {
    #[error("unknown quickstart type {0:?}; expected one of user, book, car, address, contact, movie, job")]
    UnknownQuickstart(String),
    #[error("unsupported codec {0:?}; only json is available")]
    UnsupportedCodec(String),
    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Codec {
    #[default]
    Json,
}

impl FromStr for Codec {
    type Err = PayloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Codec::Json),
            other => Err(PayloadError::UnsupportedCodec(other.to_string())),
        }
    }
}

impl Codec {
    fn encode<T: Serialize>(self, value: &T) -> Result<Vec<u8>, PayloadError> {
        match self {
            Codec::Json => Ok(serde_json::to_vec(value)?),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PayloadMode {
    /// Empty key, value of exactly this many bytes.
    MessageBytes(usize),
    Quickstart(QuickstartKind),
}

pub trait PayloadGenerator: Send + Sync {
    /// Never fails; encoding problems are logged and yield an empty record.
    fn make(&self) -> Record;
}

pub fn generator_for(mode: PayloadMode, codec: Codec) -> Arc<dyn PayloadGenerator> {
    match mode {
        PayloadMode::MessageBytes(n) => Arc::new(FixedSizeGenerator::new(n)),
        PayloadMode::Quickstart(kind) => Arc::new(QuickstartGenerator { kind, codec }),
    }
}

/// Filler records of a fixed size. The value buffer is shared across records.
pub struct FixedSizeGenerator {
    value: Bytes,
}

impl FixedSizeGenerator {
    pub fn new(size: usize) -> Self {
        Self {
            value: Bytes::from(vec![b'A'; size]),
        }
    }
}

impl PayloadGenerator for FixedSizeGenerator {
    fn make(&self) -> Record {
        Record::new(Bytes::new(), self.value.clone())
    }
}

pub struct QuickstartGenerator {
    kind: QuickstartKind,
    codec: Codec,
}

impl QuickstartGenerator {
    pub fn new(kind: QuickstartKind, codec: Codec) -> Self {
        Self { kind, codec }
    }

    fn encode_pair<K: Serialize, V: Serialize>(
        &self,
        key: &K,
        value: &V,
    ) -> Result<Record, PayloadError> {
        // keys are always plain json, the codec applies to values
        let key = serde_json::to_vec(key)?;
        let value = self.codec.encode(value)?;
        Ok(Record::new(key, value))
    }

    fn try_make(&self) -> Result<Record, PayloadError> {
        let mut rng = rand::rng();
        match self.kind {
            QuickstartKind::User => {
                let v = Person::random(&mut rng);
                self.encode_pair(&v.first_name, &v)
            }
            QuickstartKind::Book => {
                let v = Book::random(&mut rng);
                self.encode_pair(&v.genre, &v)
            }
            QuickstartKind::Car => {
                let v = Car::random(&mut rng);
                self.encode_pair(&v.brand, &v)
            }
            QuickstartKind::Address => {
                let v = Address::random(&mut rng);
                self.encode_pair(&v.country, &v)
            }
            QuickstartKind::Contact => {
                let v = Contact::random(&mut rng);
                self.encode_pair(&v.email, &v)
            }
            QuickstartKind::Movie => {
                let v = Movie::random(&mut rng);
                self.encode_pair(&v.genre, &v)
            }
            QuickstartKind::Job => {
                let v = Job::random(&mut rng);
                self.encode_pair(&v.title, &v)
            }
        }
    }
}

impl PayloadGenerator for QuickstartGenerator {
    fn make(&self) -> Record {
        match self.try_make() {
            Ok(record) => record,
            Err(e) => {
                error!(error = %e, kind = ?self.kind, "payload encode failed, sending empty record");
                Record::empty()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_size_records_have_exact_length() {
        let generator = generator_for(PayloadMode::MessageBytes(100), Codec::Json);
        let rec = generator.make();
        assert!(rec.key.is_empty());
        assert_eq!(rec.value.len(), 100);
        assert_eq!(rec.size(), 100);
        assert!(rec.value.iter().all(|b| *b == b'A'));
    }

    #[test]
    fn quickstart_user_is_keyed_by_first_name() {
        let generator = QuickstartGenerator::new(QuickstartKind::User, Codec::Json);
        let rec = generator.make();
        let value: serde_json::Value = serde_json::from_slice(&rec.value).unwrap();
        let key: String = serde_json::from_slice(&rec.key).unwrap();
        assert_eq!(value["first_name"], serde_json::Value::String(key));
        assert!(value["credit_card"]["type"].is_string());
        assert!(value["address"]["latitude"].is_f64());
    }

    #[test]
    fn every_quickstart_kind_encodes() {
        for name in ["user", "book", "car", "address", "contact", "movie", "job"] {
            let kind: QuickstartKind = name.parse().unwrap();
            let rec = QuickstartGenerator::new(kind, Codec::Json).make();
            assert!(!rec.value.is_empty(), "{name} produced an empty value");
            assert!(!rec.key.is_empty(), "{name} produced an empty key");
        }
    }

    #[test]
    fn schema_registry_codecs_are_rejected() {
        assert!(matches!("avro".parse::<Codec>(), Err(PayloadError::UnsupportedCodec(_))));
        assert!(matches!("protobuf".parse::<Codec>(), Err(PayloadError::UnsupportedCodec(_))));
        assert_eq!("JSON".parse::<Codec>().unwrap(), Codec::Json);
        assert!("spaceship".parse::<QuickstartKind>().is_err());
    }
}
