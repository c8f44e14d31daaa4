pub mod client;
pub mod config;
pub mod engine;
pub mod jitter;
pub mod logging;
pub mod metrics;
pub mod output;
pub mod pacing;
pub mod payload;
pub mod txn;
pub mod worker;
