//! Shared latency accounting and its periodic reporter.

pub mod latency;
pub mod reporter;

pub use latency::{LatencyAggregator, LatencySnapshot};
