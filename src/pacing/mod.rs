//! Pacing strategies: when to send, how many, and where windows close.
//!
//! Each strategy loops over a [`Worker`] until the shutdown token fires. Window
//! bookkeeping lives in small plain structs so it can be tested without a
//! runtime.

mod data_rate;
mod interval;
mod rate;

pub use data_rate::DataRateLimitPacer;
pub use interval::IntervalPacer;
pub use rate::RatePerSecondPacer;

use crate::config::{PacingConfig, PacingMode};
use crate::worker::Worker;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const WINDOW: Duration = Duration::from_secs(1);

#[async_trait::async_trait]
pub trait Pacer: Send {
    fn name(&self) -> &'static str;
    /// Returns once `shutdown` is cancelled. Whatever transaction is still
    /// open is left for the worker to settle.
    async fn run(&mut self, worker: &mut Worker, shutdown: &CancellationToken);
}

pub fn build_pacer(cfg: &PacingConfig) -> Box<dyn Pacer> {
    match cfg.mode {
        PacingMode::Interval => Box::new(IntervalPacer::new(cfg.nominal, cfg.jitter)),
        PacingMode::RatePerSecond => Box::new(RatePerSecondPacer::new(cfg.nominal, cfg.jitter)),
        PacingMode::DataRateLimitBps => Box::new(DataRateLimitPacer::new(
            cfg.nominal,
            cfg.jitter,
            cfg.idle_sleep,
        )),
    }
}

/// Sleep unless cancelled first. Returns false on cancellation.
pub(crate) async fn pause(duration: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Record count for one rate-per-second window, timed from its own start.
#[derive(Debug, Clone, Copy)]
pub struct RateWindow {
    target: u64,
    sent: u64,
    started: Instant,
}

impl RateWindow {
    pub fn start(target: u64, now: Instant) -> Self {
        Self {
            target: target.max(1),
            sent: 0,
            started: now,
        }
    }

    pub fn target(&self) -> u64 {
        self.target
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn is_full(&self) -> bool {
        self.sent >= self.target
    }

    pub fn record(&mut self) {
        self.sent += 1;
    }

    /// Time left to pad the window out to one second.
    pub fn remaining(&self, now: Instant) -> Duration {
        WINDOW.saturating_sub(now.saturating_duration_since(self.started))
    }
}

/// Byte accounting for one data-rate window. Sends are gated before they
/// happen, so a window overshoots by at most one record.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteBudget {
    budget: u64,
    bytes: u64,
    records: u64,
}

impl ByteBudget {
    pub fn new(budget: u64) -> Self {
        Self {
            budget: budget.max(1),
            bytes: 0,
            records: 0,
        }
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn allows_send(&self) -> bool {
        self.bytes < self.budget
    }

    pub fn add(&mut self, size: usize) {
        self.bytes += size as u64;
        self.records += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_window_fills_at_target() {
        let now = Instant::now();
        let mut w = RateWindow::start(3, now);
        for _ in 0..3 {
            assert!(!w.is_full());
            w.record();
        }
        assert!(w.is_full());
        assert_eq!(w.sent(), 3);
    }

    #[test]
    fn rate_window_pads_to_one_second() {
        let now = Instant::now();
        let w = RateWindow::start(10, now);
        assert_eq!(w.remaining(now), WINDOW);
        assert_eq!(w.remaining(now + Duration::from_millis(300)), Duration::from_millis(700));
        // a slow window is not padded and not shortened either
        assert_eq!(w.remaining(now + Duration::from_millis(1_400)), Duration::ZERO);
    }

    #[test]
    fn rate_window_target_is_at_least_one() {
        assert_eq!(RateWindow::start(0, Instant::now()).target(), 1);
    }

    #[test]
    fn byte_budget_gates_before_send() {
        let mut b = ByteBudget::new(250);
        let mut sent = 0;
        while b.allows_send() {
            b.add(100);
            sent += 1;
        }
        // 0 and 100 and 200 are all below 250; the third send overshoots
        assert_eq!(sent, 3);
        assert_eq!(b.bytes(), 300);
        assert!(b.bytes() - b.budget() < 100);
    }

    #[test]
    fn byte_budget_exact_multiple() {
        let mut b = ByteBudget::new(1000);
        while b.allows_send() {
            b.add(100);
        }
        assert_eq!(b.records(), 10);
        assert_eq!(b.bytes(), 1000);
    }

    #[test]
    fn default_budget_allows_nothing() {
        assert!(!ByteBudget::default().allows_send());
    }
}
