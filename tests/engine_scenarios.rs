#![cfg(feature = "transport-mock")]
use mq_datagen::client::TxnOutcome;
use mq_datagen::client::mock::{MockBroker, MockFaults, MockLog};
use mq_datagen::config::FileConfig;
use mq_datagen::engine::Engine;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn yaml(txn: bool, datagen: &str) -> String {
    let producer = if txn {
        "producer:\n  client-id: it\n  transactional-id: dg\n"
    } else {
        "producer:\n  client-id: it\n"
    };
    format!("bootstrap-servers: mock:9092\nbackend: mock\n{producer}topic:\n  name: load\ndatagen:\n{datagen}")
}

/// Run the engine against `broker` for `for_ms` of (paused) time, then shut down.
async fn run_for(broker: &MockBroker, config: &str, for_ms: u64) -> (MockLog, Instant) {
    let cfg = FileConfig::from_yaml(config).unwrap().resolve().unwrap();
    let engine = Engine::new(cfg, Arc::new(broker.clone()), Arc::new(broker.clone()));
    let shutdown = CancellationToken::new();
    let start = Instant::now();
    let run = tokio::spawn(engine.run(shutdown.clone()));
    tokio::time::sleep(Duration::from_millis(for_ms)).await;
    shutdown.cancel();
    run.await.unwrap().unwrap();
    (broker.log(), start)
}

fn per_second(log: &MockLog, start: Instant) -> BTreeMap<u64, usize> {
    let mut buckets = BTreeMap::new();
    for s in &log.sends {
        *buckets.entry(s.at.duration_since(start).as_secs()).or_default() += 1;
    }
    buckets
}

fn assert_outcomes_follow_failures(log: &MockLog) {
    assert!(log.violations.is_empty(), "{:?}", log.violations);
    for t in &log.transactions {
        match t.outcome {
            Some(TxnOutcome::Commit) => assert!(!t.had_failure, "committed a failed window: {t:?}"),
            Some(TxnOutcome::Abort) => assert!(t.had_failure, "aborted a clean window: {t:?}"),
            None => panic!("transaction left open: {t:?}"),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn interval_sends_are_spaced() {
    let broker = MockBroker::default();
    let cfg = yaml(
        false,
        "  produce:\n    mode: interval\n    interval: 100\n  message:\n    message-bytes: 32\n",
    );
    let (log, _) = run_for(&broker, &cfg, 1_050).await;
    assert!(log.sends.len() >= 10, "only {} sends", log.sends.len());
    for pair in log.sends.windows(2) {
        assert!(pair[1].at.duration_since(pair[0].at) >= Duration::from_millis(100));
    }
    assert!(log.transactions.is_empty());
    assert!(log.sends.iter().all(|s| s.bytes == 32));
}

#[tokio::test(start_paused = true)]
async fn interval_with_transactions_commits_each_record() {
    let broker = MockBroker::default();
    let cfg = yaml(true, "  produce:\n    mode: interval\n    interval: 100\n");
    let (log, _) = run_for(&broker, &cfg, 550).await;
    assert!(!log.sends.is_empty());
    assert_eq!(log.transactions.len(), log.sends.len());
    assert!(log.transactions.iter().all(|t| t.sends.len() == 1));
    assert_eq!(log.committed().count(), log.transactions.len());
    assert_outcomes_follow_failures(&log);
}

#[tokio::test(start_paused = true)]
async fn rate_per_second_fills_each_window() {
    let broker = MockBroker::default();
    let cfg = yaml(false, "  produce:\n    mode: rate-per-second\n    rate-per-second: 50\n");
    let (log, start) = run_for(&broker, &cfg, 4_500).await;
    let buckets = per_second(&log, start);
    assert_eq!(buckets.len(), 5, "{buckets:?}");
    for (second, n) in &buckets {
        assert!((45..=55).contains(n), "second {second}: {n} sends");
    }
    assert!((200..=300).contains(&log.sends.len()), "{} sends", log.sends.len());
}

#[tokio::test(start_paused = true)]
async fn rate_per_second_jitter_varies_windows() {
    let broker = MockBroker::default();
    let cfg = yaml(
        false,
        "  jitter: 0.5\n  produce:\n    mode: rate-per-second\n    rate-per-second: 100\n",
    );
    let (log, start) = run_for(&broker, &cfg, 5_500).await;
    let counts: Vec<usize> = per_second(&log, start).into_values().collect();
    assert!(counts.iter().all(|n| (50..=150).contains(n)), "{counts:?}");
    assert!(counts.windows(2).any(|w| w[0] != w[1]), "{counts:?}");
}

#[tokio::test(start_paused = true)]
async fn failed_windows_abort_and_clean_windows_commit() {
    let broker = MockBroker::new(MockFaults {
        fail_every_nth_delivery: Some(3),
        ..Default::default()
    });
    let cfg = yaml(true, "  produce:\n    mode: rate-per-second\n    rate-per-second: 2\n");
    let (log, _) = run_for(&broker, &cfg, 3_500).await;

    assert_outcomes_follow_failures(&log);
    assert!(log.committed().count() >= 1);
    assert!(log.aborted().count() >= 1);
    assert_eq!(log.purges as usize, log.aborted().count());
    assert!(log.sends.iter().all(|s| s.txn.is_some()));
}

#[tokio::test(start_paused = true)]
async fn data_rate_limit_gates_each_window() {
    let broker = MockBroker::default();
    let cfg = yaml(
        true,
        "  produce:\n    mode: data-rate-limit-bps\n    data-rate-limit-bps: 1000\n  message:\n    message-bytes: 100\n",
    );
    let (log, start) = run_for(&broker, &cfg, 4_500).await;
    let buckets = per_second(&log, start);
    assert_eq!(buckets.len(), 5, "{buckets:?}");
    assert!(buckets.values().all(|n| *n == 10), "{buckets:?}");
    assert!(log.transactions.iter().filter(|t| !t.sends.is_empty()).all(|t| t.sends.len() == 10));
    assert_outcomes_follow_failures(&log);
}

#[tokio::test(start_paused = true)]
async fn interval_failures_abort_their_own_record() {
    let broker = MockBroker::new(MockFaults {
        fail_every_nth_delivery: Some(3),
        ..Default::default()
    });
    let cfg = yaml(true, "  produce:\n    mode: interval\n    interval: 100\n");
    let (log, _) = run_for(&broker, &cfg, 1_050).await;

    assert_outcomes_follow_failures(&log);
    let failed = log.sends.iter().filter(|s| s.failed).count();
    assert!(failed >= 1);
    assert_eq!(log.aborted().count(), failed);
    assert_eq!(log.committed().count(), log.sends.len() - failed);
    assert_eq!(log.purges as usize, failed);
}

#[tokio::test(start_paused = true)]
async fn data_rate_failures_abort_the_window() {
    let broker = MockBroker::new(MockFaults {
        fail_every_nth_delivery: Some(25),
        ..Default::default()
    });
    let cfg = yaml(
        true,
        "  produce:\n    mode: data-rate-limit-bps\n    data-rate-limit-bps: 1000\n  message:\n    message-bytes: 100\n",
    );
    let (log, _) = run_for(&broker, &cfg, 4_500).await;

    assert_outcomes_follow_failures(&log);
    assert!(log.sends.iter().all(|s| s.txn.is_some()));
    assert!(log.aborted().count() >= 1);
    assert!(log.committed().count() >= 1);
    assert_eq!(log.purges as usize, log.aborted().count());
}

#[tokio::test(start_paused = true)]
async fn abortable_commits_are_aborted_and_the_run_continues() {
    let broker = MockBroker::new(MockFaults {
        abortable_commit_failures: 2,
        ..Default::default()
    });
    let cfg = yaml(true, "  produce:\n    mode: rate-per-second\n    rate-per-second: 10\n");
    let (log, _) = run_for(&broker, &cfg, 3_500).await;

    assert!(log.violations.is_empty(), "{:?}", log.violations);
    assert!(log.sends.iter().all(|s| s.txn.is_some()));
    assert!(log.transactions.iter().all(|t| t.outcome.is_some()));
    let stuck: Vec<_> = log.transactions.iter().filter(|t| t.end_failed).collect();
    assert_eq!(stuck.len(), 2);
    assert!(stuck.iter().all(|t| t.outcome == Some(TxnOutcome::Abort)));
    assert!(log.committed().count() >= 1);
}

#[tokio::test(start_paused = true)]
async fn begin_failures_never_leak_sends_outside_a_transaction() {
    let broker = MockBroker::new(MockFaults {
        fail_first_begins: 3,
        ..Default::default()
    });
    let cfg = yaml(true, "  produce:\n    mode: rate-per-second\n    rate-per-second: 10\n");
    let (log, _) = run_for(&broker, &cfg, 2_500).await;
    assert!(!log.sends.is_empty());
    assert!(log.sends.iter().all(|s| s.txn.is_some()));
    assert_outcomes_follow_failures(&log);
}

#[tokio::test(start_paused = true)]
async fn shutdown_settles_the_open_window() {
    let broker = MockBroker::new(MockFaults {
        delivery_delay: Duration::from_millis(2),
        ..Default::default()
    });
    let cfg = yaml(
        true,
        "  workers: 3\n  produce:\n    mode: rate-per-second\n    rate-per-second: 20\n",
    );
    let (log, _) = run_for(&broker, &cfg, 1_500).await;
    assert_eq!(log.shutdowns, 3);
    assert_outcomes_follow_failures(&log);
    for id in ["it-1", "it-2", "it-3"] {
        assert!(log.sends_by(id).count() >= 20, "{id} sent too little");
    }
    // every send is covered by a finished transaction
    assert!(
        log.sends
            .iter()
            .all(|s| s.txn.is_some_and(|i| log.transactions[i].outcome.is_some()))
    );
}
