//! Architectural Contract Test: Shutdown Determinism
//!
//! This test verifies that:
//! 1. `stop` cancels in-flight provider calls and nothing is written
//! 2. Tasks that outlive the timeout are aborted and reported
//! 3. `Updating` never outlives an interrupted cycle
//! 4. The store is flushed once and `stop` is idempotent
//! 5. The report counts record tasks only

mod common;

use common::*;
use ddns_core::{DdnsEngine, EngineEvent, RecordStatus};
use std::time::Duration;
use tokio_stream::wrappers::UnboundedReceiverStream;

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_in_flight_update() {
    let fetcher = ControlledFetcher::new(Some(ip("1.2.3.4")));
    let provider = MockDnsProvider::new(Reply::Echo).with_delay(Duration::from_secs(60));
    let store = MockStateStore::new();
    let www = record("www", &provider);
    let id = www.id().clone();

    let (engine, mut events) = DdnsEngine::new(
        vec![www],
        fetcher,
        MockLookup::new(),
        store.clone(),
        test_config(),
    )
    .unwrap();

    engine.run().unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(engine.status(&id), Some(RecordStatus::Updating));

    let report = engine.stop(Duration::from_secs(5)).await;

    assert_eq!(report.completed, 1);
    assert_eq!(report.abandoned, 0);
    assert_eq!(provider.calls(), 1);
    assert_eq!(store.writes(), 0, "A cancelled cycle must not write");
    assert_eq!(engine.status(&id), Some(RecordStatus::Unset));

    let mut saw_abandoned = false;
    let mut saw_stopped = false;
    while let Ok(event) = events.try_recv() {
        match event {
            EngineEvent::CycleAbandoned { record } => {
                assert_eq!(record, id);
                saw_abandoned = true;
            }
            EngineEvent::Stopped {
                completed,
                abandoned,
            } => {
                assert_eq!((completed, abandoned), (1, 0));
                saw_stopped = true;
            }
            _ => {}
        }
    }
    assert!(saw_abandoned);
    assert!(saw_stopped);
}

#[tokio::test(start_paused = true)]
async fn test_stop_abandons_tasks_past_timeout() {
    let fetcher = ControlledFetcher::new(Some(ip("1.2.3.4")));
    let provider = MockDnsProvider::new(Reply::Echo);
    // The write itself hangs and cannot observe cancellation
    let store = MockStateStore::new().with_write_delay(Duration::from_secs(60));
    let www = record("www", &provider);
    let id = www.id().clone();

    let (engine, _events) = DdnsEngine::new(
        vec![www],
        fetcher,
        MockLookup::new(),
        store.clone(),
        test_config(),
    )
    .unwrap();

    engine.run().unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(provider.calls(), 1);

    let report = engine.stop(Duration::from_millis(100)).await;

    assert_eq!(report.completed, 0);
    assert_eq!(report.abandoned, 1);
    assert_eq!(store.writes(), 0, "Aborted write must not be committed");
    assert_ne!(
        engine.status(&id),
        Some(RecordStatus::Updating),
        "Updating must not outlive an aborted cycle"
    );
    assert_eq!(store.flushes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent() {
    let provider = MockDnsProvider::new(Reply::Echo);
    let store = MockStateStore::new();

    let (engine, _events) = DdnsEngine::new(
        vec![record("www", &provider), record("api", &provider)],
        ControlledFetcher::new(Some(ip("1.2.3.4"))),
        MockLookup::new(),
        store.clone(),
        test_config(),
    )
    .unwrap();

    engine.run().unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let first = engine.stop(Duration::from_secs(1)).await;
    assert_eq!(first.completed, 2);
    assert_eq!(first.abandoned, 0);

    let second = engine.stop(Duration::from_secs(1)).await;
    assert_eq!(second.completed, 0);
    assert_eq!(second.abandoned, 0);
    assert_eq!(store.flushes(), 1, "Store flushed exactly once");

    assert!(engine.run().is_err(), "A stopped engine cannot be restarted");
}

#[tokio::test(start_paused = true)]
async fn test_no_cycles_after_stop() {
    let provider = MockDnsProvider::new(Reply::Echo);
    let fetcher = ControlledFetcher::sequence();
    let www = record("www", &provider);
    let id = www.id().clone();

    let (engine, _events) = DdnsEngine::new(
        vec![www],
        fetcher.clone(),
        MockLookup::new(),
        MockStateStore::new(),
        ddns_core::EngineConfig {
            period_secs: 10,
            ..test_config()
        },
    )
    .unwrap();

    engine.run().unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    engine.stop(Duration::from_secs(1)).await;
    let calls = provider.calls();

    engine.trigger_now(&id).unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(provider.calls(), calls, "No work may happen after stop");
}

#[tokio::test(start_paused = true)]
async fn test_report_excludes_ip_change_watchers() {
    let provider = MockDnsProvider::new(Reply::Echo);

    let (engine, _events) = DdnsEngine::new(
        vec![record("www", &provider)],
        ControlledFetcher::new(Some(ip("1.2.3.4"))),
        MockLookup::new(),
        MockStateStore::new(),
        test_config(),
    )
    .unwrap();

    // Senders stay alive, so both watchers outlive the record task
    let (_tx_a, rx_a) = tokio::sync::mpsc::unbounded_channel();
    let (_tx_b, rx_b) = tokio::sync::mpsc::unbounded_channel();
    engine.watch_ip_changes(UnboundedReceiverStream::new(rx_a));
    engine.watch_ip_changes(UnboundedReceiverStream::new(rx_b));
    engine.run().unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let report = engine.stop(Duration::from_secs(1)).await;

    assert_eq!(report.completed, 1);
    assert_eq!(report.abandoned, 0);
}
