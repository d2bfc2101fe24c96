//! Architectural Contract Test: Retry Architecture
//!
//! This test verifies that:
//! 1. A failed provider call is NOT retried inside the cycle
//! 2. The next scheduled tick is the retry
//! 3. An unresolvable public IP leaves state untouched
//! 4. The cooldown suppresses provider calls after a recent attempt
//!
//! ## Why This Matters
//!
//! Providers rate-limit aggressively. Retry loops inside a cycle would
//! multiply calls during exactly the outages where they hurt most.

mod common;

use common::*;
use ddns_core::{CycleOutcome, DdnsEngine, EngineConfig, EngineEvent, ErrorCategory, RecordStatus, SkipReason};
use std::time::Duration;

#[tokio::test]
async fn test_failure_is_not_retried_within_cycle() {
    let fetcher = ControlledFetcher::new(Some(ip("1.2.3.4")));
    let provider = MockDnsProvider::new(Reply::Network);
    let www = record("www", &provider);
    let id = www.id().clone();

    let (engine, _events) = DdnsEngine::new(
        vec![www],
        fetcher,
        MockLookup::new(),
        MockStateStore::new(),
        test_config(),
    )
    .unwrap();

    let outcome = engine.cycle_once(&id).await.unwrap();

    assert_eq!(outcome, CycleOutcome::Failed(ErrorCategory::Network));
    assert_eq!(provider.calls(), 1, "Exactly one attempt per cycle");
}

#[tokio::test(start_paused = true)]
async fn test_next_tick_is_the_retry() {
    let fetcher = ControlledFetcher::new(Some(ip("1.2.3.4")));
    let provider = MockDnsProvider::new(Reply::Network);
    let store = MockStateStore::new();
    let www = record("www", &provider);
    let id = www.id().clone();

    let config = EngineConfig {
        period_secs: 60,
        ..test_config()
    };
    let (engine, _events) = DdnsEngine::new(
        vec![www],
        fetcher,
        MockLookup::new(),
        store.clone(),
        config,
    )
    .unwrap();

    engine.run().unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(provider.calls(), 1);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(provider.calls(), 1, "No retry before the next tick");

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(provider.calls(), 2, "Next tick retries the failed record");

    let state = store.state(&id).await;
    assert_eq!(state.status, RecordStatus::Fail);
    assert_eq!(state.history.len(), 2);

    provider.set_reply(Reply::Echo);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(provider.calls(), 3);
    assert_eq!(store.state(&id).await.status, RecordStatus::UpToDate);

    engine.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_resolution_failure_leaves_state_untouched() {
    let fetcher = ControlledFetcher::new(None);
    let provider = MockDnsProvider::new(Reply::Echo);
    let store = MockStateStore::new();
    let www = record("www", &provider);
    let id = www.id().clone();
    store.seed_up_to_date(&id, ip("1.2.3.4")).await;

    let (engine, mut events) = DdnsEngine::new(
        vec![www],
        fetcher,
        MockLookup::new(),
        store.clone(),
        test_config(),
    )
    .unwrap();

    let outcome = engine.cycle_once(&id).await.unwrap();

    assert_eq!(outcome, CycleOutcome::Unresolved);
    assert_eq!(provider.calls(), 0);
    assert_eq!(store.writes(), 0, "No public IP means nothing to record");

    let state = store.state(&id).await;
    assert_eq!(state.status, RecordStatus::UpToDate);
    assert_eq!(state.history.len(), 1);
    assert_eq!(engine.status(&id), Some(RecordStatus::UpToDate));

    let event = events.try_recv().unwrap();
    assert!(matches!(event, EngineEvent::ResolveFailed { record, .. } if record == id));
}

#[tokio::test]
async fn test_cooldown_suppresses_provider_calls() {
    let fetcher = ControlledFetcher::new(Some(ip("5.6.7.8")));
    let provider = MockDnsProvider::new(Reply::Echo);
    let store = MockStateStore::new();
    let www = record("www", &provider).with_dns_lookup(false);
    let id = www.id().clone();
    store.seed_up_to_date(&id, ip("1.2.3.4")).await;

    let config = EngineConfig {
        cooldown_secs: 300,
        ..test_config()
    };
    let (engine, _events) = DdnsEngine::new(
        vec![www],
        fetcher,
        MockLookup::new(),
        store.clone(),
        config,
    )
    .unwrap();

    let outcome = engine.cycle_once(&id).await.unwrap();

    assert_eq!(outcome, CycleOutcome::Skipped(SkipReason::CoolingDown));
    assert_eq!(provider.calls(), 0);
    assert_eq!(store.state(&id).await.ip, Some(ip("1.2.3.4")));
}

#[tokio::test]
async fn test_cooldown_does_not_apply_to_new_records() {
    let fetcher = ControlledFetcher::new(Some(ip("5.6.7.8")));
    let provider = MockDnsProvider::new(Reply::Echo);
    let www = record("www", &provider);
    let id = www.id().clone();

    let config = EngineConfig {
        cooldown_secs: 300,
        ..test_config()
    };
    let (engine, _events) = DdnsEngine::new(
        vec![www],
        fetcher,
        MockLookup::new(),
        MockStateStore::new(),
        config,
    )
    .unwrap();

    let outcome = engine.cycle_once(&id).await.unwrap();
    assert_eq!(outcome, CycleOutcome::Updated(ip("5.6.7.8")));
}
