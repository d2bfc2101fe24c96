//! Architectural Contract Test: Cost Avoidance
//!
//! This test verifies that:
//! 1. A record whose DNS value already matches the resolved IP costs one
//!    resolution and one lookup, never a provider call
//! 2. A new public IP is pushed even while DNS still serves the old one
//! 3. An unchanged public IP never reaches the provider
//! 4. Providers that publish something else (proxies) skip the lookup
//! 5. Failed records are retried even when DNS looks right
//! 6. Stored state survives a restart and keeps avoiding calls

mod common;

use common::*;
use ddns_core::state::FileStateStore;
use ddns_core::traits::StateStore;
use ddns_core::{CycleOutcome, DdnsEngine, EngineConfig, RecordStatus, SkipReason};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_published_ip_skips_provider() {
    let fetcher = ControlledFetcher::new(Some(ip("1.2.3.4")));
    let lookup = MockLookup::publishing(&[ip("1.2.3.4")]);
    let provider = MockDnsProvider::new(Reply::Echo);
    let store = MockStateStore::new();
    let www = record("www", &provider);
    let id = www.id().clone();
    store.seed_up_to_date(&id, ip("1.2.3.4")).await;

    let (engine, _events) = DdnsEngine::new(
        vec![www],
        fetcher.clone(),
        lookup.clone(),
        store.clone(),
        test_config(),
    )
    .unwrap();

    let outcome = engine.cycle_once(&id).await.unwrap();

    assert_eq!(outcome, CycleOutcome::Skipped(SkipReason::Published));
    assert_eq!(lookup.calls(), 1);
    assert_eq!(fetcher.calls(), 1, "Every cycle resolves the public IP");
    assert_eq!(provider.calls(), 0, "Provider must not be called");
    assert_eq!(store.writes(), 0, "A skipped cycle writes nothing");

    let state = store.state(&id).await;
    assert_eq!(state.status, RecordStatus::UpToDate);
    assert_eq!(state.history.len(), 1);
}

#[tokio::test]
async fn test_new_public_ip_is_pushed_while_dns_serves_old_one() {
    let fetcher = ControlledFetcher::new(Some(ip("9.9.9.9")));
    let lookup = MockLookup::publishing(&[ip("1.2.3.4")]);
    let provider = MockDnsProvider::new(Reply::Echo);
    let store = MockStateStore::new();
    let www = record("www", &provider);
    let id = www.id().clone();
    store.seed_up_to_date(&id, ip("1.2.3.4")).await;

    let (engine, _events) = DdnsEngine::new(
        vec![www],
        fetcher.clone(),
        lookup.clone(),
        store.clone(),
        test_config(),
    )
    .unwrap();

    let outcome = engine.cycle_once(&id).await.unwrap();

    assert_eq!(outcome, CycleOutcome::Updated(ip("9.9.9.9")));
    assert_eq!(provider.requested(), vec![ip("9.9.9.9")]);
    assert_eq!(store.state(&id).await.ip, Some(ip("9.9.9.9")));

    // Once DNS catches up the record is quiet again
    lookup.publish(&[ip("9.9.9.9")]);
    let outcome = engine.cycle_once(&id).await.unwrap();
    assert_eq!(outcome, CycleOutcome::Skipped(SkipReason::Published));
    assert_eq!(provider.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_polling_detects_ip_change_with_lookup_enabled() {
    let fetcher = ControlledFetcher::new(Some(ip("1.2.3.4")));
    let lookup = MockLookup::publishing(&[ip("1.2.3.4")]);
    let provider = MockDnsProvider::new(Reply::Echo);
    let store = MockStateStore::new();
    let www = record("www", &provider);
    let id = www.id().clone();
    store.seed_up_to_date(&id, ip("1.2.3.4")).await;

    let (engine, _events) = DdnsEngine::new(
        vec![www],
        fetcher.clone(),
        lookup,
        store.clone(),
        EngineConfig {
            period_secs: 60,
            ..test_config()
        },
    )
    .unwrap();

    engine.run().unwrap();
    tokio::time::sleep(Duration::from_secs(150)).await;
    assert_eq!(provider.calls(), 0, "Published IP needs no update");

    fetcher.set_v4(Some(ip("9.9.9.9")));
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(provider.requested(), vec![ip("9.9.9.9")]);
    assert_eq!(store.state(&id).await.ip, Some(ip("9.9.9.9")));

    engine.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_stale_dns_value_leads_to_update() {
    // DNS answers 5.6.7.8 while the store says 1.2.3.4; the resolver
    // agrees with DNS and the provider confirms it
    let fetcher = ControlledFetcher::new(Some(ip("5.6.7.8")));
    let lookup = MockLookup::publishing(&[ip("5.6.7.8")]);
    let provider = MockDnsProvider::new(Reply::Echo);
    let store = MockStateStore::new();
    let www = record("www", &provider);
    let id = www.id().clone();
    store.seed_up_to_date(&id, ip("1.2.3.4")).await;

    let (engine, mut events) = DdnsEngine::new(
        vec![www],
        fetcher.clone(),
        lookup,
        store.clone(),
        test_config(),
    )
    .unwrap();

    let outcome = engine.cycle_once(&id).await.unwrap();

    assert_eq!(outcome, CycleOutcome::Updated(ip("5.6.7.8")));
    assert_eq!(provider.requested(), vec![ip("5.6.7.8")]);

    let state = store.state(&id).await;
    assert_eq!(state.status, RecordStatus::UpToDate);
    assert_eq!(state.ip, Some(ip("5.6.7.8")));
    assert_eq!(state.history.len(), 2);
    assert!(state.history[1].is_success());
    assert_eq!(state.history[1].ip, ip("5.6.7.8"));

    let mut succeeded = false;
    while let Ok(event) = events.try_recv() {
        if let ddns_core::EngineEvent::UpdateSucceeded {
            new_ip,
            previous_ip,
            ..
        } = event
        {
            assert_eq!(new_ip, ip("5.6.7.8"));
            assert_eq!(previous_ip, Some(ip("1.2.3.4")));
            succeeded = true;
        }
    }
    assert!(succeeded, "UpdateSucceeded should be emitted");
}

#[tokio::test]
async fn test_unchanged_ip_is_a_no_op() {
    let fetcher = ControlledFetcher::new(Some(ip("1.2.3.4")));
    let lookup = MockLookup::new();
    let provider = MockDnsProvider::new(Reply::Echo);
    let store = MockStateStore::new();
    let www = record("www", &provider).with_dns_lookup(false);
    let id = www.id().clone();
    store.seed_up_to_date(&id, ip("1.2.3.4")).await;

    let (engine, _events) = DdnsEngine::new(
        vec![www],
        fetcher.clone(),
        lookup.clone(),
        store.clone(),
        test_config(),
    )
    .unwrap();

    for _ in 0..3 {
        let outcome = engine.cycle_once(&id).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Skipped(SkipReason::Unchanged));
    }

    assert_eq!(lookup.calls(), 0, "Lookup disabled for this record");
    assert_eq!(fetcher.calls(), 3);
    assert_eq!(provider.calls(), 0);
    assert_eq!(store.writes(), 0);
}

#[tokio::test]
async fn test_proxied_provider_never_uses_lookup() {
    let fetcher = ControlledFetcher::new(Some(ip("5.6.7.8")));
    // A proxy publishes its own address, never ours
    let lookup = MockLookup::publishing(&[ip("1.2.3.4")]);
    let provider = MockDnsProvider::proxied(Reply::Echo);
    let store = MockStateStore::new();
    let www = record("www", &provider);
    let id = www.id().clone();
    store.seed_up_to_date(&id, ip("1.2.3.4")).await;

    let (engine, _events) = DdnsEngine::new(
        vec![www],
        fetcher.clone(),
        lookup.clone(),
        store.clone(),
        test_config(),
    )
    .unwrap();

    let outcome = engine.cycle_once(&id).await.unwrap();

    assert_eq!(outcome, CycleOutcome::Updated(ip("5.6.7.8")));
    assert_eq!(lookup.calls(), 0);
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn test_wildcard_host_never_uses_lookup() {
    let fetcher = ControlledFetcher::new(Some(ip("1.2.3.4")));
    let lookup = MockLookup::publishing(&[ip("1.2.3.4")]);
    let provider = MockDnsProvider::new(Reply::Echo);
    let store = MockStateStore::new();
    let wildcard = record("*", &provider);
    let id = wildcard.id().clone();
    store.seed_up_to_date(&id, ip("1.2.3.4")).await;

    let (engine, _events) = DdnsEngine::new(
        vec![wildcard],
        fetcher.clone(),
        lookup.clone(),
        store.clone(),
        test_config(),
    )
    .unwrap();

    let outcome = engine.cycle_once(&id).await.unwrap();

    assert_eq!(outcome, CycleOutcome::Skipped(SkipReason::Unchanged));
    assert_eq!(lookup.calls(), 0);
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn test_failed_record_ignores_matching_dns() {
    let fetcher = ControlledFetcher::new(Some(ip("1.2.3.4")));
    let lookup = MockLookup::publishing(&[ip("1.2.3.4")]);
    let provider = MockDnsProvider::new(Reply::Echo);
    let store = MockStateStore::new();
    let www = record("www", &provider);
    let id = www.id().clone();
    store.seed_failed(&id, ip("1.2.3.4")).await;

    let (engine, _events) = DdnsEngine::new(
        vec![www],
        fetcher.clone(),
        lookup.clone(),
        store.clone(),
        test_config(),
    )
    .unwrap();

    let outcome = engine.cycle_once(&id).await.unwrap();

    assert_eq!(outcome, CycleOutcome::Updated(ip("1.2.3.4")));
    assert_eq!(lookup.calls(), 0, "Only up-to-date records may short-circuit");
    assert_eq!(provider.calls(), 1);
    assert_eq!(store.state(&id).await.status, RecordStatus::UpToDate);
}

#[tokio::test]
async fn test_lookup_failure_falls_through_to_resolution() {
    let fetcher = ControlledFetcher::new(Some(ip("1.2.3.4")));
    let lookup = MockLookup::new();
    lookup.set_failing(true);
    let provider = MockDnsProvider::new(Reply::Echo);
    let store = MockStateStore::new();
    let www = record("www", &provider);
    let id = www.id().clone();
    store.seed_up_to_date(&id, ip("1.2.3.4")).await;

    let (engine, _events) = DdnsEngine::new(
        vec![www],
        fetcher.clone(),
        lookup.clone(),
        store.clone(),
        test_config(),
    )
    .unwrap();

    let outcome = engine.cycle_once(&id).await.unwrap();

    assert_eq!(outcome, CycleOutcome::Skipped(SkipReason::Unchanged));
    assert_eq!(lookup.calls(), 1);
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let provider = MockDnsProvider::new(Reply::Echo);
    let lookup = MockLookup::publishing(&[ip("1.2.3.4")]);

    // First run: nothing stored, the provider is called once
    {
        let store = Arc::new(FileStateStore::new(&path, 10).await.unwrap());
        let www = record("www", &provider);
        let id = www.id().clone();
        let (engine, _events) = DdnsEngine::new(
            vec![www],
            ControlledFetcher::new(Some(ip("1.2.3.4"))),
            lookup.clone(),
            store.clone(),
            test_config(),
        )
        .unwrap();

        let outcome = engine.cycle_once(&id).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Updated(ip("1.2.3.4")));
        engine.stop(Duration::from_secs(1)).await;
    }
    assert_eq!(provider.calls(), 1);

    // Second run: stored state plus matching DNS means no work
    let store = Arc::new(FileStateStore::new(&path, 10).await.unwrap());
    let fetcher = ControlledFetcher::new(Some(ip("1.2.3.4")));
    let www = record("www", &provider);
    let id = www.id().clone();
    let (engine, _events) = DdnsEngine::new(
        vec![www],
        fetcher.clone(),
        lookup,
        store.clone(),
        test_config(),
    )
    .unwrap();

    let outcome = engine.cycle_once(&id).await.unwrap();
    assert_eq!(outcome, CycleOutcome::Skipped(SkipReason::Published));
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(provider.calls(), 1, "Restart must not cause another update");

    let state = store.select(&id).await.unwrap();
    assert_eq!(state.ip, Some(ip("1.2.3.4")));
    assert_eq!(state.history.len(), 1);
}
