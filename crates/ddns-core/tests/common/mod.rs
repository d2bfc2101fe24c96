//! Test doubles and common utilities for architecture contract tests
//!
//! Every double counts its calls with atomics so tests can assert on what
//! the engine did, not only on what it returned.

#![allow(dead_code)]

use ddns_core::config::{EngineConfig, IpVersion};
use ddns_core::error::{Error, Result};
use ddns_core::state::MemoryStateStore;
use ddns_core::traits::{
    DnsLookup, DnsProvider, IpOrigin, ProviderDescription, PublicIpFetcher, ResolvedIp, StateStore,
};
use ddns_core::{Record, RecordId, RecordState, StateUpdate};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

/// Engine settings for tests: long period, no cooldown, small channel
pub fn test_config() -> EngineConfig {
    EngineConfig {
        period_secs: 3600,
        cooldown_secs: 0,
        event_channel_capacity: 100,
        ..EngineConfig::default()
    }
}

/// A v4 record under example.com bound to `provider`
pub fn record(host: &str, provider: &Arc<MockDnsProvider>) -> Record {
    record_with_version(host, IpVersion::V4, provider)
}

pub fn record_with_version(host: &str, version: IpVersion, provider: &Arc<MockDnsProvider>) -> Record {
    let provider: Arc<dyn DnsProvider> = provider.clone();
    Record::new("example.com", host, version, provider).unwrap()
}

/// A fetcher whose answers the test controls
///
/// With `sequence()`, every call yields a fresh address so every cycle
/// reaches the provider.
pub struct ControlledFetcher {
    v4: Mutex<Option<IpAddr>>,
    v6: Mutex<Option<IpAddr>>,
    sequence: AtomicBool,
    calls: AtomicUsize,
}

impl ControlledFetcher {
    pub fn new(v4: Option<IpAddr>) -> Arc<Self> {
        Arc::new(Self {
            v4: Mutex::new(v4),
            v6: Mutex::new(None),
            sequence: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn sequence() -> Arc<Self> {
        let fetcher = Self::new(None);
        fetcher.sequence.store(true, Ordering::SeqCst);
        fetcher
    }

    pub fn set_v4(&self, ip: Option<IpAddr>) {
        *self.v4.lock().unwrap() = ip;
    }

    pub fn set_v6(&self, ip: Option<IpAddr>) {
        *self.v6.lock().unwrap() = ip;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn answer(&self, slot: &Mutex<Option<IpAddr>>) -> Result<ResolvedIp> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.sequence.load(Ordering::SeqCst) {
            let last = (n % 250) as u8 + 1;
            return Ok(ResolvedIp::new(
                IpAddr::from([203, 0, 113, last]),
                IpOrigin::Remote("sequence".into()),
            ));
        }
        slot.lock()
            .unwrap()
            .map(|ip| ResolvedIp::new(ip, IpOrigin::Remote("controlled".into())))
            .ok_or_else(|| Error::no_address("controlled fetcher has no address"))
    }
}

#[async_trait::async_trait]
impl PublicIpFetcher for ControlledFetcher {
    async fn ip(&self) -> Result<ResolvedIp> {
        self.answer(&self.v4)
    }

    async fn ip4(&self) -> Result<ResolvedIp> {
        self.answer(&self.v4)
    }

    async fn ip6(&self) -> Result<ResolvedIp> {
        self.answer(&self.v6)
    }
}

/// A lookup client returning whatever the test publishes
#[derive(Default)]
pub struct MockLookup {
    published: Mutex<Vec<IpAddr>>,
    fail: AtomicBool,
    calls: AtomicUsize,
}

impl MockLookup {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn publishing(ips: &[IpAddr]) -> Arc<Self> {
        let lookup = Self::new();
        lookup.publish(ips);
        lookup
    }

    pub fn publish(&self, ips: &[IpAddr]) {
        *self.published.lock().unwrap() = ips.to_vec();
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl DnsLookup for MockLookup {
    async fn lookup(&self, _hostname: &str, _version: IpVersion) -> Result<Vec<IpAddr>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::dns_lookup("SERVFAIL"));
        }
        Ok(self.published.lock().unwrap().clone())
    }
}

/// How the mock provider answers
#[derive(Debug, Clone, Copy)]
pub enum Reply {
    /// Confirm the requested address
    Echo,
    /// Confirm a fixed address regardless of the request
    Confirm(IpAddr),
    /// Reject credentials
    Auth,
    /// Transport failure
    Network,
}

/// A mock DnsProvider that tracks calls and concurrency
pub struct MockDnsProvider {
    reply: Mutex<Reply>,
    delay: Mutex<Duration>,
    lookup_allowed: bool,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    requested: Mutex<Vec<IpAddr>>,
}

impl MockDnsProvider {
    pub fn new(reply: Reply) -> Arc<Self> {
        Arc::new(Self::build(reply, true))
    }

    /// A provider that publishes something other than what it is sent
    pub fn proxied(reply: Reply) -> Arc<Self> {
        Arc::new(Self::build(reply, false))
    }

    fn build(reply: Reply, lookup_allowed: bool) -> Self {
        Self {
            reply: Mutex::new(reply),
            delay: Mutex::new(Duration::ZERO),
            lookup_allowed,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        *self.delay.lock().unwrap() = delay;
        self
    }

    pub fn set_reply(&self, reply: Reply) {
        *self.reply.lock().unwrap() = reply;
    }

    /// Number of update() calls
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent update() calls observed
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Addresses passed to update(), in order
    pub fn requested(&self) -> Vec<IpAddr> {
        self.requested.lock().unwrap().clone()
    }
}

/// Decrements the in-flight counter even when the call is cancelled
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl DnsProvider for MockDnsProvider {
    async fn update(&self, ip: IpAddr) -> Result<IpAddr> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().unwrap().push(ip);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let reply = *self.reply.lock().unwrap();
        match reply {
            Reply::Echo => Ok(ip),
            Reply::Confirm(confirmed) => Ok(confirmed),
            Reply::Auth => Err(Error::auth("invalid token")),
            Reply::Network => Err(Error::http("connection reset")),
        }
    }

    fn validate(&self) -> Result<()> {
        Ok(())
    }

    fn describe(&self) -> ProviderDescription {
        ProviderDescription::new("mock")
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }

    fn supports_dns_lookup(&self) -> bool {
        self.lookup_allowed
    }
}

/// A state store that counts calls, backed by the memory store
///
/// `set_failing` rejects every write.
/// `with_write_delay` makes `update` hang before committing, to model a
/// slow disk that shutdown cannot interrupt.
pub struct MockStateStore {
    inner: MemoryStateStore,
    write_delay: Mutex<Duration>,
    failing: AtomicBool,
    writes: AtomicUsize,
    flushes: AtomicUsize,
}

impl MockStateStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStateStore::new(50),
            write_delay: Mutex::new(Duration::ZERO),
            failing: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
            flushes: AtomicUsize::new(0),
        })
    }

    pub fn with_write_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        *self.write_delay.lock().unwrap() = delay;
        self
    }

    /// Make every later update() fail like a full disk
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Committed update() calls
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    /// Seed a record as up to date at `ip` (one success history entry)
    pub async fn seed_up_to_date(&self, id: &RecordId, ip: IpAddr) {
        self.inner.update(id, StateUpdate::success(ip)).await.unwrap();
    }

    /// Seed a record as failed after being up to date at `ip`
    pub async fn seed_failed(&self, id: &RecordId, ip: IpAddr) {
        self.seed_up_to_date(id, ip).await;
        self.inner
            .update(id, StateUpdate::failure(ip, &Error::http("timeout")))
            .await
            .unwrap();
    }

    pub async fn state(&self, id: &RecordId) -> RecordState {
        self.inner.select(id).await.unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl StateStore for MockStateStore {
    async fn select(&self, id: &RecordId) -> Result<RecordState> {
        self.inner.select(id).await
    }

    async fn select_all(&self) -> Result<Vec<(RecordId, RecordState)>> {
        self.inner.select_all().await
    }

    async fn update(&self, id: &RecordId, update: StateUpdate) -> Result<()> {
        let delay = *self.write_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::state_store("disk full"));
        }
        self.inner.update(id, update).await?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
